//! Integration tests for the recording session controller
//!
//! These tests drive complete sessions through the public API:
//! - Scripted capture on a manual clock, ticked every 100 ms
//! - Calibration, hysteresis and time accounting end to end
//! - Device loss, permission refusal and pause handling
//! - Metronome clicks bleeding into the microphone
//! - Configuration loading fallbacks

use std::sync::Arc;

use practice_detector::analysis::AudioLabel;
use practice_detector::audio::metronome::{MetronomeHandle, MetronomeScheduler};
use practice_detector::audio::tone::RecordingToneSink;
use practice_detector::clock::{Clock, ManualClock};
use practice_detector::error::SessionError;
use practice_detector::fixtures::parse_script;
use practice_detector::managers::BroadcastChannelManager;
use practice_detector::session::capture::ScriptedCapture;
use practice_detector::session::sink::MemoryChunkSink;
use practice_detector::{AppConfig, RecordingSession, SessionPhase, StopReason};

const TICK_MS: u64 = 100;

fn scripted_session(
    config: &AppConfig,
    script: &str,
    clock: &ManualClock,
) -> (RecordingSession, MemoryChunkSink) {
    let capture = ScriptedCapture::new(parse_script(script).unwrap(), Arc::new(clock.clone()));
    let sink = MemoryChunkSink::new();
    let session = RecordingSession::new(config, Box::new(capture), Box::new(sink.clone()));
    (session, sink)
}

fn config_with_calibration(calibration_ms: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.session.calibration_ms = calibration_ms;
    config
}

/// Ten seconds: two of room tone, five of piano, three of room tone
#[test]
fn test_ten_second_practice_session() {
    let config = config_with_calibration(2_000);
    let clock = ManualClock::new(0);
    let (mut session, sink) =
        scripted_session(&config, "ambient:2000,piano:5000,ambient:3000", &clock);

    session.start(clock.now_ms()).unwrap();
    while clock.now_ms() < 10_000 {
        let now = clock.advance(TICK_MS);
        let state = session.tick(now).unwrap();
        if now < 2_000 {
            assert!(state.is_calibrating, "still calibrating at {}", now);
            assert_eq!(state.practice_ms, 0);
        }
    }
    let summary = session.stop(clock.now_ms()).unwrap();

    assert_eq!(summary.total_time_ms, 10_000);
    assert!(
        (4_800..=5_200).contains(&summary.practice_time_ms),
        "practice {} ms should be about 5 s",
        summary.practice_time_ms
    );
    assert!(summary.practice_time_ms <= summary.total_time_ms);
    assert_eq!(summary.stop_reason, StopReason::UserStopped);
    assert!(sink.is_finalized());
    assert!(summary.artifact_ref.is_some());
}

#[test]
fn test_room_tone_only_never_counts() {
    let config = config_with_calibration(1_000);
    let clock = ManualClock::new(0);
    let (mut session, _sink) = scripted_session(&config, "ambient:3000,noise:3000", &clock);

    session.start(0).unwrap();
    while clock.now_ms() < 6_000 {
        session.tick(clock.advance(TICK_MS)).unwrap();
    }
    let state = session.state();
    assert_eq!(state.total_ms, 6_000);
    assert_eq!(state.practice_ms, 0);
    assert!(!state.instrument_detected);
}

#[test]
fn test_calibrated_floor_sits_above_room_tone() {
    let config = config_with_calibration(1_500);
    let clock = ManualClock::new(0);
    let (mut session, _sink) = scripted_session(&config, "ambient:1500,voice:1000", &clock);

    session.start(0).unwrap();
    let mut room_levels = Vec::new();
    while clock.now_ms() < 1_500 {
        let state = session.tick(clock.advance(TICK_MS)).unwrap();
        if state.is_calibrating {
            room_levels.push(state.current_decibel);
        }
    }
    let floor = session.noise_floor_db().unwrap();
    let loudest = room_levels.iter().copied().fold(f32::MIN, f32::max);
    assert!(!room_levels.is_empty());
    assert!(floor <= loudest + 2.0 + 1e-3, "floor {} loudest {}", floor, loudest);
    assert!(floor > loudest - 10.0, "floor {} loudest {}", floor, loudest);

    let state = session.tick(clock.advance(TICK_MS)).unwrap();
    assert_eq!(state.last_label, Some(AudioLabel::Voice));
}

#[test]
fn test_device_loss_keeps_partial_recording() {
    let config = config_with_calibration(0);
    let clock = ManualClock::new(0);
    let capture = ScriptedCapture::new(parse_script("piano:8000").unwrap(), Arc::new(clock.clone()))
        .losing_device_at(3_000);
    let sink = MemoryChunkSink::new();
    let mut session = RecordingSession::new(&config, Box::new(capture), Box::new(sink.clone()));

    session.start(0).unwrap();
    while clock.now_ms() < 4_000 {
        session.tick(clock.advance(TICK_MS)).unwrap();
    }

    assert_eq!(session.phase(), SessionPhase::Stopped);
    let summary = session.summary().cloned().unwrap();
    assert_eq!(summary.stop_reason, StopReason::DeviceLost);
    assert_eq!(summary.total_time_ms, 3_000);
    assert!(summary.artifact_ref.is_some());
    assert!(sink.is_finalized());
    assert!(!sink.bytes().is_empty());
    assert_eq!(session.stop(4_000), Err(SessionError::AlreadyStopped));
}

#[test]
fn test_permission_refusal_is_terminal() {
    let config = config_with_calibration(0);
    let clock = ManualClock::new(0);
    let capture = ScriptedCapture::new(parse_script("piano:2000").unwrap(), Arc::new(clock.clone()))
        .denying();
    let mut session = RecordingSession::new(&config, Box::new(capture), Box::new(MemoryChunkSink::new()));

    assert_eq!(session.start(0), Err(SessionError::PermissionDenied));
    for _ in 0..5 {
        let state = session.tick(clock.advance(TICK_MS)).unwrap();
        assert_eq!(state.phase, SessionPhase::Denied);
        assert_eq!(state.total_ms, 0);
    }
    assert!(session.request_permission().is_err());
    assert_eq!(session.phase(), SessionPhase::Denied);
}

#[test]
fn test_pause_excludes_paused_time() {
    let config = config_with_calibration(0);
    let clock = ManualClock::new(0);
    let (mut session, _sink) = scripted_session(&config, "piano:20000", &clock);

    session.start(0).unwrap();
    while clock.now_ms() < 4_000 {
        session.tick(clock.advance(TICK_MS)).unwrap();
    }
    session.pause(clock.now_ms()).unwrap();
    let before = session.state();

    while clock.now_ms() < 9_000 {
        session.tick(clock.advance(TICK_MS)).unwrap();
    }
    session.resume(clock.now_ms()).unwrap();
    while clock.now_ms() < 12_000 {
        session.tick(clock.advance(TICK_MS)).unwrap();
    }
    let summary = session.stop(clock.now_ms()).unwrap();

    assert_eq!(summary.total_time_ms, before.total_ms + 3_000);
    assert!(summary.practice_time_ms > before.practice_ms);
    assert!(summary.practice_time_ms <= summary.total_time_ms);
}

#[test]
fn test_metronome_clicks_never_count_as_practice() {
    let mut config = config_with_calibration(1_000);
    // Beats on whole multiples of 500 ms so they line up with analysis ticks
    config.metronome.start_delay_secs = 0.0;
    let clock = ManualClock::new(0);
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let tones = RecordingToneSink::new();
    let metronome = MetronomeHandle::new(MetronomeScheduler::new(
        &config.metronome,
        Box::new(tones.clone()),
        Arc::clone(&shared_clock),
    ));

    let channels = BroadcastChannelManager::new();
    let classification_tx = channels.init_classification();
    let mut labels = channels.subscribe_classification().unwrap();
    let capture = ScriptedCapture::new(
        parse_script("ambient:1000,click:4000").unwrap(),
        Arc::clone(&shared_clock),
    );
    let mut session = RecordingSession::new(&config, Box::new(capture), Box::new(MemoryChunkSink::new()))
        .with_metronome(metronome.clone())
        .with_classification_sender(classification_tx);

    metronome.start().unwrap();
    session.start(0).unwrap();
    while clock.now_ms() < 5_000 {
        let now = clock.advance(25);
        tones.set_time(now as f64 / 1000.0);
        metronome.poll().unwrap();
        if now % TICK_MS == 0 {
            session.tick(now).unwrap();
        }
    }

    let mut seen = 0;
    while let Ok(result) = labels.try_recv() {
        seen += 1;
        assert_ne!(result.label, AudioLabel::PianoPlaying, "at {}", result.timestamp_ms);
        assert_ne!(result.label, AudioLabel::Voice, "at {}", result.timestamp_ms);
    }
    assert!(seen > 0);
    assert_eq!(session.practice_ms(), 0);
    assert!(!tones.tones().is_empty());

    session.stop(clock.now_ms()).unwrap();
    assert!(!metronome.is_playing());
}

#[test]
fn test_config_file_fallbacks() {
    let dir = std::env::temp_dir().join(format!("practice-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let partial = dir.join("partial.json");
    std::fs::write(&partial, r#"{"session": {"calibration_ms": 2500}}"#).unwrap();
    let config = AppConfig::load_from_file(&partial);
    assert_eq!(config.session.calibration_ms, 2_500);
    assert_eq!(config.tracker, AppConfig::default().tracker);

    let broken = dir.join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert_eq!(AppConfig::load_from_file(&broken), AppConfig::default());

    assert_eq!(
        AppConfig::load_from_file(dir.join("missing.json")),
        AppConfig::default()
    );
    let _ = std::fs::remove_dir_all(&dir);
}

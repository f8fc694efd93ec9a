//! Metronome - lookahead click scheduling on a precise output clock
//!
//! The scheduler is polled on a coarse timer (25 ms by default) and places
//! every tone that falls inside the lookahead horizon on the `ToneSink`'s own
//! clock, so timer jitter never reaches the audible click.
//! Key features:
//! - Beat log: every scheduled tone is recorded for the beat-masking stage
//! - Accent on beat 0 of the bar, quieter subdivision clicks
//! - Compound 6/8 counts eighth-note pulses
//! - Setters apply immediately and publish a `MetronomeState`

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audio::beat_log::{BeatLog, BeatLogReader, BeatTimestamp};
use crate::audio::tone::{
    ScheduledTone, ToneSink, ACCENT_PRESET, BEAT_PRESET, SUBDIVISION_PRESET,
};
use crate::clock::Clock;
use crate::config::MetronomeConfig;
use crate::error::{log_capture_error, CaptureError};

/// Tempo limits (BPM)
pub const MIN_BPM: u32 = 20;
pub const MAX_BPM: u32 = 240;

/// Subdivision limits (clicks per counted pulse)
pub const MIN_SUBDIVISION: u32 = 1;
pub const MAX_SUBDIVISION: u32 = 4;

/// Supported time signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeSignature {
    #[serde(rename = "2/4")]
    TwoFour,
    #[serde(rename = "3/4")]
    ThreeFour,
    #[default]
    #[serde(rename = "4/4")]
    FourFour,
    #[serde(rename = "5/8")]
    FiveEight,
    #[serde(rename = "6/8")]
    SixEight,
    #[serde(rename = "7/8")]
    SevenEight,
}

impl TimeSignature {
    pub fn beats_per_bar(self) -> u32 {
        match self {
            TimeSignature::TwoFour => 2,
            TimeSignature::ThreeFour => 3,
            TimeSignature::FourFour => 4,
            TimeSignature::FiveEight => 5,
            TimeSignature::SixEight => 6,
            TimeSignature::SevenEight => 7,
        }
    }

    /// Counted pulses per tempo beat
    ///
    /// 6/8 is felt in dotted quarters, so its eighth-note pulses run at twice
    /// the tempo. Every other signature counts one pulse per beat.
    pub fn pulse_divisor(self) -> u32 {
        match self {
            TimeSignature::SixEight => 2,
            _ => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeSignature::TwoFour => "2/4",
            TimeSignature::ThreeFour => "3/4",
            TimeSignature::FourFour => "4/4",
            TimeSignature::FiveEight => "5/8",
            TimeSignature::SixEight => "6/8",
            TimeSignature::SevenEight => "7/8",
        }
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeSignature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2/4" => Ok(TimeSignature::TwoFour),
            "3/4" => Ok(TimeSignature::ThreeFour),
            "4/4" => Ok(TimeSignature::FourFour),
            "5/8" => Ok(TimeSignature::FiveEight),
            "6/8" => Ok(TimeSignature::SixEight),
            "7/8" => Ok(TimeSignature::SevenEight),
            other => Err(format!("unsupported time signature '{}'", other)),
        }
    }
}

/// Published after every state change
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetronomeState {
    pub is_playing: bool,
    pub bpm: u32,
    pub time_signature: TimeSignature,
    pub subdivision: u32,
    /// Next beat of the bar to be scheduled (0-based)
    pub current_beat: u32,
    pub volume: f32,
}

/// Published once per main beat when it is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatEvent {
    /// Beat within the bar (0-based)
    pub beat_index_in_bar: u32,
    pub is_accent: bool,
    /// Best-effort wall-clock time the beat sounds (ms)
    pub wall_time_ms: u64,
}

/// Lookahead metronome scheduler
///
/// Sole writer of the beat log.
pub struct MetronomeScheduler {
    sink: Box<dyn ToneSink>,
    clock: Arc<dyn Clock>,
    beat_log: BeatLog,
    beats: BeatLogReader,
    lookahead_secs: f64,
    start_delay_secs: f64,

    is_playing: bool,
    bpm: u32,
    time_signature: TimeSignature,
    subdivision: u32,
    volume: f32,

    current_beat: u32,
    current_subdivision: u32,
    next_note_time: f64,

    beat_tx: Option<broadcast::Sender<BeatEvent>>,
    state_tx: Option<broadcast::Sender<MetronomeState>>,
}

impl MetronomeScheduler {
    pub fn new(config: &MetronomeConfig, sink: Box<dyn ToneSink>, clock: Arc<dyn Clock>) -> Self {
        let time_signature = config.time_signature.parse().unwrap_or_else(|err| {
            tracing::warn!("[Metronome] {}, falling back to 4/4", err);
            TimeSignature::FourFour
        });
        let (beat_log, beats) = BeatLog::new(config.beat_log_capacity);

        Self {
            sink,
            clock,
            beat_log,
            beats,
            lookahead_secs: config.lookahead_secs.max(0.0),
            start_delay_secs: config.start_delay_secs.max(0.0),
            is_playing: false,
            bpm: config.bpm.clamp(MIN_BPM, MAX_BPM),
            time_signature,
            subdivision: config.subdivision.clamp(MIN_SUBDIVISION, MAX_SUBDIVISION),
            volume: config.volume.clamp(0.0, 1.0),
            current_beat: 0,
            current_subdivision: 0,
            next_note_time: 0.0,
            beat_tx: None,
            state_tx: None,
        }
    }

    /// Attach notification channels
    pub fn with_notifications(
        mut self,
        beat_tx: broadcast::Sender<BeatEvent>,
        state_tx: broadcast::Sender<MetronomeState>,
    ) -> Self {
        self.beat_tx = Some(beat_tx);
        self.state_tx = Some(state_tx);
        self
    }

    /// Read half of the beat log
    pub fn beat_log(&self) -> BeatLogReader {
        self.beats.clone()
    }

    pub fn state(&self) -> MetronomeState {
        MetronomeState {
            is_playing: self.is_playing,
            bpm: self.bpm,
            time_signature: self.time_signature,
            subdivision: self.subdivision,
            current_beat: self.current_beat,
            volume: self.volume,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Seconds between consecutive scheduled tones
    pub fn note_interval_secs(&self) -> f64 {
        60.0 / self.bpm as f64
            / self.time_signature.pulse_divisor() as f64
            / self.subdivision as f64
    }

    /// Start playback; false if already playing
    pub fn start(&mut self) -> Result<bool, CaptureError> {
        if self.is_playing {
            return Ok(false);
        }
        self.is_playing = true;
        self.current_beat = 0;
        self.current_subdivision = 0;
        self.next_note_time = self.sink.current_time() + self.start_delay_secs;
        tracing::info!(
            "[Metronome] Started at {} BPM, {}, subdivision {}",
            self.bpm,
            self.time_signature,
            self.subdivision
        );
        self.publish_state();
        self.poll()?;
        Ok(true)
    }

    /// Stop playback and cancel tones not yet sounding; false if not playing
    pub fn stop(&mut self) -> bool {
        if !self.is_playing {
            return false;
        }
        self.is_playing = false;
        self.sink.cancel_pending();
        self.beat_log.discard_after(self.sink.current_time());
        self.current_beat = 0;
        self.current_subdivision = 0;
        tracing::info!("[Metronome] Stopped");
        self.publish_state();
        true
    }

    /// Flip playback; returns the new playing flag
    pub fn toggle(&mut self) -> Result<bool, CaptureError> {
        if self.is_playing {
            self.stop();
        } else {
            self.start()?;
        }
        Ok(self.is_playing)
    }

    /// Stop and forget every logged beat
    pub fn dispose(&mut self) {
        self.stop();
        self.beat_log.clear();
    }

    /// Set tempo, clamped to 20-240 BPM; returns the applied value
    pub fn set_tempo(&mut self, bpm: u32) -> u32 {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.publish_state();
        self.bpm
    }

    /// Change the meter, restarting the bar if the current beat no longer fits
    pub fn set_time_signature(&mut self, time_signature: TimeSignature) {
        self.time_signature = time_signature;
        if self.current_beat >= time_signature.beats_per_bar() {
            self.current_beat = 0;
        }
        self.publish_state();
    }

    /// Set subdivision, clamped to 1-4; returns the applied value
    pub fn set_subdivision(&mut self, subdivision: u32) -> u32 {
        self.subdivision = subdivision.clamp(MIN_SUBDIVISION, MAX_SUBDIVISION);
        self.current_subdivision = 0;
        self.publish_state();
        self.subdivision
    }

    /// Set volume, clamped to [0, 1]; returns the applied value
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.publish_state();
        self.volume
    }

    /// Schedule every tone that starts before the lookahead horizon
    ///
    /// Returns the number of tones handed to the sink. Notes whose time has
    /// already passed (the poll loop stalled) are skipped rather than played
    /// late. A lost output device stops playback and reports
    /// `DeviceUnavailable` once.
    pub fn poll(&mut self) -> Result<usize, CaptureError> {
        if !self.is_playing {
            return Ok(0);
        }
        if self.sink.is_lost() {
            self.stop();
            tracing::error!("[Metronome] Output device lost, playback stopped");
            return Err(CaptureError::DeviceUnavailable {
                details: "metronome output device lost".to_string(),
            });
        }

        let now = self.sink.current_time();
        let mut skipped = 0;
        while self.next_note_time < now {
            self.advance_position();
            skipped += 1;
        }
        if skipped > 0 {
            tracing::warn!("[Metronome] Poll fell behind, skipped {} notes", skipped);
            self.publish_state();
        }

        let horizon = now + self.lookahead_secs;
        let mut scheduled = 0;
        while self.next_note_time < horizon {
            self.schedule_note(self.next_note_time)?;
            self.advance_note();
            scheduled += 1;
        }
        Ok(scheduled)
    }

    fn schedule_note(&mut self, time: f64) -> Result<(), CaptureError> {
        let is_main = self.current_subdivision == 0;
        let is_accent = is_main && self.current_beat == 0;
        let preset = if is_accent {
            ACCENT_PRESET
        } else if is_main {
            BEAT_PRESET
        } else {
            SUBDIVISION_PRESET
        };
        self.sink
            .schedule(ScheduledTone::from_preset(preset, time, self.volume))?;

        let wall_time_ms = self.wall_time_ms(time);
        self.beat_log.push(BeatTimestamp {
            time,
            wall_time_ms,
            is_accent,
        });

        if is_main {
            if let Some(tx) = &self.beat_tx {
                // No subscribers is fine
                let _ = tx.send(BeatEvent {
                    beat_index_in_bar: self.current_beat,
                    is_accent,
                    wall_time_ms,
                });
            }
        }
        Ok(())
    }

    fn advance_note(&mut self) {
        if self.advance_position() {
            self.publish_state();
        }
    }

    /// Step to the next note; true when a new main beat begins
    fn advance_position(&mut self) -> bool {
        self.next_note_time += self.note_interval_secs();
        self.current_subdivision += 1;
        if self.current_subdivision >= self.subdivision {
            self.current_subdivision = 0;
            self.current_beat = (self.current_beat + 1) % self.time_signature.beats_per_bar();
            return true;
        }
        false
    }

    /// Map a precise-clock instant onto the wall clock
    fn wall_time_ms(&self, time: f64) -> u64 {
        let offset_ms = (time - self.sink.current_time()) * 1000.0;
        (self.clock.now_ms() as f64 + offset_ms).round().max(0.0) as u64
    }

    fn publish_state(&self) {
        if let Some(tx) = &self.state_tx {
            let _ = tx.send(self.state());
        }
    }
}

/// Cloneable owned handle to one scheduler
///
/// Passed explicitly to every collaborator that needs the metronome.
#[derive(Clone)]
pub struct MetronomeHandle {
    inner: Arc<Mutex<MetronomeScheduler>>,
    beats: BeatLogReader,
}

impl MetronomeHandle {
    pub fn new(scheduler: MetronomeScheduler) -> Self {
        let beats = scheduler.beat_log();
        Self {
            inner: Arc::new(Mutex::new(scheduler)),
            beats,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MetronomeScheduler>, CaptureError> {
        self.inner.lock().map_err(|_| CaptureError::LockPoisoned {
            component: "metronome".to_string(),
        })
    }

    /// Run `f` with exclusive access to the scheduler
    pub fn with_scheduler<R>(
        &self,
        f: impl FnOnce(&mut MetronomeScheduler) -> R,
    ) -> Result<R, CaptureError> {
        let mut guard = self.lock()?;
        Ok(f(&mut *guard))
    }

    pub fn beat_log(&self) -> &BeatLogReader {
        &self.beats
    }

    pub fn state(&self) -> Result<MetronomeState, CaptureError> {
        self.with_scheduler(|s| s.state())
    }

    /// Playing flag; a poisoned scheduler reads as stopped
    pub fn is_playing(&self) -> bool {
        self.lock().map(|s| s.is_playing()).unwrap_or(false)
    }

    pub fn start(&self) -> Result<bool, CaptureError> {
        self.lock()?.start()
    }

    pub fn stop(&self) -> Result<bool, CaptureError> {
        self.with_scheduler(|s| s.stop())
    }

    pub fn toggle(&self) -> Result<bool, CaptureError> {
        self.lock()?.toggle()
    }

    pub fn dispose(&self) -> Result<(), CaptureError> {
        self.with_scheduler(|s| s.dispose())
    }

    pub fn poll(&self) -> Result<usize, CaptureError> {
        self.lock()?.poll()
    }

    pub fn set_tempo(&self, bpm: u32) -> Result<u32, CaptureError> {
        self.with_scheduler(|s| s.set_tempo(bpm))
    }

    pub fn set_time_signature(&self, time_signature: TimeSignature) -> Result<(), CaptureError> {
        self.with_scheduler(|s| s.set_time_signature(time_signature))
    }

    pub fn set_subdivision(&self, subdivision: u32) -> Result<u32, CaptureError> {
        self.with_scheduler(|s| s.set_subdivision(subdivision))
    }

    pub fn set_volume(&self, volume: f32) -> Result<f32, CaptureError> {
        self.with_scheduler(|s| s.set_volume(volume))
    }
}

/// Tokio task polling a scheduler on a fixed cadence
///
/// Dropping the runner aborts the task.
pub struct MetronomeRunner {
    task: Option<JoinHandle<()>>,
}

impl MetronomeRunner {
    /// Spawn the poll loop on the current tokio runtime
    pub fn spawn(handle: MetronomeHandle, poll_interval: Duration) -> Self {
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(err) = handle.poll() {
                    log_capture_error(&err, "metronome poll");
                    if matches!(
                        err,
                        CaptureError::LockPoisoned { .. } | CaptureError::DeviceUnavailable { .. }
                    ) {
                        break;
                    }
                }
            }
        });
        Self { task: Some(task) }
    }

    /// Abort the poll loop
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for MetronomeRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::tone::RecordingToneSink;
    use crate::clock::ManualClock;

    /// Scheduler over an in-memory sink whose clock starts at 0 s / 10_000 ms
    fn scheduler() -> (MetronomeScheduler, RecordingToneSink, ManualClock) {
        let sink = RecordingToneSink::new();
        let clock = ManualClock::new(10_000);
        let scheduler = MetronomeScheduler::new(
            &MetronomeConfig::default(),
            Box::new(sink.clone()),
            Arc::new(clock.clone()),
        );
        (scheduler, sink, clock)
    }

    /// Advance both clocks in 25 ms polls up to `until_secs`
    fn run_until(
        scheduler: &mut MetronomeScheduler,
        sink: &RecordingToneSink,
        clock: &ManualClock,
        until_secs: f64,
    ) {
        while sink.current_time() < until_secs {
            sink.advance(0.025);
            clock.advance(25);
            scheduler.poll().unwrap();
        }
    }

    #[test]
    fn test_time_signature_round_trips_text() {
        for text in ["2/4", "3/4", "4/4", "5/8", "6/8", "7/8"] {
            let sig: TimeSignature = text.parse().unwrap();
            assert_eq!(sig.to_string(), text);
        }
        assert!("9/8".parse::<TimeSignature>().is_err());
        assert_eq!(
            serde_json::to_string(&TimeSignature::SixEight).unwrap(),
            "\"6/8\""
        );
    }

    #[test]
    fn test_beats_per_bar() {
        assert_eq!(TimeSignature::TwoFour.beats_per_bar(), 2);
        assert_eq!(TimeSignature::FiveEight.beats_per_bar(), 5);
        assert_eq!(TimeSignature::SevenEight.beats_per_bar(), 7);
    }

    #[test]
    fn test_start_schedules_first_accent_after_delay() {
        let (mut scheduler, sink, _clock) = scheduler();
        assert!(scheduler.start().unwrap());

        let tones = sink.tones();
        assert_eq!(tones.len(), 1);
        assert!((tones[0].start_time - 0.05).abs() < 1e-9);
        assert_eq!(tones[0].frequency_hz, ACCENT_PRESET.frequency_hz);
        assert!((tones[0].peak_amplitude - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_120_bpm_spacing_and_accents() {
        let (mut scheduler, sink, clock) = scheduler();
        scheduler.start().unwrap();
        run_until(&mut scheduler, &sink, &clock, 4.0);

        let beats = scheduler.beat_log().snapshot();
        assert!(beats.len() >= 8);
        for pair in beats.windows(2) {
            assert!((pair[1].time - pair[0].time - 0.5).abs() < 1e-9);
            assert_eq!(pair[1].wall_time_ms - pair[0].wall_time_ms, 500);
        }
        for (i, beat) in beats.iter().enumerate() {
            assert_eq!(beat.is_accent, i % 4 == 0, "beat {}", i);
        }
        // First beat sounds 50 ms after start on the wall clock too
        assert_eq!(beats[0].wall_time_ms, 10_050);
    }

    #[test]
    fn test_never_schedules_past_horizon() {
        let (mut scheduler, sink, clock) = scheduler();
        scheduler.start().unwrap();
        run_until(&mut scheduler, &sink, &clock, 1.0);

        let horizon = sink.current_time() + 0.1;
        assert!(sink.tones().iter().all(|t| t.start_time < horizon));
    }

    #[test]
    fn test_subdivision_clicks_are_quieter() {
        let (mut scheduler, sink, clock) = scheduler();
        scheduler.set_subdivision(2);
        scheduler.start().unwrap();
        run_until(&mut scheduler, &sink, &clock, 1.0);

        let tones = sink.tones();
        assert!((tones[1].start_time - tones[0].start_time - 0.25).abs() < 1e-9);
        assert_eq!(tones[1].frequency_hz, SUBDIVISION_PRESET.frequency_hz);
        assert_eq!(tones[2].frequency_hz, BEAT_PRESET.frequency_hz);
    }

    #[test]
    fn test_six_eight_counts_eighth_pulses() {
        let (mut scheduler, _sink, _clock) = scheduler();
        scheduler.set_time_signature(TimeSignature::SixEight);
        assert!((scheduler.note_interval_secs() - 0.25).abs() < 1e-12);
        scheduler.set_subdivision(2);
        assert!((scheduler.note_interval_secs() - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_time_signature_change_clamps_beat_index() {
        let (mut scheduler, sink, clock) = scheduler();
        scheduler.start().unwrap();
        // Beats 0, 1 and 2 scheduled; beat 3 is next
        run_until(&mut scheduler, &sink, &clock, 1.0);
        assert_eq!(scheduler.state().current_beat, 3);

        scheduler.set_time_signature(TimeSignature::ThreeFour);
        assert_eq!(scheduler.state().current_beat, 0);
    }

    #[test]
    fn test_time_signature_change_keeps_fitting_index() {
        let (mut scheduler, sink, clock) = scheduler();
        scheduler.start().unwrap();
        run_until(&mut scheduler, &sink, &clock, 0.5);
        assert_eq!(scheduler.state().current_beat, 2);

        scheduler.set_time_signature(TimeSignature::ThreeFour);
        assert_eq!(scheduler.state().current_beat, 2);
    }

    #[test]
    fn test_tempo_is_clamped() {
        let (mut scheduler, _sink, _clock) = scheduler();
        assert_eq!(scheduler.set_tempo(300), 240);
        assert_eq!(scheduler.state().bpm, 240);
        assert_eq!(scheduler.set_tempo(5), 20);
        assert_eq!(scheduler.state().bpm, 20);
    }

    #[test]
    fn test_subdivision_and_volume_are_clamped() {
        let (mut scheduler, _sink, _clock) = scheduler();
        assert_eq!(scheduler.set_subdivision(0), 1);
        assert_eq!(scheduler.set_subdivision(9), 4);
        assert_eq!(scheduler.set_volume(1.5), 1.0);
        assert_eq!(scheduler.set_volume(-0.5), 0.0);
        assert_eq!(scheduler.set_volume(f32::NAN), 0.0);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let (mut scheduler, sink, _clock) = scheduler();
        assert!(scheduler.start().unwrap());
        assert!(!scheduler.start().unwrap());
        assert_eq!(sink.tones().len(), 1, "second start must not reschedule");

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert!(!scheduler.is_playing());
    }

    #[test]
    fn test_stop_cancels_pending_tones() {
        let (mut scheduler, sink, clock) = scheduler();
        scheduler.start().unwrap();
        run_until(&mut scheduler, &sink, &clock, 0.5);
        // 0.55 s tone is queued but not sounding yet
        assert_eq!(sink.tones().len(), 2);

        scheduler.stop();
        let tones = sink.tones();
        assert_eq!(tones.len(), 1);
        assert!((tones[0].start_time - 0.05).abs() < 1e-9);
        assert_eq!(scheduler.beat_log().len(), 1);
        assert_eq!(scheduler.state().current_beat, 0);
    }

    #[test]
    fn test_poll_while_stopped_schedules_nothing() {
        let (mut scheduler, sink, _clock) = scheduler();
        sink.advance(5.0);
        assert_eq!(scheduler.poll().unwrap(), 0);
        assert!(sink.tones().is_empty());
    }

    #[test]
    fn test_stalled_poll_skips_missed_notes() {
        let (scheduler, sink, clock) = scheduler();
        let (beat_tx, mut beat_rx) = broadcast::channel(16);
        let (state_tx, _state_rx) = broadcast::channel(16);
        let mut scheduler = scheduler.with_notifications(beat_tx, state_tx);
        scheduler.start().unwrap();

        // Nothing polled for two seconds
        sink.advance(2.0);
        clock.advance(2_000);
        assert_eq!(scheduler.poll().unwrap(), 1);

        let times: Vec<f64> = sink.tones().iter().map(|t| t.start_time).collect();
        assert_eq!(times.len(), 2, "{:?}", times);
        assert!((times[1] - 2.05).abs() < 1e-9);
        // The bar position kept moving: 2.05 s is beat one of the next bar
        assert_eq!(sink.tones()[1].frequency_hz, ACCENT_PRESET.frequency_hz);
        assert!(scheduler
            .beat_log()
            .snapshot()
            .iter()
            .all(|b| b.time < 0.1 || b.time >= 2.0));

        let mut events = 0;
        while beat_rx.try_recv().is_ok() {
            events += 1;
        }
        assert_eq!(events, 2);
    }

    #[test]
    fn test_lost_output_stops_playback() {
        let (mut scheduler, sink, clock) = scheduler();
        scheduler.start().unwrap();
        run_until(&mut scheduler, &sink, &clock, 0.5);

        sink.set_lost(true);
        assert!(matches!(
            scheduler.poll(),
            Err(CaptureError::DeviceUnavailable { .. })
        ));
        assert!(!scheduler.is_playing());
        // The queued 0.55 s tone never sounds
        assert_eq!(sink.tones().len(), 1);
        assert_eq!(scheduler.beat_log().len(), 1);
        assert_eq!(scheduler.poll().unwrap(), 0);
    }

    #[test]
    fn test_toggle_and_dispose() {
        let (mut scheduler, _sink, _clock) = scheduler();
        assert!(scheduler.toggle().unwrap());
        assert!(!scheduler.toggle().unwrap());
        scheduler.start().unwrap();
        scheduler.dispose();
        assert!(!scheduler.is_playing());
        assert!(scheduler.beat_log().is_empty());
    }

    #[test]
    fn test_beat_events_and_state_are_published() {
        let (scheduler, sink, clock) = scheduler();
        let (beat_tx, mut beat_rx) = broadcast::channel(16);
        let (state_tx, mut state_rx) = broadcast::channel(16);
        let mut scheduler = scheduler.with_notifications(beat_tx, state_tx);

        scheduler.set_tempo(60);
        assert_eq!(state_rx.try_recv().unwrap().bpm, 60);

        scheduler.start().unwrap();
        run_until(&mut scheduler, &sink, &clock, 1.2);

        let first = beat_rx.try_recv().unwrap();
        assert_eq!(first.beat_index_in_bar, 0);
        assert!(first.is_accent);
        let second = beat_rx.try_recv().unwrap();
        assert_eq!(second.beat_index_in_bar, 1);
        assert!(!second.is_accent);
        assert_eq!(second.wall_time_ms - first.wall_time_ms, 1_000);

        let mut saw_playing = false;
        while let Ok(state) = state_rx.try_recv() {
            saw_playing |= state.is_playing;
        }
        assert!(saw_playing);
    }

    #[test]
    fn test_unknown_configured_signature_falls_back() {
        let config = MetronomeConfig {
            time_signature: "11/8".to_string(),
            ..MetronomeConfig::default()
        };
        let scheduler = MetronomeScheduler::new(
            &config,
            Box::new(RecordingToneSink::new()),
            Arc::new(ManualClock::new(0)),
        );
        assert_eq!(scheduler.state().time_signature, TimeSignature::FourFour);
    }

    #[test]
    fn test_handle_shares_scheduler() {
        let (scheduler, _sink, _clock) = scheduler();
        let handle = MetronomeHandle::new(scheduler);
        let other = handle.clone();

        assert!(handle.start().unwrap());
        assert!(other.is_playing());
        assert_eq!(other.beat_log().len(), 1);
        assert_eq!(other.set_tempo(250).unwrap(), 240);
        assert_eq!(handle.state().unwrap().bpm, 240);
        assert!(other.stop().unwrap());
        assert!(!handle.is_playing());
    }
}

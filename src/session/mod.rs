// Session module - capture/recording session controller
//
// A RecordingSession owns one capture device, one chunk sink, one Analyzer and
// one PracticeTracker for its lifetime. Each `tick` pulls the latest frame,
// encodes fresh samples, then either calibrates the noise floor or classifies
// the frame and feeds the tracker.
//
// Lifecycle:
//   Uninitialized --request_permission--> Ready --start--> Recording <-> Paused
//   Recording/Paused --stop--> Stopped (artifact) | --discard--> Stopped (none)
//   any request refused --> Denied (only a new request_permission leaves it)
//
// Total time includes the calibration window; practice time never does.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub mod calibration;
pub mod capture;
pub mod runner;
pub mod sink;

use crate::analysis::features::AudioFrame;
use crate::analysis::{AnalysisContext, Analyzer, AudioLabel, ClassificationResult, PracticeTracker};
use crate::audio::metronome::MetronomeHandle;
use crate::config::{AppConfig, SessionConfig};
use crate::error::{log_capture_error, log_session_error, CaptureError, ErrorCode, SessionError};
use calibration::NoiseFloorCalibrator;
use capture::{CaptureDevice, CaptureOptions};
use sink::{encode_pcm16, ArtifactHandle, ChunkSink};

pub use runner::SessionRunner;

/// Lifecycle phase of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Ready,
    Recording,
    Paused,
    Stopped,
    Denied,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Ready => "ready",
            SessionPhase::Recording => "recording",
            SessionPhase::Paused => "paused",
            SessionPhase::Stopped => "stopped",
            SessionPhase::Denied => "denied",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    UserStopped,
    DeviceLost,
    /// The chunk sink kept refusing appends
    SinkFailed,
    Discarded,
}

/// Aggregate snapshot published to the UI after every tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub total_ms: u64,
    pub practice_ms: u64,
    pub noise_floor_db: Option<f32>,
    pub is_calibrating: bool,
    pub current_decibel: f32,
    pub peak_volume: f32,
    /// Instrument heard with enough confidence on the latest frame
    pub instrument_detected: bool,
    pub last_label: Option<AudioLabel>,
    pub last_confidence: f32,
    pub level_bands: Vec<f32>,
    pub error_message: Option<String>,
    pub artifact: Option<ArtifactHandle>,
}

/// Final record handed to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub piece_id: Option<String>,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub total_time_ms: u64,
    pub practice_time_ms: u64,
    pub artifact_ref: Option<ArtifactHandle>,
    pub stop_reason: StopReason,
}

/// Capture/recording session controller
pub struct RecordingSession {
    config: SessionConfig,
    options: CaptureOptions,
    confidence_threshold: f32,
    analyzer: Analyzer,
    tracker: PracticeTracker,
    calibrator: NoiseFloorCalibrator,
    device: Box<dyn CaptureDevice>,
    sink: Box<dyn ChunkSink>,
    metronome: Option<MetronomeHandle>,
    classification_tx: Option<broadcast::Sender<ClassificationResult>>,
    piece_id: Option<String>,

    phase: SessionPhase,
    start_ms: u64,
    last_tick_ms: u64,
    paused_at_ms: u64,
    total_ms: u64,
    calibration_end_ms: u64,
    is_calibrating: bool,
    noise_floor_db: Option<f32>,
    skip_fresh: bool,
    pending_pcm: Vec<f32>,
    last_chunk_ms: u64,
    sink_failures: u32,

    current_decibel: f32,
    peak_volume: f32,
    instrument_detected: bool,
    last_label: Option<AudioLabel>,
    last_confidence: f32,
    level_bands: Vec<f32>,
    error_message: Option<String>,
    artifact: Option<ArtifactHandle>,
    summary: Option<SessionSummary>,
}

impl RecordingSession {
    pub fn new(config: &AppConfig, device: Box<dyn CaptureDevice>, sink: Box<dyn ChunkSink>) -> Self {
        Self {
            config: config.session.clone(),
            options: CaptureOptions::raw(&config.capture),
            confidence_threshold: config.tracker.confidence_threshold,
            analyzer: Analyzer::new(&config.features, &config.classifier),
            tracker: PracticeTracker::new(config.tracker.clone()),
            calibrator: NoiseFloorCalibrator::from_config(&config.session),
            device,
            sink,
            metronome: None,
            classification_tx: None,
            piece_id: None,
            phase: SessionPhase::Uninitialized,
            start_ms: 0,
            last_tick_ms: 0,
            paused_at_ms: 0,
            total_ms: 0,
            calibration_end_ms: 0,
            is_calibrating: false,
            noise_floor_db: None,
            skip_fresh: false,
            pending_pcm: Vec::new(),
            last_chunk_ms: 0,
            sink_failures: 0,
            current_decibel: 0.0,
            peak_volume: 0.0,
            instrument_detected: false,
            last_label: None,
            last_confidence: 0.0,
            level_bands: Vec::new(),
            error_message: None,
            artifact: None,
            summary: None,
        }
    }

    /// Metronome whose beats inform classification; stopped with the session
    pub fn with_metronome(mut self, metronome: MetronomeHandle) -> Self {
        self.metronome = Some(metronome);
        self
    }

    pub fn has_metronome(&self) -> bool {
        self.metronome.is_some()
    }

    /// Publish every classification result
    pub fn with_classification_sender(mut self, tx: broadcast::Sender<ClassificationResult>) -> Self {
        self.classification_tx = Some(tx);
        self
    }

    pub fn with_piece_id(mut self, piece_id: impl Into<String>) -> Self {
        self.piece_id = Some(piece_id.into());
        self
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }

    pub fn practice_ms(&self) -> u64 {
        self.tracker.practice_ms()
    }

    pub fn noise_floor_db(&self) -> Option<f32> {
        self.noise_floor_db
    }

    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    fn invalid(&self, operation: &str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.phase.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Acquire the capture device with raw, unprocessed constraints
    pub fn request_permission(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Ready => return Ok(()),
            SessionPhase::Uninitialized | SessionPhase::Denied => {}
            _ => return Err(self.invalid("request permission")),
        }

        match self.device.request(&self.options) {
            Ok(()) => {
                tracing::info!("[Session] Capture device acquired");
                self.phase = SessionPhase::Ready;
                self.error_message = None;
                Ok(())
            }
            Err(err) => {
                log_capture_error(&err, "request_permission");
                self.error_message = Some(err.message());
                if err == CaptureError::PermissionDenied {
                    self.phase = SessionPhase::Denied;
                }
                Err(err.into())
            }
        }
    }

    /// Begin a fresh recording; calibration runs first
    pub fn start(&mut self, now_ms: u64) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Ready => {}
            SessionPhase::Uninitialized => self.request_permission()?,
            SessionPhase::Denied => return Err(SessionError::PermissionDenied),
            _ => return Err(self.invalid("start")),
        }

        self.sink.begin(self.device.sample_rate())?;

        self.tracker.reset();
        self.calibrator.clear();
        self.total_ms = 0;
        self.start_ms = now_ms;
        self.last_tick_ms = now_ms;
        self.last_chunk_ms = now_ms;
        self.pending_pcm.clear();
        self.sink_failures = 0;
        self.skip_fresh = false;
        self.noise_floor_db = None;
        self.calibration_end_ms = now_ms + self.config.calibration_ms;
        self.is_calibrating = self.config.calibration_ms > 0;
        if !self.is_calibrating {
            self.tracker.rebase(now_ms);
        }
        self.instrument_detected = false;
        self.last_label = None;
        self.last_confidence = 0.0;
        self.artifact = None;
        self.summary = None;
        self.error_message = None;
        self.phase = SessionPhase::Recording;

        tracing::info!(
            "[Session] Recording started (calibrating for {} ms)",
            self.config.calibration_ms
        );
        Ok(())
    }

    /// One analysis step at `now_ms`
    ///
    /// Outside Recording this only returns the current snapshot. Device loss
    /// stops the session with whatever was encoded so far.
    pub fn tick(&mut self, now_ms: u64) -> Result<SessionState, SessionError> {
        if self.phase != SessionPhase::Recording {
            return Ok(self.state());
        }
        self.total_ms += now_ms.saturating_sub(self.last_tick_ms);
        self.last_tick_ms = now_ms;

        let captured = match self.device.pull() {
            Ok(captured) => captured,
            Err(err) => {
                log_capture_error(&err, "tick");
                self.error_message = Some(err.message());
                self.finish(now_ms, StopReason::DeviceLost);
                return Ok(self.state());
            }
        };

        if let Some(captured) = captured {
            if self.skip_fresh {
                self.skip_fresh = false;
            } else {
                self.pending_pcm.extend_from_slice(&captured.fresh);
            }
            if now_ms.saturating_sub(self.last_chunk_ms) >= self.config.chunk_interval_ms {
                match self.flush_chunk() {
                    Ok(()) => {
                        self.sink_failures = 0;
                        self.last_chunk_ms = now_ms;
                    }
                    Err(err) => {
                        log_session_error(&err, "chunk append");
                        self.error_message = Some(err.message());
                        self.sink_failures += 1;
                        if self.sink_failures >= self.config.max_sink_failures {
                            tracing::error!(
                                "[Session] Chunk sink failed {} times in a row, stopping",
                                self.sink_failures
                            );
                            self.finish(now_ms, StopReason::SinkFailed);
                            return Ok(self.state());
                        }
                    }
                }
            }
            self.process_frame(&captured.frame, now_ms);
        }

        Ok(self.state())
    }

    fn process_frame(&mut self, frame: &AudioFrame, now_ms: u64) {
        if self.is_calibrating && now_ms >= self.calibration_end_ms {
            self.finish_calibration(now_ms);
        }

        if self.is_calibrating {
            let features = self.analyzer.measure(frame);
            self.calibrator.push(features.decibel);
            self.current_decibel = features.decibel;
            self.peak_volume = features.peak_volume;
            self.level_bands = self.analyzer.level_bands(frame);
            return;
        }

        let (metronome_active, recent_beats) = match &self.metronome {
            Some(metronome) => (
                metronome.is_playing(),
                metronome
                    .beat_log()
                    .recent(frame.captured_at_ms, self.config.beat_window_ms),
            ),
            None => (false, Vec::new()),
        };
        let ctx = AnalysisContext {
            metronome_active,
            recent_beats: &recent_beats,
            noise_floor_db: self.noise_floor_db,
        };
        let result = self.analyzer.analyze(frame, &ctx);
        self.tracker.update(&result, now_ms);

        self.current_decibel = result.features.decibel;
        self.peak_volume = result.features.peak_volume;
        self.level_bands = self.analyzer.level_bands(frame);
        self.last_label = Some(result.label);
        self.last_confidence = result.confidence;
        self.instrument_detected =
            result.label == AudioLabel::PianoPlaying && result.confidence >= self.confidence_threshold;

        if let Some(tx) = &self.classification_tx {
            let _ = tx.send(result);
        }
    }

    fn finish_calibration(&mut self, now_ms: u64) {
        self.is_calibrating = false;
        self.noise_floor_db = self.calibrator.noise_floor();
        self.tracker.rebase(now_ms);
        match self.noise_floor_db {
            Some(floor) => tracing::info!(
                "[Session] Noise floor {:.1} dB from {} frames",
                floor,
                self.calibrator.sample_count()
            ),
            None => tracing::warn!("[Session] Calibration saw no frames, no noise floor"),
        }
    }

    /// Append the pending samples; they stay pending if the sink refuses them
    fn flush_chunk(&mut self) -> Result<(), SessionError> {
        if self.pending_pcm.is_empty() {
            return Ok(());
        }
        let chunk = encode_pcm16(&self.pending_pcm);
        self.sink.append(&chunk)?;
        self.pending_pcm.clear();
        Ok(())
    }

    /// Halt encoding and time accumulation, keeping every value
    pub fn pause(&mut self, now_ms: u64) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Recording {
            return Err(self.invalid("pause"));
        }
        self.total_ms += now_ms.saturating_sub(self.last_tick_ms);
        self.last_tick_ms = now_ms;
        self.paused_at_ms = now_ms;
        self.instrument_detected = false;
        self.phase = SessionPhase::Paused;
        tracing::info!("[Session] Paused at {} ms", self.total_ms);
        Ok(())
    }

    /// Continue after a pause; hysteresis restarts from idle
    pub fn resume(&mut self, now_ms: u64) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Paused {
            return Err(self.invalid("resume"));
        }
        if self.is_calibrating {
            self.calibration_end_ms += now_ms.saturating_sub(self.paused_at_ms);
        }
        self.last_tick_ms = now_ms;
        self.tracker.rebase(now_ms);
        // Audio captured while paused is not part of the recording
        self.skip_fresh = true;
        self.phase = SessionPhase::Recording;
        tracing::info!("[Session] Resumed");
        Ok(())
    }

    /// Finalize the recording and produce the summary
    pub fn stop(&mut self, now_ms: u64) -> Result<SessionSummary, SessionError> {
        match self.phase {
            SessionPhase::Recording | SessionPhase::Paused => {}
            SessionPhase::Stopped => return Err(SessionError::AlreadyStopped),
            _ => return Err(SessionError::NotRecording),
        }
        Ok(self.finish(now_ms, StopReason::UserStopped))
    }

    fn finish(&mut self, now_ms: u64, reason: StopReason) -> SessionSummary {
        if self.phase == SessionPhase::Recording {
            self.total_ms += now_ms.saturating_sub(self.last_tick_ms);
            self.last_tick_ms = now_ms;
        }

        if let Err(err) = self.flush_chunk() {
            log_session_error(&err, "final chunk");
        }
        self.artifact = match self.sink.finalize() {
            Ok(artifact) => Some(artifact),
            Err(err) => {
                log_capture_error(&err, "finalize");
                if self.error_message.is_none() {
                    self.error_message = Some(err.message());
                }
                None
            }
        };
        self.release_resources();

        self.phase = SessionPhase::Stopped;
        self.instrument_detected = false;
        let summary = SessionSummary {
            piece_id: self.piece_id.clone(),
            start_time_ms: self.start_ms,
            end_time_ms: now_ms,
            total_time_ms: self.total_ms,
            practice_time_ms: self.tracker.practice_ms(),
            artifact_ref: self.artifact.clone(),
            stop_reason: reason,
        };
        tracing::info!(
            "[Session] Stopped ({:?}): total {} ms, practice {} ms",
            reason,
            summary.total_time_ms,
            summary.practice_time_ms
        );
        self.summary = Some(summary.clone());
        summary
    }

    fn release_resources(&mut self) {
        self.device.release();
        if let Some(metronome) = &self.metronome {
            if let Err(err) = metronome.stop() {
                log_capture_error(&err, "metronome stop");
            }
        }
    }

    /// Stop without producing an artifact
    pub fn discard(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Recording | SessionPhase::Paused | SessionPhase::Ready => {}
            SessionPhase::Stopped => return Err(SessionError::AlreadyStopped),
            _ => return Err(self.invalid("discard")),
        }
        self.pending_pcm.clear();
        self.sink.discard();
        self.release_resources();
        self.artifact = None;
        self.phase = SessionPhase::Stopped;
        self.instrument_detected = false;
        self.summary = Some(SessionSummary {
            piece_id: self.piece_id.clone(),
            start_time_ms: self.start_ms,
            end_time_ms: self.last_tick_ms,
            total_time_ms: self.total_ms,
            practice_time_ms: self.tracker.practice_ms(),
            artifact_ref: None,
            stop_reason: StopReason::Discarded,
        });
        tracing::info!("[Session] Discarded");
        Ok(())
    }

    /// Zero totals after a stop; the next start re-acquires the device
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Stopped {
            return Err(self.invalid("reset"));
        }
        self.tracker.reset();
        self.calibrator.clear();
        self.total_ms = 0;
        self.noise_floor_db = None;
        self.is_calibrating = false;
        self.current_decibel = 0.0;
        self.peak_volume = 0.0;
        self.last_label = None;
        self.last_confidence = 0.0;
        self.level_bands.clear();
        self.error_message = None;
        self.artifact = None;
        self.summary = None;
        self.phase = SessionPhase::Uninitialized;
        Ok(())
    }

    /// Aggregate snapshot
    pub fn state(&self) -> SessionState {
        SessionState {
            phase: self.phase,
            total_ms: self.total_ms,
            practice_ms: self.tracker.practice_ms(),
            noise_floor_db: self.noise_floor_db,
            is_calibrating: self.is_calibrating,
            current_decibel: self.current_decibel,
            peak_volume: self.peak_volume,
            instrument_detected: self.instrument_detected,
            last_label: self.last_label,
            last_confidence: self.last_confidence,
            level_bands: self.level_bands.clone(),
            error_message: self.error_message.clone(),
            artifact: self.artifact.clone(),
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

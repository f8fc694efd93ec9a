//! Practice time tracker - hysteresis over classification results
//!
//! Separates "is the instrument confidently sounding right now" from "should
//! elapsed time count". Counting starts only after the instrument has been
//! heard for the on-delay, survives gaps shorter than the off-delay, and is
//! halted by a gap past the off-delay or by sustained talking.
//!
//! Every update measures its own wall-clock delta since the previous update,
//! capped at the off-delay so a stalled host under-counts rather than
//! over-counts. Practice time never decreases except through [`PracticeTracker::reset`].

use crate::analysis::{AudioLabel, ClassificationResult};
use crate::config::TrackerConfig;

/// Hysteresis state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Counting,
}

/// Turns a classification stream into monotonic practice time
#[derive(Debug, Clone)]
pub struct PracticeTracker {
    config: TrackerConfig,
    state: TrackerState,
    /// Qualifying instrument time accumulated while idle
    cumulative_ms: u64,
    practice_ms: u64,
    /// Time since the last instrument frame, credited if playing resumes in time
    pending_gap_ms: u64,
    last_update_ms: Option<u64>,
    last_instrument_ms: Option<u64>,
    last_voice_ms: Option<u64>,
    voice_run_start_ms: Option<u64>,
}

impl Default for PracticeTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl PracticeTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: TrackerState::Idle,
            cumulative_ms: 0,
            practice_ms: 0,
            pending_gap_ms: 0,
            last_update_ms: None,
            last_instrument_ms: None,
            last_voice_ms: None,
            voice_run_start_ms: None,
        }
    }

    /// Feed one classification observed at `now_ms`
    ///
    /// # Returns
    /// Practice time in milliseconds after the update
    pub fn update(&mut self, result: &ClassificationResult, now_ms: u64) -> u64 {
        let delta = match self.last_update_ms {
            Some(prev) => now_ms.saturating_sub(prev).min(self.config.off_delay_ms),
            None => 0,
        };
        self.last_update_ms = Some(now_ms);

        let qualifying = result.confidence >= self.config.confidence_threshold;
        match result.label {
            AudioLabel::PianoPlaying if qualifying => self.on_instrument(now_ms, delta),
            AudioLabel::Voice if qualifying => {
                self.on_gap(now_ms, delta);
                self.on_voice(now_ms);
            }
            _ => self.on_gap(now_ms, delta),
        }

        self.practice_ms
    }

    fn on_instrument(&mut self, now_ms: u64, delta: u64) {
        match self.state {
            TrackerState::Idle => {
                // The first frame of a run opens the window without crediting time
                if self.instrument_gap_exceeded(now_ms) {
                    self.cumulative_ms = 0;
                } else {
                    self.cumulative_ms += delta;
                }
                if self.cumulative_ms >= self.config.on_delay_ms {
                    self.state = TrackerState::Counting;
                    self.practice_ms += self.cumulative_ms;
                    self.pending_gap_ms = 0;
                    log::debug!(
                        "[Tracker] Counting started after {} ms of playing",
                        self.cumulative_ms
                    );
                }
            }
            TrackerState::Counting => {
                self.practice_ms += self.pending_gap_ms + delta;
                self.pending_gap_ms = 0;
            }
        }
        self.last_instrument_ms = Some(now_ms);
    }

    fn on_gap(&mut self, now_ms: u64, delta: u64) {
        if !self.instrument_gap_exceeded(now_ms) {
            if self.state == TrackerState::Counting {
                self.pending_gap_ms += delta;
            }
            return;
        }
        match self.state {
            TrackerState::Counting => self.stop_counting("gap exceeded off-delay"),
            TrackerState::Idle => self.cumulative_ms = 0,
        }
    }

    fn on_voice(&mut self, now_ms: u64) {
        let run_expired = self
            .last_voice_ms
            .map(|last| now_ms.saturating_sub(last) > self.config.off_delay_ms)
            .unwrap_or(true);
        if run_expired {
            self.voice_run_start_ms = Some(now_ms);
        }
        self.last_voice_ms = Some(now_ms);

        let run_start = self.voice_run_start_ms.unwrap_or(now_ms);
        if now_ms.saturating_sub(run_start) >= self.config.voice_stop_ms {
            match self.state {
                TrackerState::Counting => self.stop_counting("sustained voice"),
                TrackerState::Idle => self.cumulative_ms = 0,
            }
        }
    }

    fn instrument_gap_exceeded(&self, now_ms: u64) -> bool {
        match self.last_instrument_ms {
            Some(last) => now_ms.saturating_sub(last) > self.config.off_delay_ms,
            None => true,
        }
    }

    fn stop_counting(&mut self, reason: &str) {
        log::debug!(
            "[Tracker] Counting stopped ({}), practice={} ms",
            reason,
            self.practice_ms
        );
        self.state = TrackerState::Idle;
        self.cumulative_ms = 0;
        self.pending_gap_ms = 0;
    }

    /// Restart delta measurement at `now_ms` and drop hysteresis progress
    ///
    /// Used after calibration and on resume. Practice time is preserved.
    pub fn rebase(&mut self, now_ms: u64) {
        self.state = TrackerState::Idle;
        self.cumulative_ms = 0;
        self.pending_gap_ms = 0;
        self.last_update_ms = Some(now_ms);
        self.last_instrument_ms = None;
        self.last_voice_ms = None;
        self.voice_run_start_ms = None;
    }

    /// Zero everything, including practice time
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_counting(&self) -> bool {
        self.state == TrackerState::Counting
    }

    pub fn practice_ms(&self) -> u64 {
        self.practice_ms
    }

    pub fn practice_seconds(&self) -> f64 {
        self.practice_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::AudioFeatures;

    const TICK: u64 = 100;

    fn result(label: AudioLabel, confidence: f32) -> ClassificationResult {
        ClassificationResult {
            label,
            confidence,
            features: AudioFeatures::default(),
            timestamp_ms: 0,
        }
    }

    fn piano() -> ClassificationResult {
        result(AudioLabel::PianoPlaying, 0.9)
    }

    fn silence() -> ClassificationResult {
        result(AudioLabel::Silence, 0.95)
    }

    fn voice() -> ClassificationResult {
        result(AudioLabel::Voice, 0.85)
    }

    /// Feed `label` every tick from `start` (inclusive) to `end` (exclusive)
    fn feed(tracker: &mut PracticeTracker, r: ClassificationResult, start: u64, end: u64) {
        let mut t = start;
        while t < end {
            tracker.update(&r, t);
            t += TICK;
        }
    }

    #[test]
    fn test_on_delay_flips_exactly_at_threshold() {
        let mut tracker = PracticeTracker::default();
        // First frame at t=0 opens the window; t=1400 has 1400 ms accumulated
        feed(&mut tracker, piano(), 0, 1_500);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(tracker.practice_ms(), 0);

        tracker.update(&piano(), 1_500);
        assert_eq!(tracker.state(), TrackerState::Counting);
        assert_eq!(tracker.practice_ms(), 1_500);

        tracker.update(&piano(), 1_600);
        assert_eq!(tracker.practice_ms(), 1_600);
    }

    #[test]
    fn test_low_confidence_never_starts_counting() {
        let mut tracker = PracticeTracker::default();
        feed(&mut tracker, result(AudioLabel::PianoPlaying, 0.69), 0, 5_000);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(tracker.practice_ms(), 0);
    }

    #[test]
    fn test_gap_below_off_delay_keeps_counting() {
        let mut tracker = PracticeTracker::default();
        feed(&mut tracker, piano(), 0, 3_000);
        let last_piano = 2_900;
        assert!(tracker.is_counting());

        // off-delay - 1 tick of silence
        feed(&mut tracker, silence(), last_piano + TICK, last_piano + 1_000);
        assert!(tracker.is_counting());
        // A gap of exactly the off-delay is still tolerated
        tracker.update(&silence(), last_piano + 1_000);
        assert!(tracker.is_counting());

        // Playing resumes and the bridged gap is credited
        let before = tracker.practice_ms();
        tracker.update(&piano(), last_piano + 1_000 + TICK);
        assert_eq!(tracker.practice_ms(), before + 1_000 + TICK);
    }

    #[test]
    fn test_gap_above_off_delay_resets() {
        let mut tracker = PracticeTracker::default();
        feed(&mut tracker, piano(), 0, 3_000);
        let last_piano = 2_900;
        let practice = tracker.practice_ms();

        // off-delay + 1 tick of silence
        feed(&mut tracker, silence(), last_piano + TICK, last_piano + 1_000 + 2 * TICK);
        assert_eq!(tracker.state(), TrackerState::Idle);
        // Unbridged gap is discarded
        assert_eq!(tracker.practice_ms(), practice);

        // Re-entering counting needs the full on-delay again
        let restart = last_piano + 1_200;
        feed(&mut tracker, piano(), restart, restart + 1_500);
        assert_eq!(tracker.state(), TrackerState::Idle);
        tracker.update(&piano(), restart + 1_500);
        assert_eq!(tracker.state(), TrackerState::Counting);
    }

    #[test]
    fn test_idle_accumulation_drops_after_long_gap() {
        let mut tracker = PracticeTracker::default();
        feed(&mut tracker, piano(), 0, 1_000);
        feed(&mut tracker, silence(), 1_000, 2_500);
        feed(&mut tracker, piano(), 2_500, 3_500);
        // 900 ms before the gap and 900 ms after it never combine
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn test_sustained_voice_halts_counting_after_recent_playing() {
        let mut tracker = PracticeTracker::default();
        feed(&mut tracker, piano(), 0, 3_000);
        assert!(tracker.is_counting());

        // Talking interleaved with playing never lets the off-delay expire
        let mut t = 3_000;
        while t < 5_000 {
            tracker.update(&voice(), t);
            tracker.update(&piano(), t + 50);
            t += TICK;
        }
        tracker.update(&voice(), 5_000);
        assert_eq!(tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn test_short_voice_does_not_halt_counting() {
        let mut tracker = PracticeTracker::default();
        feed(&mut tracker, piano(), 0, 3_000);
        feed(&mut tracker, voice(), 3_000, 3_500);
        feed(&mut tracker, piano(), 3_500, 4_000);
        assert!(tracker.is_counting());
    }

    #[test]
    fn test_practice_is_monotonic() {
        let mut tracker = PracticeTracker::default();
        let pattern = [piano(), piano(), silence(), voice(), piano(), silence(), silence()];
        let mut previous = 0;
        for step in 0..600_u64 {
            let r = pattern[(step as usize * 7 / 3) % pattern.len()];
            let practice = tracker.update(&r, step * TICK);
            assert!(practice >= previous, "practice decreased at step {}", step);
            previous = practice;
        }
    }

    #[test]
    fn test_delta_is_capped_at_off_delay() {
        let mut tracker = PracticeTracker::default();
        feed(&mut tracker, piano(), 0, 2_000);
        let before = tracker.practice_ms();
        // A stalled host delivers the next frame 30 s later
        tracker.update(&piano(), 31_900);
        assert!(tracker.practice_ms() - before <= 1_000);
    }

    #[test]
    fn test_rebase_preserves_practice() {
        let mut tracker = PracticeTracker::default();
        feed(&mut tracker, piano(), 0, 2_000);
        let practice = tracker.practice_ms();

        tracker.rebase(60_000);
        assert_eq!(tracker.state(), TrackerState::Idle);
        assert_eq!(tracker.practice_ms(), practice);

        tracker.update(&piano(), 60_000);
        assert_eq!(tracker.practice_ms(), practice);

        tracker.reset();
        assert_eq!(tracker.practice_ms(), 0);
        assert_eq!(tracker.practice_seconds(), 0.0);
    }
}

// Tone - metronome tone presets, the output sink seam and a sine renderer
//
// The scheduler never touches audio buffers itself. It hands ScheduledTones
// to a ToneSink, which owns the precise output clock. The desktop sink
// renders tones with `render_tones` inside the output callback; the recording
// sink keeps them in memory for tests and dry runs.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::CaptureError;

/// Attack time of every tone envelope (seconds)
const ATTACK_SECS: f64 = 0.002;

/// Envelope level reached at the end of a tone
const RELEASE_FLOOR: f64 = 0.001;

/// Frequency, duration and relative amplitude of one kind of click
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonePreset {
    pub frequency_hz: f32,
    pub duration_secs: f64,
    pub amplitude: f32,
}

/// First beat of the bar (A5)
pub const ACCENT_PRESET: TonePreset = TonePreset {
    frequency_hz: 880.0,
    duration_secs: 0.025,
    amplitude: 1.0,
};

/// Other main beats (E5)
pub const BEAT_PRESET: TonePreset = TonePreset {
    frequency_hz: 660.0,
    duration_secs: 0.020,
    amplitude: 0.7,
};

/// Subdivision clicks (A4)
pub const SUBDIVISION_PRESET: TonePreset = TonePreset {
    frequency_hz: 440.0,
    duration_secs: 0.015,
    amplitude: 0.4,
};

/// A sine tone placed on the output clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledTone {
    pub frequency_hz: f32,
    /// Start on the sink's clock (seconds)
    pub start_time: f64,
    pub duration_secs: f64,
    pub peak_amplitude: f32,
}

impl ScheduledTone {
    pub fn from_preset(preset: TonePreset, start_time: f64, volume: f32) -> Self {
        Self {
            frequency_hz: preset.frequency_hz,
            start_time,
            duration_secs: preset.duration_secs,
            peak_amplitude: preset.amplitude * volume.clamp(0.0, 1.0),
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration_secs
    }

    /// Sample value at absolute sink time `t`
    pub fn sample_at(&self, t: f64) -> f32 {
        let local = t - self.start_time;
        if local < 0.0 || local >= self.duration_secs {
            return 0.0;
        }
        let envelope = if local < ATTACK_SECS {
            local / ATTACK_SECS
        } else {
            let decay_len = (self.duration_secs - ATTACK_SECS).max(1e-6);
            RELEASE_FLOOR.powf((local - ATTACK_SECS) / decay_len)
        };
        let phase = 2.0 * PI * self.frequency_hz as f64 * local;
        (self.peak_amplitude as f64 * envelope * phase.sin()) as f32
    }
}

/// Audio output with a precise clock
pub trait ToneSink: Send {
    /// Current time on the output clock (seconds)
    fn current_time(&self) -> f64;

    /// Queue a tone for playback at its start time
    fn schedule(&mut self, tone: ScheduledTone) -> Result<(), CaptureError>;

    /// Drop every queued tone that has not started sounding
    fn cancel_pending(&mut self);

    /// The output device went away; its clock will not advance again
    fn is_lost(&self) -> bool {
        false
    }
}

/// Mix every active tone into a mono buffer starting at `frame_start`
///
/// Finished tones are removed from `voices`.
pub fn render_tones(voices: &mut Vec<ScheduledTone>, frame_start: u64, sample_rate: u32, out: &mut [f32]) {
    let sr = sample_rate.max(1) as f64;
    for (i, sample) in out.iter_mut().enumerate() {
        let t = (frame_start + i as u64) as f64 / sr;
        *sample = voices.iter().map(|tone| tone.sample_at(t)).sum::<f32>().clamp(-1.0, 1.0);
    }
    let buffer_end = (frame_start + out.len() as u64) as f64 / sr;
    voices.retain(|tone| tone.end_time() > buffer_end);
}

/// In-memory sink with a manually advanced clock
///
/// Clones share the same clock and tone list, so a test can keep one clone
/// while the scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingToneSink {
    clock_bits: Arc<AtomicU64>,
    tones: Arc<Mutex<Vec<ScheduledTone>>>,
    lost: Arc<AtomicBool>,
}

impl RecordingToneSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, secs: f64) {
        self.clock_bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set_time(self.current_time() + secs);
    }

    /// Simulate the output device disappearing
    pub fn set_lost(&self, lost: bool) {
        self.lost.store(lost, Ordering::SeqCst);
    }

    /// Every tone still queued or already played
    pub fn tones(&self) -> Vec<ScheduledTone> {
        self.tones.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl ToneSink for RecordingToneSink {
    fn current_time(&self) -> f64 {
        f64::from_bits(self.clock_bits.load(Ordering::SeqCst))
    }

    fn schedule(&mut self, tone: ScheduledTone) -> Result<(), CaptureError> {
        self.tones
            .lock()
            .map_err(|_| CaptureError::LockPoisoned {
                component: "recording tone sink".to_string(),
            })?
            .push(tone);
        Ok(())
    }

    fn cancel_pending(&mut self) {
        let now = self.current_time();
        if let Ok(mut tones) = self.tones.lock() {
            tones.retain(|tone| tone.start_time <= now);
        }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_ordered() {
        assert!(ACCENT_PRESET.frequency_hz > BEAT_PRESET.frequency_hz);
        assert!(BEAT_PRESET.frequency_hz > SUBDIVISION_PRESET.frequency_hz);
        assert!(ACCENT_PRESET.amplitude > BEAT_PRESET.amplitude);
        assert!(BEAT_PRESET.amplitude > SUBDIVISION_PRESET.amplitude);
    }

    #[test]
    fn test_volume_scales_peak() {
        let tone = ScheduledTone::from_preset(BEAT_PRESET, 1.0, 0.5);
        assert!((tone.peak_amplitude - 0.35).abs() < 1e-6);
        assert_eq!(ScheduledTone::from_preset(BEAT_PRESET, 1.0, 3.0).peak_amplitude, 0.7);
    }

    #[test]
    fn test_tone_is_silent_outside_its_window() {
        let tone = ScheduledTone::from_preset(ACCENT_PRESET, 1.0, 1.0);
        assert_eq!(tone.sample_at(0.999), 0.0);
        assert_eq!(tone.sample_at(1.026), 0.0);
        let peak = (0..1_000)
            .map(|i| tone.sample_at(1.0 + i as f64 * 0.000_025).abs())
            .fold(0.0_f32, f32::max);
        assert!(peak > 0.5 && peak <= 1.0, "peak {}", peak);
    }

    #[test]
    fn test_render_places_tone_at_exact_sample() {
        let sample_rate = 48_000;
        let mut voices = vec![ScheduledTone::from_preset(BEAT_PRESET, 0.01, 1.0)];
        let mut out = vec![0.0; 960];
        render_tones(&mut voices, 0, sample_rate, &mut out);

        // 10 ms at 48 kHz is sample 480
        assert!(out[..480].iter().all(|&s| s == 0.0));
        assert!(out[481..].iter().any(|&s| s != 0.0));
        assert_eq!(voices.len(), 1, "tone still sounding past buffer end");

        let mut out = vec![0.0; 960];
        render_tones(&mut voices, 960, sample_rate, &mut out);
        assert!(voices.is_empty());
    }

    #[test]
    fn test_recording_sink_cancels_only_future_tones() {
        let mut sink = RecordingToneSink::new();
        let observer = sink.clone();
        sink.schedule(ScheduledTone::from_preset(BEAT_PRESET, 0.05, 1.0)).unwrap();
        sink.schedule(ScheduledTone::from_preset(BEAT_PRESET, 0.55, 1.0)).unwrap();

        observer.advance(0.1);
        sink.cancel_pending();
        let tones = observer.tones();
        assert_eq!(tones.len(), 1);
        assert_eq!(tones[0].start_time, 0.05);
    }
}

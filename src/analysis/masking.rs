// Beat masking - attenuate frames that coincide with a metronome tone
//
// When the metronome is running, its own clicks reach the microphone. Frames
// captured within the mask window of a logged beat have their spectral bins
// attenuated before feature extraction so a click cannot read as instrument
// or voice. The time-domain buffer is left untouched: the decibel meter and
// calibrated silence test keep reporting the real room level.

use std::borrow::Cow;

use crate::analysis::features::AudioFrame;
use crate::audio::beat_log::{is_near_beat, BeatTimestamp};
use crate::config::ClassifierConfig;

/// Spectral attenuation applied around logged beats
#[derive(Debug, Clone, Copy)]
pub struct BeatMask {
    window_ms: u64,
    attenuation: f32,
}

impl BeatMask {
    pub fn new(window_ms: u64, attenuation: f32) -> Self {
        Self {
            window_ms,
            attenuation: attenuation.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.mask_window_ms, config.mask_attenuation)
    }

    /// True when the frame falls inside the mask window of a beat
    pub fn covers(&self, frame: &AudioFrame, beats: &[BeatTimestamp]) -> bool {
        is_near_beat(beats, frame.captured_at_ms, self.window_ms)
    }

    /// Frame to extract features from
    ///
    /// Borrows the input unchanged unless the metronome is active and the
    /// frame lies within the mask window.
    pub fn apply<'a>(
        &self,
        frame: &'a AudioFrame,
        beats: &[BeatTimestamp],
        metronome_active: bool,
    ) -> Cow<'a, AudioFrame> {
        if !metronome_active || !self.covers(frame, beats) {
            return Cow::Borrowed(frame);
        }

        let mut masked = frame.clone();
        for magnitude in masked.magnitudes.iter_mut() {
            *magnitude *= self.attenuation;
        }
        Cow::Owned(masked)
    }
}

// Classifier - heuristic rule-based practice sound classification
//
// This module implements an ordered decision procedure over AudioFeatures.
// The first matching rule wins:
//
// 1. Silence: masked band energy below the absolute floor, or level within
//    the silence margin of the calibrated noise floor
// 2. Metronome only: metronome running, frame near a logged beat, flat
//    click-like spectrum, low-to-moderate energy
// 3. Voice: energy dominated by 100-2000 Hz, weak highs, speech-range
//    centroid, formant-like harmonicity
// 4. Instrument: strong high/very-high presence with strong harmonicity, or
//    an evenly spread tonal band profile
// 5. Noise otherwise
//
// The classifier is pure. It reads a snapshot of the beat log and never
// writes scheduler or tracker state.

use crate::analysis::features::AudioFeatures;
use crate::analysis::{AudioLabel, ClassificationResult};
use crate::audio::beat_log::{is_near_beat, BeatTimestamp};
use crate::config::ClassifierConfig;

/// Per-frame context the classifier decides against
#[derive(Debug, Clone, Copy)]
pub struct ClassifierContext<'a> {
    /// Metronome is currently scheduling tones
    pub metronome_active: bool,
    /// Snapshot of recently logged beats
    pub recent_beats: &'a [BeatTimestamp],
    /// Wall-clock time of the frame (ms)
    pub frame_time_ms: u64,
    /// Calibrated noise floor in dB, once calibration has finished
    pub noise_floor_db: Option<f32>,
    /// Flatness of the unmasked spectrum; falls back to the feature flatness
    pub click_flatness: Option<f32>,
}

impl<'a> ClassifierContext<'a> {
    /// Context with no metronome and no calibration
    pub fn idle(frame_time_ms: u64) -> Self {
        Self {
            metronome_active: false,
            recent_beats: &[],
            frame_time_ms,
            noise_floor_db: None,
            click_flatness: None,
        }
    }
}

/// Classifier applies heuristic rules to label a frame
pub struct Classifier {
    config: ClassifierConfig,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify one frame
    ///
    /// The returned features are a copy of the input with `is_periodic` set
    /// from the beat-proximity test.
    pub fn classify(&self, features: &AudioFeatures, ctx: &ClassifierContext) -> ClassificationResult {
        let mut features = *features;
        features.is_periodic = self.is_periodic(&features, ctx);
        let (label, confidence) = self.decide(&features, ctx);

        ClassificationResult {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            features,
            timestamp_ms: ctx.frame_time_ms,
        }
    }

    fn decide(&self, f: &AudioFeatures, ctx: &ClassifierContext) -> (AudioLabel, f32) {
        let c = &self.config;

        if self.is_silent(f, ctx) {
            return (AudioLabel::Silence, c.silence_confidence);
        }

        if ctx.metronome_active && f.is_periodic && f.total_energy < c.metronome_max_energy {
            return (AudioLabel::MetronomeOnly, c.metronome_confidence);
        }

        let voice_like = self.is_voice_like(f);
        if voice_like {
            let confidence =
                (0.5 + f.low_mid_ratio * 0.3 + (c.voice_max_high - f.high_ratio)).min(0.9);
            return (AudioLabel::Voice, confidence);
        }

        if (self.has_instrument_profile(f) || self.has_even_spread(f)) && !voice_like {
            let confidence = (0.5
                + f.high_ratio * 0.5
                + f.very_high_ratio
                + f.harmonic_ratio * 0.3)
                .min(0.95);
            return (AudioLabel::PianoPlaying, confidence);
        }

        (AudioLabel::Noise, c.noise_confidence)
    }

    fn is_silent(&self, f: &AudioFeatures, ctx: &ClassifierContext) -> bool {
        if f.total_energy < self.config.silence_energy {
            return true;
        }
        match ctx.noise_floor_db {
            Some(floor) => f.decibel <= floor + self.config.silence_margin_db,
            None => false,
        }
    }

    /// Frame coincides with a logged beat and has a flat click spectrum
    fn is_periodic(&self, f: &AudioFeatures, ctx: &ClassifierContext) -> bool {
        if !ctx.metronome_active {
            return false;
        }
        if !is_near_beat(ctx.recent_beats, ctx.frame_time_ms, self.config.beat_proximity_ms) {
            return false;
        }
        ctx.click_flatness.unwrap_or(f.flatness) > self.config.metronome_min_flatness
    }

    fn is_voice_like(&self, f: &AudioFeatures) -> bool {
        let c = &self.config;
        f.low_mid_ratio > c.voice_min_low_mid
            && f.high_ratio < c.voice_max_high
            && f.centroid_hz > c.voice_min_centroid
            && f.centroid_hz < c.voice_max_centroid
            && f.harmonic_ratio > c.voice_min_harmonic
            && f.harmonic_ratio < c.voice_max_harmonic
    }

    fn has_instrument_profile(&self, f: &AudioFeatures) -> bool {
        let c = &self.config;
        f.high_ratio > c.instrument_min_high
            && f.very_high_ratio > c.instrument_min_very_high
            && f.harmonic_ratio > c.instrument_min_harmonic
    }

    /// Weakest audible band is a meaningful fraction of the strongest
    ///
    /// The configured guards add a minimum audible band count and some tonal
    /// structure, so a single dominant band or broadband noise does not count
    /// as a spread.
    fn has_even_spread(&self, f: &AudioFeatures) -> bool {
        let c = &self.config;
        let audible: Vec<f32> = f
            .bands
            .as_array()
            .into_iter()
            .filter(|&e| e > c.even_spread_band_floor)
            .collect();
        if audible.is_empty() || audible.len() < c.even_spread_min_bands {
            return false;
        }
        let max = audible.iter().cloned().fold(f32::MIN, f32::max);
        let min = audible.iter().cloned().fold(f32::MAX, f32::min);
        max > 1e-10
            && min / max > c.even_spread_min_ratio
            && f.harmonic_ratio >= c.even_spread_min_harmonic
    }
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;

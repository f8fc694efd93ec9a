// Analysis module - per-frame DSP pipeline for practice detection
//
// This module turns captured frames into labelled classification results and
// labelled results into practice time.
//
// Architecture:
// - Analyzer: BeatMask → FeatureExtractor → Classifier, one call per frame
// - PracticeTracker: hysteresis over the stream of ClassificationResults
// - The session controller owns one Analyzer and one PracticeTracker

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod classifier;
pub mod features;
pub mod masking;
pub mod tracker;

use crate::audio::beat_log::BeatTimestamp;
use crate::config::{ClassifierConfig, FeatureConfig};
use classifier::{Classifier, ClassifierContext};
use features::{AudioFeatures, AudioFrame, FeatureExtractor};
use masking::BeatMask;

pub use tracker::{PracticeTracker, TrackerState};

/// What a frame sounds like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AudioLabel {
    /// Instrument sounding
    PianoPlaying,
    /// Speech or singing
    Voice,
    /// Only the metronome's own click
    MetronomeOnly,
    /// Nothing above the noise floor
    Silence,
    /// Non-musical sound (tapping, handling, room noise)
    Noise,
}

impl fmt::Display for AudioLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioLabel::PianoPlaying => "PIANO_PLAYING",
            AudioLabel::Voice => "VOICE",
            AudioLabel::MetronomeOnly => "METRONOME_ONLY",
            AudioLabel::Silence => "SILENCE",
            AudioLabel::Noise => "NOISE",
        };
        f.write_str(name)
    }
}

/// Classification of one frame
///
/// Published to subscribers as-is; consumed immediately by the tracker and
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: AudioLabel,
    /// Classification confidence score (0.0-1.0)
    pub confidence: f32,
    pub features: AudioFeatures,
    /// Wall-clock time of the classified frame (ms)
    pub timestamp_ms: u64,
}

/// Metronome and calibration context for one analysis call
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub metronome_active: bool,
    pub recent_beats: &'a [BeatTimestamp],
    pub noise_floor_db: Option<f32>,
}

impl AnalysisContext<'_> {
    pub fn without_metronome(noise_floor_db: Option<f32>) -> Self {
        Self {
            metronome_active: false,
            recent_beats: &[],
            noise_floor_db,
        }
    }
}

/// Mask, extract and classify in one step
pub struct Analyzer {
    extractor: FeatureExtractor,
    classifier: Classifier,
    mask: BeatMask,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(&FeatureConfig::default(), &ClassifierConfig::default())
    }
}

impl Analyzer {
    pub fn new(features: &FeatureConfig, classifier: &ClassifierConfig) -> Self {
        Self {
            extractor: FeatureExtractor::new(features),
            classifier: Classifier::new(classifier.clone()),
            mask: BeatMask::from_config(classifier),
        }
    }

    /// Classify one frame
    ///
    /// Spectral bins are attenuated around logged beats before extraction;
    /// the click test itself reads the unmasked spectrum.
    pub fn analyze(&self, frame: &AudioFrame, ctx: &AnalysisContext) -> ClassificationResult {
        let masked = self
            .mask
            .apply(frame, ctx.recent_beats, ctx.metronome_active);
        let features = self.extractor.extract(&masked);
        let click_flatness = ctx
            .metronome_active
            .then(|| self.extractor.flatness(frame));

        let classifier_ctx = ClassifierContext {
            metronome_active: ctx.metronome_active,
            recent_beats: ctx.recent_beats,
            frame_time_ms: frame.captured_at_ms,
            noise_floor_db: ctx.noise_floor_db,
            click_flatness,
        };
        self.classifier.classify(&features, &classifier_ctx)
    }

    /// Unmasked features, used while calibrating
    pub fn measure(&self, frame: &AudioFrame) -> AudioFeatures {
        self.extractor.extract(frame)
    }

    /// Display level meter bands for the frame
    pub fn level_bands(&self, frame: &AudioFrame) -> Vec<f32> {
        self.extractor.level_bands(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{frame, FixtureSound};

    fn beat(ms: u64) -> BeatTimestamp {
        BeatTimestamp {
            time: ms as f64 / 1000.0,
            wall_time_ms: ms,
            is_accent: false,
        }
    }

    #[test]
    fn test_label_serializes_screaming_case() {
        let json = serde_json::to_string(&AudioLabel::PianoPlaying).unwrap();
        assert_eq!(json, "\"PIANO_PLAYING\"");
        assert_eq!(AudioLabel::MetronomeOnly.to_string(), "METRONOME_ONLY");
    }

    #[test]
    fn test_masked_click_is_never_instrument() {
        let analyzer = Analyzer::default();
        let beats = [beat(10_000)];
        let ctx = AnalysisContext {
            metronome_active: true,
            recent_beats: &beats,
            noise_floor_db: None,
        };
        for offset in [0_u64, 10, 20, 25] {
            let result = analyzer.analyze(&frame(FixtureSound::Click, 10_000 + offset), &ctx);
            assert_ne!(result.label, AudioLabel::PianoPlaying);
            assert_ne!(result.label, AudioLabel::Voice);
        }
    }

    #[test]
    fn test_click_just_outside_mask_is_metronome_only() {
        let analyzer = Analyzer::default();
        let beats = [beat(10_000)];
        let ctx = AnalysisContext {
            metronome_active: true,
            recent_beats: &beats,
            noise_floor_db: None,
        };
        let result = analyzer.analyze(&frame(FixtureSound::Click, 10_028), &ctx);
        assert_eq!(result.label, AudioLabel::MetronomeOnly);
        assert!(result.features.is_periodic);
        assert!((result.confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_masking_keeps_decibel_meter_raw() {
        let analyzer = Analyzer::default();
        let beats = [beat(5_000)];
        let ctx = AnalysisContext {
            metronome_active: true,
            recent_beats: &beats,
            noise_floor_db: None,
        };
        let piano = frame(FixtureSound::Piano, 5_000);
        let masked = analyzer.analyze(&piano, &ctx);
        let unmasked = analyzer.measure(&piano);
        assert!(masked.features.total_energy < unmasked.total_energy * 0.2);
        assert_eq!(masked.features.decibel, unmasked.decibel);
    }

    #[test]
    fn test_piano_classifies_without_metronome() {
        let analyzer = Analyzer::default();
        let result = analyzer.analyze(
            &frame(FixtureSound::Piano, 1_000),
            &AnalysisContext::without_metronome(Some(27.0)),
        );
        assert_eq!(result.label, AudioLabel::PianoPlaying);
        assert_eq!(result.timestamp_ms, 1_000);
    }
}

// FeatureExtractor - DSP feature extraction for practice detection
//
// This module turns one AudioFrame into the compact feature vector the
// classifier decides on. Extraction is pure and deterministic: the same frame
// always yields the same features, and degenerate (all-zero) frames yield
// finite zeros instead of NaN.
//
// Module organization:
// - types: Data structures (AudioFrame, AudioFeatures, BandEnergies)
// - fft: FFT computation with windowing and level-scale mapping
// - spectral: Frequency-domain features (flatness, centroid, harmonicity, bands)
// - temporal: Time-domain levels (decibel, peak meter)
// - mod.rs: Coordinator (FeatureExtractor)
//
// References:
// - Peeters, G. (2004). A large set of audio features for sound description
// - Lerch, A. (2012). An Introduction to Audio Content Analysis

mod fft;
mod spectral;
mod temporal;
mod types;

pub use fft::{FftProcessor, FFT_SIZE};
pub use spectral::BAND_EDGES_HZ;
pub use types::{AudioFeatures, AudioFrame, BandEnergies};

use crate::config::FeatureConfig;
use spectral::SpectralFeatures;
use temporal::TemporalFeatures;

/// FeatureExtractor coordinates DSP feature extraction
pub struct FeatureExtractor {
    spectral_features: SpectralFeatures,
    temporal_features: TemporalFeatures,
    level_band_count: usize,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(&FeatureConfig::default())
    }
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            spectral_features: SpectralFeatures::new(config.analysis_min_hz, config.analysis_max_hz),
            temporal_features: TemporalFeatures::new(config.decibel_offset),
            level_band_count: config.level_band_count,
        }
    }

    /// Extract all features from a frame
    ///
    /// Spectral features read `frame.magnitudes`; decibel and peak meter read
    /// `frame.samples`. `is_periodic` is left false, it depends on metronome
    /// context and is decided by the classifier.
    pub fn extract(&self, frame: &AudioFrame) -> AudioFeatures {
        let spectrum = &frame.magnitudes;
        let bin_width = frame.bin_width_hz();

        let bands = self
            .spectral_features
            .compute_band_energies(spectrum, bin_width);
        let total_energy = bands.total();
        let ratio = |part: f32| {
            if total_energy > 1e-10 {
                part / total_energy
            } else {
                0.0
            }
        };

        AudioFeatures {
            flatness: self.spectral_features.compute_flatness(spectrum, bin_width),
            centroid_hz: self.spectral_features.compute_centroid(spectrum, bin_width),
            harmonic_ratio: self
                .spectral_features
                .compute_harmonic_ratio(spectrum, bin_width),
            total_energy,
            low_mid_ratio: ratio(bands.low + bands.mid),
            high_ratio: ratio(bands.high + bands.very_high),
            very_high_ratio: ratio(bands.very_high),
            is_periodic: false,
            bands,
            decibel: self.temporal_features.compute_decibel(&frame.samples),
            peak_volume: self.temporal_features.compute_peak_volume(&frame.samples),
        }
    }

    /// Display level meter bands (0-100) for the frame
    pub fn level_bands(&self, frame: &AudioFrame) -> Vec<f32> {
        self.spectral_features.compute_level_bands(
            &frame.magnitudes,
            frame.bin_width_hz(),
            self.level_band_count,
        )
    }

    /// Spectral flatness only, used for click detection on unmasked spectra
    pub fn flatness(&self, frame: &AudioFrame) -> f32 {
        self.spectral_features
            .compute_flatness(&frame.magnitudes, frame.bin_width_hz())
    }
}

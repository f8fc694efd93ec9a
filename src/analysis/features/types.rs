// Types module - Data structures for audio frames and features
//
// This module defines the core data structures used throughout the feature
// extraction pipeline.

use serde::{Deserialize, Serialize};

/// One polled capture window
///
/// Produced once per analysis tick and never retained. `magnitudes` holds
/// `fft_size / 2` bins on the analyser level scale (0-255, linear in dB
/// between the configured `min_db` and `max_db`), so bin `i` is centred on
/// `i * sample_rate / (2 * magnitudes.len())` Hz.
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    /// Time-domain samples normalized to [-1, 1]
    pub samples: Vec<f32>,
    /// Frequency-domain magnitude bins on the analyser level scale
    pub magnitudes: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Wall-clock capture time in milliseconds
    pub captured_at_ms: u64,
}

impl AudioFrame {
    /// Width of one magnitude bin in Hz
    pub fn bin_width_hz(&self) -> f32 {
        if self.magnitudes.is_empty() {
            return 0.0;
        }
        self.sample_rate as f32 / 2.0 / self.magnitudes.len() as f32
    }
}

/// Mean magnitude of each of the five contiguous analysis bands
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergies {
    /// 20-100 Hz
    pub very_low: f32,
    /// 100-500 Hz
    pub low: f32,
    /// 500-2000 Hz
    pub mid: f32,
    /// 2000-4000 Hz
    pub high: f32,
    /// 4000-8000 Hz
    pub very_high: f32,
}

impl BandEnergies {
    pub fn as_array(&self) -> [f32; 5] {
        [self.very_low, self.low, self.mid, self.high, self.very_high]
    }

    pub fn total(&self) -> f32 {
        self.as_array().iter().sum()
    }
}

/// Features extracted from one audio frame
///
/// Every field is finite for any input, including all-zero frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Spectral flatness (0.0 tonal to 1.0 noise-like) over the analysis band
    pub flatness: f32,

    /// Magnitude-weighted mean frequency in Hz
    pub centroid_hz: f32,

    /// Peak-to-average proxy for harmonicity (0.0 to 1.0)
    pub harmonic_ratio: f32,

    /// Sum of the five band energies
    pub total_energy: f32,

    /// (low + mid) / total
    pub low_mid_ratio: f32,

    /// (high + very high) / total
    pub high_ratio: f32,

    /// very high / total
    pub very_high_ratio: f32,

    /// Frame coincides with a logged metronome beat and looks like a click
    pub is_periodic: bool,

    /// Raw band energies
    pub bands: BandEnergies,

    /// RMS level in dB (0-120)
    pub decibel: f32,

    /// Peak meter value (0-100)
    pub peak_volume: f32,
}

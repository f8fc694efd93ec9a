// Spectral module - Frequency-domain feature extraction
//
// This module computes spectral features from the magnitude bins of an
// AudioFrame. Bins are on the analyser level scale (0-255), which keeps the
// classifier's absolute energy floors meaningful across devices.
//
// References:
// - Peeters, G. (2004). A large set of audio features for sound description
// - Lerch, A. (2012). An Introduction to Audio Content Analysis

use super::types::BandEnergies;

/// Edges of the five analysis bands in Hz; band `i` is `[EDGES[i], EDGES[i + 1])`
pub const BAND_EDGES_HZ: [f32; 6] = [20.0, 100.0, 500.0, 2000.0, 4000.0, 8000.0];

/// Upper edge of the display level meter
const LEVEL_METER_MAX_HZ: f32 = 8000.0;

/// Spectral feature computation functions
pub struct SpectralFeatures {
    analysis_min_hz: f32,
    analysis_max_hz: f32,
}

impl SpectralFeatures {
    /// Create a new spectral features processor
    ///
    /// # Arguments
    /// * `analysis_min_hz` - Lower edge of the flatness/harmonicity band
    /// * `analysis_max_hz` - Upper edge of the flatness/harmonicity band
    pub fn new(analysis_min_hz: f32, analysis_max_hz: f32) -> Self {
        Self {
            analysis_min_hz,
            analysis_max_hz,
        }
    }

    /// Bins whose centre frequency lies in `[lo, hi)`
    fn bin_range(spectrum_len: usize, bin_width: f32, lo: f32, hi: f32) -> std::ops::Range<usize> {
        if bin_width <= 0.0 || spectrum_len == 0 {
            return 0..0;
        }
        let start = (lo / bin_width).ceil() as usize;
        let end = ((hi / bin_width).ceil() as usize).min(spectrum_len);
        start.min(end)..end
    }

    fn analysis_bins<'a>(&self, spectrum: &'a [f32], bin_width: f32) -> &'a [f32] {
        let range = Self::bin_range(
            spectrum.len(),
            bin_width,
            self.analysis_min_hz,
            self.analysis_max_hz,
        );
        &spectrum[range]
    }

    /// Compute spectral centroid (weighted mean frequency)
    ///
    /// Formula: centroid = Σ(f_i × |X[i]|) / Σ|X[i]|
    ///
    /// # Returns
    /// Spectral centroid in Hz, 0 for an empty or silent spectrum
    pub fn compute_centroid(&self, spectrum: &[f32], bin_width: f32) -> f32 {
        let weighted_sum: f32 = spectrum
            .iter()
            .enumerate()
            .map(|(i, &mag)| i as f32 * bin_width * mag)
            .sum();

        let magnitude_sum: f32 = spectrum.iter().sum();

        if magnitude_sum > 1e-10 {
            weighted_sum / magnitude_sum
        } else {
            0.0
        }
    }

    /// Compute spectral flatness (tonality measure)
    ///
    /// Formula: flatness = geometric_mean(|X[i]|) / arithmetic_mean(|X[i]|)
    ///
    /// Computed over the analysis band. Each bin is floored at one level unit
    /// before the log so silent bins do not collapse the geometric mean.
    ///
    /// # Returns
    /// Spectral flatness (0.0 to 1.0)
    pub fn compute_flatness(&self, spectrum: &[f32], bin_width: f32) -> f32 {
        let bins = self.analysis_bins(spectrum, bin_width);
        if bins.is_empty() {
            return 0.0;
        }

        let count = bins.len() as f32;
        let log_sum: f32 = bins.iter().map(|&mag| mag.max(1.0).ln()).sum();
        let arithmetic_mean = bins.iter().map(|&mag| mag.max(1.0)).sum::<f32>() / count;
        let geometric_mean = (log_sum / count).exp();

        if arithmetic_mean > 1e-10 {
            (geometric_mean / arithmetic_mean).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Estimate harmonicity from the peak-to-average ratio of the analysis band
    ///
    /// Tonal sounds have distinct peaks while noise is flat. A ratio of 1
    /// maps to 0 and a ratio of 10 or more maps to 1.
    pub fn compute_harmonic_ratio(&self, spectrum: &[f32], bin_width: f32) -> f32 {
        let bins = self.analysis_bins(spectrum, bin_width);
        if bins.is_empty() {
            return 0.0;
        }

        let avg = bins.iter().sum::<f32>() / bins.len() as f32;
        if avg <= 1e-10 {
            return 0.0;
        }
        let peak = bins.iter().cloned().fold(0.0_f32, f32::max);

        ((peak / avg - 1.0) / 9.0).clamp(0.0, 1.0)
    }

    /// Mean magnitude of each analysis band
    pub fn compute_band_energies(&self, spectrum: &[f32], bin_width: f32) -> BandEnergies {
        let mut means = [0.0_f32; 5];
        for (band, mean) in means.iter_mut().enumerate() {
            let range = Self::bin_range(
                spectrum.len(),
                bin_width,
                BAND_EDGES_HZ[band],
                BAND_EDGES_HZ[band + 1],
            );
            let bins = &spectrum[range];
            if !bins.is_empty() {
                *mean = bins.iter().sum::<f32>() / bins.len() as f32;
            }
        }

        BandEnergies {
            very_low: means[0],
            low: means[1],
            mid: means[2],
            high: means[3],
            very_high: means[4],
        }
    }

    /// Display level meter: `count` equal-width bands over 0-8 kHz, scaled 0-100
    pub fn compute_level_bands(&self, spectrum: &[f32], bin_width: f32, count: usize) -> Vec<f32> {
        if count == 0 {
            return Vec::new();
        }
        let band_hz = LEVEL_METER_MAX_HZ / count as f32;
        (0..count)
            .map(|band| {
                let range = Self::bin_range(
                    spectrum.len(),
                    bin_width,
                    band as f32 * band_hz,
                    (band + 1) as f32 * band_hz,
                );
                let bins = &spectrum[range];
                if bins.is_empty() {
                    0.0
                } else {
                    let mean = bins.iter().sum::<f32>() / bins.len() as f32;
                    (mean / 255.0 * 100.0).clamp(0.0, 100.0)
                }
            })
            .collect()
    }
}

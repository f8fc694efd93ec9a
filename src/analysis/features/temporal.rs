// Temporal module - Time-domain level measurement
//
// These measurements read the raw time-domain buffer. They feed the level
// meter, the noise-floor calibration and the calibrated silence test, and
// are never affected by beat masking.

/// Temporal feature computation functions
pub struct TemporalFeatures {
    decibel_offset: f32,
}

impl TemporalFeatures {
    /// Create a new temporal features processor
    ///
    /// # Arguments
    /// * `decibel_offset` - Offset added to 20·log10(rms)
    pub fn new(decibel_offset: f32) -> Self {
        Self { decibel_offset }
    }

    /// Root-mean-square of normalized samples
    pub fn compute_rms(&self, audio: &[f32]) -> f32 {
        if audio.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = audio.iter().map(|&x| x * x).sum();
        (sum_squares / audio.len() as f32).sqrt()
    }

    /// Level in dB: `20·log10(rms) + offset`, clamped to [0, 120]
    ///
    /// A silent buffer reports 0.
    pub fn compute_decibel(&self, audio: &[f32]) -> f32 {
        let rms = self.compute_rms(audio);
        if rms <= 0.0 {
            return 0.0;
        }
        (20.0 * rms.log10() + self.decibel_offset).clamp(0.0, 120.0)
    }

    /// Peak meter value: peak |x| × 400, clamped to [0, 100]
    pub fn compute_peak_volume(&self, audio: &[f32]) -> f32 {
        let peak = audio.iter().fold(0.0_f32, |acc, &x| acc.max(x.abs()));
        (peak * 400.0).min(100.0)
    }
}

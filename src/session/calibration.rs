// Noise floor calibration from the first seconds of a recording

use crate::config::SessionConfig;

/// Collects frame decibels and derives a fixed noise floor
#[derive(Debug, Clone)]
pub struct NoiseFloorCalibrator {
    percentile: f32,
    margin_db: f32,
    samples: Vec<f32>,
}

impl NoiseFloorCalibrator {
    pub fn new(percentile: f32, margin_db: f32) -> Self {
        Self {
            percentile: percentile.clamp(0.0, 1.0),
            margin_db,
            samples: Vec::new(),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.noise_floor_percentile, config.noise_floor_margin_db)
    }

    pub fn push(&mut self, decibel: f32) {
        if decibel.is_finite() {
            self.samples.push(decibel);
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Percentile sample plus margin, None without samples
    ///
    /// Uses the nearest-rank sample at `floor(len * percentile)`.
    pub fn noise_floor(&self) -> Option<f32> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = sorted.len() as f32 * self.percentile + 1e-4;
        let index = (rank as usize).min(sorted.len() - 1);
        Some(sorted[index] + self.margin_db)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

// FFT module - Fast Fourier Transform computation
//
// This module turns a time-domain capture window into the magnitude bins an
// AudioFrame carries. A Hann window reduces spectral leakage, and linear
// magnitudes are mapped onto the analyser level scale the classifier
// thresholds are expressed in.

use rustfft::{num_complex::Complex, FftPlanner};
use std::sync::{Arc, Mutex};

use super::types::AudioFrame;
use crate::config::FeatureConfig;

/// Default FFT window size for capture frames
pub const FFT_SIZE: usize = 2048;

/// FFT processor that computes magnitude spectra from audio windows
pub struct FftProcessor {
    fft_planner: Arc<Mutex<FftPlanner<f32>>>,
    fft_size: usize,
    /// Hann window for FFT (pre-computed)
    window: Vec<f32>,
    /// Sum of the window, used to normalize magnitudes
    window_gain: f32,
    min_db: f32,
    max_db: f32,
}

impl FftProcessor {
    /// Create a new FFT processor
    ///
    /// # Arguments
    /// * `fft_size` - FFT window size (2048 for capture frames)
    /// * `config` - Level scale bounds
    pub fn new(fft_size: usize, config: &FeatureConfig) -> Self {
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (fft_size as f32 - 1.0)).cos())
            })
            .collect();
        let window_gain = window.iter().sum::<f32>().max(1e-10);

        Self {
            fft_planner: Arc::new(Mutex::new(FftPlanner::new())),
            fft_size,
            window,
            window_gain,
            min_db: config.min_db,
            max_db: config.max_db,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Compute linear magnitude spectrum
    ///
    /// Applies Hann windowing, performs FFT, and returns `fft_size / 2`
    /// positive-frequency magnitudes normalized so a full-scale sine peaks
    /// near 1.0. Short windows are zero-padded.
    pub fn compute_magnitude_spectrum(&self, audio: &[f32]) -> Vec<f32> {
        let mut buffer: Vec<Complex<f32>> = audio
            .iter()
            .take(self.fft_size)
            .zip(self.window.iter())
            .map(|(&sample, &w)| Complex::new(sample * w, 0.0))
            .collect();
        buffer.resize(self.fft_size, Complex::new(0.0, 0.0));

        let fft = match self.fft_planner.lock() {
            Ok(mut planner) => planner.plan_fft_forward(self.fft_size),
            Err(_) => {
                log::error!("FFT planner lock poisoned");
                return vec![0.0; self.fft_size / 2];
            }
        };
        fft.process(&mut buffer);

        let scale = 2.0 / self.window_gain;
        buffer[..self.fft_size / 2]
            .iter()
            .map(|c| c.norm() * scale)
            .collect()
    }

    /// Map linear magnitudes onto the 0-255 analyser level scale
    pub fn to_levels(&self, magnitudes: &[f32]) -> Vec<f32> {
        let range = (self.max_db - self.min_db).max(1e-6);
        magnitudes
            .iter()
            .map(|&mag| {
                if mag <= 1e-10 {
                    return 0.0;
                }
                let db = 20.0 * mag.log10();
                ((db - self.min_db) / range * 255.0).clamp(0.0, 255.0)
            })
            .collect()
    }

    /// Build an AudioFrame from a time-domain window
    pub fn frame(&self, samples: Vec<f32>, sample_rate: u32, captured_at_ms: u64) -> AudioFrame {
        let magnitudes = self.to_levels(&self.compute_magnitude_spectrum(&samples));
        AudioFrame {
            samples,
            magnitudes,
            sample_rate,
            captured_at_ms,
        }
    }
}

//! Configuration management for dynamic parameter tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling fast iteration without recompilation. Every classifier cutoff,
//! hysteresis delay and scheduler constant is an empirically tuned default
//! and can be overridden from the config file while validating against real
//! recordings.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub features: FeatureConfig,
    pub classifier: ClassifierConfig,
    pub tracker: TrackerConfig,
    pub metronome: MetronomeConfig,
    pub session: SessionConfig,
    pub capture: CaptureConfig,
}

/// Feature extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    /// Lower edge of the flatness/harmonicity analysis band (skips near-DC bins)
    pub analysis_min_hz: f32,
    /// Upper edge of the analysis band
    pub analysis_max_hz: f32,
    /// Offset added to 20·log10(rms) so typical room levels land in 0-120
    pub decibel_offset: f32,
    /// dBFS mapped to level 0 of the analyser scale
    pub min_db: f32,
    /// dBFS mapped to level 255 of the analyser scale
    pub max_db: f32,
    /// Number of display bands for the level meter
    pub level_band_count: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            analysis_min_hz: 100.0,
            analysis_max_hz: 8000.0,
            decibel_offset: 90.0,
            min_db: -100.0,
            max_db: -30.0,
            level_band_count: 20,
        }
    }
}

/// Classifier decision thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Total band energy below which a frame is silence
    pub silence_energy: f32,
    /// Decibels above the calibrated noise floor still treated as silence
    pub silence_margin_db: f32,
    pub silence_confidence: f32,
    /// Beat proximity window for metronome-only detection (ms)
    pub beat_proximity_ms: u64,
    pub metronome_min_flatness: f32,
    pub metronome_max_energy: f32,
    pub metronome_confidence: f32,
    pub voice_min_low_mid: f32,
    pub voice_max_high: f32,
    pub voice_min_centroid: f32,
    pub voice_max_centroid: f32,
    pub voice_min_harmonic: f32,
    pub voice_max_harmonic: f32,
    pub instrument_min_high: f32,
    pub instrument_min_very_high: f32,
    pub instrument_min_harmonic: f32,
    /// Bands below this energy are ignored by the even-spread test
    pub even_spread_band_floor: f32,
    /// Minimum weakest/strongest band ratio for an even spread
    pub even_spread_min_ratio: f32,
    /// Extra guard on top of the ratio rule: broadband noise spreads evenly
    /// too, so an even spread also needs this much tonal structure. 0 disables it.
    pub even_spread_min_harmonic: f32,
    /// Extra guard on top of the ratio rule: a lone audible band trivially has
    /// a ratio of 1. Set to 1 to accept it.
    pub even_spread_min_bands: usize,
    pub noise_confidence: f32,
    /// Half-width of the beat mask window (ms)
    pub mask_window_ms: u64,
    /// Gain applied to spectral bins inside the mask window
    pub mask_attenuation: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            silence_energy: 80.0,
            silence_margin_db: 1.0,
            silence_confidence: 0.95,
            beat_proximity_ms: 30,
            metronome_min_flatness: 0.3,
            metronome_max_energy: 150.0,
            metronome_confidence: 0.85,
            voice_min_low_mid: 0.65,
            voice_max_high: 0.25,
            voice_min_centroid: 200.0,
            voice_max_centroid: 2500.0,
            voice_min_harmonic: 0.2,
            voice_max_harmonic: 0.7,
            instrument_min_high: 0.25,
            instrument_min_very_high: 0.08,
            instrument_min_harmonic: 0.3,
            even_spread_band_floor: 10.0,
            even_spread_min_ratio: 0.15,
            even_spread_min_harmonic: 0.15,
            even_spread_min_bands: 2,
            noise_confidence: 0.6,
            mask_window_ms: 25,
            mask_attenuation: 0.1,
        }
    }
}

/// Practice tracker hysteresis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum confidence for a frame to count as instrument or voice
    pub confidence_threshold: f32,
    /// Cumulative qualifying instrument time before counting starts (ms)
    pub on_delay_ms: u64,
    /// Gap without instrument frames that stops counting (ms)
    pub off_delay_ms: u64,
    /// Sustained voice that stops counting (ms)
    pub voice_stop_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            on_delay_ms: 1500,
            off_delay_ms: 1000,
            voice_stop_ms: 2000,
        }
    }
}

/// Metronome scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetronomeConfig {
    pub bpm: u32,
    pub time_signature: String,
    pub subdivision: u32,
    pub volume: f32,
    /// Coarse poll interval of the lookahead loop (ms)
    pub poll_interval_ms: u64,
    /// Scheduling horizon on the precise clock (s)
    pub lookahead_secs: f64,
    /// Delay before the first note after start (s)
    pub start_delay_secs: f64,
    /// Beat timestamp ring capacity
    pub beat_log_capacity: usize,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: 120,
            time_signature: "4/4".to_string(),
            subdivision: 1,
            volume: 0.5,
            poll_interval_ms: 25,
            lookahead_secs: 0.1,
            start_delay_secs: 0.05,
            beat_log_capacity: 50,
        }
    }
}

/// Recording session configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Ambient calibration window at the start of a recording (ms)
    pub calibration_ms: u64,
    /// Percentile of calibration decibels used as the noise floor (0-1)
    pub noise_floor_percentile: f32,
    /// Margin added on top of the percentile (dB)
    pub noise_floor_margin_db: f32,
    /// Analysis tick cadence (ms)
    pub analysis_interval_ms: u64,
    /// Interval between encoded chunk appends (ms)
    pub chunk_interval_ms: u64,
    /// How far back the classifier looks into the beat log (ms)
    pub beat_window_ms: u64,
    /// Consecutive failed chunk appends before the session gives up
    pub max_sink_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            calibration_ms: 1000,
            noise_floor_percentile: 0.9,
            noise_floor_margin_db: 2.0,
            analysis_interval_ms: 100,
            chunk_interval_ms: 1000,
            beat_window_ms: 1000,
            max_sink_failures: 3,
        }
    }
}

/// Capture device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// FFT size for spectral frames
    pub fft_size: usize,
    /// Size of buffer pool for real-time audio transfer
    pub buffer_pool_size: usize,
    /// Size of each audio buffer in samples
    pub buffer_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            buffer_pool_size: 16,
            buffer_size: 2048,
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// Missing fields take their defaults. If the file doesn't exist or the
    /// JSON is invalid, the default configuration is returned.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/practice_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.classifier.silence_energy, 80.0);
        assert_eq!(config.tracker.on_delay_ms, 1500);
        assert_eq!(config.tracker.off_delay_ms, 1000);
        assert_eq!(config.metronome.beat_log_capacity, 50);
        assert_eq!(config.session.calibration_ms, 1000);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"tracker": {"on_delay_ms": 2500}}"#).unwrap();
        assert_eq!(parsed.tracker.on_delay_ms, 2500);
        assert_eq!(parsed.tracker.off_delay_ms, 1000);
        assert_eq!(parsed.metronome.bpm, 120);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/practice_config.json");
        assert_eq!(config, AppConfig::default());
    }
}

// Capture device seam and the scripted fixture device
//
// The session controller only sees `CaptureDevice`. Desktop builds plug in the
// cpal adapter; tests and the `simulate` CLI command plug in ScriptedCapture,
// which plays synthetic fixture frames on a shared clock.

use std::sync::Arc;

use crate::analysis::features::AudioFrame;
use crate::clock::Clock;
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::fixtures::{self, ScriptSegment, FIXTURE_SAMPLE_RATE};

/// Capture constraints requested from the device
///
/// Processing that reshapes the signal is always off: the classifier needs
/// the raw room sound, metronome clicks included.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOptions {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Analysis window handed to the FFT
    pub fft_size: usize,
    pub buffer_count: usize,
    pub buffer_size: usize,
}

impl CaptureOptions {
    /// Unprocessed capture sized from `config`
    pub fn raw(config: &CaptureConfig) -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
            fft_size: config.fft_size,
            buffer_count: config.buffer_pool_size,
            buffer_size: config.buffer_size,
        }
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::raw(&CaptureConfig::default())
    }
}

/// One analysis window plus the samples captured since the previous pull
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: AudioFrame,
    /// Mono samples not yet handed to the encoder
    pub fresh: Vec<f32>,
}

/// Microphone seen by the session controller
pub trait CaptureDevice: Send {
    /// Acquire the device; `PermissionDenied` on refusal
    fn request(&mut self, options: &CaptureOptions) -> Result<(), CaptureError>;

    /// Latest analysis window, `None` while not enough audio has arrived
    ///
    /// `DeviceUnavailable` once the device is gone.
    fn pull(&mut self) -> Result<Option<CapturedFrame>, CaptureError>;

    /// Release the device; safe to call more than once
    fn release(&mut self);

    /// Sample rate of the fresh samples
    fn sample_rate(&self) -> u32;
}

/// Fixture-backed device following a script of sounds on a shared clock
///
/// The script offset is measured from the moment the device is requested.
/// Pulls past the end of the script return `None`.
pub struct ScriptedCapture {
    segments: Vec<ScriptSegment>,
    clock: Arc<dyn Clock>,
    deny_permission: bool,
    lose_device_at_ms: Option<u64>,
    started_at_ms: Option<u64>,
    last_pull_ms: u64,
    released: bool,
}

impl ScriptedCapture {
    pub fn new(segments: Vec<ScriptSegment>, clock: Arc<dyn Clock>) -> Self {
        Self {
            segments,
            clock,
            deny_permission: false,
            lose_device_at_ms: None,
            started_at_ms: None,
            last_pull_ms: 0,
            released: false,
        }
    }

    /// Refuse every permission request
    pub fn denying(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    /// Report the device lost from `offset_ms` into the script onwards
    pub fn losing_device_at(mut self, offset_ms: u64) -> Self {
        self.lose_device_at_ms = Some(offset_ms);
        self
    }

    /// Allow the next request to succeed
    pub fn grant(&mut self) {
        self.deny_permission = false;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Fresh samples covering `elapsed_ms`, cycled from the window
    fn fresh_samples(window: &[f32], elapsed_ms: u64) -> Vec<f32> {
        let count = (elapsed_ms * FIXTURE_SAMPLE_RATE as u64 / 1000) as usize;
        if window.is_empty() {
            return vec![0.0; count];
        }
        window.iter().copied().cycle().take(count).collect()
    }
}

impl CaptureDevice for ScriptedCapture {
    fn request(&mut self, options: &CaptureOptions) -> Result<(), CaptureError> {
        if self.deny_permission {
            tracing::warn!("[ScriptedCapture] Permission refused");
            return Err(CaptureError::PermissionDenied);
        }
        let now = self.clock.now_ms();
        tracing::debug!(
            "[ScriptedCapture] Acquired (echo={}, noise={}, agc={})",
            options.echo_cancellation,
            options.noise_suppression,
            options.auto_gain_control
        );
        self.started_at_ms = Some(now);
        self.last_pull_ms = now;
        self.released = false;
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        let Some(started_at) = self.started_at_ms.filter(|_| !self.released) else {
            return Err(CaptureError::DeviceUnavailable {
                details: "device not acquired".to_string(),
            });
        };
        let now = self.clock.now_ms();
        let offset = now.saturating_sub(started_at);

        if self.lose_device_at_ms.is_some_and(|lost_at| offset >= lost_at) {
            return Err(CaptureError::DeviceUnavailable {
                details: format!("scripted device loss at {} ms", offset),
            });
        }

        let Some(sound) = fixtures::sound_at(&self.segments, offset) else {
            return Ok(None);
        };
        let frame = fixtures::frame(sound, now);
        let fresh = Self::fresh_samples(&frame.samples, now.saturating_sub(self.last_pull_ms));
        self.last_pull_ms = now;
        Ok(Some(CapturedFrame { frame, fresh }))
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn sample_rate(&self) -> u32 {
        FIXTURE_SAMPLE_RATE
    }
}

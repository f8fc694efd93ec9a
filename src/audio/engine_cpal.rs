//! Desktop device adapters over cpal
//!
//! - `CpalCapture`: default input device as a `CaptureDevice`
//! - `CpalToneSink`: default output device as a `ToneSink`
//!
//! Real-time safety:
//! - Input callback only copies into pooled buffers (`buffer_pool`)
//! - Output callback only drains an rtrb command queue and renders tones
//! - No locks or blocking in either callback
//!
//! cpal streams are not `Send`, so each stream lives on its own thread. The
//! thread builds and starts the stream, reports readiness back, then parks
//! until the adapter is released or dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::{Consumer, Producer, RingBuffer};

use super::buffer_pool::{capture_pool, AnalysisSide, CaptureSide};
use super::tone::{render_tones, ScheduledTone, ToneSink};
use crate::analysis::features::FftProcessor;
use crate::clock::Clock;
use crate::config::FeatureConfig;
use crate::error::CaptureError;
use crate::session::capture::{CaptureDevice, CaptureOptions, CapturedFrame};

/// Tone commands queued for the output callback
const TONE_QUEUE_CAPACITY: usize = 256;

/// Voices the output callback can mix at once without reallocating
const MAX_VOICES: usize = 64;

/// Mono render scratch size pre-allocated for the output callback
const RENDER_SCRATCH_FRAMES: usize = 8192;

/// Owner of a cpal stream parked on a dedicated thread
struct StreamThread {
    shutdown: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build a stream on a new thread and wait until it is playing
    ///
    /// Returns the thread and the stream's sample rate.
    fn spawn<F>(name: &str, build: F) -> Result<(Self, u32), CaptureError>
    where
        F: FnOnce() -> Result<(cpal::Stream, u32), CaptureError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, CaptureError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, sample_rate) = match build() {
                    Ok(built) => built,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::StreamOpenFailed {
                        reason: format!("play failed: {}", e),
                    }));
                    return;
                }
                let _ = ready_tx.send(Ok(sample_rate));
                // Parked until shutdown is sent or the sender is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::StreamOpenFailed {
                reason: format!("cannot spawn stream thread: {}", e),
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| CaptureError::StreamOpenFailed {
                reason: "stream thread exited before reporting".to_string(),
            })??;

        Ok((
            Self {
                shutdown: Some(shutdown_tx),
                join: Some(join),
            },
            sample_rate,
        ))
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable {
            details: "device not available".to_string(),
        },
        cpal::BuildStreamError::StreamConfigNotSupported => CaptureError::Unsupported {
            format: "stream config".to_string(),
        },
        other => CaptureError::StreamOpenFailed {
            reason: other.to_string(),
        },
    }
}

/// Stream error callback; device loss is surfaced on the next pull
fn error_callback(
    component: &'static str,
    lost: Arc<AtomicBool>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            lost.store(true, Ordering::SeqCst);
        }
        tracing::error!("[{}] Stream error: {}", component, err);
    }
}

fn build_input_stream(
    mut capture: CaptureSide,
    lost: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable {
            details: "no default input device".to_string(),
        })?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::StreamOpenFailed {
            reason: format!("default input config: {}", e),
        })?;

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;
    tracing::info!(
        "[CpalCapture] Opening '{}' at {} Hz, {} channel(s), {:?}",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        sample_rate,
        channels,
        sample_format
    );

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                capture.push_samples(data, channels);
            },
            error_callback("CpalCapture", lost),
            None,
        ),
        cpal::SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::with_capacity(RENDER_SCRATCH_FRAMES * channels);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| s as f32 / 32_768.0));
                    capture.push_samples(&scratch, channels);
                },
                error_callback("CpalCapture", lost),
                None,
            )
        }
        other => {
            return Err(CaptureError::Unsupported {
                format: format!("{:?}", other),
            })
        }
    }
    .map_err(map_build_error)?;

    Ok((stream, sample_rate))
}

/// Default input device as a capture device
pub struct CpalCapture {
    clock: Arc<dyn Clock>,
    feature_config: FeatureConfig,
    stream: Option<StreamThread>,
    analysis: Option<AnalysisSide>,
    fft: Option<FftProcessor>,
    window: VecDeque<f32>,
    drained: Vec<f32>,
    fresh: Vec<f32>,
    device_lost: Arc<AtomicBool>,
    sample_rate: u32,
}

impl CpalCapture {
    pub fn new(clock: Arc<dyn Clock>, feature_config: &FeatureConfig) -> Self {
        Self {
            clock,
            feature_config: feature_config.clone(),
            stream: None,
            analysis: None,
            fft: None,
            window: VecDeque::new(),
            drained: Vec::new(),
            fresh: Vec::new(),
            device_lost: Arc::new(AtomicBool::new(false)),
            sample_rate: 0,
        }
    }
}

impl CaptureDevice for CpalCapture {
    fn request(&mut self, options: &CaptureOptions) -> Result<(), CaptureError> {
        self.release();
        // cpal exposes no processing switches; desktop inputs are raw already
        tracing::debug!(
            "[CpalCapture] Requested echo={}, noise={}, agc={}",
            options.echo_cancellation,
            options.noise_suppression,
            options.auto_gain_control
        );

        let (capture_side, analysis_side) = capture_pool(options.buffer_count, options.buffer_size);
        self.device_lost.store(false, Ordering::SeqCst);
        let lost = Arc::clone(&self.device_lost);
        let (stream, sample_rate) = StreamThread::spawn("practice-capture", move || {
            build_input_stream(capture_side, lost)
        })?;

        self.stream = Some(stream);
        self.analysis = Some(analysis_side);
        self.fft = Some(FftProcessor::new(options.fft_size, &self.feature_config));
        self.window = VecDeque::with_capacity(options.fft_size);
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn pull(&mut self) -> Result<Option<CapturedFrame>, CaptureError> {
        if self.device_lost.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable {
                details: "input stream reported device loss".to_string(),
            });
        }
        let (Some(analysis), Some(fft)) = (self.analysis.as_mut(), self.fft.as_ref()) else {
            return Err(CaptureError::DeviceUnavailable {
                details: "device not acquired".to_string(),
            });
        };

        self.drained.clear();
        analysis.drain_into(&mut self.drained);
        self.fresh.extend_from_slice(&self.drained);

        let window_len = fft.fft_size();
        self.window.extend(self.drained.iter().copied());
        while self.window.len() > window_len {
            self.window.pop_front();
        }
        if self.window.len() < window_len {
            return Ok(None);
        }

        let samples: Vec<f32> = self.window.iter().copied().collect();
        let frame = fft.frame(samples, self.sample_rate, self.clock.now_ms());
        Ok(Some(CapturedFrame {
            frame,
            fresh: std::mem::take(&mut self.fresh),
        }))
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::info!("[CpalCapture] Released input device");
        }
        self.analysis = None;
        self.window.clear();
        self.fresh.clear();
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Command for the output callback
#[derive(Debug, Clone, Copy)]
enum ToneCommand {
    Play(ScheduledTone),
    CancelPending,
}

fn build_output_stream(
    mut commands: Consumer<ToneCommand>,
    frames: Arc<AtomicU64>,
    lost: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable {
            details: "no default output device".to_string(),
        })?;
    let supported = device
        .default_output_config()
        .map_err(|e| CaptureError::StreamOpenFailed {
            reason: format!("default output config: {}", e),
        })?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        return Err(CaptureError::Unsupported {
            format: format!("{:?} output", supported.sample_format()),
        });
    }

    let config: cpal::StreamConfig = supported.into();
    let channels = (config.channels as usize).max(1);
    let sample_rate = config.sample_rate.0;

    let mut voices: Vec<ScheduledTone> = Vec::with_capacity(MAX_VOICES);
    let mut mono: Vec<f32> = vec![0.0; RENDER_SCRATCH_FRAMES];

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frame_start = frames.load(Ordering::Relaxed);
                let now = frame_start as f64 / sample_rate as f64;
                while let Ok(command) = commands.pop() {
                    match command {
                        ToneCommand::Play(tone) if voices.len() < MAX_VOICES => voices.push(tone),
                        ToneCommand::Play(_) => {}
                        ToneCommand::CancelPending => voices.retain(|t| t.start_time <= now),
                    }
                }

                let frame_count = data.len() / channels;
                if mono.len() < frame_count {
                    mono.resize(frame_count, 0.0);
                }
                render_tones(&mut voices, frame_start, sample_rate, &mut mono[..frame_count]);
                for (frame, &sample) in data.chunks_mut(channels).zip(mono.iter()) {
                    frame.fill(sample);
                }
                frames.fetch_add(frame_count as u64, Ordering::Relaxed);
            },
            error_callback("CpalToneSink", lost),
            None,
        )
        .map_err(map_build_error)?;

    Ok((stream, sample_rate))
}

/// Default output device as a tone sink
///
/// The precise clock is the number of frames the output callback has
/// rendered, divided by the device sample rate.
pub struct CpalToneSink {
    commands: Producer<ToneCommand>,
    frames: Arc<AtomicU64>,
    sample_rate: u32,
    lost: Arc<AtomicBool>,
    _stream: StreamThread,
}

impl CpalToneSink {
    /// Open the default output device
    pub fn open() -> Result<Self, CaptureError> {
        let (commands, consumer) = RingBuffer::new(TONE_QUEUE_CAPACITY);
        let frames = Arc::new(AtomicU64::new(0));
        let lost = Arc::new(AtomicBool::new(false));
        let callback_frames = Arc::clone(&frames);
        let callback_lost = Arc::clone(&lost);
        let (stream, sample_rate) = StreamThread::spawn("practice-metronome", move || {
            build_output_stream(consumer, callback_frames, callback_lost)
        })?;
        tracing::info!("[CpalToneSink] Output running at {} Hz", sample_rate);

        Ok(Self {
            commands,
            frames,
            sample_rate: sample_rate.max(1),
            lost,
            _stream: stream,
        })
    }
}

impl ToneSink for CpalToneSink {
    fn current_time(&self) -> f64 {
        self.frames.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, tone: ScheduledTone) -> Result<(), CaptureError> {
        self.commands
            .push(ToneCommand::Play(tone))
            .map_err(|_| CaptureError::SinkFailed {
                reason: "tone queue full".to_string(),
            })
    }

    fn cancel_pending(&mut self) {
        if self.commands.push(ToneCommand::CancelPending).is_err() {
            tracing::warn!("[CpalToneSink] Tone queue full, cancel dropped");
        }
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

// Encoded chunk sinks - where the session's recording ends up
//
// The session encodes fresh samples as 16-bit little-endian PCM and appends a
// chunk every chunk interval. A sink turns those chunks into an artifact the
// persistence layer can pick up.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// Reference to a finished recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Location understood by the persistence collaborator
    pub uri: String,
    /// Encoded PCM bytes written
    pub bytes: u64,
    pub sample_rate: u32,
    pub duration_ms: u64,
}

/// Destination for encoded PCM chunks
pub trait ChunkSink: Send {
    /// Prepare for a recording at `sample_rate`
    fn begin(&mut self, sample_rate: u32) -> Result<(), CaptureError>;

    /// Append one chunk of 16-bit little-endian PCM
    fn append(&mut self, chunk: &[u8]) -> Result<(), CaptureError>;

    /// Close the recording and hand back its artifact
    fn finalize(&mut self) -> Result<ArtifactHandle, CaptureError>;

    /// Drop everything written so far
    fn discard(&mut self);
}

/// Encode normalized samples as 16-bit little-endian PCM
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = if sample.is_finite() {
            sample.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let value = (clamped * i16::MAX as f32).round() as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn duration_ms(bytes: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (bytes / 2) * 1000 / sample_rate as u64
}

#[derive(Debug, Default)]
struct MemoryRecording {
    chunks: Vec<Vec<u8>>,
    sample_rate: u32,
    finalized: bool,
}

/// In-memory sink; clones share the same recording
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkSink {
    inner: Arc<Mutex<MemoryRecording>>,
}

impl MemoryChunkSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryRecording>, CaptureError> {
        self.inner.lock().map_err(|_| CaptureError::LockPoisoned {
            component: "memory chunk sink".to_string(),
        })
    }

    /// Number of chunks appended
    pub fn chunk_count(&self) -> usize {
        self.lock().map(|r| r.chunks.len()).unwrap_or(0)
    }

    /// Every byte appended, in order
    pub fn bytes(&self) -> Vec<u8> {
        self.lock()
            .map(|r| r.chunks.concat())
            .unwrap_or_default()
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().map(|r| r.finalized).unwrap_or(false)
    }
}

impl ChunkSink for MemoryChunkSink {
    fn begin(&mut self, sample_rate: u32) -> Result<(), CaptureError> {
        let mut recording = self.lock()?;
        *recording = MemoryRecording {
            sample_rate,
            ..MemoryRecording::default()
        };
        Ok(())
    }

    fn append(&mut self, chunk: &[u8]) -> Result<(), CaptureError> {
        let mut recording = self.lock()?;
        if recording.finalized {
            return Err(CaptureError::SinkFailed {
                reason: "append after finalize".to_string(),
            });
        }
        recording.chunks.push(chunk.to_vec());
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArtifactHandle, CaptureError> {
        let mut recording = self.lock()?;
        recording.finalized = true;
        let bytes = recording.chunks.iter().map(|c| c.len() as u64).sum();
        Ok(ArtifactHandle {
            uri: "memory://recording".to_string(),
            bytes,
            sample_rate: recording.sample_rate,
            duration_ms: duration_ms(bytes, recording.sample_rate),
        })
    }

    fn discard(&mut self) {
        if let Ok(mut recording) = self.lock() {
            recording.chunks.clear();
        }
    }
}

/// Mono 16-bit WAV file sink
pub struct WavChunkSink {
    path: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    bytes: u64,
}

impl WavChunkSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            writer: None,
            sample_rate: 0,
            bytes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkSink for WavChunkSink {
    fn begin(&mut self, sample_rate: u32) -> Result<(), CaptureError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec).map_err(|e| {
            CaptureError::SinkFailed {
                reason: format!("cannot create {}: {}", self.path.display(), e),
            }
        })?;
        tracing::info!("[WavChunkSink] Recording to {}", self.path.display());
        self.writer = Some(writer);
        self.sample_rate = sample_rate;
        self.bytes = 0;
        Ok(())
    }

    fn append(&mut self, chunk: &[u8]) -> Result<(), CaptureError> {
        let writer = self.writer.as_mut().ok_or_else(|| CaptureError::SinkFailed {
            reason: "append before begin".to_string(),
        })?;
        for pair in chunk.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| CaptureError::SinkFailed {
                    reason: e.to_string(),
                })?;
        }
        self.bytes += (chunk.len() - chunk.len() % 2) as u64;
        Ok(())
    }

    fn finalize(&mut self) -> Result<ArtifactHandle, CaptureError> {
        let writer = self.writer.take().ok_or_else(|| CaptureError::SinkFailed {
            reason: "finalize before begin".to_string(),
        })?;
        writer.finalize().map_err(|e| CaptureError::SinkFailed {
            reason: e.to_string(),
        })?;
        Ok(ArtifactHandle {
            uri: format!("file://{}", self.path.display()),
            bytes: self.bytes,
            sample_rate: self.sample_rate,
            duration_ms: duration_ms(self.bytes, self.sample_rate),
        })
    }

    fn discard(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("[WavChunkSink] Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

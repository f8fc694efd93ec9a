// Capture error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Capture error code constants
///
/// Error code range: 1001-1006
pub struct CaptureErrorCodes;

impl CaptureErrorCodes {
    /// Microphone permission denied
    pub const PERMISSION_DENIED: i32 = 1001;

    /// Capture device disappeared mid-session
    pub const DEVICE_UNAVAILABLE: i32 = 1002;

    /// Failed to open an audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1003;

    /// Chunk sink or tone output rejected a write
    pub const SINK_FAILED: i32 = 1004;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1005;

    /// Device reported a format the pipeline cannot consume
    pub const UNSUPPORTED: i32 = 1006;
}

/// Log a capture error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_capture_error(err: &CaptureError, context: &str) {
    error!(
        "Capture error in {}: code={}, component=Capture, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Device acquisition, frame polling and artifact sink errors
///
/// Error code range: 1001-1006
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Microphone permission denied
    PermissionDenied,

    /// Capture device disappeared mid-session
    DeviceUnavailable { details: String },

    /// Failed to open an audio stream
    StreamOpenFailed { reason: String },

    /// Chunk sink or tone output rejected a write
    SinkFailed { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Device reported a format the pipeline cannot consume
    Unsupported { format: String },
}

impl ErrorCode for CaptureError {
    fn code(&self) -> i32 {
        match self {
            CaptureError::PermissionDenied => CaptureErrorCodes::PERMISSION_DENIED,
            CaptureError::DeviceUnavailable { .. } => CaptureErrorCodes::DEVICE_UNAVAILABLE,
            CaptureError::StreamOpenFailed { .. } => CaptureErrorCodes::STREAM_OPEN_FAILED,
            CaptureError::SinkFailed { .. } => CaptureErrorCodes::SINK_FAILED,
            CaptureError::LockPoisoned { .. } => CaptureErrorCodes::LOCK_POISONED,
            CaptureError::Unsupported { .. } => CaptureErrorCodes::UNSUPPORTED,
        }
    }

    fn message(&self) -> String {
        match self {
            CaptureError::PermissionDenied => {
                "Microphone permission denied. Allow microphone access and start a new recording."
                    .to_string()
            }
            CaptureError::DeviceUnavailable { details } => {
                format!("Capture device unavailable: {}", details)
            }
            CaptureError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            CaptureError::SinkFailed { reason } => {
                format!("Audio sink failed: {}", reason)
            }
            CaptureError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            CaptureError::Unsupported { format } => {
                format!("Unsupported capture format: {}", format)
            }
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CaptureError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CaptureError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        let errors = [
            CaptureError::PermissionDenied,
            CaptureError::DeviceUnavailable {
                details: "unplugged".into(),
            },
            CaptureError::StreamOpenFailed { reason: "busy".into() },
            CaptureError::SinkFailed { reason: "disk".into() },
            CaptureError::LockPoisoned {
                component: "beat_log".into(),
            },
            CaptureError::Unsupported { format: "I16".into() },
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|c| (1001..=1006).contains(c)));
    }

    #[test]
    fn test_permission_message_is_actionable() {
        let err = CaptureError::PermissionDenied;
        assert!(err.message().contains("Allow microphone access"));
        assert!(err.to_string().contains("1001"));
    }
}

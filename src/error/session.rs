// Session error types and constants

use crate::error::{CaptureError, ErrorCode};
use log::error;
use std::fmt;

/// Session error code constants
///
/// Error code range: 2001-2006
pub struct SessionErrorCodes;

impl SessionErrorCodes {
    /// Lifecycle operation not allowed from the current phase
    pub const INVALID_TRANSITION: i32 = 2001;

    /// Session is in the denied phase
    pub const PERMISSION_DENIED: i32 = 2002;

    /// Underlying capture failure
    pub const CAPTURE: i32 = 2003;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 2004;

    /// Session already stopped or discarded
    pub const ALREADY_STOPPED: i32 = 2005;

    /// Operation requires an active recording
    pub const NOT_RECORDING: i32 = 2006;
}

/// Log a session error with structured context
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=RecordingSession, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Recording session lifecycle errors
///
/// Error code range: 2001-2006
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Lifecycle operation not allowed from the current phase
    InvalidTransition { from: String, operation: String },

    /// Session is in the denied phase; a fresh permission request is required
    PermissionDenied,

    /// Underlying capture failure
    Capture(CaptureError),

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Session already stopped or discarded
    AlreadyStopped,

    /// Operation requires an active recording
    NotRecording,
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::InvalidTransition { .. } => SessionErrorCodes::INVALID_TRANSITION,
            SessionError::PermissionDenied => SessionErrorCodes::PERMISSION_DENIED,
            SessionError::Capture(_) => SessionErrorCodes::CAPTURE,
            SessionError::LockPoisoned { .. } => SessionErrorCodes::LOCK_POISONED,
            SessionError::AlreadyStopped => SessionErrorCodes::ALREADY_STOPPED,
            SessionError::NotRecording => SessionErrorCodes::NOT_RECORDING,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::InvalidTransition { from, operation } => {
                format!("Cannot {} while session is {}", operation, from)
            }
            SessionError::PermissionDenied => {
                "Microphone permission denied. Request permission again to record.".to_string()
            }
            SessionError::Capture(inner) => inner.message(),
            SessionError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            SessionError::AlreadyStopped => "Session already stopped".to_string(),
            SessionError::NotRecording => "Session is not recording".to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Capture(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => SessionError::PermissionDenied,
            other => SessionError::Capture(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_maps_to_session_variant() {
        let err: SessionError = CaptureError::PermissionDenied.into();
        assert_eq!(err, SessionError::PermissionDenied);
        assert_eq!(err.code(), SessionErrorCodes::PERMISSION_DENIED);
    }

    #[test]
    fn test_capture_error_keeps_source() {
        use std::error::Error;
        let err: SessionError = CaptureError::DeviceUnavailable {
            details: "unplugged".into(),
        }
        .into();
        assert_eq!(err.code(), SessionErrorCodes::CAPTURE);
        assert!(err.source().is_some());
        assert!(err.message().contains("unplugged"));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = SessionError::InvalidTransition {
            from: "Stopped".into(),
            operation: "pause".into(),
        };
        assert_eq!(err.message(), "Cannot pause while session is Stopped");
    }
}

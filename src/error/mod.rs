// Error types for the practice detector
//
// This module defines custom error types for capture and session operations,
// providing structured error handling with numeric codes that a host UI can
// map to actionable messages.

mod capture;
mod session;

pub use capture::{log_capture_error, CaptureError, CaptureErrorCodes};
pub use session::{log_session_error, SessionError, SessionErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling for every
/// collaborator that consumes session state.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

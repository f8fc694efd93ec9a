// Practice Detector Core - real-time practice detection engine
// Frame classification, hysteresis practice timing and a lookahead metronome

// Module declarations
pub mod analysis;
pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod managers;
pub mod session;

// Re-exports for convenience
pub use analysis::{AudioLabel, ClassificationResult, PracticeTracker};
pub use audio::metronome::{MetronomeHandle, MetronomeScheduler};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use session::{RecordingSession, SessionPhase, SessionState, SessionSummary, StopReason};

use once_cell::sync::OnceCell;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Initialize structured logging once per process
///
/// Honors `RUST_LOG`; defaults to `info`. Later calls are no-ops, and an
/// already installed global subscriber is left in place.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
            .is_ok()
        {
            tracing::info!("[Logging] Initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
        tracing::debug!("logging still usable");
    }
}

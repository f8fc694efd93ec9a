// Audio module - metronome scheduling, tone output and capture plumbing

pub mod beat_log;
pub mod buffer_pool;
pub mod metronome;
pub mod tone;

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "android"))] {
        pub mod engine_cpal;
        pub use engine_cpal::{CpalCapture, CpalToneSink};
    }
}

// Re-export commonly used types for convenience
pub use beat_log::{BeatLog, BeatLogReader, BeatTimestamp};
pub use buffer_pool::{capture_pool, DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE};
pub use metronome::{
    BeatEvent, MetronomeHandle, MetronomeRunner, MetronomeScheduler, MetronomeState, TimeSignature,
};
pub use tone::{RecordingToneSink, ScheduledTone, ToneSink};

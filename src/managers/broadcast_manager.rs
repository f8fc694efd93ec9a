// BroadcastChannelManager: Centralized tokio broadcast channel management
// Single Responsibility: Broadcast channel lifecycle and subscription

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::analysis::ClassificationResult;
use crate::audio::metronome::{BeatEvent, MetronomeState};
use crate::session::SessionState;

/// Boxed notification stream handed to UI collaborators
pub type EventStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

type Slot<T> = Arc<Mutex<Option<broadcast::Sender<T>>>>;

/// Buffer sizes per channel
const CLASSIFICATION_CAPACITY: usize = 100;
const SESSION_STATE_CAPACITY: usize = 50;
const BEAT_EVENT_CAPACITY: usize = 64;
const METRONOME_STATE_CAPACITY: usize = 32;

/// Manages all tokio broadcast channels
///
/// Single Responsibility: Broadcast channel lifecycle and subscription
///
/// # Channel Types
/// - Classification: per-frame classification results from the analysis loop
/// - Session State: aggregate recording snapshots, one per analysis tick
/// - Beat Events: main metronome beats as they are scheduled
/// - Metronome State: playback state after every setter or transport change
///
/// Clones share the same channels.
#[derive(Clone, Default)]
pub struct BroadcastChannelManager {
    classification: Slot<ClassificationResult>,
    session_state: Slot<SessionState>,
    beat_events: Slot<BeatEvent>,
    metronome_state: Slot<MetronomeState>,
}

fn init_slot<T: Clone>(slot: &Slot<T>, capacity: usize) -> broadcast::Sender<T> {
    let (tx, _) = broadcast::channel(capacity);
    match slot.lock() {
        Ok(mut guard) => *guard = Some(tx.clone()),
        Err(poisoned) => *poisoned.into_inner() = Some(tx.clone()),
    }
    tx
}

fn subscribe_slot<T: Clone>(slot: &Slot<T>) -> Option<broadcast::Receiver<T>> {
    match slot.lock() {
        Ok(guard) => guard.as_ref().map(|tx| tx.subscribe()),
        Err(poisoned) => poisoned.into_inner().as_ref().map(|tx| tx.subscribe()),
    }
}

/// Wrap a receiver as a stream, skipping over lagged gaps
fn stream_of<T: Clone + Send + 'static>(rx: broadcast::Receiver<T>) -> EventStream<T> {
    Box::pin(BroadcastStream::new(rx).filter_map(|item| async move {
        match item {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!("[Broadcast] Subscriber lagged: {}", err);
                None
            }
        }
    }))
}

impl BroadcastChannelManager {
    /// Create a new BroadcastChannelManager with all channels uninitialized
    ///
    /// Channels must be explicitly initialized via init_* methods before use.
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // CLASSIFICATION CHANNEL
    // ========================================================================

    /// Initialize classification broadcast channel
    ///
    /// Returns sender for the analysis loop. Re-initializing replaces the
    /// channel; existing subscribers see it close.
    pub fn init_classification(&self) -> broadcast::Sender<ClassificationResult> {
        init_slot(&self.classification, CLASSIFICATION_CAPACITY)
    }

    /// Subscribe to classification results, None if not initialized
    pub fn subscribe_classification(&self) -> Option<broadcast::Receiver<ClassificationResult>> {
        subscribe_slot(&self.classification)
    }

    pub fn classification_stream(&self) -> Option<EventStream<ClassificationResult>> {
        self.subscribe_classification().map(stream_of)
    }

    // ========================================================================
    // SESSION STATE CHANNEL
    // ========================================================================

    /// Initialize session state broadcast channel
    pub fn init_session_state(&self) -> broadcast::Sender<SessionState> {
        init_slot(&self.session_state, SESSION_STATE_CAPACITY)
    }

    pub fn subscribe_session_state(&self) -> Option<broadcast::Receiver<SessionState>> {
        subscribe_slot(&self.session_state)
    }

    pub fn session_state_stream(&self) -> Option<EventStream<SessionState>> {
        self.subscribe_session_state().map(stream_of)
    }

    // ========================================================================
    // METRONOME CHANNELS
    // ========================================================================

    /// Initialize beat event broadcast channel
    pub fn init_beat_events(&self) -> broadcast::Sender<BeatEvent> {
        init_slot(&self.beat_events, BEAT_EVENT_CAPACITY)
    }

    pub fn subscribe_beat_events(&self) -> Option<broadcast::Receiver<BeatEvent>> {
        subscribe_slot(&self.beat_events)
    }

    pub fn beat_event_stream(&self) -> Option<EventStream<BeatEvent>> {
        self.subscribe_beat_events().map(stream_of)
    }

    /// Initialize metronome state broadcast channel
    pub fn init_metronome_state(&self) -> broadcast::Sender<MetronomeState> {
        init_slot(&self.metronome_state, METRONOME_STATE_CAPACITY)
    }

    pub fn subscribe_metronome_state(&self) -> Option<broadcast::Receiver<MetronomeState>> {
        subscribe_slot(&self.metronome_state)
    }

    pub fn metronome_state_stream(&self) -> Option<EventStream<MetronomeState>> {
        self.subscribe_metronome_state().map(stream_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::features::AudioFeatures;
    use crate::analysis::AudioLabel;

    fn result(timestamp_ms: u64) -> ClassificationResult {
        ClassificationResult {
            label: AudioLabel::PianoPlaying,
            confidence: 0.95,
            features: AudioFeatures::default(),
            timestamp_ms,
        }
    }

    #[test]
    fn test_classification_channel_lifecycle() {
        let manager = BroadcastChannelManager::new();

        // Initially no subscription possible
        assert!(manager.subscribe_classification().is_none());
        assert!(manager.classification_stream().is_none());

        let _tx = manager.init_classification();
        assert!(manager.subscribe_classification().is_some());
    }

    #[test]
    fn test_classification_multiple_subscribers() {
        let manager = BroadcastChannelManager::new();
        let tx = manager.init_classification();

        let mut rx1 = manager.subscribe_classification().unwrap();
        let mut rx2 = manager.subscribe_classification().unwrap();

        tx.send(result(42)).unwrap();

        assert_eq!(rx1.try_recv().unwrap().timestamp_ms, 42);
        assert_eq!(rx2.try_recv().unwrap().timestamp_ms, 42);
    }

    #[test]
    fn test_clones_share_channels() {
        let manager = BroadcastChannelManager::new();
        let other = manager.clone();
        let tx = manager.init_beat_events();

        let mut rx = other.subscribe_beat_events().unwrap();
        tx.send(BeatEvent {
            beat_index_in_bar: 0,
            is_accent: true,
            wall_time_ms: 500,
        })
        .unwrap();
        assert!(rx.try_recv().unwrap().is_accent);
    }

    #[test]
    fn test_stream_yields_sent_values() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let manager = BroadcastChannelManager::new();
            let tx = manager.init_classification();
            let mut stream = manager.classification_stream().unwrap();

            tx.send(result(1)).unwrap();
            tx.send(result(2)).unwrap();
            drop(tx);
            manager.init_classification();

            let first = stream.next().await.unwrap();
            let second = stream.next().await.unwrap();
            assert_eq!((first.timestamp_ms, second.timestamp_ms), (1, 2));
        });
    }

    #[test]
    fn test_default_implementation() {
        let manager = BroadcastChannelManager::default();

        assert!(manager.subscribe_classification().is_none());
        assert!(manager.subscribe_session_state().is_none());
        assert!(manager.subscribe_beat_events().is_none());
        assert!(manager.subscribe_metronome_state().is_none());
    }
}

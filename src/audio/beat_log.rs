// BeatLog - bounded ring of scheduled metronome beats
//
// The scheduler is the only writer. Every other component holds a
// BeatLogReader and only ever receives snapshot copies, so a read can never
// observe a half-written entry.
//
// Ownership:
// - BeatLog: write half, owned by MetronomeScheduler, not Clone
// - BeatLogReader: read half, cheap to clone, handed to the analysis loop

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Default ring capacity
pub const DEFAULT_BEAT_LOG_CAPACITY: usize = 50;

/// One scheduled metronome tone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatTimestamp {
    /// Start time on the output device's precise clock (seconds)
    pub time: f64,
    /// Best-effort wall-clock time the tone sounds (ms since epoch)
    pub wall_time_ms: u64,
    /// First beat of the bar
    pub is_accent: bool,
}

/// True when any beat lies within `tolerance_ms` of `wall_time_ms`
pub fn is_near_beat(beats: &[BeatTimestamp], wall_time_ms: u64, tolerance_ms: u64) -> bool {
    beats
        .iter()
        .any(|beat| beat.wall_time_ms.abs_diff(wall_time_ms) <= tolerance_ms)
}

type SharedRing = Arc<RwLock<VecDeque<BeatTimestamp>>>;

/// Write half of the beat ring
pub struct BeatLog {
    entries: SharedRing,
    capacity: usize,
}

impl BeatLog {
    /// Create a new ring and its first reader
    pub fn new(capacity: usize) -> (Self, BeatLogReader) {
        let capacity = capacity.max(1);
        let entries = Arc::new(RwLock::new(VecDeque::with_capacity(capacity)));
        let reader = BeatLogReader {
            entries: Arc::clone(&entries),
        };
        (Self { entries, capacity }, reader)
    }

    /// Append a beat, evicting the oldest entry when full
    pub fn push(&mut self, beat: BeatTimestamp) {
        match self.entries.write() {
            Ok(mut ring) => {
                while ring.len() >= self.capacity {
                    ring.pop_front();
                }
                ring.push_back(beat);
            }
            Err(_) => log::error!("Beat log lock poisoned, dropping beat at {}", beat.time),
        }
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        if let Ok(mut ring) = self.entries.write() {
            ring.clear();
        }
    }

    /// Drop entries scheduled after `time` on the precise clock
    ///
    /// Used when pending tones are cancelled and will never sound.
    pub fn discard_after(&mut self, time: f64) {
        if let Ok(mut ring) = self.entries.write() {
            ring.retain(|beat| beat.time <= time);
        }
    }

    /// Another reader over the same ring
    pub fn reader(&self) -> BeatLogReader {
        BeatLogReader {
            entries: Arc::clone(&self.entries),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Read half of the beat ring
#[derive(Clone)]
pub struct BeatLogReader {
    entries: SharedRing,
}

impl BeatLogReader {
    /// Copy of every logged beat, oldest first
    pub fn snapshot(&self) -> Vec<BeatTimestamp> {
        match self.entries.read() {
            Ok(ring) => ring.iter().copied().collect(),
            Err(_) => {
                log::error!("Beat log lock poisoned in snapshot");
                Vec::new()
            }
        }
    }

    /// Beats whose wall time is at or after `now_ms - window_ms`
    ///
    /// Tones already scheduled ahead of `now_ms` are included.
    pub fn recent(&self, now_ms: u64, window_ms: u64) -> Vec<BeatTimestamp> {
        let cutoff = now_ms.saturating_sub(window_ms);
        match self.entries.read() {
            Ok(ring) => ring
                .iter()
                .filter(|beat| beat.wall_time_ms >= cutoff)
                .copied()
                .collect(),
            Err(_) => {
                log::error!("Beat log lock poisoned in recent");
                Vec::new()
            }
        }
    }

    /// True when a logged beat lies within `tolerance_ms` of `wall_time_ms`
    pub fn is_near_beat(&self, wall_time_ms: u64, tolerance_ms: u64) -> bool {
        is_near_beat(&self.snapshot(), wall_time_ms, tolerance_ms)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|ring| ring.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beat(wall_time_ms: u64) -> BeatTimestamp {
        BeatTimestamp {
            time: wall_time_ms as f64 / 1000.0,
            wall_time_ms,
            is_accent: false,
        }
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let (mut log, reader) = BeatLog::new(3);
        for t in [100, 200, 300, 400] {
            log.push(beat(t));
        }
        let snapshot = reader.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].wall_time_ms, 200);
        assert_eq!(snapshot[2].wall_time_ms, 400);
    }

    #[test]
    fn test_default_capacity_holds_fifty() {
        let (mut log, reader) = BeatLog::new(DEFAULT_BEAT_LOG_CAPACITY);
        for t in 0..80 {
            log.push(beat(t * 500));
        }
        assert_eq!(reader.len(), 50);
        assert_eq!(reader.snapshot()[0].wall_time_ms, 30 * 500);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let (mut log, reader) = BeatLog::new(10);
        log.push(beat(1_000));
        let snapshot = reader.snapshot();
        log.push(beat(2_000));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(reader.len(), 2);
    }

    #[test]
    fn test_recent_window_includes_scheduled_future_beats() {
        let (mut log, reader) = BeatLog::new(10);
        for t in [8_000, 9_400, 10_000, 10_080] {
            log.push(beat(t));
        }
        let recent = reader.recent(10_000, 1_000);
        let times: Vec<u64> = recent.iter().map(|b| b.wall_time_ms).collect();
        assert_eq!(times, vec![9_400, 10_000, 10_080]);
    }

    #[test]
    fn test_near_beat_tolerance_is_inclusive() {
        let beats = [beat(1_000)];
        assert!(is_near_beat(&beats, 1_025, 25));
        assert!(is_near_beat(&beats, 975, 25));
        assert!(!is_near_beat(&beats, 1_026, 25));
        assert!(!is_near_beat(&[], 1_000, 25));
    }

    #[test]
    fn test_discard_after_drops_cancelled_beats() {
        let (mut log, reader) = BeatLog::new(10);
        for t in [500, 1_000, 1_500] {
            log.push(beat(t));
        }
        log.discard_after(1.0);
        let times: Vec<u64> = reader.snapshot().iter().map(|b| b.wall_time_ms).collect();
        assert_eq!(times, vec![500, 1_000]);
    }
}

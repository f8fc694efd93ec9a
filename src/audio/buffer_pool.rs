// BufferPool - lock-free hand-off of captured samples to the analysis side
//
// Two lock-free SPSC ring buffers carry pre-allocated sample buffers between
// the capture callback and the analysis loop, so the callback never allocates.
//
// Architecture:
// - DATA_QUEUE: capture callback pushes filled buffers, analysis drains them
// - POOL_QUEUE: analysis returns emptied buffers, capture callback recycles
//
// Buffer flow:
// 1. Capture callback pops an empty buffer from POOL_QUEUE
// 2. Capture callback copies the first channel of the input into it
// 3. Capture callback pushes the buffer to DATA_QUEUE
// 4. Analysis pops filled buffers, appends their samples to its window
// 5. Analysis clears each buffer and pushes it back to POOL_QUEUE

use rtrb::{Consumer, Producer, RingBuffer};

/// Configuration constants for buffer pool
pub const DEFAULT_BUFFER_COUNT: usize = 16;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Audio buffer type - pre-allocated vector of f32 samples
pub type AudioBuffer = Vec<f32>;

/// Capture callback end of the pool
pub struct CaptureSide {
    data_producer: Producer<AudioBuffer>,
    pool_consumer: Consumer<AudioBuffer>,
    buffer_size: usize,
    dropped_samples: u64,
}

/// Analysis end of the pool
pub struct AnalysisSide {
    data_consumer: Consumer<AudioBuffer>,
    pool_producer: Producer<AudioBuffer>,
}

/// Create a pool of `buffer_count` buffers holding `buffer_size` mono samples
///
/// Zero counts or sizes are raised to 1. All allocation happens here.
pub fn capture_pool(buffer_count: usize, buffer_size: usize) -> (CaptureSide, AnalysisSide) {
    let buffer_count = buffer_count.max(1);
    let buffer_size = buffer_size.max(1);

    let (mut pool_producer, pool_consumer) = RingBuffer::new(buffer_count);
    let (data_producer, data_consumer) = RingBuffer::new(buffer_count);

    for _ in 0..buffer_count {
        // Fresh ring sized to buffer_count, so this cannot overflow
        if pool_producer.push(Vec::with_capacity(buffer_size)).is_err() {
            break;
        }
    }

    (
        CaptureSide {
            data_producer,
            pool_consumer,
            buffer_size,
            dropped_samples: 0,
        },
        AnalysisSide {
            data_consumer,
            pool_producer,
        },
    )
}

impl CaptureSide {
    /// Copy the first channel of interleaved `data` into pooled buffers
    ///
    /// Returns the number of mono samples handed off. Samples that find no
    /// free buffer are dropped and counted.
    pub fn push_samples(&mut self, data: &[f32], channels: usize) -> usize {
        let channels = channels.max(1);
        let mut frames = data.chunks(channels).map(|frame| frame[0]).peekable();
        let mut pushed = 0;

        while frames.peek().is_some() {
            let Ok(mut buffer) = self.pool_consumer.pop() else {
                let remaining = frames.count() as u64;
                self.dropped_samples += remaining;
                break;
            };
            buffer.clear();
            buffer.extend(frames.by_ref().take(self.buffer_size));
            let len = buffer.len();
            match self.data_producer.push(buffer) {
                Ok(()) => pushed += len,
                Err(_) => self.dropped_samples += len as u64,
            }
        }
        pushed
    }

    /// Samples lost to an exhausted pool since creation
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_samples
    }
}

impl AnalysisSide {
    /// Append every filled buffer to `out` and recycle the buffers
    ///
    /// Returns the number of samples appended.
    pub fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
        let mut appended = 0;
        while let Ok(mut buffer) = self.data_consumer.pop() {
            appended += buffer.len();
            out.extend_from_slice(&buffer);
            buffer.clear();
            let _ = self.pool_producer.push(buffer);
        }
        appended
    }
}

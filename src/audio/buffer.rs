//! Lock-free ring buffer for raw audio samples
//!
//! Single-producer single-consumer ring used behind in-process audio
//! handles. Safe to call from a real-time audio thread. Each queue entry
//! is one whole sample, so a reader racing a writer never sees a torn one.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::transport::{AudioInputBuffer, AudioOutputBuffer};

/// Widest supported sample in bytes
pub const MAX_SAMPLE_WIDTH: usize = 4;

/// Bytes of one queued sample; only the first `sample_width` are used
type Sample = [u8; MAX_SAMPLE_WIDTH];

/// Lock-free ring buffer of encoded samples
pub struct RingBuffer {
    queue: ArrayQueue<Sample>,
    sample_width: usize,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a ring holding up to `capacity` samples of `sample_width` bytes
    pub fn new(capacity: usize, sample_width: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            sample_width: sample_width.clamp(1, MAX_SAMPLE_WIDTH),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    pub fn sample_width(&self) -> usize {
        self.sample_width
    }

    /// Push as many whole samples as fit, returning the bytes accepted
    ///
    /// A trailing partial sample is ignored.
    pub fn push_slice(&self, data: &[u8]) -> usize {
        let width = self.sample_width;
        let mut accepted = 0;
        for chunk in data.chunks_exact(width) {
            let mut sample = Sample::default();
            sample[..width].copy_from_slice(chunk);
            if self.queue.push(sample).is_err() {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                break;
            }
            accepted += width;
        }
        accepted
    }

    /// Pop whole samples into `out`, returning the bytes produced
    ///
    /// The result is always a multiple of the sample width.
    pub fn pop_slice(&self, out: &mut [u8]) -> usize {
        let width = self.sample_width;
        let mut produced = 0;
        for chunk in out.chunks_exact_mut(width) {
            match self.queue.pop() {
                Some(sample) => {
                    chunk.copy_from_slice(&sample[..width]);
                    produced += width;
                }
                None => {
                    self.underrun_count.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
        produced
    }

    /// Drain everything currently buffered
    pub fn drain(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        while let Some(sample) = self.queue.pop() {
            bytes.extend_from_slice(&sample[..self.sample_width]);
        }
        bytes
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Buffered bytes
    pub fn len(&self) -> usize {
        self.queue.len() * self.sample_width
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.queue.capacity() * self.sample_width
    }

    /// Number of pushes cut short by a full buffer
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Number of pops cut short by an empty buffer
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    pub fn reset_stats(&self) {
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }

    /// Fill level from 0.0 to 1.0
    pub fn fill_level(&self) -> f32 {
        self.queue.len() as f32 / self.queue.capacity() as f32
    }
}

impl AudioInputBuffer for RingBuffer {
    fn write(&self, data: &[u8]) -> usize {
        self.push_slice(data)
    }
}

impl AudioOutputBuffer for RingBuffer {
    fn read(&self, data: &mut [u8]) -> usize {
        self.pop_slice(data)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer of `capacity` samples
pub fn create_shared_buffer(capacity: usize, sample_width: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity, sample_width))
}

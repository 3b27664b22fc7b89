//! Audio frames and the playback sample ring
//!
//! [`AudioFrame`] is the unit handed from the capture callback to the
//! protocol send loop. [`SampleRing`] is a lock-free single-producer
//! single-consumer ring between the playback loop and the output device
//! callback.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::codec::pcm;

/// Immutable block of 16-bit mono PCM at the capture rate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    /// Little-endian PCM16 samples
    pcm: Bytes,
    /// Capture sequence number
    sequence: u32,
}

impl AudioFrame {
    pub fn new(pcm: Bytes, sequence: u32) -> Self {
        Self { pcm, sequence }
    }

    /// Build a frame from captured float samples
    pub fn from_f32(samples: &[f32], sequence: u32) -> Self {
        Self::new(pcm::f32_to_pcm16(samples), sequence)
    }

    pub fn pcm(&self) -> &Bytes {
        &self.pcm
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Number of samples in the frame
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }
}

/// Lock-free ring of mono samples feeding the output device
pub struct SampleRing {
    queue: ArrayQueue<f32>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    /// Create a new ring with the specified capacity in samples
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push as many samples as fit. Returns how many were accepted.
    pub fn push_slice(&self, samples: &[f32]) -> usize {
        for (i, &sample) in samples.iter().enumerate() {
            if self.queue.push(sample).is_err() {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                return i;
            }
        }
        samples.len()
    }

    /// Pop one sample, yielding silence on underrun
    pub fn pop_or_silence(&self) -> f32 {
        match self.queue.pop() {
            Some(sample) => sample,
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                0.0
            }
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Get underrun count
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;

//! Lock-free mix bus for gated receiver audio
//!
//! The control plane decides *whether* a source's audio may be heard;
//! the audio plumbing downstream decides how to mix it. Frames cross that
//! boundary through a bounded queue. Voting losers are written as silence
//! so the downstream mixer keeps its timing.

use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Where a frame of audio came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioSource {
    /// The node's own receiver
    Local,
    /// A linked node
    Link(String),
}

/// One frame of 8 kHz signed linear audio
#[derive(Debug, Clone)]
pub struct MixFrame {
    pub source: AudioSource,
    pub samples: Vec<i16>,
    /// True when the frame was muted by the voting arbitrator
    pub muted: bool,
}

impl MixFrame {
    pub fn new(source: AudioSource, samples: Vec<i16>) -> Self {
        Self {
            source,
            samples,
            muted: false,
        }
    }

    /// Replace the audio with silence, keeping the frame length
    pub fn silence(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0);
        self.muted = true;
    }

    /// Duration in microseconds at the given sample rate
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1_000_000) / sample_rate as u64
    }
}

/// Bounded queue of frames bound for the mixer
pub struct MixBus {
    queue: ArrayQueue<MixFrame>,
    overflow_count: AtomicUsize,
}

impl MixBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame. Returns false if the bus is full (overflow).
    pub fn push(&self, frame: MixFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn try_pop(&self) -> Option<MixFrame> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a mix bus
pub type SharedMixBus = Arc<MixBus>;

pub fn create_shared_bus(capacity: usize) -> SharedMixBus {
    Arc::new(MixBus::new(capacity))
}

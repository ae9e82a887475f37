//! Frames and the bounded admission queue.
//!
//! A `Frame` is one decoded RGB sample from the video stream plus its capture
//! timestamp. Frames are owned by the scheduler from admission until they are
//! processed or dropped, and are never mutated after creation.
//!
//! The `AdmissionQueue` enforces the backpressure contract: a bounded queue
//! with drop-oldest eviction, favoring recency over completeness.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// One decoded video frame (RGB24, row-major).
#[derive(Clone, Debug)]
pub struct Frame {
    /// Unique, opaque id (collision-resistant within a session).
    pub id: String,
    /// Producer-side wall clock, milliseconds since epoch.
    pub capture_ts: u64,
    pub width: u32,
    pub height: u32,
    /// `width * height * 3` bytes. May be empty when the frame carries no
    /// readable spatial dimensions; such frames are skipped downstream.
    pub pixels: Vec<u8>,
}

impl Frame {
    /// Create a frame with a freshly generated id.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, capture_ts: u64) -> Self {
        Self {
            id: next_frame_id(),
            capture_ts,
            width,
            height,
            pixels,
        }
    }

    /// Create a frame with a caller-chosen id.
    pub fn with_id(
        id: impl Into<String>,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        capture_ts: u64,
    ) -> Self {
        Self {
            id: id.into(),
            capture_ts,
            width,
            height,
            pixels,
        }
    }
}

static FRAME_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a frame id from a monotonic counter plus a random suffix.
///
/// The counter alone would collide across process restarts feeding the same
/// benchmark collector; the suffix makes ids session-unique in practice.
pub fn next_frame_id() -> String {
    let seq = FRAME_SEQ.fetch_add(1, Ordering::Relaxed);
    let suffix: u32 = rand::random();
    format!("frame_{}_{:08x}", seq, suffix)
}

/// Bounded frame queue with drop-oldest eviction.
#[derive(Debug)]
pub struct AdmissionQueue {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl AdmissionQueue {
    /// Capacity below 1 is clamped to 1; a zero-capacity queue would make
    /// every admission a silent drop.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest entry first when full.
    ///
    /// Returns the evicted frame, if any, so the caller can account for it.
    pub fn push(&mut self, frame: Frame) -> Option<Frame> {
        let evicted = if self.frames.len() >= self.capacity {
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Remove and return the oldest retained frame.
    pub fn pop_oldest(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

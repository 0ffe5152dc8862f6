//! Sliding-window presence vote.
//!
//! Each tick contributes one 0/1 vote. Presence is "stable" only once the
//! window is full and at least 75% (rounded up) of its votes are hits, so a
//! single dropped frame does not reset the signal but sustained absence does.

use std::collections::VecDeque;

/// Fixed-capacity FIFO of per-tick presence votes plus a consecutive-hit counter.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    history: VecDeque<u8>,
    capacity: usize,
    required_hits: usize,
    consecutive: u32,
}

impl StabilityTracker {
    /// Create a tracker with a window of `capacity` ticks (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity + 1),
            capacity,
            required_hits: required_hits(capacity),
            consecutive: 0,
        }
    }

    /// Record one tick with `valid_count` valid detections.
    pub fn push(&mut self, valid_count: usize) {
        self.history.push_back(u8::from(valid_count > 0));
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }

        if valid_count > 0 {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }
    }

    /// True once the window is full and holds at least `required_hits` hits.
    pub fn is_stable(&self) -> bool {
        self.history.len() >= self.capacity && self.hits() >= self.required_hits
    }

    /// Number of hits in the current window.
    pub fn hits(&self) -> usize {
        self.history.iter().map(|&v| v as usize).sum()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn required_hits(&self) -> usize {
        self.required_hits
    }

    /// Ticks in a row with at least one valid detection.
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Drop the window so stability has to be re-earned from scratch.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn reset_consecutive(&mut self) {
        self.consecutive = 0;
    }

    pub fn reset(&mut self) {
        self.clear_history();
        self.reset_consecutive();
    }
}

/// `ceil(capacity * 0.75)` in integer arithmetic.
fn required_hits(capacity: usize) -> usize {
    (capacity * 3).div_ceil(4)
}

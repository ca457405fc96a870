//! FIFO (First-In-First-Out) replacement policy.

use std::collections::{HashSet, VecDeque};

use crate::common::FrameId;

/// A FIFO eviction policy.
///
/// Evicts pages in the order they were loaded into the pool. Pinned frames
/// keep their place in the queue and are skipped until they are unpinned.
pub struct FifoReplacer {
    /// Frame IDs in load order (front = oldest).
    queue: VecDeque<FrameId>,

    /// Set for O(1) membership check.
    in_queue: HashSet<FrameId>,

    /// Frames that are currently evictable (pin_count == 0).
    evictable: HashSet<FrameId>,
}

impl FifoReplacer {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_queue: HashSet::new(),
            evictable: HashSet::new(),
        }
    }

    /// Record that a frame was accessed.
    ///
    /// Only the first access enqueues; later accesses do not reorder.
    pub fn record_access(&mut self, frame_id: FrameId) {
        if self.in_queue.insert(frame_id) {
            self.queue.push_back(frame_id);
        }
    }

    /// Mark a frame as evictable (pin_count dropped to 0) or not.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if evictable {
            self.evictable.insert(frame_id);
        } else {
            self.evictable.remove(&frame_id);
        }
    }

    /// Select a victim frame for eviction.
    ///
    /// Returns the oldest evictable frame, or None if all frames are pinned.
    pub fn evict(&mut self) -> Option<FrameId> {
        let pos = self
            .queue
            .iter()
            .position(|frame_id| self.evictable.contains(frame_id))?;
        let frame_id = self.queue.remove(pos)?;

        self.in_queue.remove(&frame_id);
        self.evictable.remove(&frame_id);
        Some(frame_id)
    }

    /// Forget a frame entirely. Called when a page is dropped from the pool.
    pub fn remove(&mut self, frame_id: FrameId) {
        if self.in_queue.remove(&frame_id) {
            self.queue.retain(|&f| f != frame_id);
        }
        self.evictable.remove(&frame_id);
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }
}

impl Default for FifoReplacer {
    fn default() -> Self {
        Self::new()
    }
}

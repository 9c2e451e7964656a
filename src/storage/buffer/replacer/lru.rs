use linked_hash_map::LinkedHashMap;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Holds the frames that are currently evictable, ordered by when they
/// last became unpinned. The least recently unpinned frame sits at the
/// front and is the next victim. `LinkedHashMap` gives the ordered list
/// plus O(1) membership removal.
pub struct LRUReplacer {
    capacity: usize,
    frames: LinkedHashMap<FrameId, ()>,
}

impl LRUReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: LinkedHashMap::new(),
        }
    }

    /// Pop and return the least recently unpinned frame, if any.
    pub fn victim(&mut self) -> Option<FrameId> {
        self.frames.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// A frame was pinned: it is no longer a replacement candidate.
    pub fn pin(&mut self, frame_id: FrameId) {
        self.frames.remove(&frame_id);
    }

    /// A frame's pin count dropped to zero: it becomes a candidate.
    /// Idempotent; an already present frame keeps its position.
    pub fn unpin(&mut self, frame_id: FrameId) {
        if !self.frames.contains_key(&frame_id) {
            self.frames.insert(frame_id, ());
            debug_assert!(self.frames.len() <= self.capacity);
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.frames.len()
    }
}

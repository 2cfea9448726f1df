// SPDX-License-Identifier: MIT
//
// In-process FIFO overflow queue for frames that could not be placed into
// the ring. Metadata and command frames are always admitted so the
// consumer-side session stays self-describing; message frames are bounded
// by the host-configured capacity.

use std::collections::VecDeque;

use crate::frame::Frame;

/// One pending entry: either a single frame, or a multi-block sequence that
/// must be transferred to the ring together under one `end_writing_sequence`.
#[derive(Debug, Clone)]
pub enum PendingEntry {
    Single(Frame),
    Sequence(Vec<Frame>),
}

impl PendingEntry {
    fn is_message(&self) -> bool {
        match self {
            PendingEntry::Single(f) => matches!(f, Frame::Message { .. }),
            PendingEntry::Sequence(_) => true,
        }
    }
}

/// The ordered overflow queue.
pub struct PeakBuffer {
    entries: VecDeque<PendingEntry>,
    message_capacity: usize,
    message_count: usize,
}

impl PeakBuffer {
    pub fn new(message_capacity: usize) -> Self {
        Self { entries: VecDeque::new(), message_capacity, message_count: 0 }
    }

    pub fn set_message_capacity(&mut self, capacity: usize) {
        self.message_capacity = capacity;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attempts to enqueue `entry`. Metadata/command entries are always
    /// admitted; message entries are admitted only while under capacity.
    /// Returns `false` if the entry was dropped.
    pub fn push(&mut self, entry: PendingEntry) -> bool {
        if entry.is_message() && self.message_count >= self.message_capacity {
            return false;
        }
        if entry.is_message() {
            self.message_count += 1;
        }
        self.entries.push_back(entry);
        true
    }

    /// Removes and returns the oldest entry, if any.
    pub fn pop_front(&mut self) -> Option<PendingEntry> {
        let entry = self.entries.pop_front()?;
        if entry.is_message() {
            self.message_count -= 1;
        }
        Some(entry)
    }

    /// Pushes `entry` back onto the front, bypassing capacity checks. Used
    /// when an entry was popped for draining but could not be placed and
    /// must be retried first on the next drain attempt.
    pub fn push_front(&mut self, entry: PendingEntry) {
        if entry.is_message() {
            self.message_count += 1;
        }
        self.entries.push_front(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.message_count = 0;
    }
}

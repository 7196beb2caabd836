//! Fixed-capacity probe history, one ring buffer per target.
//!
//! Buffers live in a single arena indexed by [`TargetId`] (the target's
//! position in configuration order). Inserting into a full buffer evicts
//! the oldest entry; entries are never reordered.

use std::collections::{HashMap, VecDeque};

use pulse_state::ProbeResult;

/// Position of a target in configuration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub usize);

#[derive(Debug)]
pub struct HistoryArena {
    capacity: usize,
    index: HashMap<String, TargetId>,
    buffers: Vec<VecDeque<ProbeResult>>,
}

impl HistoryArena {
    /// Create an arena with one empty buffer per name.
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut index = HashMap::new();
        let mut buffers = Vec::new();
        for name in names {
            index.insert(name.to_string(), TargetId(buffers.len()));
            buffers.push(VecDeque::with_capacity(capacity.min(1024)));
        }
        Self {
            capacity,
            index,
            buffers,
        }
    }

    pub fn id_of(&self, name: &str) -> Option<TargetId> {
        self.index.get(name).copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a result, evicting the oldest entry once the buffer is full.
    ///
    /// Returns the evicted entry, if any.
    pub fn push(&mut self, id: TargetId, result: ProbeResult) -> Option<ProbeResult> {
        let buffer = &mut self.buffers[id.0];
        let evicted = if buffer.len() == self.capacity {
            buffer.pop_front()
        } else {
            None
        };
        buffer.push_back(result);
        evicted
    }

    /// Entries for a target, oldest first.
    pub fn entries(&self, id: TargetId) -> impl DoubleEndedIterator<Item = &ProbeResult> {
        self.buffers[id.0].iter()
    }

    pub fn latest(&self, id: TargetId) -> Option<&ProbeResult> {
        self.buffers[id.0].back()
    }

    pub fn len(&self, id: TargetId) -> usize {
        self.buffers[id.0].len()
    }

    /// Every stored entry across all targets.
    pub fn all(&self) -> impl Iterator<Item = &ProbeResult> {
        self.buffers.iter().flat_map(|b| b.iter())
    }
}

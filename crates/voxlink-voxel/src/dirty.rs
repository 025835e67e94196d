//! FIFO queue of dirty chunks with set semantics.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use crate::coords::ChunkCoord;

/// Chunks awaiting downstream work (remesh, save, sync), each queued once.
#[derive(Debug, Default)]
pub struct DirtyQueue {
    order: VecDeque<ChunkCoord>,
    queued: FxHashSet<ChunkCoord>,
}

impl DirtyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `coord` unless already queued. Returns `true` if added.
    pub fn push(&mut self, coord: ChunkCoord) -> bool {
        if !self.queued.insert(coord) {
            return false;
        }
        self.order.push_back(coord);
        true
    }

    /// Dequeues the oldest entry.
    pub fn pop(&mut self) -> Option<ChunkCoord> {
        let coord = self.order.pop_front()?;
        self.queued.remove(&coord);
        Some(coord)
    }

    /// Dequeues up to `max` entries in FIFO order.
    pub fn drain(&mut self, max: usize) -> Vec<ChunkCoord> {
        let n = max.min(self.order.len());
        let out: Vec<ChunkCoord> = self.order.drain(..n).collect();
        for coord in &out {
            self.queued.remove(coord);
        }
        out
    }

    /// Drops `coord` from the queue. Returns `true` if it was queued.
    pub fn remove(&mut self, coord: ChunkCoord) -> bool {
        if !self.queued.remove(&coord) {
            return false;
        }
        self.order.retain(|c| *c != coord);
        true
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.queued.contains(&coord)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

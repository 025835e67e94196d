//! World change notifications for meshing, lighting and networking.
//!
//! Events are collected into a [`WorldEvents`] buffer that is double-buffered
//! per tick, so a consumer running after the producer still sees the
//! previous tick's events.

use glam::IVec3;

use crate::chunk::EntityId;
use crate::coords::ChunkCoord;

/// Something that changed in the world.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorldEvent {
    /// A chunk entered the dirty queue.
    ChunkDirty(ChunkCoord),
    /// An entity moved into a chunk (or spawned in it).
    EntityJoinedChunk { entity: EntityId, chunk: ChunkCoord },
    /// An entity moved out of a chunk (or despawned from it).
    EntityLeftChunk { entity: EntityId, chunk: ChunkCoord },
    /// The block at a world cell changed.
    BlockChanged { position: IVec3, save_key: String },
}

/// Double-buffered event storage.
///
/// Events written in the current tick are readable in the current and next
/// tick. Call [`swap`](WorldEvents::swap) once per tick.
#[derive(Debug, Default)]
pub struct WorldEvents {
    prev: Vec<WorldEvent>,
    current: Vec<WorldEvent>,
}

impl WorldEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, event: WorldEvent) {
        self.current.push(event);
    }

    /// Returns all readable events (previous + current tick).
    pub fn read(&self) -> impl Iterator<Item = &WorldEvent> {
        self.prev.iter().chain(self.current.iter())
    }

    /// Takes the current tick's events, leaving the buffer for new ones.
    pub fn take_current(&mut self) -> Vec<WorldEvent> {
        std::mem::take(&mut self.current)
    }

    pub fn len(&self) -> usize {
        self.prev.len() + self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advances the tick: previous events are dropped, current becomes previous.
    pub fn swap(&mut self) {
        self.prev.clear();
        std::mem::swap(&mut self.prev, &mut self.current);
    }

    pub fn clear(&mut self) {
        self.prev.clear();
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_survive_one_swap() {
        let mut events = WorldEvents::new();
        events.send(WorldEvent::ChunkDirty(ChunkCoord::new(0, 0, 0)));
        assert_eq!(events.len(), 1);
        events.swap();
        assert_eq!(events.read().count(), 1);
        events.swap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_take_current() {
        let mut events = WorldEvents::new();
        events.send(WorldEvent::ChunkDirty(ChunkCoord::new(1, 0, 0)));
        events.swap();
        events.send(WorldEvent::ChunkDirty(ChunkCoord::new(2, 0, 0)));
        let taken = events.take_current();
        assert_eq!(taken, vec![WorldEvent::ChunkDirty(ChunkCoord::new(2, 0, 0))]);
        assert_eq!(events.len(), 1);
    }
}

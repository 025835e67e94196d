//! Rich chunk wrapper: palette, resident entities, dirty flags and version.
//!
//! The cell array itself lives in the [`VoxelGrid`](crate::grid::VoxelGrid);
//! a [`Chunk`] holds everything else the world tracks per chunk.

use rustc_hash::FxHashSet;

use crate::coords::ChunkCoord;
use crate::palette::ChunkPalette;

/// Dirty-flag bit: chunk mesh needs rebuilding.
pub const MESH_DIRTY: u8 = 0b0000_0001;
/// Dirty-flag bit: chunk needs saving to the store.
pub const SAVE_DIRTY: u8 = 0b0000_0010;
/// Dirty-flag bit: chunk needs network sync.
pub const NETWORK_DIRTY: u8 = 0b0000_0100;

/// All dirty flags combined.
pub const ALL_DIRTY: u8 = MESH_DIRTY | SAVE_DIRTY | NETWORK_DIRTY;

/// Identifier of an entity tracked by the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

/// Per-chunk state owned by the world.
#[derive(Clone, Debug)]
pub struct Chunk {
    coord: ChunkCoord,
    epoch: u64,
    palette: ChunkPalette,
    entities: FxHashSet<EntityId>,
    dirty: u8,
    version: u64,
}

impl Chunk {
    pub(crate) fn new(coord: ChunkCoord, epoch: u64, palette: ChunkPalette) -> Self {
        Self {
            coord,
            epoch,
            palette,
            entities: FxHashSet::default(),
            dirty: 0,
            version: 0,
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Load generation. A chunk removed and loaded again gets a new epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// A handle that stops resolving once this chunk is unloaded.
    pub fn handle(&self) -> ChunkHandle {
        ChunkHandle {
            coord: self.coord,
            epoch: self.epoch,
        }
    }

    pub fn palette(&self) -> &ChunkPalette {
        &self.palette
    }

    pub(crate) fn palette_mut(&mut self) -> &mut ChunkPalette {
        &mut self.palette
    }

    /// Entities whose position lies in this chunk.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().copied()
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        self.entities.contains(&id)
    }

    pub(crate) fn insert_entity(&mut self, id: EntityId) -> bool {
        self.entities.insert(id)
    }

    pub(crate) fn remove_entity(&mut self, id: EntityId) -> bool {
        self.entities.remove(&id)
    }

    /// Returns the current dirty flags.
    pub fn dirty_flags(&self) -> u8 {
        self.dirty
    }

    /// Returns `true` if the specified dirty flag (or combination) is set.
    pub fn is_dirty(&self, flag: u8) -> bool {
        self.dirty & flag == flag
    }

    pub(crate) fn mark_dirty(&mut self, flags: u8) {
        self.dirty |= flags;
    }

    /// Clears the specified dirty flag bits.
    pub fn clear_dirty(&mut self, flags: u8) {
        self.dirty &= !flags;
    }

    /// Returns the current version counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// Liveness-checked reference to a loaded chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkHandle {
    pub coord: ChunkCoord,
    pub epoch: u64,
}

//! The voxel world: loaded chunks, their palettes, the entity → chunk index
//! and the dirty queue.
//!
//! The [`VoxelGrid`] holds raw cell arrays. Every grid chunk has exactly one
//! rich [`Chunk`] in the coordinate index, and both are created and removed
//! together. Handles carry the chunk's load epoch, so a handle taken before
//! an unload never resolves to a later reload of the same coordinate.

use std::sync::Arc;

use glam::{IVec3, Vec3};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::chunk::{ALL_DIRTY, Chunk, ChunkHandle, EntityId, MESH_DIRTY};
use crate::collider::{CompiledCollider, EMPTY_COLLIDER};
use crate::coords::{CHUNK_SIZE, CHUNK_VOLUME, ChunkCoord, cell_index, split_cell};
use crate::dirty::DirtyQueue;
use crate::events::{WorldEvent, WorldEvents};
use crate::generator::ChunkGenerator;
use crate::grid::VoxelGrid;
use crate::palette::{AIR_KEY, ChunkPalette, PaletteError};
use crate::registry::{BlockMemo, BlockStateTable};

/// Errors from world operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("chunk {0} is not loaded")]
    NotLoaded(ChunkCoord),
    #[error("chunk {0} is already loaded")]
    AlreadyLoaded(ChunkCoord),
    #[error("unknown block state {0:?}")]
    UnknownBlock(String),
    #[error("invalid cell data for chunk {coord}: {reason}")]
    InvalidCells { coord: ChunkCoord, reason: String },
    #[error(transparent)]
    Palette(#[from] PaletteError),
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Cell payload of a [`ChunkSnapshot`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotCells {
    /// Every cell holds this palette index.
    Uniform(u16),
    /// One palette index per cell, in [`cell_index`] order.
    Cells(Vec<u16>),
}

/// Self-contained copy of one chunk's blocks, used for generation,
/// persistence and network transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    pub coord: ChunkCoord,
    /// Index-ordered save-keys. Empty strings are unused slots.
    pub palette: Vec<String>,
    pub cells: SnapshotCells,
}

impl ChunkSnapshot {
    pub fn uniform(coord: ChunkCoord, palette: Vec<String>, value: u16) -> Self {
        Self {
            coord,
            palette,
            cells: SnapshotCells::Uniform(value),
        }
    }

    /// An all-air chunk.
    pub fn air(coord: ChunkCoord) -> Self {
        Self::uniform(coord, vec![AIR_KEY.to_string()], 0)
    }

    /// Save-key of the block at a local cell index.
    pub fn key_at(&self, index: usize) -> Option<&str> {
        let value = match &self.cells {
            SnapshotCells::Uniform(v) => *v,
            SnapshotCells::Cells(cells) => *cells.get(index)?,
        };
        self.palette
            .get(value as usize)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }
}

/// Result of a collider lookup at a world cell.
#[derive(Clone, Copy, Debug)]
pub enum ColliderLookup<'a> {
    /// The chunk holding the cell is not loaded.
    Unloaded,
    Loaded(&'a CompiledCollider),
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// Loaded chunks plus everything indexed by chunk coordinate.
pub struct World {
    table: Arc<BlockStateTable>,
    grid: VoxelGrid,
    chunks: FxHashMap<ChunkCoord, Chunk>,
    dirty: DirtyQueue,
    entity_chunks: FxHashMap<EntityId, ChunkCoord>,
    events: WorldEvents,
    next_epoch: u64,
}

impl World {
    /// Creates an empty world over a frozen block-state table.
    pub fn new(table: Arc<BlockStateTable>) -> Result<Self, WorldError> {
        if table.memo_id(AIR_KEY).is_none() {
            return Err(PaletteError::MissingAir.into());
        }
        Ok(Self {
            table,
            grid: VoxelGrid::new(),
            chunks: FxHashMap::default(),
            dirty: DirtyQueue::new(),
            entity_chunks: FxHashMap::default(),
            events: WorldEvents::new(),
            next_epoch: 1,
        })
    }

    pub fn table(&self) -> &Arc<BlockStateTable> {
        &self.table
    }

    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    // -- Chunk lifecycle ----------------------------------------------------

    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn loaded_coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.chunks.keys().copied()
    }

    /// Loads an all-air chunk.
    pub fn create_chunk(&mut self, coord: ChunkCoord) -> Result<ChunkHandle, WorldError> {
        self.insert_snapshot(ChunkSnapshot::air(coord))
    }

    /// Loads a chunk from a snapshot.
    ///
    /// Every cell must reference a live palette slot. On error nothing is
    /// loaded.
    pub fn insert_snapshot(&mut self, snapshot: ChunkSnapshot) -> Result<ChunkHandle, WorldError> {
        let coord = snapshot.coord;
        if self.is_loaded(coord) {
            return Err(WorldError::AlreadyLoaded(coord));
        }
        let palette = ChunkPalette::from_keys(&snapshot.palette, &self.table)?;
        let live = |v: u16| palette.key(v).is_some();
        match &snapshot.cells {
            SnapshotCells::Uniform(v) if !live(*v) => {
                return Err(invalid(coord, format!("fill index {v} is not in the palette")));
            }
            SnapshotCells::Cells(cells) if cells.len() != CHUNK_VOLUME => {
                return Err(invalid(
                    coord,
                    format!("expected {CHUNK_VOLUME} cells, got {}", cells.len()),
                ));
            }
            SnapshotCells::Cells(cells) => {
                if let Some(v) = cells.iter().copied().find(|&v| !live(v)) {
                    return Err(invalid(coord, format!("cell index {v} is not in the palette")));
                }
            }
            SnapshotCells::Uniform(_) => {}
        }

        self.grid.create_chunk(coord);
        if let Some(target) = self.grid.cells_mut(coord) {
            match snapshot.cells {
                SnapshotCells::Uniform(v) => target.fill(v),
                SnapshotCells::Cells(cells) => target.copy_from_slice(&cells),
            }
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let mut chunk = Chunk::new(coord, epoch, palette);
        for (&entity, &at) in &self.entity_chunks {
            if at == coord {
                chunk.insert_entity(entity);
            }
        }
        chunk.mark_dirty(MESH_DIRTY);
        let handle = chunk.handle();
        self.chunks.insert(coord, chunk);
        self.push_dirty(coord);
        tracing::debug!("Loaded chunk {coord} (epoch {epoch})");
        Ok(handle)
    }

    /// Generates and loads a chunk.
    pub fn generate_chunk(
        &mut self,
        coord: ChunkCoord,
        generator: &dyn ChunkGenerator,
    ) -> Result<ChunkHandle, WorldError> {
        if self.is_loaded(coord) {
            return Err(WorldError::AlreadyLoaded(coord));
        }
        self.insert_snapshot(generator.generate(coord))
    }

    /// Unloads a chunk, returning its final state.
    ///
    /// Entities indexed in the chunk stay indexed by coordinate and rejoin
    /// the chunk if it is loaded again.
    pub fn remove_chunk(&mut self, coord: ChunkCoord) -> Option<ChunkSnapshot> {
        let snapshot = self.snapshot(coord)?;
        self.chunks.remove(&coord);
        self.grid.remove_chunk(coord);
        self.dirty.remove(coord);
        tracing::debug!("Unloaded chunk {coord}");
        Some(snapshot)
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    /// Resolves a handle, or `None` if its chunk was unloaded since.
    pub fn resolve(&self, handle: ChunkHandle) -> Option<&Chunk> {
        self.chunks
            .get(&handle.coord)
            .filter(|c| c.epoch() == handle.epoch)
    }

    pub fn cells(&self, coord: ChunkCoord) -> Option<&[u16]> {
        self.grid.cells(coord)
    }

    /// Copies a loaded chunk, collapsing single-valued chunks to
    /// [`SnapshotCells::Uniform`].
    pub fn snapshot(&self, coord: ChunkCoord) -> Option<ChunkSnapshot> {
        let chunk = self.chunks.get(&coord)?;
        let cells = self.grid.cells(coord)?;
        let first = cells[0];
        let cells = if cells.iter().all(|&v| v == first) {
            SnapshotCells::Uniform(first)
        } else {
            SnapshotCells::Cells(cells.to_vec())
        };
        Some(ChunkSnapshot {
            coord,
            palette: chunk.palette().to_keys(),
            cells,
        })
    }

    // -- Block access -------------------------------------------------------

    fn palette_index_at(&self, cell: IVec3) -> Option<(ChunkCoord, u16)> {
        let (coord, local) = split_cell(cell);
        let value = self.grid.get(coord, cell_index(local))?;
        Some((coord, value))
    }

    /// Save-key of the block at a world cell, if its chunk is loaded.
    pub fn save_key_at(&self, cell: IVec3) -> Option<&str> {
        let (coord, value) = self.palette_index_at(cell)?;
        self.chunks.get(&coord)?.palette().key(value)
    }

    /// Memoized record of the block at a world cell.
    pub fn memo_at(&self, cell: IVec3) -> Option<&BlockMemo> {
        let (coord, value) = self.palette_index_at(cell)?;
        let memo = self.chunks.get(&coord)?.palette().memo(value)?;
        self.table.memo(memo)
    }

    /// Collider of the block at a world cell.
    pub fn collider_at(&self, cell: IVec3) -> ColliderLookup<'_> {
        let Some((coord, value)) = self.palette_index_at(cell) else {
            return ColliderLookup::Unloaded;
        };
        let collider = self
            .chunks
            .get(&coord)
            .and_then(|c| c.palette().memo(value))
            .and_then(|memo| self.table.collider(memo))
            .unwrap_or(&EMPTY_COLLIDER);
        ColliderLookup::Loaded(collider)
    }

    /// Whether the block at a world cell is air. `None` if unloaded.
    pub fn is_air(&self, cell: IVec3) -> Option<bool> {
        self.palette_index_at(cell).map(|(_, v)| v == 0)
    }

    /// Writes a block and returns the previous save-key.
    ///
    /// Marks the chunk fully dirty, marks loaded face neighbours for remesh
    /// when the cell is on their shared face, and emits
    /// [`WorldEvent::BlockChanged`].
    pub fn set_block(&mut self, cell: IVec3, key: &str) -> Result<String, WorldError> {
        if self.table.memo_id(key).is_none() {
            return Err(WorldError::UnknownBlock(key.to_string()));
        }
        let (coord, local) = split_cell(cell);
        let index = cell_index(local);
        let chunk = self
            .chunks
            .get_mut(&coord)
            .ok_or(WorldError::NotLoaded(coord))?;
        let value = chunk.palette_mut().get_or_insert(key, &self.table)?;
        let old = self
            .grid
            .get(coord, index)
            .ok_or(WorldError::NotLoaded(coord))?;
        let previous = chunk.palette().key(old).unwrap_or(AIR_KEY).to_string();
        if old == value {
            return Ok(previous);
        }
        self.grid.set(coord, index, value);
        chunk.mark_dirty(ALL_DIRTY);
        chunk.bump_version();
        self.push_dirty(coord);

        let last = CHUNK_SIZE as u32 - 1;
        let axes = [
            (local.x == 0, (-1, 0, 0)),
            (local.x == last, (1, 0, 0)),
            (local.y == 0, (0, -1, 0)),
            (local.y == last, (0, 1, 0)),
            (local.z == 0, (0, 0, -1)),
            (local.z == last, (0, 0, 1)),
        ];
        for (touches, (dx, dy, dz)) in axes {
            if touches {
                self.mark_dirty(coord.offset(dx, dy, dz), MESH_DIRTY);
            }
        }

        self.events.send(WorldEvent::BlockChanged {
            position: cell,
            save_key: key.to_string(),
        });
        Ok(previous)
    }

    // -- Dirty tracking -----------------------------------------------------

    fn push_dirty(&mut self, coord: ChunkCoord) {
        if self.dirty.push(coord) {
            self.events.send(WorldEvent::ChunkDirty(coord));
        }
    }

    /// Sets dirty flags on a loaded chunk and queues it. Returns `false` if
    /// the chunk is not loaded.
    pub fn mark_dirty(&mut self, coord: ChunkCoord, flags: u8) -> bool {
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            return false;
        };
        chunk.mark_dirty(flags);
        self.push_dirty(coord);
        true
    }

    /// Clears dirty flags on a loaded chunk.
    pub fn clear_dirty(&mut self, coord: ChunkCoord, flags: u8) {
        if let Some(chunk) = self.chunks.get_mut(&coord) {
            chunk.clear_dirty(flags);
        }
    }

    /// Dequeues up to `max` dirty chunks, oldest first.
    pub fn drain_dirty(&mut self, max: usize) -> Vec<ChunkCoord> {
        self.dirty.drain(max)
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    // -- Palette upkeep -----------------------------------------------------

    /// Reclaims palette slots no cell of the chunk references.
    pub fn clean_palette(&mut self, coord: ChunkCoord) -> Result<usize, WorldError> {
        let cells = self.grid.cells(coord).ok_or(WorldError::NotLoaded(coord))?;
        let chunk = self
            .chunks
            .get_mut(&coord)
            .ok_or(WorldError::NotLoaded(coord))?;
        Ok(chunk.palette_mut().clean(cells))
    }

    /// Switches to a new block-state table, remapping every palette.
    ///
    /// Fails without changing anything if a loaded chunk uses a state the
    /// new table lacks.
    pub fn rebind_table(&mut self, table: Arc<BlockStateTable>) -> Result<(), WorldError> {
        if table.memo_id(AIR_KEY).is_none() {
            return Err(PaletteError::MissingAir.into());
        }
        for chunk in self.chunks.values() {
            let missing = chunk
                .palette()
                .flat_palette()
                .iter()
                .flatten()
                .find(|key| table.memo_id(key).is_none());
            if let Some(key) = missing {
                return Err(WorldError::UnknownBlock(key.clone()));
            }
        }
        for chunk in self.chunks.values_mut() {
            chunk.palette_mut().rebind(&table)?;
        }
        self.table = table;
        Ok(())
    }

    // -- Entity index -------------------------------------------------------

    /// Records an entity's position. Returns the chunk it moved into when it
    /// crossed a chunk border (or was seen for the first time).
    pub fn update_entity(&mut self, entity: EntityId, position: Vec3) -> Option<ChunkCoord> {
        let coord = ChunkCoord::of_position(position);
        let previous = self.entity_chunks.insert(entity, coord);
        if previous == Some(coord) {
            return None;
        }
        if let Some(old) = previous {
            if let Some(chunk) = self.chunks.get_mut(&old) {
                chunk.remove_entity(entity);
            }
            self.events
                .send(WorldEvent::EntityLeftChunk { entity, chunk: old });
        }
        if let Some(chunk) = self.chunks.get_mut(&coord) {
            chunk.insert_entity(entity);
        }
        self.events
            .send(WorldEvent::EntityJoinedChunk { entity, chunk: coord });
        Some(coord)
    }

    /// Drops an entity from the index.
    pub fn remove_entity(&mut self, entity: EntityId) -> Option<ChunkCoord> {
        let coord = self.entity_chunks.remove(&entity)?;
        if let Some(chunk) = self.chunks.get_mut(&coord) {
            chunk.remove_entity(entity);
        }
        self.events
            .send(WorldEvent::EntityLeftChunk { entity, chunk: coord });
        Some(coord)
    }

    pub fn entity_chunk(&self, entity: EntityId) -> Option<ChunkCoord> {
        self.entity_chunks.get(&entity).copied()
    }

    /// Entities indexed in a loaded chunk, sorted by id.
    pub fn entities_in(&self, coord: ChunkCoord) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .chunks
            .get(&coord)
            .map(|c| c.entities().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    // -- Events -------------------------------------------------------------

    pub fn events(&self) -> &WorldEvents {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut WorldEvents {
        &mut self.events
    }
}

fn invalid(coord: ChunkCoord, reason: String) -> WorldError {
    WorldError::InvalidCells { coord, reason }
}

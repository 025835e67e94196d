//! Sparse three-level voxel grid: region → chunk slot → cells.
//!
//! Regions live in a slab indexed through an [`FxHashMap`]. A one-entry
//! cache remembers the last region looked up, which makes runs of nearby
//! accesses (collision sweeps, raycasts, meshing) skip the hash lookup.

use std::cell::Cell;

use rustc_hash::FxHashMap;

use crate::coords::{ChunkCoord, REGION_VOLUME, RegionCoord};
use crate::pool::CellPool;

struct Region {
    coord: RegionCoord,
    slots: Vec<Option<Box<[u16]>>>,
    occupied: usize,
}

impl Region {
    fn new(coord: RegionCoord) -> Self {
        let mut slots = Vec::with_capacity(REGION_VOLUME);
        slots.resize_with(REGION_VOLUME, || None);
        Self {
            coord,
            slots,
            occupied: 0,
        }
    }
}

/// Palette-index cells for every loaded chunk.
pub struct VoxelGrid {
    regions: Vec<Region>,
    index: FxHashMap<RegionCoord, usize>,
    last_region: Cell<Option<(RegionCoord, usize)>>,
    pool: CellPool,
    chunk_count: usize,
}

impl VoxelGrid {
    pub fn new() -> Self {
        Self::with_pool(CellPool::new())
    }

    pub fn with_pool(pool: CellPool) -> Self {
        Self {
            regions: Vec::new(),
            index: FxHashMap::default(),
            last_region: Cell::new(None),
            pool,
            chunk_count: 0,
        }
    }

    fn region_slot(&self, coord: RegionCoord) -> Option<usize> {
        if let Some((cached, slot)) = self.last_region.get() {
            if cached == coord {
                return Some(slot);
            }
        }
        let slot = *self.index.get(&coord)?;
        self.last_region.set(Some((coord, slot)));
        Some(slot)
    }

    /// Returns `true` if the chunk has a cell array.
    pub fn has_chunk(&self, coord: ChunkCoord) -> bool {
        self.cells(coord).is_some()
    }

    /// Allocates an all-zero cell array for `coord`.
    ///
    /// Returns `false` if the chunk already exists.
    pub fn create_chunk(&mut self, coord: ChunkCoord) -> bool {
        let rc = coord.region();
        let slot = match self.region_slot(rc) {
            Some(slot) => slot,
            None => {
                self.regions.push(Region::new(rc));
                let slot = self.regions.len() - 1;
                self.index.insert(rc, slot);
                slot
            }
        };
        let region = &mut self.regions[slot];
        let entry = &mut region.slots[coord.slot_in_region()];
        if entry.is_some() {
            return false;
        }
        *entry = Some(self.pool.acquire());
        region.occupied += 1;
        self.chunk_count += 1;
        true
    }

    /// Releases the chunk's cell array back to the pool.
    ///
    /// Returns `false` if the chunk did not exist. Empty regions are dropped.
    pub fn remove_chunk(&mut self, coord: ChunkCoord) -> bool {
        let rc = coord.region();
        let Some(slot) = self.region_slot(rc) else {
            return false;
        };
        let region = &mut self.regions[slot];
        let Some(cells) = region.slots[coord.slot_in_region()].take() else {
            return false;
        };
        region.occupied -= 1;
        let now_empty = region.occupied == 0;
        self.pool.release(cells);
        self.chunk_count -= 1;

        if now_empty {
            self.index.remove(&rc);
            self.regions.swap_remove(slot);
            if let Some(moved) = self.regions.get(slot) {
                self.index.insert(moved.coord, slot);
            }
            self.last_region.set(None);
        }
        true
    }

    /// Cells of a loaded chunk.
    pub fn cells(&self, coord: ChunkCoord) -> Option<&[u16]> {
        let slot = self.region_slot(coord.region())?;
        self.regions[slot].slots[coord.slot_in_region()].as_deref()
    }

    /// Mutable cells of a loaded chunk.
    pub fn cells_mut(&mut self, coord: ChunkCoord) -> Option<&mut [u16]> {
        let slot = self.region_slot(coord.region())?;
        self.regions[slot].slots[coord.slot_in_region()].as_deref_mut()
    }

    /// Cell value at `index` in a loaded chunk.
    pub fn get(&self, coord: ChunkCoord, index: usize) -> Option<u16> {
        self.cells(coord).map(|cells| cells[index])
    }

    /// Writes one cell. Returns `false` if the chunk is not loaded.
    pub fn set(&mut self, coord: ChunkCoord, index: usize, value: u16) -> bool {
        match self.cells_mut(coord) {
            Some(cells) => {
                cells[index] = value;
                true
            }
            None => false,
        }
    }

    /// Number of loaded chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Number of allocated regions.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn pool(&self) -> &CellPool {
        &self.pool
    }
}

impl Default for VoxelGrid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::CHUNK_VOLUME;

    #[test]
    fn test_create_and_access() {
        let mut grid = VoxelGrid::new();
        let coord = ChunkCoord::new(0, 0, 0);
        assert!(!grid.has_chunk(coord));
        assert!(grid.create_chunk(coord));
        assert!(!grid.create_chunk(coord));
        assert_eq!(grid.cells(coord).unwrap().len(), CHUNK_VOLUME);

        assert!(grid.set(coord, 5, 3));
        assert_eq!(grid.get(coord, 5), Some(3));
        assert_eq!(grid.get(ChunkCoord::new(1, 0, 0), 5), None);
        assert!(!grid.set(ChunkCoord::new(1, 0, 0), 5, 3));
    }

    #[test]
    fn test_chunks_share_region() {
        let mut grid = VoxelGrid::new();
        grid.create_chunk(ChunkCoord::new(0, 0, 0));
        grid.create_chunk(ChunkCoord::new(7, 7, 7));
        grid.create_chunk(ChunkCoord::new(8, 0, 0));
        grid.create_chunk(ChunkCoord::new(-1, 0, 0));
        assert_eq!(grid.chunk_count(), 4);
        assert_eq!(grid.region_count(), 3);
    }

    #[test]
    fn test_remove_returns_to_pool_zeroed() {
        let mut grid = VoxelGrid::new();
        let coord = ChunkCoord::new(2, -3, 4);
        grid.create_chunk(coord);
        grid.set(coord, 0, 42);
        assert!(grid.remove_chunk(coord));
        assert!(!grid.remove_chunk(coord));
        assert_eq!(grid.pool().free_len(), 1);
        assert_eq!(grid.region_count(), 0);

        grid.create_chunk(coord);
        assert_eq!(grid.get(coord, 0), Some(0));
        assert_eq!(grid.pool().allocated(), 1);
    }

    #[test]
    fn test_region_removal_keeps_other_regions_reachable() {
        let mut grid = VoxelGrid::new();
        let a = ChunkCoord::new(0, 0, 0);
        let b = ChunkCoord::new(100, 0, 0);
        let c = ChunkCoord::new(-100, 0, 0);
        for coord in [a, b, c] {
            grid.create_chunk(coord);
        }
        grid.set(c, 1, 9);
        // Removing the first region moves the last one into its slot.
        assert!(grid.remove_chunk(a));
        assert_eq!(grid.get(c, 1), Some(9));
        assert!(grid.has_chunk(b));
        assert!(!grid.has_chunk(a));
    }

    #[test]
    fn test_cache_follows_lookups() {
        let mut grid = VoxelGrid::new();
        let a = ChunkCoord::new(0, 0, 0);
        let b = ChunkCoord::new(50, 0, 0);
        grid.create_chunk(a);
        grid.create_chunk(b);
        grid.set(a, 0, 1);
        grid.set(b, 0, 2);
        for _ in 0..3 {
            assert_eq!(grid.get(a, 0), Some(1));
            assert_eq!(grid.get(b, 0), Some(2));
        }
    }
}

//! Chunk, region and cell coordinate conversions.
//!
//! World cells are integer coordinates. A chunk covers [`CHUNK_SIZE`]³ cells
//! and a region covers [`REGION_SIZE`]³ chunks. All conversions use floor
//! division so negative coordinates map to the chunk below, not towards zero.

use glam::{IVec3, UVec3, Vec3};
use serde::{Deserialize, Serialize};

/// Cells along one edge of a chunk.
pub const CHUNK_SIZE: usize = 32;
/// Cells in one chunk.
pub const CHUNK_VOLUME: usize = CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE;
/// Chunks along one edge of a region.
pub const REGION_SIZE: usize = 8;
/// Chunk slots in one region.
pub const REGION_VOLUME: usize = REGION_SIZE * REGION_SIZE * REGION_SIZE;

const CHUNK_SIZE_I: i32 = CHUNK_SIZE as i32;
const REGION_SIZE_I: i32 = REGION_SIZE as i32;

/// Position of a chunk in the chunk grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Returns the chunk offset by `(dx, dy, dz)`.
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The chunk containing world cell `cell`.
    pub fn of_cell(cell: IVec3) -> Self {
        Self::new(
            cell.x.div_euclid(CHUNK_SIZE_I),
            cell.y.div_euclid(CHUNK_SIZE_I),
            cell.z.div_euclid(CHUNK_SIZE_I),
        )
    }

    /// The chunk containing world-space point `position`.
    pub fn of_position(position: Vec3) -> Self {
        Self::of_cell(cell_of(position))
    }

    /// World cell at the minimum corner of this chunk.
    pub fn origin(self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z) * CHUNK_SIZE_I
    }

    /// The region containing this chunk.
    pub fn region(self) -> RegionCoord {
        RegionCoord {
            x: self.x.div_euclid(REGION_SIZE_I),
            y: self.y.div_euclid(REGION_SIZE_I),
            z: self.z.div_euclid(REGION_SIZE_I),
        }
    }

    /// Slot of this chunk inside its region.
    pub fn slot_in_region(self) -> usize {
        let x = self.x.rem_euclid(REGION_SIZE_I) as usize;
        let y = self.y.rem_euclid(REGION_SIZE_I) as usize;
        let z = self.z.rem_euclid(REGION_SIZE_I) as usize;
        (y * REGION_SIZE + z) * REGION_SIZE + x
    }

    /// The six face-adjacent chunks in the order −X, +X, −Y, +Y, −Z, +Z.
    pub fn face_neighbours(self) -> [ChunkCoord; 6] {
        [
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
        ]
    }

    pub fn as_ivec3(self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }

    /// Stable storage key, e.g. `"-1,0,3"`.
    pub fn storage_key(self) -> String {
        format!("{},{},{}", self.x, self.y, self.z)
    }

    /// Parses a key produced by [`ChunkCoord::storage_key`].
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let mut parts = key.split(',').map(|p| p.trim().parse::<i32>());
        let coord = Self::new(
            parts.next()?.ok()?,
            parts.next()?.ok()?,
            parts.next()?.ok()?,
        );
        parts.next().is_none().then_some(coord)
    }
}

impl From<IVec3> for ChunkCoord {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Position of a region in the region grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegionCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// The integer cell containing world-space point `position`.
pub fn cell_of(position: Vec3) -> IVec3 {
    position.floor().as_ivec3()
}

/// Splits a world cell into its chunk and the local position inside it.
pub fn split_cell(cell: IVec3) -> (ChunkCoord, UVec3) {
    let local = UVec3::new(
        cell.x.rem_euclid(CHUNK_SIZE_I) as u32,
        cell.y.rem_euclid(CHUNK_SIZE_I) as u32,
        cell.z.rem_euclid(CHUNK_SIZE_I) as u32,
    );
    (ChunkCoord::of_cell(cell), local)
}

/// Index of a local position in a chunk's cell array.
///
/// Cells are stored Y-major, then Z, then X.
pub fn cell_index(local: UVec3) -> usize {
    debug_assert!(local.max_element() < CHUNK_SIZE as u32);
    (local.y as usize * CHUNK_SIZE + local.z as usize) * CHUNK_SIZE + local.x as usize
}

/// Inverse of [`cell_index`].
pub fn local_of_index(index: usize) -> UVec3 {
    let x = index % CHUNK_SIZE;
    let z = (index / CHUNK_SIZE) % CHUNK_SIZE;
    let y = index / (CHUNK_SIZE * CHUNK_SIZE);
    UVec3::new(x as u32, y as u32, z as u32)
}

/// Whether a local position lies on a chunk face.
pub fn on_chunk_boundary(local: UVec3) -> bool {
    let last = CHUNK_SIZE as u32 - 1;
    local.min_element() == 0 || local.max_element() == last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_cells_floor() {
        assert_eq!(ChunkCoord::of_cell(IVec3::new(-1, 0, 31)), ChunkCoord::new(-1, 0, 0));
        assert_eq!(ChunkCoord::of_cell(IVec3::new(-32, -33, 32)), ChunkCoord::new(-1, -2, 1));
        let (chunk, local) = split_cell(IVec3::new(-1, -32, 5));
        assert_eq!(chunk, ChunkCoord::new(-1, -1, 0));
        assert_eq!(local, UVec3::new(31, 0, 5));
    }

    #[test]
    fn test_position_to_cell() {
        assert_eq!(cell_of(Vec3::new(3.5, 4.0, -0.25)), IVec3::new(3, 4, -1));
        assert_eq!(ChunkCoord::of_position(Vec3::new(-0.1, 0.0, 0.0)), ChunkCoord::new(-1, 0, 0));
    }

    #[test]
    fn test_cell_index_roundtrip() {
        for index in [0, 1, 31, 32, 1023, 1024, CHUNK_VOLUME - 1] {
            assert_eq!(cell_index(local_of_index(index)), index);
        }
        assert_eq!(cell_index(UVec3::new(1, 0, 0)), 1);
        assert_eq!(cell_index(UVec3::new(0, 0, 1)), CHUNK_SIZE);
        assert_eq!(cell_index(UVec3::new(0, 1, 0)), CHUNK_SIZE * CHUNK_SIZE);
    }

    #[test]
    fn test_region_slots() {
        let a = ChunkCoord::new(-1, 0, 0);
        assert_eq!(a.region(), RegionCoord { x: -1, y: 0, z: 0 });
        assert_eq!(a.slot_in_region(), REGION_SIZE - 1);
        assert_eq!(ChunkCoord::new(8, 8, 8).slot_in_region(), 0);
    }

    #[test]
    fn test_storage_key_roundtrip() {
        let coord = ChunkCoord::new(-4, 0, 17);
        assert_eq!(coord.storage_key(), "-4,0,17");
        assert_eq!(ChunkCoord::from_storage_key(&coord.storage_key()), Some(coord));
        assert_eq!(ChunkCoord::from_storage_key("1,2"), None);
        assert_eq!(ChunkCoord::from_storage_key("1,2,3,4"), None);
        assert_eq!(ChunkCoord::from_storage_key("a,b,c"), None);
    }

    #[test]
    fn test_boundary_detection() {
        assert!(on_chunk_boundary(UVec3::new(0, 5, 5)));
        assert!(on_chunk_boundary(UVec3::new(5, 31, 5)));
        assert!(!on_chunk_boundary(UVec3::new(5, 5, 5)));
    }
}

//! Chunked voxel storage: the sparse region grid, per-chunk palettes, the
//! global block-state memoizer and the world that ties them together.

pub mod chunk;
pub mod collider;
pub mod coords;
pub mod dirty;
pub mod events;
pub mod generator;
pub mod grid;
pub mod palette;
pub mod pool;
pub mod registry;
pub mod world;

pub use chunk::{ALL_DIRTY, Chunk, ChunkHandle, EntityId, MESH_DIRTY, NETWORK_DIRTY, SAVE_DIRTY};
pub use collider::{Aabb, ColliderBox, CompiledCollider};
pub use coords::{CHUNK_SIZE, CHUNK_VOLUME, ChunkCoord, REGION_SIZE, cell_of, split_cell};
pub use dirty::DirtyQueue;
pub use events::{WorldEvent, WorldEvents};
pub use generator::{ChunkGenerator, FlatGenerator};
pub use grid::VoxelGrid;
pub use palette::{AIR_KEY, ChunkPalette, PaletteError};
pub use pool::CellPool;
pub use registry::{
    BlockMemo, BlockRegistry, BlockRegistryError, BlockStateDef, BlockStateTable, BlockTypeDef,
    MemoId, save_key,
};
pub use world::{ChunkSnapshot, ColliderLookup, SnapshotCells, World, WorldError};

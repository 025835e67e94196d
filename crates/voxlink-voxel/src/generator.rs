//! Pluggable chunk generation.

use crate::coords::{CHUNK_SIZE, CHUNK_VOLUME, ChunkCoord, cell_index};
use crate::palette::AIR_KEY;
use crate::world::{ChunkSnapshot, SnapshotCells};
use glam::UVec3;

/// Fills a chunk from its coordinate alone.
///
/// Implementations must be deterministic: the same coordinate always yields
/// the same snapshot.
pub trait ChunkGenerator: Send + Sync {
    fn generate(&self, coord: ChunkCoord) -> ChunkSnapshot;
}

/// Flat terrain: everything below `height` is `fill`, the top layer is
/// `surface`, everything above is air.
#[derive(Clone, Debug)]
pub struct FlatGenerator {
    pub height: i32,
    pub fill: String,
    pub surface: String,
}

impl FlatGenerator {
    pub fn new(height: i32, fill: impl Into<String>, surface: impl Into<String>) -> Self {
        Self {
            height,
            fill: fill.into(),
            surface: surface.into(),
        }
    }

    /// Palette plus the surface index. A surface equal to the fill shares
    /// its slot.
    fn palette(&self) -> (Vec<String>, u16) {
        let mut palette = vec![AIR_KEY.to_string(), self.fill.clone()];
        if self.surface == self.fill {
            return (palette, 1);
        }
        palette.push(self.surface.clone());
        (palette, 2)
    }

    fn key_at(&self, y: i32, surface: u16) -> u16 {
        if y >= self.height {
            0
        } else if y == self.height - 1 {
            surface
        } else {
            1
        }
    }
}

impl ChunkGenerator for FlatGenerator {
    fn generate(&self, coord: ChunkCoord) -> ChunkSnapshot {
        let (palette, surface) = self.palette();
        let base_y = coord.origin().y;
        let top = base_y + CHUNK_SIZE as i32;

        // Whole chunk above or below the surface layer.
        if base_y >= self.height {
            return ChunkSnapshot::uniform(coord, palette, 0);
        }
        if top < self.height {
            return ChunkSnapshot::uniform(coord, palette, 1);
        }

        let mut cells = vec![0u16; CHUNK_VOLUME];
        for ly in 0..CHUNK_SIZE as u32 {
            let value = self.key_at(base_y + ly as i32, surface);
            if value == 0 {
                continue;
            }
            for lz in 0..CHUNK_SIZE as u32 {
                for lx in 0..CHUNK_SIZE as u32 {
                    cells[cell_index(UVec3::new(lx, ly, lz))] = value;
                }
            }
        }
        ChunkSnapshot {
            coord,
            palette,
            cells: SnapshotCells::Cells(cells),
        }
    }
}

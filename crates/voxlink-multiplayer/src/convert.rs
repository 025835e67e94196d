//! Conversions between stored chunk snapshots and their wire form.

use voxlink_voxel::{ChunkCoord, ChunkSnapshot, SnapshotCells};
use voxlink_wire::{ChunkCells, ChunkData, EntityState};

pub fn chunk_data_from_snapshot(snapshot: ChunkSnapshot, entities: Vec<EntityState>) -> ChunkData {
    let cells = match snapshot.cells {
        SnapshotCells::Uniform(value) => ChunkCells::Homogeneous(value),
        SnapshotCells::Cells(cells) => ChunkCells::Raw(cells),
    };
    ChunkData {
        coord: snapshot.coord.as_ivec3(),
        cells,
        palette: snapshot.palette,
        entities,
    }
}

/// The block part of a [`ChunkData`] message. Entity states are left to the
/// caller.
pub fn snapshot_from_chunk_data(data: &ChunkData) -> ChunkSnapshot {
    let cells = match &data.cells {
        ChunkCells::Homogeneous(value) => SnapshotCells::Uniform(*value),
        ChunkCells::Raw(cells) => SnapshotCells::Cells(cells.clone()),
    };
    ChunkSnapshot {
        coord: ChunkCoord::from(data.coord),
        palette: data.palette.clone(),
        cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{IVec3, Vec3};

    #[test]
    fn test_uniform_snapshot_becomes_homogeneous() {
        let snapshot = ChunkSnapshot::air(ChunkCoord::new(1, -2, 3));
        let data = chunk_data_from_snapshot(
            snapshot.clone(),
            vec![EntityState {
                entity_id: 5,
                position: Vec3::ONE,
                velocity: Vec3::ZERO,
            }],
        );
        assert_eq!(data.coord, IVec3::new(1, -2, 3));
        assert_eq!(data.cells, ChunkCells::Homogeneous(0));
        assert_eq!(data.entities.len(), 1);
        assert_eq!(snapshot_from_chunk_data(&data), snapshot);
    }

    #[test]
    fn test_raw_cells_are_kept() {
        let snapshot = ChunkSnapshot {
            coord: ChunkCoord::new(0, 0, 0),
            palette: vec!["air#default".into(), "stone#default".into()],
            cells: SnapshotCells::Cells(vec![1, 0, 1]),
        };
        let data = chunk_data_from_snapshot(snapshot.clone(), Vec::new());
        assert_eq!(data.cells, ChunkCells::Raw(vec![1, 0, 1]));
        assert_eq!(snapshot_from_chunk_data(&data), snapshot);
    }
}

//! Block picking rays.
//!
//! The ray is marched in fixed steps. At each sample the 3×3×3 cells around
//! the sample point are tested, in cell-local space, against every
//! raycast-target box. The closest hit over the whole march wins, so a box
//! first reached from a later sample still beats a farther one found earlier.

use glam::{IVec3, Vec3};
use rustc_hash::FxHashSet;
use voxlink_voxel::{Aabb, ColliderLookup};

use crate::collision::CollisionWorld;

/// Distance between ray samples, in cells.
pub const RAY_STEP: f32 = 1.0;

/// Face normals in tie-break order.
const FACE_NORMALS: [IVec3; 6] = [
    IVec3::NEG_X,
    IVec3::X,
    IVec3::NEG_Y,
    IVec3::Y,
    IVec3::NEG_Z,
    IVec3::Z,
];

/// Result of a successful raycast.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastHit {
    pub cell: IVec3,
    pub box_index: usize,
    /// World-space hit point.
    pub point: Vec3,
    /// Outward normal of the face that was hit.
    pub normal: IVec3,
    pub distance: f32,
}

impl RaycastHit {
    /// The empty cell in front of the hit face, where a placed block goes.
    pub fn adjacent_cell(&self) -> IVec3 {
        self.cell + self.normal
    }
}

/// Casts a ray of length `max_distance` from `origin` along `direction`.
pub fn raycast<W: CollisionWorld + ?Sized>(
    world: &W,
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
) -> Option<RaycastHit> {
    let dir = direction.normalize_or_zero();
    if dir == Vec3::ZERO || max_distance <= 0.0 {
        return None;
    }

    let mut visited = FxHashSet::default();
    let mut best: Option<(f32, RaycastHit)> = None;
    let samples = (max_distance / RAY_STEP).ceil() as u32;

    for i in 0..=samples {
        let t = (i as f32 * RAY_STEP).min(max_distance);
        let center = (origin + dir * t).floor().as_ivec3();
        for dy in -1..=1 {
            for dz in -1..=1 {
                for dx in -1..=1 {
                    let cell = center + IVec3::new(dx, dy, dz);
                    if !visited.insert(cell) {
                        continue;
                    }
                    let ColliderLookup::Loaded(collider) = world.collider_at(cell) else {
                        continue;
                    };
                    if !collider.has_raycast_target() {
                        continue;
                    }
                    let local_origin = origin - cell.as_vec3();
                    for (box_index, aabb) in collider.raycast_targets() {
                        let Some(t_hit) = aabb.ray_intersection(local_origin, dir) else {
                            continue;
                        };
                        if t_hit > max_distance {
                            continue;
                        }
                        let offset = dir * t_hit;
                        let dist_sq = offset.length_squared();
                        if best.as_ref().is_some_and(|(d, _)| dist_sq >= *d) {
                            continue;
                        }
                        let local_point = local_origin + offset;
                        best = Some((
                            dist_sq,
                            RaycastHit {
                                cell,
                                box_index,
                                point: origin + offset,
                                normal: face_normal(aabb, local_point),
                                distance: t_hit,
                            },
                        ));
                    }
                }
            }
        }
    }
    best.map(|(_, hit)| hit)
}

/// The face of `aabb` nearest to `point`. Ties go to the earlier face in
/// −X, +X, −Y, +Y, −Z, +Z order.
pub fn face_normal(aabb: &Aabb, point: Vec3) -> IVec3 {
    let distances = [
        (point.x - aabb.min.x).abs(),
        (aabb.max.x - point.x).abs(),
        (point.y - aabb.min.y).abs(),
        (aabb.max.y - point.y).abs(),
        (point.z - aabb.min.z).abs(),
        (aabb.max.z - point.z).abs(),
    ];
    let mut best = 0;
    for (i, &d) in distances.iter().enumerate().skip(1) {
        if d < distances[best] {
            best = i;
        }
    }
    FACE_NORMALS[best]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::tests::{scenario_world, test_world};
    use voxlink_voxel::ChunkCoord;

    #[test]
    fn test_ray_down_hits_top_face() {
        let world = scenario_world();
        let hit = raycast(&world, Vec3::new(3.5, 10.0, 5.5), Vec3::NEG_Y, 20.0).unwrap();
        assert_eq!(hit.cell, IVec3::new(3, 4, 5));
        assert_eq!(hit.normal, IVec3::Y);
        assert!((hit.distance - 5.0).abs() < 1e-5);
        assert!((hit.point.y - 5.0).abs() < 1e-5);
        assert_eq!(hit.adjacent_cell(), IVec3::new(3, 5, 5));
    }

    #[test]
    fn test_ray_from_side() {
        let world = scenario_world();
        let hit = raycast(&world, Vec3::new(0.5, 4.5, 5.5), Vec3::X, 10.0).unwrap();
        assert_eq!(hit.cell, IVec3::new(3, 4, 5));
        assert_eq!(hit.normal, IVec3::NEG_X);
    }

    #[test]
    fn test_ray_out_of_range_misses() {
        let world = scenario_world();
        assert!(raycast(&world, Vec3::new(3.5, 10.0, 5.5), Vec3::NEG_Y, 4.0).is_none());
        assert!(raycast(&world, Vec3::new(3.5, 10.0, 5.5), Vec3::Y, 20.0).is_none());
        assert!(raycast(&world, Vec3::new(3.5, 10.0, 5.5), Vec3::ZERO, 20.0).is_none());
    }

    #[test]
    fn test_closest_hit_wins() {
        let mut world = test_world();
        world.create_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        world.set_block(IVec3::new(5, 1, 1), "stone#default").unwrap();
        world.set_block(IVec3::new(6, 1, 1), "stone#default").unwrap();
        let hit = raycast(&world, Vec3::new(1.5, 1.5, 1.5), Vec3::X, 16.0).unwrap();
        assert_eq!(hit.cell, IVec3::new(5, 1, 1));
        assert!((hit.distance - 3.5).abs() < 1e-5);
    }

    #[test]
    fn test_pass_through_blocks_are_pickable() {
        let mut world = test_world();
        world.create_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        world.set_block(IVec3::new(2, 0, 2), "grass#default").unwrap();
        let hit = raycast(&world, Vec3::new(2.5, 5.0, 2.5), Vec3::NEG_Y, 10.0).unwrap();
        assert_eq!(hit.cell, IVec3::new(2, 0, 2));
        assert!((hit.point.y - 0.6).abs() < 1e-5);
    }

    #[test]
    fn test_face_normal_tie_order() {
        // Corner point: equidistant from -X, -Y and -Z faces.
        assert_eq!(face_normal(&Aabb::UNIT, Vec3::ZERO), IVec3::NEG_X);
        // Edge between +X and +Y.
        assert_eq!(face_normal(&Aabb::UNIT, Vec3::new(1.0, 1.0, 0.5)), IVec3::X);
    }
}

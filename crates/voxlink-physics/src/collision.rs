//! Entity hitbox vs. voxel world overlap.
//!
//! The query enumerates every integer cell the (slightly expanded) hitbox
//! spans and tests the hitbox against each entity-blocking box of those
//! cells. Cells in unloaded chunks collide as full cubes.

use glam::{IVec3, Vec3};
use voxlink_voxel::{Aabb, ColliderLookup, World};

/// Extra reach when enumerating cells around a hitbox.
pub const COLLISION_MARGIN: f32 = 0.05;

/// Source of per-cell colliders.
pub trait CollisionWorld {
    fn collider_at(&self, cell: IVec3) -> ColliderLookup<'_>;
}

impl CollisionWorld for World {
    fn collider_at(&self, cell: IVec3) -> ColliderLookup<'_> {
        World::collider_at(self, cell)
    }
}

/// The block box an entity hitbox overlapped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockCollision {
    pub cell: IVec3,
    /// Index of the box in the cell's compiled collider.
    pub box_index: usize,
    /// The overlapped box in world space.
    pub aabb: Aabb,
    /// The cell's chunk is not loaded.
    pub unloaded: bool,
}

/// Integer cells a box touches, inclusive.
pub fn cells_spanned(aabb: &Aabb) -> (IVec3, IVec3) {
    (aabb.min.floor().as_ivec3(), aabb.max.floor().as_ivec3())
}

/// Tests `hitbox` moved by `delta` against the world.
///
/// Returns the last colliding box found, cells visited in Y, Z, X order.
pub fn is_colliding_with_world<W: CollisionWorld + ?Sized>(
    world: &W,
    hitbox: &Aabb,
    delta: Vec3,
) -> Option<BlockCollision> {
    let moved = hitbox.translated(delta);
    let (lo, hi) = cells_spanned(&moved.expanded(COLLISION_MARGIN));
    let mut last = None;
    for y in lo.y..=hi.y {
        for z in lo.z..=hi.z {
            for x in lo.x..=hi.x {
                let cell = IVec3::new(x, y, z);
                let base = cell.as_vec3();
                match world.collider_at(cell) {
                    ColliderLookup::Unloaded => {
                        let aabb = Aabb::UNIT.translated(base);
                        if moved.intersects(&aabb) {
                            last = Some(BlockCollision {
                                cell,
                                box_index: 0,
                                aabb,
                                unloaded: true,
                            });
                        }
                    }
                    ColliderLookup::Loaded(collider) => {
                        if collider.is_walk_through() {
                            continue;
                        }
                        for (box_index, local) in collider.blocking() {
                            let aabb = local.translated(base);
                            if moved.intersects(&aabb) {
                                last = Some(BlockCollision {
                                    cell,
                                    box_index,
                                    aabb,
                                    unloaded: false,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
    last
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use voxlink_voxel::{
        BlockRegistry, BlockStateDef, BlockTypeDef, ChunkCoord, ColliderBox, World,
    };

    pub(crate) fn test_world() -> World {
        let mut registry = BlockRegistry::new();
        registry.register(BlockTypeDef::air()).unwrap();
        registry
            .register(BlockTypeDef::new("stone", vec![BlockStateDef::solid("default")]))
            .unwrap();
        registry
            .register(BlockTypeDef::new(
                "grass",
                vec![BlockStateDef::decoration(
                    "default",
                    vec![ColliderBox::pass_through(Aabb::new(
                        Vec3::new(0.2, 0.0, 0.2),
                        Vec3::new(0.8, 0.6, 0.8),
                    ))],
                )],
            ))
            .unwrap();
        registry
            .register(BlockTypeDef::new(
                "slab",
                vec![BlockStateDef {
                    boxes: vec![ColliderBox::solid(Aabb::new(
                        Vec3::ZERO,
                        Vec3::new(1.0, 0.5, 1.0),
                    ))],
                    ..BlockStateDef::solid("lower")
                }],
            ))
            .unwrap();
        let table: Arc<_> = registry.freeze().unwrap();
        World::new(table).unwrap()
    }

    pub(crate) fn scenario_world() -> World {
        let mut world = test_world();
        world.create_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        world.set_block(IVec3::new(3, 4, 5), "stone#default").unwrap();
        world
    }

    #[test]
    fn test_hitbox_straddling_block_collides() {
        let world = scenario_world();
        let hitbox = Aabb::from_center_half_extents(Vec3::new(3.5, 4.5, 5.5), Vec3::splat(0.3));
        let hit = is_colliding_with_world(&world, &hitbox, Vec3::ZERO).unwrap();
        assert_eq!(hit.cell, IVec3::new(3, 4, 5));
        assert_eq!(hit.box_index, 0);
        assert_eq!(hit.aabb, Aabb::UNIT.translated(Vec3::new(3.0, 4.0, 5.0)));
        assert!(!hit.unloaded);
    }

    #[test]
    fn test_touching_is_not_colliding() {
        let world = scenario_world();
        // Resting exactly on top of the block.
        let hitbox = Aabb::new(Vec3::new(3.2, 5.0, 5.2), Vec3::new(3.8, 6.8, 5.8));
        assert!(is_colliding_with_world(&world, &hitbox, Vec3::ZERO).is_none());
        assert!(is_colliding_with_world(&world, &hitbox, Vec3::new(0.0, -0.1, 0.0)).is_some());
    }

    #[test]
    fn test_walk_through_cells_are_skipped() {
        let mut world = test_world();
        world.create_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        world.set_block(IVec3::new(1, 1, 1), "grass#default").unwrap();
        let hitbox = Aabb::from_center_half_extents(Vec3::splat(1.5), Vec3::splat(0.3));
        assert!(is_colliding_with_world(&world, &hitbox, Vec3::ZERO).is_none());
    }

    #[test]
    fn test_partial_box_collision() {
        let mut world = test_world();
        world.create_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        world.set_block(IVec3::new(2, 0, 2), "slab#lower").unwrap();
        let above = Aabb::new(Vec3::new(2.1, 0.6, 2.1), Vec3::new(2.9, 1.9, 2.9));
        assert!(is_colliding_with_world(&world, &above, Vec3::ZERO).is_none());
        let hit = is_colliding_with_world(&world, &above, Vec3::new(0.0, -0.2, 0.0)).unwrap();
        assert_eq!(hit.aabb.max.y, 0.5);
    }

    #[test]
    fn test_unloaded_cells_collide() {
        let world = test_world();
        let hitbox = Aabb::from_center_half_extents(Vec3::splat(10.5), Vec3::splat(0.3));
        let hit = is_colliding_with_world(&world, &hitbox, Vec3::ZERO).unwrap();
        assert!(hit.unloaded);
        assert_eq!(hit.cell, IVec3::splat(10));
    }

    #[test]
    fn test_last_collision_wins() {
        let mut world = test_world();
        world.create_chunk(ChunkCoord::new(0, 0, 0)).unwrap();
        world.set_block(IVec3::new(1, 1, 1), "stone#default").unwrap();
        world.set_block(IVec3::new(2, 1, 1), "stone#default").unwrap();
        let hitbox = Aabb::new(Vec3::new(1.5, 1.2, 1.2), Vec3::new(2.5, 1.8, 1.8));
        let hit = is_colliding_with_world(&world, &hitbox, Vec3::ZERO).unwrap();
        assert_eq!(hit.cell, IVec3::new(2, 1, 1));
    }
}

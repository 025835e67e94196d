//! Axis-aligned boxes and compiled per-block-state colliders.
//!
//! A [`CompiledCollider`] is a set of boxes in cell-local space (the unit
//! cube `[0,1]³` for a full block). Each box is independently flagged as
//! walk-through (ignored by entity collision) and raycast-target (hit by
//! block picking).

use glam::Vec3;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const UNIT: Aabb = Aabb {
        min: Vec3::ZERO,
        max: Vec3::ONE,
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Grows the box by `margin` on every side.
    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Strict overlap test. Boxes that only touch do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Slab test. Returns the ray parameter of the entry point, or `0.0` if
    /// the origin is inside the box.
    pub fn ray_intersection(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if d.abs() < f32::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (lo - o) * inv;
            let mut t1 = (hi - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

/// One box of a block collider.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColliderBox {
    pub aabb: Aabb,
    /// Entities pass through this box.
    pub walk_through: bool,
    /// Block picking rays can hit this box.
    pub raycast_target: bool,
}

impl ColliderBox {
    /// A solid, pickable box.
    pub fn solid(aabb: Aabb) -> Self {
        Self {
            aabb,
            walk_through: false,
            raycast_target: true,
        }
    }

    /// A pickable box entities walk through (plants, signs).
    pub fn pass_through(aabb: Aabb) -> Self {
        Self {
            aabb,
            walk_through: true,
            raycast_target: true,
        }
    }
}

/// Collider of one block state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledCollider {
    boxes: Vec<ColliderBox>,
}

/// Shared collider with no boxes.
pub static EMPTY_COLLIDER: CompiledCollider = CompiledCollider { boxes: Vec::new() };

impl CompiledCollider {
    pub fn new(boxes: Vec<ColliderBox>) -> Self {
        Self { boxes }
    }

    /// No boxes at all (air).
    pub fn empty() -> Self {
        Self::default()
    }

    /// One solid, pickable unit cube.
    pub fn full_cube() -> Self {
        Self::new(vec![ColliderBox::solid(Aabb::UNIT)])
    }

    pub fn boxes(&self) -> &[ColliderBox] {
        &self.boxes
    }

    /// Boxes that block entities, with their index in [`Self::boxes`].
    pub fn blocking(&self) -> impl Iterator<Item = (usize, &Aabb)> {
        self.boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.walk_through)
            .map(|(i, b)| (i, &b.aabb))
    }

    /// Boxes hit by picking rays, with their index in [`Self::boxes`].
    pub fn raycast_targets(&self) -> impl Iterator<Item = (usize, &Aabb)> {
        self.boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.raycast_target)
            .map(|(i, b)| (i, &b.aabb))
    }

    /// `true` when no box blocks entities.
    pub fn is_walk_through(&self) -> bool {
        self.boxes.iter().all(|b| b.walk_through)
    }

    pub fn has_raycast_target(&self) -> bool {
        self.boxes.iter().any(|b| b.raycast_target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touching_boxes_do_not_intersect() {
        let a = Aabb::UNIT;
        let b = Aabb::UNIT.translated(Vec3::X);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&Aabb::UNIT.translated(Vec3::splat(0.5))));
    }

    #[test]
    fn test_ray_hits_top_face() {
        let hit = Aabb::UNIT
            .ray_intersection(Vec3::new(0.5, 5.0, 0.5), Vec3::NEG_Y)
            .unwrap();
        assert!((hit - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_ray_misses_and_behind() {
        assert!(Aabb::UNIT
            .ray_intersection(Vec3::new(2.0, 5.0, 0.5), Vec3::NEG_Y)
            .is_none());
        assert!(Aabb::UNIT
            .ray_intersection(Vec3::new(0.5, 5.0, 0.5), Vec3::Y)
            .is_none());
    }

    #[test]
    fn test_ray_from_inside() {
        let t = Aabb::UNIT
            .ray_intersection(Vec3::splat(0.5), Vec3::X)
            .unwrap();
        assert_eq!(t, 0.0);
    }

    #[test]
    fn test_collider_flags() {
        assert!(CompiledCollider::empty().is_walk_through());
        assert!(!CompiledCollider::empty().has_raycast_target());

        let cube = CompiledCollider::full_cube();
        assert!(!cube.is_walk_through());
        assert_eq!(cube.blocking().count(), 1);

        let plant = CompiledCollider::new(vec![ColliderBox::pass_through(Aabb::new(
            Vec3::new(0.25, 0.0, 0.25),
            Vec3::new(0.75, 0.8, 0.75),
        ))]);
        assert!(plant.is_walk_through());
        assert!(plant.has_raycast_target());
        assert_eq!(plant.blocking().count(), 0);
    }
}

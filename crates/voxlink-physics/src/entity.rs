//! Entity bodies and their simulation role.
//!
//! Every entity has one [`EntityBody`]. A body is either simulated locally
//! (run through the integrator) or observed (eased toward snapshots received
//! from whoever simulates it), never both.

use glam::Vec3;
use voxlink_voxel::{Aabb, EntityId};

use crate::collision::CollisionWorld;
use crate::integrator::{PhysicsParams, StepReport, integrate};

/// Seconds an observed entity takes to reach a new snapshot by default.
pub const DEFAULT_INTERPOLATION_TIME: f32 = 0.1;

/// Physical state of an entity. `position` is the hitbox center.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityBody {
    pub position: Vec3,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    /// Per-axis exponential drag coefficient.
    pub drag: Vec3,
    pub half_extents: Vec3,
    pub ignore_gravity: bool,
    /// Set by the integrator when the last tick ended resting on something.
    pub on_ground: bool,
}

impl EntityBody {
    pub fn new(position: Vec3, half_extents: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            drag: Vec3::ZERO,
            half_extents,
            ignore_gravity: false,
            on_ground: false,
        }
    }

    pub fn with_drag(mut self, drag: Vec3) -> Self {
        self.drag = drag;
        self
    }

    pub fn hitbox(&self) -> Aabb {
        Aabb::from_center_half_extents(self.position, self.half_extents)
    }

    /// Hitbox of this body placed at another position.
    pub fn hitbox_at(&self, position: Vec3) -> Aabb {
        Aabb::from_center_half_extents(position, self.half_extents)
    }

    pub fn feet_y(&self) -> f32 {
        self.position.y - self.half_extents.y
    }
}

/// Interpolation toward the last received snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interpolation {
    from: Vec3,
    to: Vec3,
    target_velocity: Vec3,
    elapsed: f32,
    duration: f32,
}

impl Interpolation {
    fn settled(position: Vec3) -> Self {
        Self {
            from: position,
            to: position,
            target_velocity: Vec3::ZERO,
            elapsed: 0.0,
            duration: DEFAULT_INTERPOLATION_TIME,
        }
    }

    pub fn target(&self) -> Vec3 {
        self.to
    }

    /// Progress toward the target in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.duration <= 0.0 {
            1.0
        } else {
            (self.elapsed / self.duration).min(1.0)
        }
    }
}

/// How an entity's body is advanced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EntityRole {
    /// Runs the movement integrator on this side.
    Simulated,
    /// Follows snapshots produced elsewhere.
    Observed(Interpolation),
}

/// A body with an identity and a role.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub kind: String,
    pub body: EntityBody,
    role: EntityRole,
}

impl Entity {
    pub fn simulated(id: EntityId, kind: impl Into<String>, body: EntityBody) -> Self {
        Self {
            id,
            kind: kind.into(),
            body,
            role: EntityRole::Simulated,
        }
    }

    pub fn observed(id: EntityId, kind: impl Into<String>, body: EntityBody) -> Self {
        let role = EntityRole::Observed(Interpolation::settled(body.position));
        Self {
            id,
            kind: kind.into(),
            body,
            role,
        }
    }

    pub fn role(&self) -> &EntityRole {
        &self.role
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.role, EntityRole::Simulated)
    }

    /// Starts easing an observed entity toward a new snapshot.
    ///
    /// Ignored for simulated entities, whose state only changes through the
    /// integrator or an explicit correction.
    pub fn push_snapshot(&mut self, position: Vec3, velocity: Vec3) {
        self.push_snapshot_over(position, velocity, DEFAULT_INTERPOLATION_TIME);
    }

    pub fn push_snapshot_over(&mut self, position: Vec3, velocity: Vec3, duration: f32) {
        if let EntityRole::Observed(interp) = &mut self.role {
            *interp = Interpolation {
                from: self.body.position,
                to: position,
                target_velocity: velocity,
                elapsed: 0.0,
                duration,
            };
        }
    }

    /// Advances the entity by `dt` seconds according to its role.
    pub fn tick<W: CollisionWorld + ?Sized>(
        &mut self,
        world: &W,
        params: &PhysicsParams,
        dt: f32,
    ) -> StepReport {
        match &mut self.role {
            EntityRole::Simulated => integrate(&mut self.body, world, params, dt),
            EntityRole::Observed(interp) => {
                interp.elapsed += dt;
                let t = interp.progress();
                self.body.position = interp.from.lerp(interp.to, t);
                self.body.velocity = interp.target_velocity;
                StepReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::tests::test_world;

    fn body() -> EntityBody {
        EntityBody::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.3, 0.9, 0.3))
    }

    #[test]
    fn test_hitbox_is_centered() {
        let b = body();
        assert!(b.hitbox().min.abs_diff_eq(Vec3::new(0.7, 1.1, 2.7), 1e-6));
        assert!((b.feet_y() - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_observed_entity_interpolates() {
        let world = test_world();
        let params = PhysicsParams::default();
        let mut entity = Entity::observed(EntityId(3), "player", body());
        entity.push_snapshot_over(Vec3::new(3.0, 2.0, 3.0), Vec3::X, 0.2);

        entity.tick(&world, &params, 0.1);
        assert!((entity.body.position.x - 2.0).abs() < 1e-5);
        assert_eq!(entity.body.velocity, Vec3::X);

        entity.tick(&world, &params, 0.5);
        assert_eq!(entity.body.position, Vec3::new(3.0, 2.0, 3.0));
    }

    #[test]
    fn test_simulated_entity_ignores_snapshots() {
        let mut entity = Entity::simulated(EntityId(1), "player", body());
        entity.push_snapshot(Vec3::splat(50.0), Vec3::ZERO);
        assert_eq!(entity.body.position, Vec3::new(1.0, 2.0, 3.0));
        assert!(entity.is_simulated());
    }

    #[test]
    fn test_simulated_entity_in_unloaded_space_holds_still() {
        let world = test_world();
        let params = PhysicsParams::default();
        let mut entity = Entity::simulated(EntityId(1), "player", body());
        for _ in 0..10 {
            entity.tick(&world, &params, 0.05);
        }
        assert_eq!(entity.body.position, Vec3::new(1.0, 2.0, 3.0));
        assert!(entity.body.on_ground);
    }
}

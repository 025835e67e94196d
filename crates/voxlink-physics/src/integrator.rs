//! Sub-stepped movement integration with per-axis collision response.
//!
//! Each tick is divided into equal sub-steps so no sub-step moves the body
//! further than [`PhysicsParams::max_step`]. Within a sub-step, velocity and
//! displacement follow the closed-form solution of `dv/dt = a − d·v` per
//! axis, and the displacement is applied Y first, then X, then Z, each axis
//! checked against the world before it is committed.

use glam::Vec3;

use crate::collision::{BlockCollision, CollisionWorld, is_colliding_with_world};
use crate::entity::EntityBody;

/// Gap left between a snapped body and the face it collided with.
pub const EPSILON: f32 = 1e-4;
/// Upper bound on sub-steps per tick.
pub const MAX_SUBSTEPS: u32 = 64;

/// Tunables shared by every simulated body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicsParams {
    /// Vertical acceleration applied to bodies that do not ignore gravity.
    pub gravity: f32,
    /// Longest distance a body may travel in one sub-step.
    pub max_step: f32,
    /// Highest ledge a body walks up without jumping.
    pub step_height: f32,
    pub max_substeps: u32,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            gravity: -9.81,
            max_step: 0.25,
            step_height: 0.6,
            max_substeps: MAX_SUBSTEPS,
        }
    }
}

/// What happened during one [`integrate`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepReport {
    pub substeps: u32,
    /// Axis moves that were blocked.
    pub collisions: u32,
    /// Horizontal moves resolved by stepping up.
    pub steps_up: u32,
}

/// Closed-form velocity and displacement after `h` seconds on one axis.
///
/// Solves `dv/dt = a − d·v`. With `d = 0` this is plain constant
/// acceleration.
pub fn integrate_axis(v: f32, a: f32, d: f32, h: f32) -> (f32, f32) {
    if d <= 0.0 {
        return (v + a * h, v * h + 0.5 * a * h * h);
    }
    let terminal = a / d;
    let decay = (-d * h).exp();
    let v_next = terminal + (v - terminal) * decay;
    let dx = terminal * h + (v - terminal) * (1.0 - decay) / d;
    (v_next, dx)
}

/// Number of equal sub-steps needed for a tick of length `dt`.
pub fn substep_count(body: &EntityBody, params: &PhysicsParams, dt: f32) -> u32 {
    let estimate = body.velocity.length() * dt + 0.5 * body.acceleration.length() * dt * dt;
    if !estimate.is_finite() || params.max_step <= 0.0 {
        return params.max_substeps.max(1);
    }
    let n = (estimate / params.max_step).ceil() as u32;
    n.clamp(1, params.max_substeps.max(1))
}

/// Advances a simulated body by `dt` seconds.
pub fn integrate<W: CollisionWorld + ?Sized>(
    body: &mut EntityBody,
    world: &W,
    params: &PhysicsParams,
    dt: f32,
) -> StepReport {
    let mut report = StepReport::default();
    if dt <= 0.0 {
        return report;
    }
    if !body.ignore_gravity {
        body.acceleration.y = params.gravity;
    }
    body.on_ground = false;

    let n = substep_count(body, params, dt);
    let h = dt / n as f32;
    report.substeps = n;

    for _ in 0..n {
        let mut delta = Vec3::ZERO;
        for axis in 0..3 {
            let (v, dx) = integrate_axis(
                body.velocity[axis],
                body.acceleration[axis],
                body.drag[axis],
                h,
            );
            body.velocity[axis] = v;
            delta[axis] = dx;
        }
        for axis in [1, 0, 2] {
            move_axis(body, world, params, axis, delta[axis], &mut report);
        }
    }
    tracing::trace!(
        "Integrated body to {:?} in {} sub-steps ({} collisions)",
        body.position,
        report.substeps,
        report.collisions
    );
    report
}

fn move_axis<W: CollisionWorld + ?Sized>(
    body: &mut EntityBody,
    world: &W,
    params: &PhysicsParams,
    axis: usize,
    delta: f32,
    report: &mut StepReport,
) {
    if delta == 0.0 {
        return;
    }
    let mut offset = Vec3::ZERO;
    offset[axis] = delta;
    let Some(hit) = is_colliding_with_world(world, &body.hitbox(), offset) else {
        body.position[axis] += delta;
        return;
    };

    if axis != 1 && try_step_up(body, world, params, offset, &hit) {
        report.steps_up += 1;
        return;
    }

    report.collisions += 1;
    let half = body.half_extents[axis];
    let start = body.position[axis];
    let snapped = if delta > 0.0 {
        hit.aabb.min[axis] - half - EPSILON
    } else {
        hit.aabb.max[axis] + half + EPSILON
    };
    // Never move backwards or past the requested displacement.
    let target = if delta > 0.0 {
        snapped.clamp(start, start + delta)
    } else {
        snapped.clamp(start + delta, start)
    };
    let mut snap = Vec3::ZERO;
    snap[axis] = target - start;
    if is_colliding_with_world(world, &body.hitbox(), snap).is_none() {
        body.position[axis] = target;
    }

    body.velocity[axis] = 0.0;
    body.acceleration[axis] = 0.0;
    if axis == 1 && delta < 0.0 {
        body.on_ground = true;
    }
}

fn try_step_up<W: CollisionWorld + ?Sized>(
    body: &mut EntityBody,
    world: &W,
    params: &PhysicsParams,
    offset: Vec3,
    hit: &BlockCollision,
) -> bool {
    let rise = hit.aabb.max.y - body.feet_y();
    if rise <= 0.0 || rise > params.step_height {
        return false;
    }
    let lift = Vec3::new(0.0, rise + EPSILON, 0.0);
    let hitbox = body.hitbox();
    if is_colliding_with_world(world, &hitbox, lift).is_some()
        || is_colliding_with_world(world, &hitbox, lift + offset).is_some()
    {
        return false;
    }
    body.position += lift + offset;
    true
}

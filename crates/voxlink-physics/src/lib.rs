//! Voxel collision, block picking and entity movement integration.
//!
//! Everything here works against the [`CollisionWorld`] trait, implemented
//! for [`voxlink_voxel::World`], so the same code runs on the authoritative
//! host and on predicting clients.

pub mod collision;
pub mod entity;
pub mod integrator;
pub mod raycast;

pub use collision::{BlockCollision, COLLISION_MARGIN, CollisionWorld, is_colliding_with_world};
pub use entity::{Entity, EntityBody, EntityRole, Interpolation};
pub use integrator::{EPSILON, MAX_SUBSTEPS, PhysicsParams, StepReport, integrate, integrate_axis};
pub use raycast::{RAY_STEP, RaycastHit, face_normal, raycast};

//! Visual smoothing of authoritative position corrections.
//!
//! The simulated position snaps to the corrected value at once. The rendered
//! position is offset by a visual offset that decays exponentially, so small
//! corrections blend in while large ones snap.

use glam::Vec3;

/// Corrections shorter than this (in cells) are smoothed, longer ones snap.
pub const SMALL_CORRECTION_THRESHOLD: f32 = 0.5;

/// Default exponential decay rate for the visual offset, per second.
pub const DEFAULT_DECAY_RATE: f32 = 10.0;

/// Offsets shorter than this are zeroed.
const MIN_OFFSET: f32 = 0.001;

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionSmoothing {
    visual_offset: Vec3,
    pub decay_rate: f32,
}

impl Default for CorrectionSmoothing {
    fn default() -> Self {
        Self {
            visual_offset: Vec3::ZERO,
            decay_rate: DEFAULT_DECAY_RATE,
        }
    }
}

impl CorrectionSmoothing {
    pub fn new(decay_rate: f32) -> Self {
        Self {
            decay_rate,
            ..Default::default()
        }
    }

    /// Records a correction of `delta` (new position − old position).
    pub fn apply_correction(&mut self, delta: Vec3) {
        if delta.length_squared() < SMALL_CORRECTION_THRESHOLD * SMALL_CORRECTION_THRESHOLD {
            // The rendered body stays where it was and catches up.
            self.visual_offset -= delta;
        } else {
            self.visual_offset = Vec3::ZERO;
        }
    }

    /// Drops any pending offset so the next frame draws the true position.
    pub fn reset(&mut self) {
        self.visual_offset = Vec3::ZERO;
    }

    /// Decays the visual offset over `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.visual_offset *= (-self.decay_rate * dt).exp();
        if self.visual_offset.length_squared() < MIN_OFFSET * MIN_OFFSET {
            self.visual_offset = Vec3::ZERO;
        }
    }

    pub fn visual_offset(&self) -> Vec3 {
        self.visual_offset
    }

    /// Where to draw a body whose simulated position is `position`.
    pub fn render_position(&self, position: Vec3) -> Vec3 {
        position + self.visual_offset
    }

    pub fn is_zero(&self) -> bool {
        self.visual_offset == Vec3::ZERO
    }
}

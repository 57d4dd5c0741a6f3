//! Particle effects
//!
//! Closed set of compute-driven behaviors a particle system can carry.
//! Each effect owns its parameters; the system turns them into uniform
//! data and a compute dispatch per update.

use cgmath::Vector3;

/// Emits particles from the system origin in a cone.
#[derive(Debug, Clone, Copy)]
pub struct FountainEmitter {
    /// Emission axis in world space.
    pub direction: Vector3<f32>,
    /// Cone spread, 0 = a beam, 1 = near-hemisphere.
    pub spread: f32,
    /// Initial particle speed in units per second.
    pub speed: f32,
    /// Probability per update that a dead slot respawns, 0..1.
    pub spawn_rate: f32,
}

impl FountainEmitter {
    pub fn new(direction: Vector3<f32>) -> Self {
        Self {
            direction,
            spread: 0.35,
            speed: 4.0,
            spawn_rate: 0.05,
        }
    }
}

impl Default for FountainEmitter {
    fn default() -> Self {
        Self::new(Vector3::new(0.0, 1.0, 0.0))
    }
}

/// Applies a constant acceleration to every live particle, gravity being
/// the usual suspect.
#[derive(Debug, Clone, Copy)]
pub struct ConstantForce {
    pub acceleration: Vector3<f32>,
}

impl ConstantForce {
    pub fn new(acceleration: Vector3<f32>) -> Self {
        Self { acceleration }
    }

    pub fn gravity() -> Self {
        Self::new(Vector3::new(0.0, -9.81, 0.0))
    }
}

/// The effects a [`ParticleSystem`](super::ParticleSystem) can run.
#[derive(Debug, Clone, Copy)]
pub enum ParticleEffect {
    Fountain(FountainEmitter),
    Force(ConstantForce),
}

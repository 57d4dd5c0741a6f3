//! # GPU Particle Sub-pipeline
//!
//! Compute-simulated particle pools. [`ParticleSystem`] owns the GPU
//! buffers and the init/effect/decay/sort dispatch chain; the geometry
//! pass draws the surviving particles as billboards straight from the
//! storage buffer.

pub mod effects;
pub mod system;

pub use effects::{ConstantForce, FountainEmitter, ParticleEffect};
pub use system::{Particle, ParticleSystem};

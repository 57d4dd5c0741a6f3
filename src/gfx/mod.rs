//! # Graphics Module
//!
//! This module contains the deferred rendering core of the Peat engine:
//! frame orchestration, GPU resource lifetimes, shader reflection and the
//! particle compute sub-pipeline.
//!
//! ## Architecture Overview
//!
//! - **Render Context** ([`context`]) - Device/queue pair and current-pipeline state
//! - **Resource Layer** ([`resources`]) - Textures, samplers, materials, frame buffers
//! - **Shader Layer** ([`shader`]) - WGSL stages with reflected uniforms and bindings
//! - **Camera** ([`camera`]) - Projection state plus per-camera render targets
//! - **Rendering** ([`rendering`]) - The per-frame pass sequence and pipeline cache
//! - **Scene** ([`scene`]) - Mesh instances, lights and gas volumes
//! - **Particles** ([`particles`]) - GPU-resident particle systems
//!
//! ## Frame Flow
//!
//! [`rendering::GraphicsCore`] drives a frame: deferred camera resize,
//! geometry pass into the G-buffer, additive lighting into the radiance
//! buffer, composite, volumetrics, bloom, gamma, then a flushed swap into
//! the camera's triple-buffered output chain.

pub mod camera;
pub mod context;
pub mod geometry;
pub mod particles;
pub mod rendering;
pub mod resources;
pub mod scene;
pub mod shader;

// Re-export commonly used types
pub use camera::Camera;
pub use context::RenderContext;
pub use rendering::GraphicsCore;
pub use scene::Scene;

#[cfg(test)]
pub(crate) mod test_support {
    use super::context::RenderContext;

    /// Brings up a headless device. Tests call this and return early when
    /// the host has no usable adapter.
    pub(crate) fn test_context() -> Option<RenderContext> {
        let instance = wgpu::Instance::default();
        match pollster::block_on(RenderContext::new(&instance, None)) {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                eprintln!("skipping GPU test: {err}");
                None
            }
        }
    }
}

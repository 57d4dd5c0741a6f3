// src/lib.rs
//! Peat 3D Engine
//!
//! A deferred-rendering hobby engine built on wgpu and winit. The
//! [`GraphicsCore`](gfx::GraphicsCore) drives the frame: shadow cascades,
//! G-buffer fill, additive lighting, volumetric gas, bloom and gamma, all
//! into a triple-buffered output chain a window shell can present from
//! another thread.

pub mod app;
pub mod error;
pub mod gfx;
pub mod settings;
pub mod time;
pub mod wgpu_utils;

// Re-export main types for convenience
pub use app::PeatApp;
pub use error::{GfxError, GfxResult};
pub use gfx::{Camera, GraphicsCore, RenderContext, Scene};
pub use settings::EngineSettings;

/// Creates a default Peat application instance
pub fn default() -> PeatApp {
    pollster::block_on(PeatApp::new())
}

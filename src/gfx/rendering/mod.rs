// src/gfx/rendering/mod.rs
//! Deferred rendering passes
//!
//! Everything between a [`crate::gfx::scene::Scene`] and a finished frame:
//! the G-buffer and its formats, cascaded shadow math and light uniform
//! layouts, the bloom chain, the pipeline cache, and [`GraphicsCore`],
//! which sequences the passes each frame.

pub mod bloom;
pub mod gbuffer;
pub mod graphics_core;
pub mod lights;
pub mod pipeline_manager;

pub use gbuffer::GBuffer;
pub use graphics_core::GraphicsCore;
pub use lights::{ShadowMap, CASCADE_COUNT};
pub use pipeline_manager::{PipelineConfig, PipelineManager};

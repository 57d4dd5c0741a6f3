// src/gfx/resources/mod.rs
//! GPU resource layer
//!
//! Textures with their views, samplers, materials and the triple-buffered
//! frame output chain.

pub mod format;
pub mod frame_buffer;
pub mod material;
pub mod sampler;
pub mod texture;

// Re-export main types
pub use format::{PixelFormat, TextureUsage};
pub use frame_buffer::{FrameBuffer, FrameChain, FrontBuffer, FrontBufferHandle};
pub use material::{Material, MaterialManager, MaterialMap};
pub use sampler::{Sampler, SamplerDesc};
pub use texture::{Texture, TextureDesc, ViewKind};

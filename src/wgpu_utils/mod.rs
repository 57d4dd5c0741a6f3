// src/wgpu_utils/mod.rs
//! WGPU utility functions and helpers
//!
//! Provides convenient wrappers for common wgpu buffer patterns.

pub mod uniform_buffer;

// Re-export main types
pub use uniform_buffer::{ArrayBuffer, DynamicUniformArena, UniformBuffer};

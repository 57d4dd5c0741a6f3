// src/gfx/shader/mod.rs
//! Shader compilation, reflection and the pipeline binding model.

pub mod pipeline;
pub mod reflection;
pub mod shader;

pub use pipeline::ShaderPipeline;
pub use reflection::{BindingKind, ShaderBinding, ShaderReflection, UniformBlock, UniformVar};
pub use shader::{stage_from_path, Shader, ShaderStage};

// src/error.rs
//! Error taxonomy for the graphics core
//!
//! Every fallible operation in the crate returns [`GfxError`]. Failures are
//! never retried internally; callers decide whether to drop the resource or
//! abort the frame.

use thiserror::Error;

/// Errors raised by resource creation, shader handling and frame orchestration.
#[derive(Debug, Error)]
pub enum GfxError {
    /// A dimension, count or data-length parameter outside its valid range.
    #[error("{what} is out of range")]
    OutOfRange { what: &'static str },

    /// Pixel format outside the supported set for the requested usage.
    #[error("unsupported pixel format {format:?} for {usage}")]
    UnsupportedFormat {
        format: crate::gfx::resources::PixelFormat,
        usage: &'static str,
    },

    /// Shader stage the backend cannot execute (hull/domain/geometry), or a
    /// stage that cannot participate in a render pipeline.
    #[error("shader stage '{stage}' is not supported here")]
    UnsupportedShaderStage { stage: &'static str },

    /// Unrecognized shader file extension.
    #[error("cannot infer a shader stage from '{path}'")]
    UnknownShaderExtension { path: String },

    /// WGSL parse or validation failure. Diagnostics are logged before this
    /// is returned; `detail` carries the rendered naga error.
    #[error("shader '{name}' failed to compile:\n{detail}")]
    ShaderCompilation { name: String, detail: String },

    /// Shader source could not be read from disk.
    #[error("failed to read shader '{path}'")]
    ShaderIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Operation on a resource after `dispose()`.
    #[error("{what} has already been disposed")]
    Disposed { what: &'static str },

    /// No reflected uniform variable with this name in any stage.
    #[error("uniform variable '{name}' not found")]
    UniformNotFound { name: String },

    /// Write larger than the variable's declared size.
    #[error("uniform '{name}': {size} bytes exceeds the declared {declared}")]
    UniformSizeExceeded {
        name: String,
        size: usize,
        declared: usize,
    },

    /// No reflected texture/sampler/storage binding with this name.
    #[error("shader binding '{name}' not found")]
    BindingNotFound { name: String },

    /// A named binding exists but is not what the caller tried to attach.
    #[error("shader binding '{name}' is not {expected}")]
    BindingKindMismatch {
        name: String,
        expected: &'static str,
    },

    /// Render pipeline requested before its configuration was registered.
    #[error("no pipeline registered under '{name}'")]
    PipelineNotRegistered { name: String },

    /// Two shaders of the same stage passed to one pipeline.
    #[error("pipeline already contains a {stage} shader")]
    DuplicateShaderStage { stage: &'static str },

    /// Pipeline missing its vertex or fragment stage.
    #[error("pipeline requires a {stage} shader")]
    MissingShaderStage { stage: &'static str },

    /// No compatible GPU adapter on this host.
    #[error("failed to acquire a GPU adapter")]
    AdapterRequest(#[source] wgpu::RequestAdapterError),

    /// Adapter refused the requested device features/limits.
    #[error("failed to acquire a GPU device")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// The post-submit wait exceeded its configured deadline.
    #[error("GPU sync timed out after {waited_ms} ms")]
    GpuSyncTimeout { waited_ms: u64 },

    /// Mapping a staging buffer for CPU access failed.
    #[error("reading {what} back from the GPU failed")]
    Readback { what: &'static str },
}

/// Shorthand used throughout the crate.
pub type GfxResult<T> = Result<T, GfxError>;

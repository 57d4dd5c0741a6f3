//! Camera module
//!
//! Projection state plus the camera-owned render target set. The pass
//! sequence in [`rendering`](crate::gfx::rendering) draws into whatever
//! camera is current; consumers read finished frames through
//! [`FrontBufferHandle`](crate::gfx::resources::FrontBufferHandle).

pub mod camera;

pub use camera::{Camera, OPENGL_TO_WGPU_MATRIX};

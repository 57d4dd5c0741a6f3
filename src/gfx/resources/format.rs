// src/gfx/resources/format.rs
//! Pixel formats and texture capability flags
//!
//! The crate exposes a small closed format set. `R32Typeless` is the one
//! format whose concrete wgpu format depends on usage: as a depth-stencil
//! target it resolves to `Depth32Float`, otherwise to `R32Float`. Shaders
//! observe either as a single 32-bit float channel.

use crate::error::{GfxError, GfxResult};

/// Pixel formats supported by [`Texture`](super::Texture).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba32Float,
    /// 32-bit single channel; resolves per usage (depth vs. color).
    R32Typeless,
}

impl PixelFormat {
    /// Bytes per texel of the resolved format. Identical for both
    /// resolutions of `R32Typeless`.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bgra8Unorm | PixelFormat::Bgra8UnormSrgb => 4,
            PixelFormat::Rgba32Float => 16,
            PixelFormat::R32Typeless => 4,
        }
    }
}

/// Capabilities requested for a texture at creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureUsage {
    pub render_target: bool,
    pub depth_stencil: bool,
    pub shader_resource: bool,
}

impl TextureUsage {
    pub const RENDER_TARGET: Self = Self {
        render_target: true,
        depth_stencil: false,
        shader_resource: false,
    };
    pub const DEPTH_STENCIL: Self = Self {
        render_target: false,
        depth_stencil: true,
        shader_resource: false,
    };
    pub const SHADER_RESOURCE: Self = Self {
        render_target: false,
        depth_stencil: false,
        shader_resource: true,
    };

    pub fn and_render_target(mut self) -> Self {
        self.render_target = true;
        self
    }

    pub fn and_depth_stencil(mut self) -> Self {
        self.depth_stencil = true;
        self
    }

    pub fn and_shader_resource(mut self) -> Self {
        self.shader_resource = true;
        self
    }
}

/// Resolves the crate format to the concrete wgpu texture format for a
/// given usage.
pub fn resolve_format(format: PixelFormat, usage: TextureUsage) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        PixelFormat::R32Typeless => {
            if usage.depth_stencil {
                wgpu::TextureFormat::Depth32Float
            } else {
                wgpu::TextureFormat::R32Float
            }
        }
    }
}

/// Checks a (format, usage) pair before any GPU allocation happens.
pub fn validate_format(format: PixelFormat, usage: TextureUsage) -> GfxResult<()> {
    if usage.depth_stencil && usage.render_target {
        return Err(GfxError::UnsupportedFormat {
            format,
            usage: "a combined render-target and depth-stencil",
        });
    }
    if usage.depth_stencil && format != PixelFormat::R32Typeless {
        return Err(GfxError::UnsupportedFormat {
            format,
            usage: "a depth-stencil target",
        });
    }
    Ok(())
}

/// Maps the crate capability flags onto wgpu usage bits.
pub fn wgpu_usages(usage: TextureUsage, has_initial_data: bool) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::empty();
    if usage.render_target || usage.depth_stencil {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.shader_resource {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if has_initial_data {
        usages |= wgpu::TextureUsages::COPY_DST;
    }
    usages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typeless_resolves_by_usage() {
        let depth = TextureUsage::DEPTH_STENCIL.and_shader_resource();
        assert_eq!(
            resolve_format(PixelFormat::R32Typeless, depth),
            wgpu::TextureFormat::Depth32Float
        );
        assert_eq!(
            resolve_format(PixelFormat::R32Typeless, TextureUsage::SHADER_RESOURCE),
            wgpu::TextureFormat::R32Float
        );
        assert_eq!(
            resolve_format(PixelFormat::R32Typeless, TextureUsage::RENDER_TARGET),
            wgpu::TextureFormat::R32Float
        );
    }

    #[test]
    fn test_color_formats_resolve_directly() {
        let usage = TextureUsage::RENDER_TARGET.and_shader_resource();
        assert_eq!(
            resolve_format(PixelFormat::Bgra8Unorm, usage),
            wgpu::TextureFormat::Bgra8Unorm
        );
        assert_eq!(
            resolve_format(PixelFormat::Bgra8UnormSrgb, usage),
            wgpu::TextureFormat::Bgra8UnormSrgb
        );
        assert_eq!(
            resolve_format(PixelFormat::Rgba32Float, usage),
            wgpu::TextureFormat::Rgba32Float
        );
    }

    #[test]
    fn test_depth_requires_typeless() {
        assert!(validate_format(PixelFormat::Bgra8Unorm, TextureUsage::DEPTH_STENCIL).is_err());
        assert!(validate_format(PixelFormat::Rgba32Float, TextureUsage::DEPTH_STENCIL).is_err());
        assert!(validate_format(PixelFormat::R32Typeless, TextureUsage::DEPTH_STENCIL).is_ok());
    }

    #[test]
    fn test_render_and_depth_exclusive() {
        let both = TextureUsage::RENDER_TARGET.and_depth_stencil();
        assert!(validate_format(PixelFormat::R32Typeless, both).is_err());
    }

    #[test]
    fn test_usage_bits() {
        let usage = TextureUsage::RENDER_TARGET.and_shader_resource();
        let bits = wgpu_usages(usage, false);
        assert!(bits.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
        assert!(bits.contains(wgpu::TextureUsages::TEXTURE_BINDING));
        assert!(!bits.contains(wgpu::TextureUsages::COPY_DST));

        let bits = wgpu_usages(TextureUsage::SHADER_RESOURCE, true);
        assert!(bits.contains(wgpu::TextureUsages::COPY_DST));
        assert!(!bits.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    }

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8Unorm.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgba32Float.bytes_per_pixel(), 16);
        assert_eq!(PixelFormat::R32Typeless.bytes_per_pixel(), 4);
    }
}

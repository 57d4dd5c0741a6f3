// src/gfx/resources/texture.rs
//! GPU texture resource with pre-generated views
//!
//! A [`Texture`] owns its `wgpu::Texture` together with every view the
//! requested capabilities call for: one 2D view per array slice per
//! capability, plus one aggregate array view per capability when the
//! texture is an array. Views are generated at creation and never change;
//! textures are never resized in place.

use crate::error::{GfxError, GfxResult};
use crate::gfx::context::RenderContext;

use super::format::{self, PixelFormat, TextureUsage};

/// View capability selector for [`Texture::view`] / [`Texture::views`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewKind {
    RenderTarget,
    DepthStencil,
    ShaderResource,
}

/// Texture creation parameters.
#[derive(Clone)]
pub struct TextureDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub array_size: u32,
    /// One slice worth of tightly packed pixels; seeds every slice.
    pub initial_data: Option<&'a [u8]>,
    pub label: &'a str,
}

impl<'a> TextureDesc<'a> {
    pub fn new(width: u32, height: u32, format: PixelFormat, usage: TextureUsage) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            array_size: 1,
            initial_data: None,
            label: "texture",
        }
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }

    pub fn with_initial_data(mut self, data: &'a [u8]) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn with_label(mut self, label: &'a str) -> Self {
        self.label = label;
        self
    }
}

/// A 2D (optionally arrayed) GPU texture and its views.
pub struct Texture {
    label: String,
    width: u32,
    height: u32,
    array_size: u32,
    format: PixelFormat,
    usage: TextureUsage,
    texture: Option<wgpu::Texture>,
    render_views: Vec<wgpu::TextureView>,
    depth_views: Vec<wgpu::TextureView>,
    shader_views: Vec<wgpu::TextureView>,
}

impl Texture {
    /// Allocates the texture, uploads any initial data and generates views.
    ///
    /// # Errors
    /// * `OutOfRange` - zero width/height/array size, or initial data whose
    ///   length is not one slice of tightly packed pixels
    /// * `UnsupportedFormat` - format/usage combinations outside the
    ///   supported set, or initial data on a depth-stencil target (depth
    ///   formats cannot be a copy destination)
    pub fn create(ctx: &RenderContext, desc: &TextureDesc) -> GfxResult<Self> {
        if desc.width == 0 {
            return Err(GfxError::OutOfRange {
                what: "texture width",
            });
        }
        if desc.height == 0 {
            return Err(GfxError::OutOfRange {
                what: "texture height",
            });
        }
        if desc.array_size == 0 {
            return Err(GfxError::OutOfRange {
                what: "texture array size",
            });
        }
        format::validate_format(desc.format, desc.usage)?;

        if let Some(data) = desc.initial_data {
            if desc.usage.depth_stencil {
                return Err(GfxError::UnsupportedFormat {
                    format: desc.format,
                    usage: "an initialized depth-stencil target",
                });
            }
            let slice_len = (desc.width * desc.height * desc.format.bytes_per_pixel()) as usize;
            if data.len() != slice_len {
                return Err(GfxError::OutOfRange {
                    what: "initial pixel data length",
                });
            }
        }

        let wgpu_format = format::resolve_format(desc.format, desc.usage);
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: desc.array_size,
        };

        let texture = ctx.device().create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu_format,
            usage: format::wgpu_usages(desc.usage, desc.initial_data.is_some()),
            view_formats: &[],
        });

        if let Some(data) = desc.initial_data {
            let bytes_per_row = desc.width * desc.format.bytes_per_pixel();
            for slice in 0..desc.array_size {
                ctx.queue().write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d {
                            x: 0,
                            y: 0,
                            z: slice,
                        },
                        aspect: wgpu::TextureAspect::All,
                    },
                    data,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(bytes_per_row),
                        rows_per_image: Some(desc.height),
                    },
                    wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: 1,
                    },
                );
            }
        }

        let mut result = Self {
            label: desc.label.to_string(),
            width: desc.width,
            height: desc.height,
            array_size: desc.array_size,
            format: desc.format,
            usage: desc.usage,
            texture: Some(texture),
            render_views: Vec::new(),
            depth_views: Vec::new(),
            shader_views: Vec::new(),
        };

        if desc.usage.render_target {
            result.render_views = result.build_views("render");
        }
        if desc.usage.depth_stencil {
            result.depth_views = result.build_views("depth");
        }
        if desc.usage.shader_resource {
            result.shader_views = result.build_views("shader");
        }

        Ok(result)
    }

    /// Slice views in slice order, followed by the aggregate array view
    /// when `array_size > 1`.
    fn build_views(&self, tag: &str) -> Vec<wgpu::TextureView> {
        let texture = self.texture.as_ref().expect("views built at creation");
        let mut views = Vec::with_capacity(self.array_size as usize + 1);

        for slice in 0..self.array_size {
            views.push(texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&format!("{} {} view [{}]", self.label, tag, slice)),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_array_layer: slice,
                array_layer_count: Some(1),
                ..Default::default()
            }));
        }

        if self.array_size > 1 {
            views.push(texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(&format!("{} {} view [array]", self.label, tag)),
                dimension: Some(wgpu::TextureViewDimension::D2Array),
                base_array_layer: 0,
                array_layer_count: Some(self.array_size),
                ..Default::default()
            }));
        }

        views
    }

    fn views_for(&self, kind: ViewKind) -> &[wgpu::TextureView] {
        match kind {
            ViewKind::RenderTarget => &self.render_views,
            ViewKind::DepthStencil => &self.depth_views,
            ViewKind::ShaderResource => &self.shader_views,
        }
    }

    /// The slice-0 view of the given kind.
    pub fn view(&self, kind: ViewKind) -> GfxResult<&wgpu::TextureView> {
        if self.texture.is_none() {
            return Err(GfxError::Disposed { what: "texture" });
        }
        Ok(self
            .views_for(kind)
            .first()
            .expect("texture created without the requested capability"))
    }

    /// All views of the given kind: per-slice views in slice order, then
    /// the aggregate array view when this is an array texture.
    pub fn views(&self, kind: ViewKind) -> GfxResult<&[wgpu::TextureView]> {
        if self.texture.is_none() {
            return Err(GfxError::Disposed { what: "texture" });
        }
        Ok(self.views_for(kind))
    }

    /// The view covering every slice: the aggregate array view for arrays,
    /// the single slice view otherwise.
    pub fn array_view(&self, kind: ViewKind) -> GfxResult<&wgpu::TextureView> {
        if self.texture.is_none() {
            return Err(GfxError::Disposed { what: "texture" });
        }
        Ok(self
            .views_for(kind)
            .last()
            .expect("texture created without the requested capability"))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn array_size(&self) -> u32 {
        self.array_size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    /// Concrete wgpu format of the underlying resource.
    pub fn resolved_format(&self) -> wgpu::TextureFormat {
        format::resolve_format(self.format, self.usage)
    }

    pub fn is_disposed(&self) -> bool {
        self.texture.is_none()
    }

    /// Releases the GPU allocation eagerly. Safe to call more than once;
    /// any later view access reports `Disposed`.
    pub fn dispose(&mut self) {
        self.render_views.clear();
        self.depth_views.clear();
        self.shader_views.clear();
        if let Some(texture) = self.texture.take() {
            texture.destroy();
        }
    }
}

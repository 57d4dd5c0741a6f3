//! Geometry pass output targets
//!
//! Seven render targets written by the geometry pass and sampled by the
//! lighting and composite passes. Attachment order matches the fragment
//! output locations of the geometry shader; binding names match what the
//! lighting shaders declare.

use crate::error::GfxResult;
use crate::gfx::context::RenderContext;
use crate::gfx::resources::{PixelFormat, Texture, TextureDesc, TextureUsage, ViewKind};
use crate::gfx::shader::ShaderPipeline;

/// Component count, also the geometry shader's output location count.
pub const COMPONENT_COUNT: usize = 7;

pub struct GBuffer {
    position: Texture,
    albedo: Texture,
    normal: Texture,
    metallic: Texture,
    roughness: Texture,
    occlusion: Texture,
    emission: Texture,
    width: u32,
    height: u32,
}

impl GBuffer {
    pub fn create(ctx: &RenderContext, width: u32, height: u32) -> GfxResult<Self> {
        let usage = TextureUsage::RENDER_TARGET.and_shader_resource();
        let make = |format: PixelFormat, label: &str| {
            Texture::create(
                ctx,
                &TextureDesc::new(width, height, format, usage).with_label(label),
            )
        };

        Ok(Self {
            position: make(PixelFormat::Rgba32Float, "g-buffer position")?,
            albedo: make(PixelFormat::Bgra8UnormSrgb, "g-buffer albedo")?,
            normal: make(PixelFormat::Rgba32Float, "g-buffer normal")?,
            metallic: make(PixelFormat::R32Typeless, "g-buffer metallic")?,
            roughness: make(PixelFormat::R32Typeless, "g-buffer roughness")?,
            occlusion: make(PixelFormat::R32Typeless, "g-buffer occlusion")?,
            emission: make(PixelFormat::Rgba32Float, "g-buffer emission")?,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Components in fragment output location order, with the binding
    /// name each one carries in the lighting shaders.
    pub fn named_components(&self) -> [(&'static str, &Texture); COMPONENT_COUNT] {
        [
            ("t_position", &self.position),
            ("t_albedo", &self.albedo),
            ("t_normal", &self.normal),
            ("t_metallic", &self.metallic),
            ("t_roughness", &self.roughness),
            ("t_occlusion", &self.occlusion),
            ("t_emission", &self.emission),
        ]
    }

    /// Resolved wgpu formats in attachment order, for building the
    /// geometry pipeline's color target list.
    pub fn target_formats(&self) -> [wgpu::TextureFormat; COMPONENT_COUNT] {
        let formats = self
            .named_components()
            .map(|(_, texture)| texture.resolved_format());
        formats
    }

    /// Color attachments for the geometry pass. Targets are cleared in
    /// debug builds and loaded as-is otherwise.
    pub fn color_attachments(
        &self,
    ) -> GfxResult<Vec<Option<wgpu::RenderPassColorAttachment<'_>>>> {
        let load = if cfg!(debug_assertions) {
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT)
        } else {
            wgpu::LoadOp::Load
        };

        let mut attachments = Vec::with_capacity(COMPONENT_COUNT);
        for (_, texture) in self.named_components() {
            attachments.push(Some(wgpu::RenderPassColorAttachment {
                view: texture.view(ViewKind::RenderTarget)?,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            }));
        }
        Ok(attachments)
    }

    /// Attaches every component the pipeline's shaders declare. Passes
    /// sample different subsets, so missing names are fine.
    pub fn bind_to(&self, pipeline: &mut ShaderPipeline) -> GfxResult<()> {
        for (name, texture) in self.named_components() {
            if pipeline.has_binding(name) {
                pipeline.bind_texture(name, texture)?;
            }
        }
        Ok(())
    }

    pub fn dispose(&mut self) {
        self.position.dispose();
        self.albedo.dispose();
        self.normal.dispose();
        self.metallic.dispose();
        self.roughness.dispose();
        self.occlusion.dispose();
        self.emission.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::test_support::test_context;

    #[test]
    fn test_component_formats() {
        let Some(ctx) = test_context() else { return };
        let gbuffer = GBuffer::create(&ctx, 16, 16).expect("create g-buffer");

        let formats = gbuffer.target_formats();
        assert_eq!(formats.len(), COMPONENT_COUNT);
        assert_eq!(formats[0], wgpu::TextureFormat::Rgba32Float);
        assert_eq!(formats[1], wgpu::TextureFormat::Bgra8UnormSrgb);
        assert_eq!(formats[3], wgpu::TextureFormat::R32Float);

        // The device limit the context requests is sized for exactly this
        // attachment set.
        let bytes: u32 = gbuffer
            .named_components()
            .iter()
            .map(|(_, t)| t.format().bytes_per_pixel())
            .sum();
        assert_eq!(bytes, 64);
    }

    #[test]
    fn test_attachment_order_matches_names() {
        let Some(ctx) = test_context() else { return };
        let gbuffer = GBuffer::create(&ctx, 4, 4).expect("create g-buffer");
        let names: Vec<&str> = gbuffer.named_components().iter().map(|(n, _)| *n).collect();
        assert_eq!(names[0], "t_position");
        assert_eq!(names[6], "t_emission");
        assert_eq!(gbuffer.color_attachments().expect("attachments").len(), 7);
    }
}

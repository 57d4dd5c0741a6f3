//! Bloom post-processing
//!
//! Bright-pass threshold into a half-resolution work texture, a number of
//! separable gaussian blur iterations ping-ponging between two work
//! textures, then an additive composite back into the camera's color
//! buffer. Iteration count and threshold come from
//! [`EngineSettings`](crate::settings::EngineSettings).

use crate::error::GfxResult;
use crate::gfx::context::RenderContext;
use crate::gfx::resources::{
    PixelFormat, Sampler, SamplerDesc, Texture, TextureDesc, TextureUsage, ViewKind,
};
use crate::gfx::shader::pipeline::GroupAssembly;
use crate::gfx::shader::{Shader, ShaderPipeline, ShaderStage};
use crate::settings::EngineSettings;

use super::pipeline_manager::{color_target, PipelineConfig, PipelineManager, BLEND_ADDITIVE};

const FULLSCREEN_VERT: &str = include_str!("shaders/fullscreen.vert.wgsl");

pub struct Bloom {
    threshold: ShaderPipeline,
    blur_h: ShaderPipeline,
    blur_v: ShaderPipeline,
    composite: ShaderPipeline,
    pipelines: PipelineManager,
    work_a: Texture,
    work_b: Texture,
    passes: u32,
}

impl Bloom {
    pub fn new(ctx: &RenderContext, settings: &EngineSettings, color: &Texture) -> GfxResult<Self> {
        let (work_a, work_b) = Self::make_work_textures(ctx, color)?;
        let sampler = Sampler::create(ctx, SamplerDesc::linear_clamp(), "bloom sampler");

        let mut threshold = fullscreen_pipeline(
            ctx,
            "bloom threshold",
            "bloom_threshold",
            include_str!("shaders/bloom_threshold.frag.wgsl"),
        )?;
        let mut blur_h = fullscreen_pipeline(
            ctx,
            "bloom blur h",
            "bloom_blur",
            include_str!("shaders/bloom_blur.frag.wgsl"),
        )?;
        let mut blur_v = fullscreen_pipeline(
            ctx,
            "bloom blur v",
            "bloom_blur",
            include_str!("shaders/bloom_blur.frag.wgsl"),
        )?;
        let mut composite = fullscreen_pipeline(
            ctx,
            "bloom composite",
            "bloom_composite",
            include_str!("shaders/bloom_composite.frag.wgsl"),
        )?;

        // The HDR color buffer is not filterable, so the threshold
        // shader loads it directly and takes no sampler.
        threshold.set_uniform("threshold", &settings.bloom_threshold)?;
        threshold.bind_texture("t_source", color)?;

        // One blur shader, two pipelines: each one carries its own uniform
        // copy, so the direction is written once and never touched again.
        let texel = work_texel(&work_a);
        blur_h.set_uniform("texel", &texel)?;
        blur_h.set_uniform("direction", &[1.0f32, 0.0])?;
        blur_h.bind_texture("t_source", &work_a)?;
        blur_h.bind_sampler("s_source", &sampler)?;

        blur_v.set_uniform("texel", &texel)?;
        blur_v.set_uniform("direction", &[0.0f32, 1.0])?;
        blur_v.bind_texture("t_source", &work_b)?;
        blur_v.bind_sampler("s_source", &sampler)?;

        composite.bind_texture("t_source", &work_a)?;
        composite.bind_sampler("s_source", &sampler)?;

        let work_format = work_a.resolved_format();
        let mut pipelines = PipelineManager::new();
        pipelines.register_pipeline(
            "bloom threshold",
            PipelineConfig::new("bloom threshold")
                .with_no_vertex_buffers()
                .with_cull_mode(None)
                .with_color_targets(vec![color_target(work_format, None)]),
        );
        pipelines.register_pipeline(
            "bloom blur",
            PipelineConfig::new("bloom blur")
                .with_no_vertex_buffers()
                .with_cull_mode(None)
                .with_color_targets(vec![color_target(work_format, None)]),
        );
        pipelines.register_pipeline(
            "bloom composite",
            PipelineConfig::new("bloom composite")
                .with_no_vertex_buffers()
                .with_cull_mode(None)
                .with_color_targets(vec![color_target(
                    color.resolved_format(),
                    Some(BLEND_ADDITIVE),
                )]),
        );

        Ok(Self {
            threshold,
            blur_h,
            blur_v,
            composite,
            pipelines,
            work_a,
            work_b,
            passes: settings.bloom_passes,
        })
    }

    fn make_work_textures(ctx: &RenderContext, color: &Texture) -> GfxResult<(Texture, Texture)> {
        let width = (color.width() / 2).max(1);
        let height = (color.height() / 2).max(1);
        let usage = TextureUsage::RENDER_TARGET.and_shader_resource();
        let work_a = Texture::create(
            ctx,
            &TextureDesc::new(width, height, PixelFormat::Bgra8Unorm, usage)
                .with_label("bloom work a"),
        )?;
        let work_b = Texture::create(
            ctx,
            &TextureDesc::new(width, height, PixelFormat::Bgra8Unorm, usage)
                .with_label("bloom work b"),
        )?;
        Ok((work_a, work_b))
    }

    /// Records the bloom chain into `encoder`, ending with the additive
    /// composite onto `color`.
    pub fn apply(
        &mut self,
        ctx: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        color: &Texture,
    ) -> GfxResult<()> {
        if self.passes == 0 {
            return Ok(());
        }

        self.threshold.upload_uniforms(ctx.queue());
        self.blur_h.upload_uniforms(ctx.queue());
        self.blur_v.upload_uniforms(ctx.queue());

        self.threshold.ensure_assembled(ctx)?;
        self.blur_h.ensure_assembled(ctx)?;
        self.blur_v.ensure_assembled(ctx)?;
        self.composite.ensure_assembled(ctx)?;

        {
            let pipeline = self
                .pipelines
                .get_or_create(ctx, &mut self.threshold, "bloom threshold")?;
            fullscreen_pass(
                encoder,
                "bloom threshold",
                self.work_a.view(ViewKind::RenderTarget)?,
                wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                pipeline,
                self.threshold.assemblies(),
            );
        }

        for _ in 0..self.passes {
            {
                let pipeline = self
                    .pipelines
                    .get_or_create(ctx, &mut self.blur_h, "bloom blur")?;
                fullscreen_pass(
                    encoder,
                    "bloom blur h",
                    self.work_b.view(ViewKind::RenderTarget)?,
                    wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    pipeline,
                    self.blur_h.assemblies(),
                );
            }
            {
                let pipeline = self
                    .pipelines
                    .get_or_create(ctx, &mut self.blur_v, "bloom blur")?;
                fullscreen_pass(
                    encoder,
                    "bloom blur v",
                    self.work_a.view(ViewKind::RenderTarget)?,
                    wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    pipeline,
                    self.blur_v.assemblies(),
                );
            }
        }

        {
            let pipeline = self
                .pipelines
                .get_or_create(ctx, &mut self.composite, "bloom composite")?;
            fullscreen_pass(
                encoder,
                "bloom composite",
                color.view(ViewKind::RenderTarget)?,
                wgpu::LoadOp::Load,
                pipeline,
                self.composite.assemblies(),
            );
        }

        Ok(())
    }

    /// Rebuilds the half-resolution work textures for a resized color
    /// buffer and rebinds everything that referenced the old ones.
    pub fn resize(&mut self, ctx: &RenderContext, color: &Texture) -> GfxResult<()> {
        self.work_a.dispose();
        self.work_b.dispose();
        let (work_a, work_b) = Self::make_work_textures(ctx, color)?;
        self.work_a = work_a;
        self.work_b = work_b;

        let texel = work_texel(&self.work_a);
        self.blur_h.set_uniform("texel", &texel)?;
        self.blur_v.set_uniform("texel", &texel)?;

        self.threshold.bind_texture("t_source", color)?;
        self.blur_h.bind_texture("t_source", &self.work_a)?;
        self.blur_v.bind_texture("t_source", &self.work_b)?;
        self.composite.bind_texture("t_source", &self.work_a)?;
        Ok(())
    }

    pub fn dispose(&mut self) {
        self.work_a.dispose();
        self.work_b.dispose();
    }
}

fn work_texel(work: &Texture) -> [f32; 2] {
    [1.0 / work.width() as f32, 1.0 / work.height() as f32]
}

fn fullscreen_pipeline(
    ctx: &RenderContext,
    label: &str,
    frag_name: &str,
    frag_source: &str,
) -> GfxResult<ShaderPipeline> {
    let vert = Shader::from_source(ctx, ShaderStage::Vertex, "fullscreen", FULLSCREEN_VERT)?;
    let frag = Shader::from_source(ctx, ShaderStage::Fragment, frag_name, frag_source)?;
    ShaderPipeline::new(label, vec![vert, frag])
}

fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
    load: wgpu::LoadOp<wgpu::Color>,
    pipeline: &wgpu::RenderPipeline,
    assemblies: &[GroupAssembly],
) {
    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    rpass.set_pipeline(pipeline);
    for assembly in assemblies {
        rpass.set_bind_group(assembly.index, &assembly.bind_group, &[]);
    }
    rpass.draw(0..3, 0..1);
}

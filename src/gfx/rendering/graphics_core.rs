// src/gfx/rendering/graphics_core.rs
//! Frame orchestration
//!
//! [`GraphicsCore`] owns the GPU context, one [`ShaderPipeline`] per pass
//! and the dynamic uniform arenas feeding them, and drives the deferred
//! frame sequence: cascaded shadow maps, geometry into the G-buffer,
//! additive lighting into the radiance buffer, the light composite,
//! volumetrics, bloom and tone mapping, ending in a synchronized swap of
//! the camera's triple-buffered output chain.
//!
//! A camera must be attached with [`GraphicsCore::set_camera`] before the
//! first frame: the camera's render targets decide texture filterability
//! in the pass bind group layouts, so the layouts are finalized on attach.

use std::sync::mpsc::{self, TryRecvError};
use std::time::Instant;

use cgmath::{InnerSpace, Matrix4, Vector3};

use crate::error::{GfxError, GfxResult};
use crate::gfx::camera::Camera;
use crate::gfx::context::RenderContext;
use crate::gfx::geometry::generate_cube;
use crate::gfx::resources::{Sampler, SamplerDesc, ViewKind};
use crate::gfx::scene::{GasVolume, Light, Mesh, MeshInstance, Scene};
use crate::gfx::shader::{Shader, ShaderPipeline, ShaderStage};
use crate::settings::EngineSettings;
use crate::wgpu_utils::DynamicUniformArena;

use super::bloom::Bloom;
use super::lights::{DirectionalLightUniform, PointLightUniform, ShadowMap, CASCADE_COUNT};
use super::pipeline_manager::{color_target, PipelineConfig, PipelineManager, BLEND_ADDITIVE};

const FULLSCREEN_VERT: &str = include_str!("shaders/fullscreen.vert.wgsl");
const GEOMETRY_VERT: &str = include_str!("shaders/geometry.vert.wgsl");
const GEOMETRY_FRAG: &str = include_str!("shaders/geometry.frag.wgsl");
const SHADOW_VERT: &str = include_str!("shaders/shadow.vert.wgsl");
const BILLBOARD_VERT: &str = include_str!("shaders/billboard.vert.wgsl");
const BILLBOARD_FRAG: &str = include_str!("shaders/billboard.frag.wgsl");
const LIGHT_DIRECTIONAL_FRAG: &str = include_str!("shaders/light_directional.frag.wgsl");
const LIGHT_POINT_FRAG: &str = include_str!("shaders/light_point.frag.wgsl");
const ADD_LIGHT_FRAG: &str = include_str!("shaders/add_light.frag.wgsl");
const VOLUMETRIC_VERT: &str = include_str!("shaders/volumetric.vert.wgsl");
const VOLUMETRIC_FRAG: &str = include_str!("shaders/volumetric.frag.wgsl");
const GAMMA_FRAG: &str = include_str!("shaders/gamma.frag.wgsl");

/// Arena capacities per frame. Lights and volumes past these are skipped
/// with a warning rather than growing the buffers mid-frame.
const MAX_DIRECTIONAL_LIGHTS: u32 = 8;
const MAX_POINT_LIGHTS: u32 = 64;
const MAX_VOLUMES: u32 = 32;

/// One cascade's light view-projection, selected by dynamic offset in
/// the shadow pass.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CascadeUniform {
    view_proj: [[f32; 4]; 4],
}

/// Per-volume block for the volumetric pass, mirroring `VolumeData` in
/// the shader.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct VolumeUniform {
    model: [[f32; 4]; 4],
    inv_model: [[f32; 4]; 4],
    camera_local: [f32; 4],
    half_extents: [f32; 4],
    albedo: [f32; 4],
    coefficients: [f32; 4],
}

impl VolumeUniform {
    fn new(volume: &GasVolume, camera_position: Vector3<f32>) -> Self {
        let model = volume.transform.model();
        let inv_model = volume.transform.inverse_model();
        let local = inv_model * camera_position.extend(1.0);
        Self {
            model: model.into(),
            inv_model: inv_model.into(),
            camera_local: [local.x, local.y, local.z, 1.0],
            half_extents: [
                volume.half_extents.x,
                volume.half_extents.y,
                volume.half_extents.z,
                0.0,
            ],
            albedo: [volume.albedo[0], volume.albedo[1], volume.albedo[2], 0.0],
            coefficients: [volume.absorption, volume.scattering, 0.0, 0.0],
        }
    }
}

/// Camera-derived values broadcast to every pass that declares them.
struct FrameValues {
    view: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    view_proj: [[f32; 4]; 4],
    camera_position: [f32; 4],
    camera_forward: [f32; 4],
    camera_right: [f32; 4],
    camera_up: [f32; 4],
}

/// Each pass declares its own frame block, so only the members a
/// pipeline actually reflects get written.
fn write_frame_uniforms(pipeline: &mut ShaderPipeline, frame: &FrameValues) -> GfxResult<()> {
    if pipeline.has_uniform("view") {
        pipeline.set_uniform("view", &frame.view)?;
    }
    if pipeline.has_uniform("proj") {
        pipeline.set_uniform("proj", &frame.proj)?;
    }
    if pipeline.has_uniform("view_proj") {
        pipeline.set_uniform("view_proj", &frame.view_proj)?;
    }
    if pipeline.has_uniform("camera_position") {
        pipeline.set_uniform("camera_position", &frame.camera_position)?;
    }
    if pipeline.has_uniform("camera_forward") {
        pipeline.set_uniform("camera_forward", &frame.camera_forward)?;
    }
    if pipeline.has_uniform("camera_right") {
        pipeline.set_uniform("camera_right", &frame.camera_right)?;
    }
    if pipeline.has_uniform("camera_up") {
        pipeline.set_uniform("camera_up", &frame.camera_up)?;
    }
    Ok(())
}

/// Encode-time state for one directional light: its arena offset, the
/// shadow map it renders into and the cascade offsets for the shadow
/// passes.
struct DirectionalDraw {
    offset: u32,
    shadow: Option<usize>,
    cascade_offsets: [u32; CASCADE_COUNT],
}

/// Bind groups pairing each dynamic arena with the external group layout
/// of the pass that consumes it. Built once when the first camera
/// finalizes the layouts.
struct ArenaBindGroups {
    cascade: wgpu::BindGroup,
    directional: wgpu::BindGroup,
    point: wgpu::BindGroup,
    volume: wgpu::BindGroup,
}

/// The engine's rendering heart: owns the device, every pass pipeline
/// and the current camera, and turns a [`Scene`] into finished frames.
pub struct GraphicsCore {
    ctx: RenderContext,
    settings: EngineSettings,
    pipelines: PipelineManager,

    geometry: ShaderPipeline,
    shadow: ShaderPipeline,
    billboard: ShaderPipeline,
    directional: ShaderPipeline,
    point: ShaderPipeline,
    add_light: ShaderPipeline,
    volumetric: ShaderPipeline,
    gamma: ShaderPipeline,

    cascade_arena: DynamicUniformArena<CascadeUniform>,
    directional_arena: DynamicUniformArena<DirectionalLightUniform>,
    point_arena: DynamicUniformArena<PointLightUniform>,
    volume_arena: DynamicUniformArena<VolumeUniform>,
    arena_groups: Option<ArenaBindGroups>,

    shadow_maps: Vec<ShadowMap>,
    unit_cube: Mesh,
    bloom: Option<Bloom>,
    camera: Option<Camera>,
    disposed: bool,
}

impl GraphicsCore {
    /// Builds every pass pipeline against an already-acquired context.
    /// Attach a camera with [`GraphicsCore::set_camera`] before calling
    /// [`GraphicsCore::update`].
    pub fn new(ctx: RenderContext, settings: EngineSettings) -> GfxResult<Self> {
        let geometry = ShaderPipeline::new(
            "geometry",
            vec![
                Shader::from_source(&ctx, ShaderStage::Vertex, "geometry.vert", GEOMETRY_VERT)?,
                Shader::from_source(&ctx, ShaderStage::Fragment, "geometry.frag", GEOMETRY_FRAG)?,
            ],
        )?
        .with_external_group(1)
        .with_external_group(2);

        let shadow = ShaderPipeline::new(
            "shadow",
            vec![Shader::from_source(
                &ctx,
                ShaderStage::Vertex,
                "shadow.vert",
                SHADOW_VERT,
            )?],
        )?
        .with_external_group(0)
        .with_external_group(1)
        .with_dynamic_uniform("cascade");

        let billboard = ShaderPipeline::new(
            "billboard",
            vec![
                Shader::from_source(&ctx, ShaderStage::Vertex, "billboard.vert", BILLBOARD_VERT)?,
                Shader::from_source(
                    &ctx,
                    ShaderStage::Fragment,
                    "billboard.frag",
                    BILLBOARD_FRAG,
                )?,
            ],
        )?;

        let mut directional = ShaderPipeline::new(
            "light directional",
            vec![
                Shader::from_source(&ctx, ShaderStage::Vertex, "fullscreen.vert", FULLSCREEN_VERT)?,
                Shader::from_source(
                    &ctx,
                    ShaderStage::Fragment,
                    "light_directional.frag",
                    LIGHT_DIRECTIONAL_FRAG,
                )?,
            ],
        )?
        .with_external_group(1)
        .with_dynamic_uniform("light");

        let point = ShaderPipeline::new(
            "light point",
            vec![
                Shader::from_source(&ctx, ShaderStage::Vertex, "fullscreen.vert", FULLSCREEN_VERT)?,
                Shader::from_source(
                    &ctx,
                    ShaderStage::Fragment,
                    "light_point.frag",
                    LIGHT_POINT_FRAG,
                )?,
            ],
        )?
        .with_external_group(1)
        .with_dynamic_uniform("light");

        let add_light = ShaderPipeline::new(
            "add light",
            vec![
                Shader::from_source(&ctx, ShaderStage::Vertex, "fullscreen.vert", FULLSCREEN_VERT)?,
                Shader::from_source(
                    &ctx,
                    ShaderStage::Fragment,
                    "add_light.frag",
                    ADD_LIGHT_FRAG,
                )?,
            ],
        )?;

        let volumetric = ShaderPipeline::new(
            "volumetric",
            vec![
                Shader::from_source(&ctx, ShaderStage::Vertex, "volumetric.vert", VOLUMETRIC_VERT)?,
                Shader::from_source(
                    &ctx,
                    ShaderStage::Fragment,
                    "volumetric.frag",
                    VOLUMETRIC_FRAG,
                )?,
            ],
        )?
        .with_external_group(1)
        .with_dynamic_uniform("volume");

        let gamma = ShaderPipeline::new(
            "gamma",
            vec![
                Shader::from_source(&ctx, ShaderStage::Vertex, "fullscreen.vert", FULLSCREEN_VERT)?,
                Shader::from_source(&ctx, ShaderStage::Fragment, "gamma.frag", GAMMA_FRAG)?,
            ],
        )?;

        // One map up front so the shadow bindings of the directional pass
        // are always satisfiable, lights or not.
        let shadow_maps = vec![ShadowMap::create(&ctx, settings.shadow_map_size)?];
        let shadow_sampler = Sampler::create(&ctx, SamplerDesc::shadow_compare(), "shadow sampler");
        directional.bind_sampler("s_shadow", &shadow_sampler)?;
        directional.bind_texture("t_shadow", shadow_maps[0].texture())?;

        let device = ctx.device();
        let cascade_arena =
            DynamicUniformArena::new(device, MAX_DIRECTIONAL_LIGHTS * CASCADE_COUNT as u32);
        let directional_arena = DynamicUniformArena::new(device, MAX_DIRECTIONAL_LIGHTS);
        let point_arena = DynamicUniformArena::new(device, MAX_POINT_LIGHTS);
        let volume_arena = DynamicUniformArena::new(device, MAX_VOLUMES);

        let mut unit_cube = Mesh::from_geometry(&generate_cube());
        unit_cube.upload(device);

        log::info!("graphics core ready");

        Ok(Self {
            ctx,
            settings,
            pipelines: PipelineManager::new(),
            geometry,
            shadow,
            billboard,
            directional,
            point,
            add_light,
            volumetric,
            gamma,
            cascade_arena,
            directional_arena,
            point_arena,
            volume_arena,
            arena_groups: None,
            shadow_maps,
            unit_cube,
            bloom: None,
            camera: None,
            disposed: false,
        })
    }

    pub fn ctx(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn camera(&self) -> Option<&Camera> {
        self.camera.as_ref()
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.camera.as_mut()
    }

    /// Makes `camera` the target of every subsequent frame, replacing and
    /// disposing any previous one. The first attach finalizes the pass
    /// bind group layouts against the camera's target formats.
    pub fn set_camera(&mut self, camera: Camera) -> GfxResult<()> {
        if self.disposed {
            return Err(GfxError::Disposed { what: "graphics core" });
        }
        if let Some(mut old) = self.camera.replace(camera) {
            old.dispose();
        }
        self.attach_camera_targets()?;
        self.ensure_pass_layouts();
        if self.arena_groups.is_none() {
            self.arena_groups = Some(self.build_arena_groups());
        }
        self.register_pass_configs();
        Ok(())
    }

    /// Renders one frame of `scene` through the full pass sequence and
    /// publishes it to the camera's frame chain. Without a camera this is
    /// a no-op; with a disabled camera the chain still receives a cleared
    /// frame so consumers never starve.
    pub fn update(&mut self, scene: &mut Scene, dt: f32) -> GfxResult<()> {
        if self.disposed {
            return Err(GfxError::Disposed { what: "graphics core" });
        }
        let Some(enabled) = self.camera.as_ref().map(|camera| camera.enabled) else {
            return Ok(());
        };
        if !enabled {
            return self.present_cleared_frame();
        }
        self.render_scene(scene, dt)
    }

    /// Releases the camera, bloom chain and shadow maps. Idempotent;
    /// [`GraphicsCore::update`] fails after the first call.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(mut camera) = self.camera.take() {
            camera.dispose();
        }
        if let Some(mut bloom) = self.bloom.take() {
            bloom.dispose();
        }
        for map in &mut self.shadow_maps {
            map.dispose();
        }
        self.arena_groups = None;
        log::info!("graphics core disposed");
    }

    fn render_scene(&mut self, scene: &mut Scene, dt: f32) -> GfxResult<()> {
        let resized = self
            .camera
            .as_mut()
            .expect("update checks the camera")
            .pre_render_update(&self.ctx)?;
        if resized {
            self.attach_camera_targets()?;
        }

        // Particle systems run compute and the live-count readback on
        // their own submissions, ahead of the frame that samples them.
        for system in scene.particle_systems.iter_mut() {
            system.update(&self.ctx, dt)?;
        }

        let frame = self.frame_values();
        for pipeline in [
            &mut self.geometry,
            &mut self.billboard,
            &mut self.directional,
            &mut self.point,
            &mut self.volumetric,
        ] {
            write_frame_uniforms(pipeline, &frame)?;
        }
        let bg = self.settings.background;
        self.add_light.set_uniform(
            "background",
            &[bg[0] as f32, bg[1] as f32, bg[2] as f32, bg[3] as f32],
        )?;

        let (camera_view, camera_position, fovy, aspect, near, far) = {
            let camera = self.camera.as_ref().expect("update checks the camera");
            (
                camera.view(),
                camera.transform.position(),
                camera.fovy(),
                camera.aspect(),
                camera.near(),
                camera.far(),
            )
        };

        let (directional_draws, point_offsets) =
            self.stage_lights(scene, camera_view, fovy, aspect, near, far)?;
        let volume_offsets = self.stage_volumes(scene, camera_position);

        {
            let object_layout = self.geometry.group_layout(1);
            for object in scene.objects.iter_mut().filter(|o| o.enabled) {
                object.mesh.upload(self.ctx.device());
                object.ensure_gpu(self.ctx.device(), object_layout);
                object.write_transform(self.ctx.queue());
            }
        }
        scene
            .material_manager
            .update_all_gpu_resources(&self.ctx, self.geometry.group_layout(2))?;

        self.cascade_arena.upload(self.ctx.queue());
        self.directional_arena.upload(self.ctx.queue());
        self.point_arena.upload(self.ctx.queue());
        self.volume_arena.upload(self.ctx.queue());
        for pipeline in [
            &mut self.geometry,
            &mut self.billboard,
            &mut self.directional,
            &mut self.point,
            &mut self.add_light,
            &mut self.volumetric,
        ] {
            pipeline.upload_uniforms(self.ctx.queue());
        }

        self.geometry.ensure_assembled(&self.ctx)?;
        self.point.ensure_assembled(&self.ctx)?;
        self.add_light.ensure_assembled(&self.ctx)?;
        self.volumetric.ensure_assembled(&self.ctx)?;
        self.gamma.ensure_assembled(&self.ctx)?;

        let mut encoder = self
            .ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });

        self.encode_shadow_passes(&mut encoder, scene, &directional_draws)?;
        self.encode_geometry_pass(&mut encoder, scene)?;
        self.encode_lighting_pass(&mut encoder, &directional_draws, &point_offsets)?;
        self.encode_composite_pass(&mut encoder)?;
        self.encode_volumetric_pass(&mut encoder, &volume_offsets)?;
        if let Some(bloom) = self.bloom.as_mut() {
            let camera = self.camera.as_ref().expect("update checks the camera");
            bloom.apply(&self.ctx, &mut encoder, camera.color())?;
        }
        self.encode_gamma_pass(&mut encoder)?;

        self.ctx.queue().submit(std::iter::once(encoder.finish()));
        self.wait_for_gpu()?;
        self.camera
            .as_ref()
            .expect("update checks the camera")
            .swap_frame_buffers();
        Ok(())
    }

    /// Stages light uniforms into the arenas and sizes the shadow map
    /// pool to the casting lights. Returns the per-directional-light
    /// encode state and the point light arena offsets.
    fn stage_lights(
        &mut self,
        scene: &Scene,
        camera_view: Matrix4<f32>,
        fovy: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> GfxResult<(Vec<DirectionalDraw>, Vec<u32>)> {
        self.cascade_arena.reset();
        self.directional_arena.reset();
        self.point_arena.reset();

        let mut draws = Vec::new();
        let mut point_offsets = Vec::new();
        let mut shadow_count = 0;

        for scene_light in scene.lights.iter().filter(|l| l.enabled) {
            match &scene_light.light {
                Light::Directional(light) => {
                    if self.directional_arena.len() >= MAX_DIRECTIONAL_LIGHTS {
                        log::warn!(
                            "more than {} directional lights, skipping the rest",
                            MAX_DIRECTIONAL_LIGHTS
                        );
                        continue;
                    }
                    let uniform =
                        DirectionalLightUniform::new(light, camera_view, fovy, aspect, near, far);
                    let mut cascade_offsets = [0u32; CASCADE_COUNT];
                    let mut shadow = None;
                    if light.casts_shadows {
                        if shadow_count >= self.shadow_maps.len() {
                            self.shadow_maps.push(ShadowMap::create(
                                &self.ctx,
                                self.settings.shadow_map_size,
                            )?);
                        }
                        for (slot, matrix) in cascade_offsets.iter_mut().zip(uniform.cascades) {
                            *slot = self.cascade_arena.push(CascadeUniform { view_proj: matrix });
                        }
                        shadow = Some(shadow_count);
                        shadow_count += 1;
                    }
                    draws.push(DirectionalDraw {
                        offset: self.directional_arena.push(uniform),
                        shadow,
                        cascade_offsets,
                    });
                }
                Light::Point(light) => {
                    if self.point_arena.len() >= MAX_POINT_LIGHTS {
                        log::warn!(
                            "more than {} point lights, skipping the rest",
                            MAX_POINT_LIGHTS
                        );
                        continue;
                    }
                    point_offsets.push(self.point_arena.push(PointLightUniform::new(light)));
                }
                // Spot and ambient lights are described in the scene model
                // but not lowered to a lighting pass yet.
                Light::Spot(_) | Light::Ambient(_) => {}
            }
        }
        Ok((draws, point_offsets))
    }

    fn stage_volumes(&mut self, scene: &Scene, camera_position: Vector3<f32>) -> Vec<u32> {
        self.volume_arena.reset();
        let mut offsets = Vec::new();
        for volume in scene.volumes.iter().filter(|v| v.enabled) {
            if self.volume_arena.len() >= MAX_VOLUMES {
                log::warn!("more than {} gas volumes, skipping the rest", MAX_VOLUMES);
                break;
            }
            offsets.push(
                self.volume_arena
                    .push(VolumeUniform::new(volume, camera_position)),
            );
        }
        offsets
    }

    /// One depth-only pass per cascade of each shadow-casting light.
    fn encode_shadow_passes(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
        draws: &[DirectionalDraw],
    ) -> GfxResult<()> {
        let casters: Vec<&MeshInstance> = scene
            .objects
            .iter()
            .filter(|o| o.enabled && o.casts_shadows)
            .collect();

        for draw in draws {
            let Some(shadow_index) = draw.shadow else {
                continue;
            };
            for (cascade, offset) in draw.cascade_offsets.iter().enumerate() {
                let depth = self.shadow_maps[shadow_index].cascade_attachment(cascade)?;
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("shadow pass"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(depth),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                let pipeline = self
                    .pipelines
                    .get_or_create(&self.ctx, &mut self.shadow, "shadow")?;
                pass.set_pipeline(pipeline);
                let groups = self.arena_groups.as_ref().expect("set_camera builds these");
                pass.set_bind_group(0, &groups.cascade, &[*offset]);
                for object in &casters {
                    let Some(bind_group) = object.bind_group() else {
                        continue;
                    };
                    let (Some(vertices), Some(indices)) =
                        (object.mesh.vertex_buffer(), object.mesh.index_buffer())
                    else {
                        continue;
                    };
                    pass.set_bind_group(1, bind_group, &[]);
                    pass.set_vertex_buffer(0, vertices.slice(..));
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..object.mesh.index_count(), 0, 0..1);
                }
            }
        }
        Ok(())
    }

    /// Opaque geometry into the G-buffer, then particle billboards into
    /// the same targets. Depth always clears; the color targets clear
    /// only in debug builds.
    fn encode_geometry_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        scene: &Scene,
    ) -> GfxResult<()> {
        let camera = self.camera.as_ref().expect("update checks the camera");
        let color_attachments = camera.gbuffer().color_attachments()?;
        let depth_view = camera.depth().view(ViewKind::DepthStencil)?;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("geometry pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let pipeline = self
            .pipelines
            .get_or_create(&self.ctx, &mut self.geometry, "geometry")?;
        pass.set_pipeline(pipeline);
        for assembly in self.geometry.assemblies() {
            pass.set_bind_group(assembly.index, &assembly.bind_group, &[]);
        }
        for object in scene.objects.iter().filter(|o| o.enabled) {
            let Some(bind_group) = object.bind_group() else {
                continue;
            };
            let Some(material) = scene.material_manager.bind_group_for(object.material_index)
            else {
                continue;
            };
            let (Some(vertices), Some(indices)) =
                (object.mesh.vertex_buffer(), object.mesh.index_buffer())
            else {
                continue;
            };
            pass.set_bind_group(1, bind_group, &[]);
            pass.set_bind_group(2, material, &[]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..object.mesh.index_count(), 0, 0..1);
        }

        let live_systems = scene
            .particle_systems
            .iter()
            .filter(|s| s.enabled && s.live_count() > 0);
        let mut billboard_set = false;
        for system in live_systems {
            let Some(buffer) = system.particle_buffer() else {
                continue;
            };
            if !billboard_set {
                let pipeline =
                    self.pipelines
                        .get_or_create(&self.ctx, &mut self.billboard, "billboard")?;
                pass.set_pipeline(pipeline);
                billboard_set = true;
            }
            self.billboard.bind_storage_buffer("particles", buffer)?;
            self.billboard.ensure_assembled(&self.ctx)?;
            for assembly in self.billboard.assemblies() {
                pass.set_bind_group(assembly.index, &assembly.bind_group, &[]);
            }
            // six vertices per particle quad, one instance per live slot
            pass.draw(0..6, 0..system.live_count());
        }
        Ok(())
    }

    /// Additive accumulation of every light into the radiance buffer.
    /// Runs even with zero lights so the buffer still clears.
    fn encode_lighting_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        draws: &[DirectionalDraw],
        point_offsets: &[u32],
    ) -> GfxResult<()> {
        let camera = self.camera.as_ref().expect("update checks the camera");
        let radiance_view = camera.radiance().view(ViewKind::RenderTarget)?;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("lighting pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: radiance_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: 0.0,
                        g: 0.0,
                        b: 0.0,
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if !draws.is_empty() {
            let pipeline =
                self.pipelines
                    .get_or_create(&self.ctx, &mut self.directional, "light directional")?;
            pass.set_pipeline(pipeline);
            for draw in draws {
                // Each casting light samples its own map, so the shadow
                // group reassembles per light.
                if let Some(shadow_index) = draw.shadow {
                    self.directional
                        .bind_texture("t_shadow", self.shadow_maps[shadow_index].texture())?;
                }
                self.directional.ensure_assembled(&self.ctx)?;
                for assembly in self.directional.assemblies() {
                    pass.set_bind_group(assembly.index, &assembly.bind_group, &[]);
                }
                let groups = self.arena_groups.as_ref().expect("set_camera builds these");
                pass.set_bind_group(1, &groups.directional, &[draw.offset]);
                pass.draw(0..3, 0..1);
            }
        }

        if !point_offsets.is_empty() {
            let pipeline = self
                .pipelines
                .get_or_create(&self.ctx, &mut self.point, "light point")?;
            pass.set_pipeline(pipeline);
            for assembly in self.point.assemblies() {
                pass.set_bind_group(assembly.index, &assembly.bind_group, &[]);
            }
            let groups = self.arena_groups.as_ref().expect("set_camera builds these");
            for offset in point_offsets {
                pass.set_bind_group(1, &groups.point, &[*offset]);
                pass.draw(0..3, 0..1);
            }
        }
        Ok(())
    }

    /// Folds ambient, radiance and emission into the HDR color buffer.
    fn encode_composite_pass(&mut self, encoder: &mut wgpu::CommandEncoder) -> GfxResult<()> {
        let camera = self.camera.as_ref().expect("update checks the camera");
        let color_view = camera.color().view(ViewKind::RenderTarget)?;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("light composite pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        let pipeline = self
            .pipelines
            .get_or_create(&self.ctx, &mut self.add_light, "add light")?;
        pass.set_pipeline(pipeline);
        for assembly in self.add_light.assemblies() {
            pass.set_bind_group(assembly.index, &assembly.bind_group, &[]);
        }
        pass.draw(0..3, 0..1);
        Ok(())
    }

    /// Blends the enabled gas volumes over the lit color buffer.
    fn encode_volumetric_pass(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        offsets: &[u32],
    ) -> GfxResult<()> {
        if offsets.is_empty() {
            return Ok(());
        }
        let camera = self.camera.as_ref().expect("update checks the camera");
        let color_view = camera.color().view(ViewKind::RenderTarget)?;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("volumetric pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        let pipeline =
            self.pipelines
                .get_or_create(&self.ctx, &mut self.volumetric, "volumetric")?;
        pass.set_pipeline(pipeline);
        for assembly in self.volumetric.assemblies() {
            pass.set_bind_group(assembly.index, &assembly.bind_group, &[]);
        }
        let vertices = self
            .unit_cube
            .vertex_buffer()
            .expect("uploaded at construction");
        let indices = self
            .unit_cube
            .index_buffer()
            .expect("uploaded at construction");
        pass.set_vertex_buffer(0, vertices.slice(..));
        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
        let groups = self.arena_groups.as_ref().expect("set_camera builds these");
        for offset in offsets {
            pass.set_bind_group(1, &groups.volume, &[*offset]);
            pass.draw_indexed(0..self.unit_cube.index_count(), 0, 0..1);
        }
        Ok(())
    }

    /// Tone maps the HDR color buffer into the back frame buffer.
    fn encode_gamma_pass(&mut self, encoder: &mut wgpu::CommandEncoder) -> GfxResult<()> {
        let camera = self.camera.as_ref().expect("update checks the camera");
        let back = camera.frame_chain().back_view()?;
        let bg = self.settings.background;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("gamma pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &back,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: bg[0],
                        g: bg[1],
                        b: bg[2],
                        a: bg[3],
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        let pipeline = self
            .pipelines
            .get_or_create(&self.ctx, &mut self.gamma, "gamma")?;
        pass.set_pipeline(pipeline);
        for assembly in self.gamma.assemblies() {
            pass.set_bind_group(assembly.index, &assembly.bind_group, &[]);
        }
        pass.draw(0..3, 0..1);
        Ok(())
    }

    /// The disabled-camera path: the frame chain still gets a cleared,
    /// presentable buffer each update.
    fn present_cleared_frame(&mut self) -> GfxResult<()> {
        let resized = self
            .camera
            .as_mut()
            .expect("update checks the camera")
            .pre_render_update(&self.ctx)?;
        if resized {
            self.attach_camera_targets()?;
        }
        let camera = self.camera.as_ref().expect("update checks the camera");
        let back = camera.frame_chain().back_view()?;
        let bg = self.settings.background;
        let mut encoder = self
            .ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear frame"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &back,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: bg[0],
                        g: bg[1],
                        b: bg[2],
                        a: bg[3],
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        self.ctx.queue().submit(std::iter::once(encoder.finish()));
        self.wait_for_gpu()?;
        self.camera
            .as_ref()
            .expect("update checks the camera")
            .swap_frame_buffers();
        Ok(())
    }

    fn frame_values(&mut self) -> FrameValues {
        let camera = self.camera.as_mut().expect("update checks the camera");
        let view = camera.view();
        let proj = camera.proj();
        let view_proj = camera.view_proj();
        let position = camera.transform.position();
        let forward = camera.transform.forward();
        let up = camera.transform.up();
        let right = forward.cross(up).normalize();
        FrameValues {
            view: view.into(),
            proj: proj.into(),
            view_proj: view_proj.into(),
            camera_position: [position.x, position.y, position.z, 1.0],
            camera_forward: [forward.x, forward.y, forward.z, 0.0],
            camera_right: [right.x, right.y, right.z, 0.0],
            camera_up: [up.x, up.y, up.z, 0.0],
        }
    }

    /// (Re)binds every pass input that lives on the camera. Runs on
    /// attach and again whenever a resize reallocates the targets.
    fn attach_camera_targets(&mut self) -> GfxResult<()> {
        let camera = self.camera.as_ref().expect("caller attaches the camera");
        camera.gbuffer().bind_to(&mut self.directional)?;
        camera.gbuffer().bind_to(&mut self.point)?;
        camera.gbuffer().bind_to(&mut self.add_light)?;
        camera.gbuffer().bind_to(&mut self.volumetric)?;
        self.add_light.bind_texture("t_radiance", camera.radiance())?;
        self.gamma.bind_texture("t_source", camera.color())?;
        match self.bloom.take() {
            Some(mut bloom) => {
                bloom.resize(&self.ctx, camera.color())?;
                self.bloom = Some(bloom);
            }
            None => {
                self.bloom = Some(Bloom::new(&self.ctx, &self.settings, camera.color())?);
            }
        }
        Ok(())
    }

    fn ensure_pass_layouts(&mut self) {
        for pipeline in [
            &mut self.geometry,
            &mut self.shadow,
            &mut self.billboard,
            &mut self.directional,
            &mut self.point,
            &mut self.add_light,
            &mut self.volumetric,
            &mut self.gamma,
        ] {
            pipeline.ensure_layouts(&self.ctx);
        }
    }

    fn build_arena_groups(&self) -> ArenaBindGroups {
        let device = self.ctx.device();
        let make = |label: &str, layout: &wgpu::BindGroupLayout, resource: wgpu::BindingResource| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource,
                }],
            })
        };
        ArenaBindGroups {
            cascade: make(
                "cascade arena",
                self.shadow.group_layout(0),
                self.cascade_arena.binding_resource(),
            ),
            directional: make(
                "directional light arena",
                self.directional.group_layout(1),
                self.directional_arena.binding_resource(),
            ),
            point: make(
                "point light arena",
                self.point.group_layout(1),
                self.point_arena.binding_resource(),
            ),
            volume: make(
                "volume arena",
                self.volumetric.group_layout(1),
                self.volume_arena.binding_resource(),
            ),
        }
    }

    /// Registers the render state of every pass against the formats the
    /// attached camera allocates.
    fn register_pass_configs(&mut self) {
        let camera = self.camera.as_ref().expect("caller attaches the camera");
        let gbuffer_targets: Vec<Option<wgpu::ColorTargetState>> = camera
            .gbuffer()
            .target_formats()
            .iter()
            .map(|format| color_target(*format, None))
            .collect();
        let depth_format = camera.depth().resolved_format();
        let shadow_format = self.shadow_maps[0].texture().resolved_format();
        let hdr_format = camera.color().resolved_format();
        let radiance_format = camera.radiance().resolved_format();

        self.pipelines.register_pipeline(
            "geometry",
            PipelineConfig::new("geometry")
                .with_color_targets(gbuffer_targets.clone())
                .with_depth(depth_format),
        );
        self.pipelines.register_pipeline(
            "billboard",
            PipelineConfig::new("billboard")
                .with_color_targets(gbuffer_targets)
                .with_depth(depth_format)
                .with_cull_mode(None)
                .with_no_vertex_buffers(),
        );
        self.pipelines.register_pipeline(
            "shadow",
            PipelineConfig::new("shadow")
                .with_vertex_only()
                .with_depth(shadow_format)
                .with_cull_mode(Some(wgpu::Face::Front)),
        );
        self.pipelines.register_pipeline(
            "light directional",
            PipelineConfig::new("light directional")
                .with_color_targets(vec![color_target(radiance_format, Some(BLEND_ADDITIVE))])
                .with_cull_mode(None)
                .with_no_vertex_buffers(),
        );
        self.pipelines.register_pipeline(
            "light point",
            PipelineConfig::new("light point")
                .with_color_targets(vec![color_target(radiance_format, Some(BLEND_ADDITIVE))])
                .with_cull_mode(None)
                .with_no_vertex_buffers(),
        );
        self.pipelines.register_pipeline(
            "add light",
            PipelineConfig::new("add light")
                .with_color_targets(vec![color_target(hdr_format, None)])
                .with_cull_mode(None)
                .with_no_vertex_buffers(),
        );
        self.pipelines.register_pipeline(
            "volumetric",
            PipelineConfig::new("volumetric")
                .with_color_targets(vec![color_target(
                    hdr_format,
                    Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                )])
                .with_cull_mode(Some(wgpu::Face::Front)),
        );
        self.pipelines.register_pipeline(
            "gamma",
            PipelineConfig::new("gamma")
                // the frame chain allocates Bgra8Unorm buffers
                .with_color_targets(vec![color_target(wgpu::TextureFormat::Bgra8Unorm, None)])
                .with_cull_mode(None)
                .with_no_vertex_buffers(),
        );
    }

    /// Blocks until the queue reports the submitted frame complete,
    /// yielding between polls. Bounded by the settings timeout so a
    /// wedged driver surfaces as an error instead of a hang.
    fn wait_for_gpu(&self) -> GfxResult<()> {
        let (tx, rx) = mpsc::channel();
        self.ctx.queue().on_submitted_work_done(move || {
            let _ = tx.send(());
        });
        let started = Instant::now();
        loop {
            let _ = self.ctx.device().poll(wgpu::PollType::Poll);
            match rx.try_recv() {
                Ok(()) => return Ok(()),
                // sender dropped unfired means the device went away
                Err(TryRecvError::Disconnected) => {
                    return Err(GfxError::GpuSyncTimeout {
                        waited_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Err(TryRecvError::Empty) => {}
            }
            if started.elapsed() > self.settings.gpu_sync_timeout {
                return Err(GfxError::GpuSyncTimeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::scene::{DirectionalLight, GasVolume, PointLight, Transform};
    use crate::gfx::test_support::test_context;

    fn core_with_camera(width: u32, height: u32) -> Option<GraphicsCore> {
        let ctx = test_context()?;
        let mut core = match GraphicsCore::new(ctx, EngineSettings::new()) {
            Ok(core) => core,
            Err(err) => panic!("graphics core init failed: {err}"),
        };
        let camera =
            Camera::create(core.ctx(), width, height).expect("camera allocation failed");
        core.set_camera(camera).expect("camera attach failed");
        Some(core)
    }

    fn lit_scene() -> Scene {
        let mut scene = Scene::new();
        scene.add_cube().transform.position = Vector3::new(0.0, 0.5, 0.0);
        scene.add_plane(8.0, 8.0);
        scene.add_light(Light::Directional(DirectionalLight::new(
            Vector3::new(-0.4, -1.0, -0.3),
            [1.0, 0.96, 0.9],
            2.0,
        )));
        scene.add_light(Light::Point(PointLight::new(
            Vector3::new(1.5, 1.0, 0.0),
            [0.2, 0.4, 1.0],
            6.0,
            3.0,
        )));
        scene
    }

    #[test]
    fn test_frame_renders_and_swaps() {
        let Some(mut core) = core_with_camera(64, 48) else {
            return;
        };
        let mut scene = lit_scene();
        core.update(&mut scene, 0.016).expect("first frame failed");
        // second frame reuses the cached pipelines and bind groups
        core.update(&mut scene, 0.016).expect("second frame failed");

        let handle = core.camera().expect("camera attached").front_buffer_handle();
        let front = handle.acquire_front().expect("front buffer after swap");
        assert_eq!(front.width, 64);
    }

    #[test]
    fn test_empty_scene_still_presents() {
        let Some(mut core) = core_with_camera(32, 32) else {
            return;
        };
        let mut scene = Scene::new();
        core.update(&mut scene, 0.016).expect("empty scene frame");
    }

    #[test]
    fn test_disabled_camera_presents_cleared_frame() {
        let Some(mut core) = core_with_camera(32, 32) else {
            return;
        };
        core.camera_mut().expect("camera attached").enabled = false;
        let mut scene = lit_scene();
        core.update(&mut scene, 0.016).expect("cleared frame");
        let handle = core.camera().expect("camera attached").front_buffer_handle();
        assert!(handle.acquire_front().is_ok());
    }

    #[test]
    fn test_update_after_dispose_fails() {
        let Some(mut core) = core_with_camera(16, 16) else {
            return;
        };
        core.dispose();
        core.dispose(); // idempotent
        let mut scene = Scene::new();
        assert!(matches!(
            core.update(&mut scene, 0.016),
            Err(GfxError::Disposed { .. })
        ));
    }

    #[test]
    fn test_resize_applies_on_next_frame() {
        let Some(mut core) = core_with_camera(64, 48) else {
            return;
        };
        let mut scene = lit_scene();
        core.update(&mut scene, 0.016).expect("initial frame");
        core.camera_mut()
            .expect("camera attached")
            .resize(128, 96)
            .expect("resize request");
        core.update(&mut scene, 0.016).expect("resized frame");
        let camera = core.camera().expect("camera attached");
        assert_eq!((camera.width(), camera.height()), (128, 96));
    }

    #[test]
    fn test_volume_pass_renders() {
        let Some(mut core) = core_with_camera(48, 48) else {
            return;
        };
        let mut scene = lit_scene();
        scene.add_volume(GasVolume::new(
            Transform::from_position(Vector3::new(0.0, 1.0, 0.0)),
            Vector3::new(2.0, 1.0, 2.0),
        ));
        core.update(&mut scene, 0.016).expect("volume frame");
    }

    #[test]
    fn test_volume_uniform_matches_shader_block() {
        // VolumeData in volumetric.vert.wgsl: two mat4x4 plus four vec4s
        assert_eq!(std::mem::size_of::<VolumeUniform>(), 192);
        assert_eq!(std::mem::size_of::<CascadeUniform>(), 64);
    }
}

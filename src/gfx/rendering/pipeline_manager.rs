//! Render pipeline management
//!
//! Pass configurations (topology, culling, depth, blend targets) are
//! registered by name and the wgpu pipelines built lazily on first use.
//! Shader modules, entry points and bind group layouts all come from the
//! [`ShaderPipeline`] the pass renders with, so a config carries render
//! state only.

use std::collections::HashMap;

use crate::error::{GfxError, GfxResult};
use crate::gfx::context::RenderContext;
use crate::gfx::scene::vertex::Vertex3D;
use crate::gfx::shader::ShaderPipeline;

/// Additive accumulation, used by the per-light passes and the bloom
/// composite.
pub const BLEND_ADDITIVE: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

/// Shorthand for building one entry of a config's color target list.
pub fn color_target(
    format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> Option<wgpu::ColorTargetState> {
    Some(wgpu::ColorTargetState {
        format,
        blend,
        write_mask: wgpu::ColorWrites::ALL,
    })
}

/// Configuration for creating a render pipeline
///
/// Captures everything about a pass that is not dictated by its shaders:
/// primitive state, depth test, and where the output goes.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub label: String,
    pub primitive_topology: wgpu::PrimitiveTopology,
    pub cull_mode: Option<wgpu::Face>,
    pub depth_format: Option<wgpu::TextureFormat>,
    pub depth_write_enabled: bool,
    pub depth_compare: wgpu::CompareFunction,
    pub multisample: wgpu::MultisampleState,
    pub color_targets: Vec<Option<wgpu::ColorTargetState>>,
    pub vertex_only: bool,       // shadow pass
    pub no_vertex_buffers: bool, // fullscreen triangle passes
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: "pipeline".to_string(),
            primitive_topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: Some(wgpu::Face::Back),
            depth_format: None,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            multisample: wgpu::MultisampleState::default(),
            color_targets: vec![color_target(
                wgpu::TextureFormat::Bgra8Unorm,
                Some(wgpu::BlendState::REPLACE),
            )],
            vertex_only: false,
            no_vertex_buffers: false,
        }
    }
}

impl PipelineConfig {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Default::default()
        }
    }

    pub fn with_cull_mode(mut self, face: Option<wgpu::Face>) -> Self {
        self.cull_mode = face;
        self
    }

    /// Depth-only pipeline without a fragment stage.
    pub fn with_vertex_only(mut self) -> Self {
        self.vertex_only = true;
        self.color_targets.clear();
        self
    }

    /// Enables depth testing and writing against a target of `format`.
    pub fn with_depth(mut self, format: wgpu::TextureFormat) -> Self {
        self.depth_format = Some(format);
        self.depth_write_enabled = true;
        self
    }

    /// Depth test without write, for transparents drawn after the opaque
    /// geometry.
    pub fn with_depth_read_only(mut self, format: wgpu::TextureFormat) -> Self {
        self.depth_format = Some(format);
        self.depth_write_enabled = false;
        self
    }

    /// Sets color targets for this pipeline (builder pattern)
    pub fn with_color_targets(mut self, targets: Vec<Option<wgpu::ColorTargetState>>) -> Self {
        self.color_targets = targets;
        self
    }

    /// Sets primitive topology for this pipeline (builder pattern)
    pub fn with_primitive_topology(mut self, topology: wgpu::PrimitiveTopology) -> Self {
        self.primitive_topology = topology;
        self
    }

    /// Configures the pipeline for fullscreen passes where the vertex
    /// shader synthesizes positions from the vertex index.
    pub fn with_no_vertex_buffers(mut self) -> Self {
        self.no_vertex_buffers = true;
        self
    }
}

/// Manages render pipelines with caching and lazy creation
///
/// Configs are registered up front; the wgpu pipeline for a pass is built
/// the first time the pass runs and reused afterwards.
pub struct PipelineManager {
    pipelines: HashMap<String, wgpu::RenderPipeline>,
    configs: HashMap<String, PipelineConfig>,
}

impl PipelineManager {
    pub fn new() -> Self {
        Self {
            pipelines: HashMap::new(),
            configs: HashMap::new(),
        }
    }

    /// Registers a pipeline configuration without creating it
    ///
    /// # Arguments
    /// * `name` - Unique identifier for this pipeline
    /// * `config` - Pipeline configuration
    pub fn register_pipeline(&mut self, name: &str, config: PipelineConfig) {
        self.configs.insert(name.to_string(), config);
    }

    /// Checks if a pipeline is registered
    pub fn has_pipeline(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    /// Gets or creates a pipeline (lazy loading)
    ///
    /// `shader_pipeline` supplies the shader modules and bind group
    /// layouts; its layouts are finalized here if they were not already.
    ///
    /// # Arguments
    /// * `name` - Pipeline identifier
    pub fn get_or_create(
        &mut self,
        ctx: &RenderContext,
        shader_pipeline: &mut ShaderPipeline,
        name: &str,
    ) -> GfxResult<&wgpu::RenderPipeline> {
        if !self.pipelines.contains_key(name) {
            let config = self
                .configs
                .get(name)
                .ok_or_else(|| GfxError::PipelineNotRegistered {
                    name: name.to_string(),
                })?;
            let pipeline = create_pipeline_from_config(ctx, shader_pipeline, config)?;
            self.pipelines.insert(name.to_string(), pipeline);
        }
        Ok(self.pipelines.get(name).expect("inserted above"))
    }
}

impl Default for PipelineManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a render pipeline from configuration
fn create_pipeline_from_config(
    ctx: &RenderContext,
    shader_pipeline: &mut ShaderPipeline,
    config: &PipelineConfig,
) -> GfxResult<wgpu::RenderPipeline> {
    shader_pipeline.ensure_layouts(ctx);

    let layout_refs: Vec<&wgpu::BindGroupLayout> = shader_pipeline.layouts().iter().collect();
    let pipeline_layout = ctx
        .device()
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{} layout", config.label)),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });

    // Vertex-only pipelines (shadow pass) carry no fragment state.
    let fragment_state = if config.vertex_only {
        None
    } else {
        let fragment = shader_pipeline
            .fragment()
            .ok_or(GfxError::MissingShaderStage { stage: "fragment" })?;
        Some(wgpu::FragmentState {
            module: fragment.module(),
            entry_point: Some(fragment.entry_point()),
            targets: &config.color_targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        })
    };

    let mesh_buffers = [Vertex3D::desc()];
    let vertex_buffers: &[wgpu::VertexBufferLayout] = if config.no_vertex_buffers {
        &[]
    } else {
        &mesh_buffers
    };

    let depth_stencil = config.depth_format.map(|format| wgpu::DepthStencilState {
        format,
        depth_write_enabled: config.depth_write_enabled,
        depth_compare: config.depth_compare,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });

    let vertex = shader_pipeline.vertex();
    let pipeline = ctx
        .device()
        .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&config.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: vertex.module(),
                entry_point: Some(vertex.entry_point()),
                buffers: vertex_buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: fragment_state,
            primitive: wgpu::PrimitiveState {
                topology: config.primitive_topology,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: config.cull_mode,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil,
            multisample: config.multisample,
            multiview: None,
            cache: None,
        });

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.cull_mode, Some(wgpu::Face::Back));
        assert_eq!(config.color_targets.len(), 1);
        assert!(config.depth_format.is_none());
        assert!(!config.vertex_only);
    }

    #[test]
    fn test_builder_chain() {
        let config = PipelineConfig::new("shadow")
            .with_vertex_only()
            .with_cull_mode(Some(wgpu::Face::Front))
            .with_depth(wgpu::TextureFormat::Depth32Float);
        assert_eq!(config.label, "shadow");
        assert!(config.vertex_only);
        assert!(config.color_targets.is_empty());
        assert_eq!(config.cull_mode, Some(wgpu::Face::Front));
        assert_eq!(config.depth_format, Some(wgpu::TextureFormat::Depth32Float));
        assert!(config.depth_write_enabled);
    }

    #[test]
    fn test_depth_read_only() {
        let config = PipelineConfig::new("billboard")
            .with_depth_read_only(wgpu::TextureFormat::Depth32Float);
        assert!(!config.depth_write_enabled);
        assert_eq!(config.depth_compare, wgpu::CompareFunction::Less);
    }

    #[test]
    fn test_unregistered_pipeline_is_reported() {
        let manager = PipelineManager::new();
        assert!(!manager.has_pipeline("missing"));
    }
}

// src/gfx/shader/pipeline.rs
//! Render pipeline binding model
//!
//! A [`ShaderPipeline`] groups one vertex shader and an optional fragment
//! shader and owns the bind group layouts their reflection implies. Merged
//! across stages, every `@group(n)` becomes one layout; groups the pipeline
//! can fill itself (uniform blocks plus resources attached by name) are
//! assembled into bind groups on demand, while groups declared external are
//! layout-only and filled by the caller at encode time.
//!
//! Binding slots shared by both stages resolve to one entry whose
//! visibility is the union of the declaring stages; the buffer behind a
//! shared uniform block is the vertex stage's copy, and uniform writes are
//! routed there regardless of which stage the caller had in mind.

use std::collections::HashMap;

use crate::error::{GfxError, GfxResult};
use crate::gfx::context::{PipelineId, RenderContext};
use crate::gfx::resources::{Sampler, Texture, ViewKind};

use super::reflection::{BindingKind, TexelKind};
use super::shader::{Shader, ShaderStage};

fn validate_stage_set(stages: &[ShaderStage]) -> GfxResult<()> {
    let mut have_vertex = false;
    let mut have_fragment = false;
    for stage in stages {
        match stage {
            ShaderStage::Vertex => {
                if have_vertex {
                    return Err(GfxError::DuplicateShaderStage { stage: "vertex" });
                }
                have_vertex = true;
            }
            ShaderStage::Fragment => {
                if have_fragment {
                    return Err(GfxError::DuplicateShaderStage { stage: "fragment" });
                }
                have_fragment = true;
            }
            other => {
                return Err(GfxError::UnsupportedShaderStage {
                    stage: other.name(),
                })
            }
        }
    }
    if !have_vertex {
        return Err(GfxError::MissingShaderStage { stage: "vertex" });
    }
    Ok(())
}

fn format_filterable(format: wgpu::TextureFormat) -> bool {
    matches!(
        format,
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
    )
}

struct BoundTexture {
    view: wgpu::TextureView,
    filterable: bool,
}

enum MergedSource {
    Uniform {
        stage: usize,
        block: usize,
        dynamic: bool,
    },
    Texture {
        name: String,
        dimension: wgpu::TextureViewDimension,
        kind: TexelKind,
        multisampled: bool,
    },
    Sampler {
        name: String,
        comparison: bool,
    },
    Storage {
        name: String,
        read_only: bool,
    },
}

struct MergedBinding {
    binding: u32,
    visibility: wgpu::ShaderStages,
    source: MergedSource,
}

/// One auto-assembled bind group, ready to set on a render pass.
pub(crate) struct GroupAssembly {
    pub index: u32,
    pub bind_group: wgpu::BindGroup,
}

/// A vertex(+fragment) shader pair with reflected binding state.
pub struct ShaderPipeline {
    id: PipelineId,
    label: String,
    stages: Vec<Shader>,
    external_groups: Vec<u32>,
    dynamic_blocks: Vec<String>,
    textures: HashMap<String, BoundTexture>,
    samplers: HashMap<String, wgpu::Sampler>,
    storage_buffers: HashMap<String, wgpu::Buffer>,
    layouts: Vec<wgpu::BindGroupLayout>,
    layouts_built: bool,
    assemblies: Vec<GroupAssembly>,
    groups_dirty: bool,
}

impl ShaderPipeline {
    /// Validates the stage set and takes ownership of the shaders. The set
    /// must contain exactly one vertex shader; a fragment shader is
    /// optional (depth-only pipelines omit it); anything else is refused.
    pub fn new(label: &str, mut shaders: Vec<Shader>) -> GfxResult<Self> {
        let stages: Vec<ShaderStage> = shaders.iter().map(|s| s.stage()).collect();
        validate_stage_set(&stages)?;
        // Vertex first so the shared-slot owner is always the vertex copy.
        shaders.sort_by_key(|s| match s.stage() {
            ShaderStage::Vertex => 0,
            _ => 1,
        });
        Ok(Self {
            id: PipelineId::next(),
            label: label.to_string(),
            stages: shaders,
            external_groups: Vec::new(),
            dynamic_blocks: Vec::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            storage_buffers: HashMap::new(),
            layouts: Vec::new(),
            layouts_built: false,
            assemblies: Vec::new(),
            groups_dirty: true,
        })
    }

    /// Declares a group whose bind group the caller supplies at encode
    /// time (per-draw data, materials). The pipeline still synthesizes the
    /// group's layout from reflection.
    pub fn with_external_group(mut self, group: u32) -> Self {
        if !self.external_groups.contains(&group) {
            self.external_groups.push(group);
        }
        self
    }

    /// Marks a uniform block, by its global name, as bound with a dynamic
    /// offset. Only meaningful for blocks living in an external group.
    pub fn with_dynamic_uniform(mut self, block: &str) -> Self {
        self.dynamic_blocks.push(block.to_string());
        self
    }

    /// Makes this the context's current pipeline. Any previously current
    /// pipeline is cleared first.
    pub fn use_pipeline(&self, ctx: &mut RenderContext) {
        ctx.clear_current_pipeline();
        ctx.set_current_pipeline(self.id);
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vertex(&self) -> &Shader {
        self.stages
            .iter()
            .find(|s| s.stage() == ShaderStage::Vertex)
            .expect("stage set validated at construction")
    }

    pub fn fragment(&self) -> Option<&Shader> {
        self.stages.iter().find(|s| s.stage() == ShaderStage::Fragment)
    }

    pub fn is_external(&self, group: u32) -> bool {
        self.external_groups.contains(&group)
    }

    /// Stores raw bytes into the named uniform variable, routed to the
    /// stage copy that actually gets bound.
    pub fn update_uniform(&mut self, name: &str, data: &[u8]) -> GfxResult<()> {
        let (stage, block, offset, declared) =
            self.locate_uniform(name)
                .ok_or_else(|| GfxError::UniformNotFound {
                    name: name.to_string(),
                })?;
        if data.len() > declared {
            return Err(GfxError::UniformSizeExceeded {
                name: name.to_string(),
                size: data.len(),
                declared,
            });
        }
        self.stages[stage].write_block(block, offset, data);
        Ok(())
    }

    /// Typed convenience over [`ShaderPipeline::update_uniform`].
    pub fn set_uniform<T: bytemuck::Pod>(&mut self, name: &str, value: &T) -> GfxResult<()> {
        self.update_uniform(name, bytemuck::bytes_of(value))
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.has_uniform(name))
    }

    /// Whether any stage declares a texture/sampler/storage binding with
    /// this name.
    pub fn has_binding(&self, name: &str) -> bool {
        self.stages
            .iter()
            .any(|s| s.reflection().find_binding(name).is_some())
    }

    /// Flushes dirty uniform blocks of every stage.
    pub fn upload_uniforms(&mut self, queue: &wgpu::Queue) {
        for shader in &mut self.stages {
            shader.upload_updated_uniforms(queue);
        }
    }

    // Finds `name` in any stage, then resolves the write target through
    // the canonical owner of that (group, binding) slot.
    fn locate_uniform(&self, name: &str) -> Option<(usize, usize, usize, usize)> {
        for shader in &self.stages {
            if let Some((block_index, var)) = shader.reflection().find_var(name) {
                let block = &shader.reflection().uniform_blocks[block_index];
                let (stage, block) = self.slot_owner(block.group, block.binding)?;
                return Some((stage, block, var.offset as usize, var.size as usize));
            }
        }
        None
    }

    fn slot_owner(&self, group: u32, binding: u32) -> Option<(usize, usize)> {
        for (si, shader) in self.stages.iter().enumerate() {
            let found = shader
                .reflection()
                .uniform_blocks
                .iter()
                .position(|b| b.group == group && b.binding == binding);
            if let Some(bi) = found {
                return Some((si, bi));
            }
        }
        None
    }

    /// Attaches a texture to the named shader binding. The view is chosen
    /// by the binding's reflected dimension: plain `texture_2d` bindings
    /// get the slice-0 view, array bindings the aggregate array view.
    ///
    /// Attach every pass-level texture before the first
    /// [`ShaderPipeline::ensure_layouts`] call; reattaching later (after a
    /// resize) must keep the same pixel format.
    pub fn bind_texture(&mut self, name: &str, texture: &Texture) -> GfxResult<()> {
        let dimension = match self.reflected_binding(name)? {
            BindingKind::Texture { dimension, .. } => dimension,
            _ => {
                return Err(GfxError::BindingKindMismatch {
                    name: name.to_string(),
                    expected: "a texture",
                })
            }
        };

        let view = match dimension {
            wgpu::TextureViewDimension::D2 => texture.view(ViewKind::ShaderResource)?,
            wgpu::TextureViewDimension::D2Array => texture.array_view(ViewKind::ShaderResource)?,
            _ => {
                return Err(GfxError::BindingKindMismatch {
                    name: name.to_string(),
                    expected: "a 2d or 2d-array texture",
                })
            }
        };

        let filterable = format_filterable(texture.resolved_format());
        if self.layouts_built {
            if let Some(previous) = self.textures.get(name) {
                if previous.filterable != filterable {
                    log::warn!(
                        "pipeline '{}': rebinding '{}' changes filterability after layout creation",
                        self.label,
                        name
                    );
                }
            }
        }

        self.textures.insert(
            name.to_string(),
            BoundTexture {
                view: view.clone(),
                filterable,
            },
        );
        self.groups_dirty = true;
        Ok(())
    }

    /// Attaches a sampler to the named binding. Comparison samplers only
    /// fit comparison slots and vice versa.
    pub fn bind_sampler(&mut self, name: &str, sampler: &Sampler) -> GfxResult<()> {
        let comparison = match self.reflected_binding(name)? {
            BindingKind::Sampler { comparison } => comparison,
            _ => {
                return Err(GfxError::BindingKindMismatch {
                    name: name.to_string(),
                    expected: "a sampler",
                })
            }
        };
        if comparison != sampler.is_comparison() {
            return Err(GfxError::BindingKindMismatch {
                name: name.to_string(),
                expected: if comparison {
                    "a comparison sampler"
                } else {
                    "a filtering sampler"
                },
            });
        }
        self.samplers.insert(name.to_string(), sampler.raw().clone());
        self.groups_dirty = true;
        Ok(())
    }

    /// Attaches a storage buffer to the named binding.
    pub fn bind_storage_buffer(&mut self, name: &str, buffer: &wgpu::Buffer) -> GfxResult<()> {
        match self.reflected_binding(name)? {
            BindingKind::StorageBuffer { .. } => {}
            _ => {
                return Err(GfxError::BindingKindMismatch {
                    name: name.to_string(),
                    expected: "a storage buffer",
                })
            }
        }
        self.storage_buffers.insert(name.to_string(), buffer.clone());
        self.groups_dirty = true;
        Ok(())
    }

    fn reflected_binding(&self, name: &str) -> GfxResult<BindingKind> {
        self.stages
            .iter()
            .find_map(|s| s.reflection().find_binding(name))
            .map(|b| b.kind)
            .ok_or_else(|| GfxError::BindingNotFound {
                name: name.to_string(),
            })
    }

    // One merged binding list per group index, sorted by binding slot.
    // Slots declared by both stages collapse into one entry with unioned
    // visibility; the first declaring stage (vertex, after sorting) wins
    // ownership of uniform buffers.
    fn merged_groups(&self) -> Vec<Vec<MergedBinding>> {
        let mut groups: Vec<Vec<MergedBinding>> = Vec::new();

        let mut upsert = |groups: &mut Vec<Vec<MergedBinding>>,
                          group: u32,
                          binding: u32,
                          visibility: wgpu::ShaderStages,
                          source: MergedSource| {
            while groups.len() <= group as usize {
                groups.push(Vec::new());
            }
            let entries = &mut groups[group as usize];
            if let Some(existing) = entries.iter_mut().find(|e| e.binding == binding) {
                existing.visibility |= visibility;
                // A slot writable in either stage stays writable.
                if let (
                    MergedSource::Storage { read_only, .. },
                    MergedSource::Storage {
                        read_only: new_read_only,
                        ..
                    },
                ) = (&mut existing.source, &source)
                {
                    *read_only &= new_read_only;
                }
            } else {
                entries.push(MergedBinding {
                    binding,
                    visibility,
                    source,
                });
            }
        };

        for (si, shader) in self.stages.iter().enumerate() {
            let visibility = shader.stage().visibility();
            for (bi, block) in shader.reflection().uniform_blocks.iter().enumerate() {
                let dynamic = self.dynamic_blocks.iter().any(|n| n == &block.name);
                upsert(
                    &mut groups,
                    block.group,
                    block.binding,
                    visibility,
                    MergedSource::Uniform {
                        stage: si,
                        block: bi,
                        dynamic,
                    },
                );
            }
            for binding in &shader.reflection().bindings {
                let source = match binding.kind {
                    BindingKind::Texture {
                        dimension,
                        kind,
                        multisampled,
                    } => MergedSource::Texture {
                        name: binding.name.clone(),
                        dimension,
                        kind,
                        multisampled,
                    },
                    BindingKind::Sampler { comparison } => MergedSource::Sampler {
                        name: binding.name.clone(),
                        comparison,
                    },
                    BindingKind::StorageBuffer { read_only } => MergedSource::Storage {
                        name: binding.name.clone(),
                        read_only,
                    },
                };
                upsert(&mut groups, binding.group, binding.binding, visibility, source);
            }
        }

        for entries in &mut groups {
            entries.sort_by_key(|e| e.binding);
        }
        groups
    }

    fn layout_entry(&self, group: u32, merged: &MergedBinding) -> wgpu::BindGroupLayoutEntry {
        let external = self.is_external(group);
        let ty = match &merged.source {
            MergedSource::Uniform {
                stage,
                block,
                dynamic,
            } => {
                let size = self.stages[*stage].reflection().uniform_blocks[*block].size;
                debug_assert!(
                    !*dynamic || external,
                    "dynamic uniform blocks must live in an external group"
                );
                wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: *dynamic && external,
                    min_binding_size: wgpu::BufferSize::new(size as u64),
                }
            }
            MergedSource::Texture {
                name,
                dimension,
                kind,
                multisampled,
            } => {
                let sample_type = match kind {
                    TexelKind::Float => wgpu::TextureSampleType::Float {
                        filterable: self
                            .textures
                            .get(name)
                            .map(|t| t.filterable)
                            .unwrap_or(true),
                    },
                    TexelKind::Sint => wgpu::TextureSampleType::Sint,
                    TexelKind::Uint => wgpu::TextureSampleType::Uint,
                    TexelKind::Depth => wgpu::TextureSampleType::Depth,
                };
                wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension: *dimension,
                    multisampled: *multisampled,
                }
            }
            MergedSource::Sampler { comparison, .. } => wgpu::BindingType::Sampler(if *comparison {
                wgpu::SamplerBindingType::Comparison
            } else {
                wgpu::SamplerBindingType::Filtering
            }),
            MergedSource::Storage { read_only, .. } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: *read_only,
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding: merged.binding,
            visibility: merged.visibility,
            ty,
            count: None,
        }
    }

    /// Builds the bind group layouts once, one per group index, gaps
    /// included as empty layouts. Safe to call repeatedly.
    pub fn ensure_layouts(&mut self, ctx: &RenderContext) {
        if self.layouts_built {
            return;
        }
        let merged = self.merged_groups();
        self.layouts = merged
            .iter()
            .enumerate()
            .map(|(gi, entries)| {
                let entries: Vec<wgpu::BindGroupLayoutEntry> = entries
                    .iter()
                    .map(|e| self.layout_entry(gi as u32, e))
                    .collect();
                ctx.device()
                    .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                        label: Some(&format!("{} group {}", self.label, gi)),
                        entries: &entries,
                    })
            })
            .collect();
        self.layouts_built = true;
    }

    /// All group layouts. Empty until [`ShaderPipeline::ensure_layouts`]
    /// has run.
    pub fn layouts(&self) -> &[wgpu::BindGroupLayout] {
        &self.layouts
    }

    /// Layout of one group, for creating external bind groups against.
    pub fn group_layout(&self, group: u32) -> &wgpu::BindGroupLayout {
        self.layouts
            .get(group as usize)
            .expect("layouts are built on first ensure_layouts call")
    }

    /// Rebuilds the auto-assembled bind groups if any binding changed
    /// since the last call. External groups are skipped.
    ///
    /// # Errors
    /// `BindingNotFound` when a reflected texture/sampler/storage slot in
    /// an auto group has no attached resource.
    pub fn ensure_assembled(&mut self, ctx: &RenderContext) -> GfxResult<()> {
        self.ensure_layouts(ctx);
        if !self.groups_dirty {
            return Ok(());
        }

        let merged = self.merged_groups();
        let mut assemblies = Vec::new();
        for (gi, bindings) in merged.iter().enumerate() {
            let group = gi as u32;
            if self.is_external(group) || bindings.is_empty() {
                continue;
            }
            let mut entries = Vec::with_capacity(bindings.len());
            for merged_binding in bindings {
                let resource = match &merged_binding.source {
                    MergedSource::Uniform { stage, block, .. } => {
                        self.stages[*stage].block_buffer(*block).as_entire_binding()
                    }
                    MergedSource::Texture { name, .. } => wgpu::BindingResource::TextureView(
                        &self
                            .textures
                            .get(name)
                            .ok_or_else(|| GfxError::BindingNotFound { name: name.clone() })?
                            .view,
                    ),
                    MergedSource::Sampler { name, .. } => wgpu::BindingResource::Sampler(
                        self.samplers
                            .get(name)
                            .ok_or_else(|| GfxError::BindingNotFound { name: name.clone() })?,
                    ),
                    MergedSource::Storage { name, .. } => self
                        .storage_buffers
                        .get(name)
                        .ok_or_else(|| GfxError::BindingNotFound { name: name.clone() })?
                        .as_entire_binding(),
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: merged_binding.binding,
                    resource,
                });
            }
            let bind_group = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} group {}", self.label, group)),
                layout: &self.layouts[gi],
                entries: &entries,
            });
            assemblies.push(GroupAssembly {
                index: group,
                bind_group,
            });
        }

        self.assemblies = assemblies;
        self.groups_dirty = false;
        Ok(())
    }

    pub(crate) fn assemblies(&self) -> &[GroupAssembly] {
        &self.assemblies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_only_set_is_valid() {
        assert!(validate_stage_set(&[ShaderStage::Vertex]).is_ok());
        assert!(validate_stage_set(&[ShaderStage::Vertex, ShaderStage::Fragment]).is_ok());
        assert!(validate_stage_set(&[ShaderStage::Fragment, ShaderStage::Vertex]).is_ok());
    }

    #[test]
    fn test_duplicate_stage_is_rejected() {
        assert!(matches!(
            validate_stage_set(&[ShaderStage::Vertex, ShaderStage::Vertex]),
            Err(GfxError::DuplicateShaderStage { stage: "vertex" })
        ));
        assert!(matches!(
            validate_stage_set(&[
                ShaderStage::Vertex,
                ShaderStage::Fragment,
                ShaderStage::Fragment
            ]),
            Err(GfxError::DuplicateShaderStage { stage: "fragment" })
        ));
    }

    #[test]
    fn test_missing_vertex_is_rejected() {
        assert!(matches!(
            validate_stage_set(&[ShaderStage::Fragment]),
            Err(GfxError::MissingShaderStage { stage: "vertex" })
        ));
        assert!(matches!(
            validate_stage_set(&[]),
            Err(GfxError::MissingShaderStage { stage: "vertex" })
        ));
    }

    #[test]
    fn test_compute_cannot_join_a_render_pipeline() {
        assert!(matches!(
            validate_stage_set(&[ShaderStage::Vertex, ShaderStage::Compute]),
            Err(GfxError::UnsupportedShaderStage { stage: "compute" })
        ));
    }
}

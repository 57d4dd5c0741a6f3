// src/gfx/shader/shader.rs
//! Single-stage shaders
//!
//! A [`Shader`] wraps one compiled WGSL stage together with its reflected
//! uniform layout and a CPU shadow copy of every uniform block. Uniform
//! writes land in the shadow copy and are flushed to the GPU in whole-block
//! uploads by [`Shader::upload_updated_uniforms`].

use std::path::Path;

use crate::error::{GfxError, GfxResult};
use crate::gfx::context::RenderContext;

use super::reflection::{self, ShaderReflection};

/// The six stages the loader recognizes. Hull, domain and geometry have no
/// wgpu equivalent and are refused at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Hull => "hull",
            ShaderStage::Domain => "domain",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "vert" => Some(ShaderStage::Vertex),
            "hull" => Some(ShaderStage::Hull),
            "dom" => Some(ShaderStage::Domain),
            "geom" => Some(ShaderStage::Geometry),
            "frag" => Some(ShaderStage::Fragment),
            "comp" => Some(ShaderStage::Compute),
            _ => None,
        }
    }

    pub(crate) fn to_naga(self) -> Option<naga::ShaderStage> {
        match self {
            ShaderStage::Vertex => Some(naga::ShaderStage::Vertex),
            ShaderStage::Fragment => Some(naga::ShaderStage::Fragment),
            ShaderStage::Compute => Some(naga::ShaderStage::Compute),
            _ => None,
        }
    }

    pub(crate) fn visibility(self) -> wgpu::ShaderStages {
        match self {
            ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
            ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
            ShaderStage::Compute => wgpu::ShaderStages::COMPUTE,
            _ => wgpu::ShaderStages::empty(),
        }
    }
}

/// Infers the stage from a shader path: the stage extension of
/// `name.<stage>.wgsl`, or the final extension of a bare `name.<stage>`.
pub fn stage_from_path(path: &Path) -> GfxResult<ShaderStage> {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let mut parts: Vec<&str> = file_name.split('.').collect();
    if parts.last() == Some(&"wgsl") {
        parts.pop();
    }
    if parts.len() >= 2 {
        if let Some(stage) = parts.last().and_then(|ext| ShaderStage::from_extension(ext)) {
            return Ok(stage);
        }
    }
    Err(GfxError::UnknownShaderExtension {
        path: path.display().to_string(),
    })
}

struct BlockState {
    buffer: wgpu::Buffer,
    shadow: Vec<u8>,
    dirty: bool,
}

/// One compiled shader stage with reflected uniform state.
pub struct Shader {
    name: String,
    stage: ShaderStage,
    module: wgpu::ShaderModule,
    reflection: ShaderReflection,
    blocks: Vec<BlockState>,
}

impl Shader {
    /// Loads a shader from disk, inferring the stage from the extension.
    pub fn create(ctx: &RenderContext, path: impl AsRef<Path>) -> GfxResult<Self> {
        let path = path.as_ref();
        let stage = stage_from_path(path)?;
        let source = std::fs::read_to_string(path).map_err(|source| GfxError::ShaderIo {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("shader")
            .to_string();
        Self::from_source(ctx, stage, &name, &source)
    }

    /// Compiles embedded WGSL source for a known stage.
    pub fn from_source(
        ctx: &RenderContext,
        stage: ShaderStage,
        name: &str,
        source: &str,
    ) -> GfxResult<Self> {
        let naga_stage = stage
            .to_naga()
            .ok_or(GfxError::UnsupportedShaderStage { stage: stage.name() })?;

        let reflection = reflection::reflect(name, source, naga_stage)?;

        let module = ctx
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let blocks = reflection
            .uniform_blocks
            .iter()
            .map(|block| BlockState {
                buffer: ctx.device().create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{} uniforms: {}", name, block.name)),
                    size: block.size as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
                shadow: vec![0u8; block.size as usize],
                dirty: false,
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            stage,
            module,
            reflection,
            blocks,
        })
    }

    /// Stores a value into the named uniform variable's place in its
    /// block's shadow copy and marks the block for upload.
    ///
    /// # Errors
    /// * `UniformNotFound` - no flattened variable with this name
    /// * `UniformSizeExceeded` - more bytes than the variable's declared size
    pub fn update_uniform(&mut self, name: &str, data: &[u8]) -> GfxResult<()> {
        let (block_index, var) =
            self.reflection
                .find_var(name)
                .ok_or_else(|| GfxError::UniformNotFound {
                    name: name.to_string(),
                })?;
        if data.len() > var.size as usize {
            return Err(GfxError::UniformSizeExceeded {
                name: name.to_string(),
                size: data.len(),
                declared: var.size as usize,
            });
        }
        let offset = var.offset as usize;
        self.write_block(block_index, offset, data);
        Ok(())
    }

    /// Typed convenience over [`Shader::update_uniform`].
    pub fn set_uniform<T: bytemuck::Pod>(&mut self, name: &str, value: &T) -> GfxResult<()> {
        self.update_uniform(name, bytemuck::bytes_of(value))
    }

    pub(crate) fn write_block(&mut self, block_index: usize, offset: usize, data: &[u8]) {
        let block = &mut self.blocks[block_index];
        block.shadow[offset..offset + data.len()].copy_from_slice(data);
        block.dirty = true;
    }

    /// Flushes every dirty block's shadow copy to its GPU buffer in one
    /// whole-block write each; clean blocks are skipped.
    pub fn upload_updated_uniforms(&mut self, queue: &wgpu::Queue) {
        for block in &mut self.blocks {
            if block.dirty {
                queue.write_buffer(&block.buffer, 0, &block.shadow);
                block.dirty = false;
            }
        }
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.reflection.find_var(name).is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn module(&self) -> &wgpu::ShaderModule {
        &self.module
    }

    pub fn entry_point(&self) -> &str {
        &self.reflection.entry_point
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub(crate) fn block_buffer(&self, index: usize) -> &wgpu::Buffer {
        &self.blocks[index].buffer
    }

    /// Workgroup size of a compute entry point.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.reflection.workgroup_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_dispatch_by_extension() {
        let stage = |p: &str| stage_from_path(Path::new(p));

        assert_eq!(stage("mesh.vert").unwrap(), ShaderStage::Vertex);
        assert_eq!(stage("mesh.frag").unwrap(), ShaderStage::Fragment);
        assert_eq!(stage("particles.comp").unwrap(), ShaderStage::Compute);
        assert_eq!(stage("patch.hull").unwrap(), ShaderStage::Hull);
        assert_eq!(stage("patch.dom").unwrap(), ShaderStage::Domain);
        assert_eq!(stage("wireframe.geom").unwrap(), ShaderStage::Geometry);
    }

    #[test]
    fn test_stage_dispatch_with_wgsl_suffix() {
        let stage = |p: &str| stage_from_path(Path::new(p));

        assert_eq!(stage("mesh.vert.wgsl").unwrap(), ShaderStage::Vertex);
        assert_eq!(stage("shaders/deep/light.frag.wgsl").unwrap(), ShaderStage::Fragment);
        assert_eq!(stage("fx.comp.wgsl").unwrap(), ShaderStage::Compute);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        for path in ["mesh", "mesh.wgsl", "mesh.hlsl", "mesh.spv", ".wgsl"] {
            assert!(
                matches!(
                    stage_from_path(Path::new(path)),
                    Err(GfxError::UnknownShaderExtension { .. })
                ),
                "{path} must not resolve to a stage"
            );
        }
    }

    #[test]
    fn test_unsupported_stages_named() {
        assert_eq!(ShaderStage::Hull.to_naga(), None);
        assert_eq!(ShaderStage::Domain.to_naga(), None);
        assert_eq!(ShaderStage::Geometry.to_naga(), None);
        assert_eq!(ShaderStage::Vertex.to_naga(), Some(naga::ShaderStage::Vertex));
    }
}

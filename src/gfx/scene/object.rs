//! # Meshes and Mesh Instances
//!
//! [`Mesh`] owns vertex/index data with lazily uploaded GPU buffers.
//! [`MeshInstance`] places a mesh in the scene with a transform, material
//! slot and a per-object uniform carrying the model matrices.

use wgpu::util::DeviceExt;

use crate::gfx::geometry::GeometryData;

use super::transform::Transform;
use super::vertex::Vertex3D;

pub struct Mesh {
    vertices: Vec<Vertex3D>,
    indices: Vec<u32>,
    vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
    index_count: u32,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex3D>, indices: Vec<u32>) -> Self {
        let index_count = indices.len() as u32;
        Self {
            vertices,
            indices,
            vertex_buffer: None,
            index_buffer: None,
            index_count,
        }
    }

    pub fn from_geometry(data: &GeometryData) -> Self {
        let (vertices, indices) = data.to_scene_format();
        Self::new(vertices, indices)
    }

    /// Creates the GPU buffers on first call; later calls are no-ops.
    pub fn upload(&mut self, device: &wgpu::Device) {
        if self.vertex_buffer.is_some() {
            return;
        }
        self.vertex_buffer = Some(device.create_buffer_init(
            &wgpu::util::BufferInitDescriptor {
                label: Some("mesh vertex buffer"),
                contents: bytemuck::cast_slice(&self.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            },
        ));
        self.index_buffer = Some(device.create_buffer_init(
            &wgpu::util::BufferInitDescriptor {
                label: Some("mesh index buffer"),
                contents: bytemuck::cast_slice(&self.indices),
                usage: wgpu::BufferUsages::INDEX,
            },
        ));
    }

    pub fn vertex_buffer(&self) -> Option<&wgpu::Buffer> {
        self.vertex_buffer.as_ref()
    }

    pub fn index_buffer(&self) -> Option<&wgpu::Buffer> {
        self.index_buffer.as_ref()
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Per-object uniform block: model matrix and its inverse transpose.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct ObjectUniform {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
}

struct InstanceGpu {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

/// One drawable placement of a mesh.
pub struct MeshInstance {
    pub name: String,
    pub mesh: Mesh,
    pub transform: Transform,
    /// Index into the scene's material manager.
    pub material_index: usize,
    pub enabled: bool,
    pub casts_shadows: bool,
    gpu: Option<InstanceGpu>,
}

impl MeshInstance {
    pub fn new(mesh: Mesh) -> Self {
        Self {
            name: "object".to_string(),
            mesh,
            transform: Transform::new(),
            material_index: 0,
            enabled: true,
            casts_shadows: true,
            gpu: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_material(mut self, material_index: usize) -> Self {
        self.material_index = material_index;
        self
    }

    /// Creates the transform uniform and its bind group on first call.
    /// `layout` is the geometry pipeline's per-object group layout.
    pub(crate) fn ensure_gpu(&mut self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout) {
        if self.gpu.is_some() {
            return;
        }
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} transform", self.name)),
            size: std::mem::size_of::<ObjectUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} transform", self.name)),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        self.gpu = Some(InstanceGpu { buffer, bind_group });
    }

    /// Writes the current transform matrices into the per-object uniform.
    pub(crate) fn write_transform(&self, queue: &wgpu::Queue) {
        if let Some(gpu) = &self.gpu {
            let uniform = ObjectUniform {
                model: self.transform.model().into(),
                normal_matrix: self.transform.normal_matrix().into(),
            };
            queue.write_buffer(&gpu.buffer, 0, bytemuck::bytes_of(&uniform));
        }
    }

    pub(crate) fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.gpu.as_ref().map(|gpu| &gpu.bind_group)
    }
}

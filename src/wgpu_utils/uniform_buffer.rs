// src/wgpu_utils/uniform_buffer.rs
//! Typed GPU buffer wrappers
//!
//! [`UniformBuffer`] holds one `Pod` value, [`ArrayBuffer`] a contiguous
//! run of them, [`DynamicUniformArena`] many per-draw values selected with
//! dynamic offsets from a single bind group.

use std::marker::PhantomData;

/// Single-value uniform buffer with change detection on upload.
pub struct UniformBuffer<Content> {
    buffer: wgpu::Buffer,
    content_type: PhantomData<Content>,
    previous_content: Vec<u8>,
}

impl<Content: bytemuck::Pod> UniformBuffer<Content> {
    fn name() -> &'static str {
        let type_name = std::any::type_name::<Content>();
        let pos = type_name.rfind(':').unwrap_or(0);
        if pos > 0 {
            &type_name[(pos + 1)..]
        } else {
            type_name
        }
    }

    pub fn new(device: &wgpu::Device) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("UniformBuffer: {}", Self::name())),
            size: std::mem::size_of::<Content>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        UniformBuffer {
            buffer,
            content_type: PhantomData,
            previous_content: Vec::new(),
        }
    }

    pub fn new_with_data(device: &wgpu::Device, initial_content: &Content) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("UniformBuffer: {}", Self::name())),
            size: std::mem::size_of::<Content>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: true,
        });

        buffer
            .slice(..)
            .get_mapped_range_mut()
            .clone_from_slice(bytemuck::bytes_of(initial_content));
        buffer.unmap();

        UniformBuffer {
            buffer,
            content_type: PhantomData,
            previous_content: bytemuck::bytes_of(initial_content).to_vec(),
        }
    }

    /// Writes the value, skipping the upload when it matches the last one.
    pub fn update_content(&mut self, queue: &wgpu::Queue, content: Content) {
        let new_content = bytemuck::bytes_of(&content);
        if self.previous_content == new_content {
            return;
        }
        queue.write_buffer(&self.buffer, 0, new_content);
        self.previous_content = new_content.to_vec();
    }

    pub fn binding_resource(&self) -> wgpu::BindingResource {
        self.buffer.as_entire_binding()
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.buffer.size()
    }
}

/// Storage (or staging) buffer holding a run of `Content` values.
pub struct ArrayBuffer<Content> {
    buffer: wgpu::Buffer,
    content_type: PhantomData<Content>,
    capacity: usize,
    current_size: usize,
}

impl<Content: bytemuck::Pod> ArrayBuffer<Content> {
    fn name() -> &'static str {
        let type_name = std::any::type_name::<Content>();
        let pos = type_name.rfind(':').unwrap_or(0);
        if pos > 0 {
            &type_name[(pos + 1)..]
        } else {
            type_name
        }
    }

    pub fn new(device: &wgpu::Device, capacity: usize, read_only: bool) -> Self {
        let usage = if read_only {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
        } else {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
        };

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("ArrayBuffer<{}>", Self::name())),
            size: (capacity * std::mem::size_of::<Content>()) as u64,
            usage,
            mapped_at_creation: false,
        });

        ArrayBuffer {
            buffer,
            content_type: PhantomData,
            capacity,
            current_size: 0,
        }
    }

    /// Mappable buffer for reading GPU results back on the CPU.
    pub fn new_staging(device: &wgpu::Device, capacity: usize) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("StagingBuffer<{}>", Self::name())),
            size: (capacity * std::mem::size_of::<Content>()) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        ArrayBuffer {
            buffer,
            content_type: PhantomData,
            capacity,
            current_size: capacity,
        }
    }

    pub fn new_with_data(device: &wgpu::Device, data: &[Content], read_only: bool) -> Self {
        let usage = if read_only {
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
        } else {
            wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC
        };

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("ArrayBuffer<{}>", Self::name())),
            size: (data.len() * std::mem::size_of::<Content>()) as u64,
            usage,
            mapped_at_creation: true,
        });

        buffer
            .slice(..)
            .get_mapped_range_mut()
            .clone_from_slice(bytemuck::cast_slice(data));
        buffer.unmap();

        ArrayBuffer {
            buffer,
            content_type: PhantomData,
            capacity: data.len(),
            current_size: data.len(),
        }
    }

    pub fn update_data(&mut self, queue: &wgpu::Queue, data: &[Content]) {
        assert!(data.len() <= self.capacity, "Data exceeds buffer capacity");
        queue.write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
        self.current_size = data.len();
    }

    pub fn binding_resource(&self) -> wgpu::BindingResource {
        self.buffer.as_entire_binding()
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.current_size
    }

    pub fn is_empty(&self) -> bool {
        self.current_size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Per-draw uniform slices in one buffer, addressed with dynamic offsets.
///
/// `write_buffer` mid-pass cannot re-version a buffer between draws, so
/// values that vary per draw call are staged up front and selected with
/// `set_bind_group` offsets instead.
pub struct DynamicUniformArena<Content> {
    buffer: wgpu::Buffer,
    staging: Vec<u8>,
    stride: u64,
    capacity: u32,
    len: u32,
    content_type: PhantomData<Content>,
}

impl<Content: bytemuck::Pod> DynamicUniformArena<Content> {
    fn name() -> &'static str {
        let type_name = std::any::type_name::<Content>();
        let pos = type_name.rfind(':').unwrap_or(0);
        if pos > 0 {
            &type_name[(pos + 1)..]
        } else {
            type_name
        }
    }

    pub fn new(device: &wgpu::Device, capacity: u32) -> Self {
        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let stride = (std::mem::size_of::<Content>() as u64).next_multiple_of(align);

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("DynamicUniformArena<{}>", Self::name())),
            size: stride * capacity as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        DynamicUniformArena {
            buffer,
            staging: vec![0u8; (stride * capacity as u64) as usize],
            stride,
            capacity,
            len: 0,
            content_type: PhantomData,
        }
    }

    /// Clears staged values for a new frame.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Stages one value and returns the dynamic offset that selects it.
    pub fn push(&mut self, content: Content) -> u32 {
        assert!(self.len < self.capacity, "Arena exceeds its capacity");
        let offset = self.stride * self.len as u64;
        let bytes = bytemuck::bytes_of(&content);
        self.staging[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        self.len += 1;
        offset as u32
    }

    /// Uploads everything staged since the last `reset` in one write.
    pub fn upload(&self, queue: &wgpu::Queue) {
        if self.len == 0 {
            return;
        }
        let used = (self.stride * self.len as u64) as usize;
        queue.write_buffer(&self.buffer, 0, &self.staging[..used]);
    }

    /// Binding resource sized to one element; pair with a dynamic-offset
    /// layout entry.
    pub fn binding_resource(&self) -> wgpu::BindingResource {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: wgpu::BufferSize::new(std::mem::size_of::<Content>() as u64),
        })
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// src/gfx/context.rs
//! Shared GPU context
//!
//! One [`RenderContext`] per graphics core, threaded by reference through
//! every resource constructor and render pass. Holds the device/queue pair
//! and the identity of the pipeline most recently made current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{GfxError, GfxResult};

/// Identity token for a [`ShaderPipeline`](crate::gfx::shader::ShaderPipeline).
///
/// Tokens are unique per process; the context stores the current one so
/// passes can assert they are drawing with the pipeline they bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineId(u64);

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

impl PipelineId {
    pub(crate) fn next() -> Self {
        PipelineId(NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Device, queue and per-frame pipeline state for one graphics core.
pub struct RenderContext {
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    current_pipeline: Option<PipelineId>,
}

impl RenderContext {
    /// Requests an adapter and device and wraps them in a context.
    ///
    /// `compatible_surface` narrows adapter selection when the core will
    /// feed a window; headless callers pass `None`.
    pub async fn new(
        instance: &wgpu::Instance,
        compatible_surface: Option<&wgpu::Surface<'_>>,
    ) -> GfxResult<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface,
                force_fallback_adapter: false,
            })
            .await
            .map_err(GfxError::AdapterRequest)?;

        log::info!("adapter: {}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("peat device"),
                // Additive light accumulation blends into an rgba32float
                // target, and the geometry pass writes 64 bytes per sample
                // across its seven attachments.
                required_features: wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
                required_limits: wgpu::Limits {
                    max_color_attachment_bytes_per_sample: 64,
                    ..wgpu::Limits::default()
                },
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self {
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            current_pipeline: None,
        })
    }

    /// Adapter the device was created from. The application shell asks it
    /// for surface capabilities when configuring the swapchain.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn device_arc(&self) -> Arc<wgpu::Device> {
        self.device.clone()
    }

    pub fn queue_arc(&self) -> Arc<wgpu::Queue> {
        self.queue.clone()
    }

    /// Pipeline most recently activated through
    /// [`ShaderPipeline::use_pipeline`](crate::gfx::shader::ShaderPipeline::use_pipeline).
    pub fn current_pipeline(&self) -> Option<PipelineId> {
        self.current_pipeline
    }

    /// Drops any recorded pipeline state. Activation always goes through
    /// here first so a new pipeline starts from a clean slate.
    pub fn clear_current_pipeline(&mut self) {
        self.current_pipeline = None;
    }

    pub(crate) fn set_current_pipeline(&mut self, id: PipelineId) {
        self.current_pipeline = Some(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_ids_unique() {
        let a = PipelineId::next();
        let b = PipelineId::next();
        assert_ne!(a, b);
    }
}

// src/gfx/resources/sampler.rs
//! Sampler objects
//!
//! Samplers are immutable once created; the few configurations the
//! pipeline needs are exposed as presets.

use crate::gfx::context::RenderContext;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    pub mag_filter: wgpu::FilterMode,
    pub min_filter: wgpu::FilterMode,
    pub address_mode: wgpu::AddressMode,
    pub compare: Option<wgpu::CompareFunction>,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            address_mode: wgpu::AddressMode::ClampToEdge,
            compare: None,
        }
    }
}

impl SamplerDesc {
    pub fn linear_clamp() -> Self {
        Self::default()
    }

    pub fn linear_wrap() -> Self {
        Self {
            address_mode: wgpu::AddressMode::Repeat,
            ..Self::default()
        }
    }

    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Self::default()
        }
    }

    /// Comparison sampler for shadow map lookups.
    pub fn shadow_compare() -> Self {
        Self {
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Self::default()
        }
    }
}

pub struct Sampler {
    sampler: wgpu::Sampler,
    desc: SamplerDesc,
}

impl Sampler {
    pub fn create(ctx: &RenderContext, desc: SamplerDesc, label: &str) -> Self {
        let sampler = ctx.device().create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: desc.address_mode,
            address_mode_v: desc.address_mode,
            address_mode_w: desc.address_mode,
            mag_filter: desc.mag_filter,
            min_filter: desc.min_filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            compare: desc.compare,
            lod_min_clamp: 0.0,
            lod_max_clamp: 100.0,
            ..Default::default()
        });

        Self { sampler, desc }
    }

    pub fn raw(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    pub fn is_comparison(&self) -> bool {
        self.desc.compare.is_some()
    }
}

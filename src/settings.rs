// src/settings.rs
//! Engine configuration
//!
//! Plain values consumed by the graphics core and the application shell.
//! Everything has a sensible default; builder methods cover the common
//! overrides.

use std::time::Duration;

/// Tunables for the renderer and the frame loop.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Clear color for the frame buffers (linear RGBA).
    pub background: [f64; 4],
    /// Upper bound on the render loop rate.
    pub frame_cap_hz: u32,
    /// Fixed simulation step rate.
    pub fixed_timestep_hz: u32,
    /// Side length of each directional shadow cascade map.
    pub shadow_map_size: u32,
    /// Blur iterations in the bloom chain.
    pub bloom_passes: u32,
    /// Luminance cutoff for the bloom bright pass.
    pub bloom_threshold: f32,
    /// Deadline for the post-submit GPU wait. The wait polls and yields
    /// until the submitted work signals completion or this much time has
    /// passed, whichever comes first.
    pub gpu_sync_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            background: [0.02, 0.02, 0.025, 1.0],
            frame_cap_hz: 144,
            fixed_timestep_hz: 60,
            shadow_map_size: 2048,
            bloom_passes: 4,
            bloom_threshold: 1.0,
            gpu_sync_timeout: Duration::from_secs(2),
        }
    }
}

impl EngineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: Set the clear color
    pub fn with_background(mut self, r: f64, g: f64, b: f64, a: f64) -> Self {
        self.background = [r, g, b, a];
        self
    }

    /// Builder pattern: Set the frame rate cap
    pub fn with_frame_cap(mut self, hz: u32) -> Self {
        self.frame_cap_hz = hz.max(1);
        self
    }

    /// Builder pattern: Set the shadow map resolution
    pub fn with_shadow_map_size(mut self, size: u32) -> Self {
        self.shadow_map_size = size.max(1);
        self
    }

    /// Builder pattern: Set the bloom blur iteration count
    pub fn with_bloom_passes(mut self, passes: u32) -> Self {
        self.bloom_passes = passes;
        self
    }

    /// Builder pattern: Set the bloom brightness cutoff
    pub fn with_bloom_threshold(mut self, threshold: f32) -> Self {
        self.bloom_threshold = threshold.max(0.0);
        self
    }

    /// Builder pattern: Set the GPU sync deadline
    pub fn with_gpu_sync_timeout(mut self, timeout: Duration) -> Self {
        self.gpu_sync_timeout = timeout;
        self
    }
}

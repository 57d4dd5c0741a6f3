//! GPU particle simulation
//!
//! A fixed pool of particles living entirely in a storage buffer. Every
//! update runs the configured effects, then integration and energy
//! decay, then a bitonic sort that packs live particles into the front
//! slots, and finally reads the live count back through a staging
//! buffer. One GPU round trip per update is the accepted price for an
//! exact draw count.

use futures::channel::oneshot;
use rand::Rng;
use wgpu::util::DeviceExt;

use crate::error::{GfxError, GfxResult};
use crate::gfx::context::RenderContext;
use crate::gfx::scene::Transform;
use crate::wgpu_utils::{ArrayBuffer, DynamicUniformArena};

use super::effects::ParticleEffect;

pub(crate) const WORKGROUP_SIZE: u32 = 64;

const INIT_SHADER: &str = include_str!("shaders/particle_init.comp.wgsl");
const FOUNTAIN_SHADER: &str = include_str!("shaders/particle_fountain.comp.wgsl");
const FORCE_SHADER: &str = include_str!("shaders/particle_force.comp.wgsl");
const DECAY_SHADER: &str = include_str!("shaders/particle_decay.comp.wgsl");
const SORT_SHADER: &str = include_str!("shaders/particle_sort.comp.wgsl");

/// One particle as the GPU sees it.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Particle {
    pub position: [f32; 3],
    /// Lifetime and intensity in one: dead at or below zero.
    pub energy: f32,
    pub velocity: [f32; 3],
    pub pad: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FountainUniform {
    origin: [f32; 4],
    direction: [f32; 4],
    params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct ForceUniform {
    force: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct DecayUniform {
    params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SortStep {
    k: u32,
    j: u32,
    _pad: [u32; 2],
}

/// Rounds a requested capacity up to the next power of two. Zero is
/// rejected, as is anything the smear cannot represent in 32 bits.
pub fn effective_capacity(requested: u32) -> GfxResult<u32> {
    if requested == 0 || requested > 1 << 31 {
        return Err(GfxError::OutOfRange {
            what: "particle capacity",
        });
    }
    let mut v = requested - 1;
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    Ok(v + 1)
}

/// The full bitonic ladder for a power-of-two element count: outer
/// sub-array size doubling, inner compare distance halving.
fn sort_ladder(capacity: u32) -> Vec<(u32, u32)> {
    let mut steps = Vec::new();
    let mut k = 2;
    while k <= capacity {
        let mut j = k / 2;
        while j > 0 {
            steps.push((k, j));
            j /= 2;
        }
        k *= 2;
    }
    steps
}

struct EffectGpu {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    params: wgpu::Buffer,
}

struct ParticleGpu {
    particles: wgpu::Buffer,
    counter: wgpu::Buffer,
    staging: ArrayBuffer<u32>,
    seeds: wgpu::Buffer,
    effects: Vec<EffectGpu>,
    effects_built: usize,
    decay_pipeline: wgpu::ComputePipeline,
    decay_group: wgpu::BindGroup,
    decay_params: wgpu::Buffer,
    sort_pipeline: wgpu::ComputePipeline,
    sort_data_group: wgpu::BindGroup,
    sort_step_group: wgpu::BindGroup,
    sort_arena: DynamicUniformArena<SortStep>,
}

/// A GPU-simulated particle pool, drawn as billboards by the geometry
/// pass.
pub struct ParticleSystem {
    pub name: String,
    pub transform: Transform,
    pub enabled: bool,
    /// Energy drained per second; 1.0 / decay is a particle's lifetime.
    pub energy_decay: f32,
    capacity: u32,
    effects: Vec<ParticleEffect>,
    gpu: Option<ParticleGpu>,
    live_count: u32,
    frame: u32,
}

impl ParticleSystem {
    /// `max_particles` is rounded up to the next power of two.
    pub fn new(name: &str, max_particles: u32) -> GfxResult<Self> {
        Ok(Self {
            name: name.to_string(),
            transform: Transform::new(),
            enabled: true,
            energy_decay: 0.4,
            capacity: effective_capacity(max_particles)?,
            effects: Vec::new(),
            gpu: None,
            live_count: 0,
            frame: 0,
        })
    }

    /// Effective (rounded) capacity.
    pub fn max_particles(&self) -> u32 {
        self.capacity
    }

    /// Re-rounds the capacity; GPU buffers are rebuilt on the next
    /// update.
    pub fn set_max_particles(&mut self, requested: u32) -> GfxResult<()> {
        self.capacity = effective_capacity(requested)?;
        self.gpu = None;
        self.live_count = 0;
        Ok(())
    }

    pub fn add_effect(&mut self, effect: ParticleEffect) -> &mut Self {
        self.effects.push(effect);
        self
    }

    /// Live particles after the most recent update; doubles as the
    /// instance count for the billboard draw.
    pub fn live_count(&self) -> u32 {
        self.live_count
    }

    pub(crate) fn particle_buffer(&self) -> Option<&wgpu::Buffer> {
        self.gpu.as_ref().map(|gpu| &gpu.particles)
    }

    fn workgroups(&self) -> u32 {
        self.capacity.div_ceil(WORKGROUP_SIZE)
    }

    /// Runs one simulation step and refreshes the live count.
    pub fn update(&mut self, ctx: &RenderContext, dt: f32) -> GfxResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.ensure_gpu(ctx)?;
        self.frame = self.frame.wrapping_add(1);

        let origin = self.transform.position();
        let frame = self.frame;
        let energy_decay = self.energy_decay;
        let workgroups = self.workgroups();
        let capacity = self.capacity;
        let gpu = self.gpu.as_mut().expect("allocated above");

        // Per-effect parameters for this step
        for (effect, slot) in self.effects.iter().zip(gpu.effects.iter()) {
            match effect {
                ParticleEffect::Fountain(fountain) => {
                    let uniform = FountainUniform {
                        origin: [origin.x, origin.y, origin.z, 0.0],
                        direction: [
                            fountain.direction.x,
                            fountain.direction.y,
                            fountain.direction.z,
                            fountain.spread,
                        ],
                        params: [fountain.speed, fountain.spawn_rate, dt, frame as f32],
                    };
                    ctx.queue()
                        .write_buffer(&slot.params, 0, bytemuck::bytes_of(&uniform));
                }
                ParticleEffect::Force(force) => {
                    let uniform = ForceUniform {
                        force: [
                            force.acceleration.x,
                            force.acceleration.y,
                            force.acceleration.z,
                            dt,
                        ],
                    };
                    ctx.queue()
                        .write_buffer(&slot.params, 0, bytemuck::bytes_of(&uniform));
                }
            }
        }

        let decay = DecayUniform {
            params: [dt, energy_decay, 0.0, 0.0],
        };
        ctx.queue()
            .write_buffer(&gpu.decay_params, 0, bytemuck::bytes_of(&decay));

        // The decay pass re-tallies from zero
        ctx.queue().write_buffer(&gpu.counter, 0, &[0u8; 4]);

        gpu.sort_arena.reset();
        let offsets: Vec<u32> = sort_ladder(capacity)
            .into_iter()
            .map(|(k, j)| gpu.sort_arena.push(SortStep { k, j, _pad: [0; 2] }))
            .collect();
        gpu.sort_arena.upload(ctx.queue());

        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("particle update"),
            });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("particle simulate"),
                timestamp_writes: None,
            });
            for slot in &gpu.effects {
                pass.set_pipeline(&slot.pipeline);
                pass.set_bind_group(0, &slot.bind_group, &[]);
                pass.dispatch_workgroups(workgroups, 1, 1);
            }
            pass.set_pipeline(&gpu.decay_pipeline);
            pass.set_bind_group(0, &gpu.decay_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("particle sort"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&gpu.sort_pipeline);
            pass.set_bind_group(0, &gpu.sort_data_group, &[]);
            for offset in offsets {
                pass.set_bind_group(1, &gpu.sort_step_group, &[offset]);
                pass.dispatch_workgroups(workgroups, 1, 1);
            }
        }

        encoder.copy_buffer_to_buffer(&gpu.counter, 0, gpu.staging.buffer(), 0, 4);
        ctx.queue().submit(std::iter::once(encoder.finish()));

        self.live_count = Self::read_live_count(ctx, &gpu.staging)?.min(capacity);
        log::trace!("particle system '{}': {} live", self.name, self.live_count);
        Ok(())
    }

    /// Blocking staging-buffer map. One round trip per update, by
    /// design: the draw call needs an exact instance count.
    fn read_live_count(ctx: &RenderContext, staging: &ArrayBuffer<u32>) -> GfxResult<u32> {
        let slice = staging.buffer().slice(..);
        let (tx, rx) = oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        ctx.device()
            .poll(wgpu::PollType::Wait)
            .map_err(|_| GfxError::Readback {
                what: "particle live count",
            })?;

        match futures::executor::block_on(rx) {
            Ok(Ok(())) => {
                let count = {
                    let mapped = slice.get_mapped_range();
                    bytemuck::cast_slice::<u8, u32>(&mapped)[0]
                };
                staging.buffer().unmap();
                Ok(count)
            }
            _ => Err(GfxError::Readback {
                what: "particle live count",
            }),
        }
    }

    fn ensure_gpu(&mut self, ctx: &RenderContext) -> GfxResult<()> {
        if let Some(gpu) = &self.gpu {
            if gpu.effects_built == self.effects.len() {
                return Ok(());
            }
        }
        if self.gpu.is_none() {
            self.allocate(ctx)?;
        }
        self.rebuild_effects(ctx);
        Ok(())
    }

    fn allocate(&mut self, ctx: &RenderContext) -> GfxResult<()> {
        let device = ctx.device();
        let capacity = self.capacity;
        let workgroups = self.workgroups();

        let particles = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} particles", self.name)),
            size: capacity as u64 * std::mem::size_of::<Particle>() as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        let counter = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} live counter", self.name)),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging = ArrayBuffer::<u32>::new_staging(device, 1);

        // One seed per workgroup; invocations hash in their own index
        let mut rng = rand::rng();
        let seeds: Vec<u32> = (0..workgroups).map(|_| rng.random()).collect();
        let seeds = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} rng seeds", self.name)),
            contents: bytemuck::cast_slice(&seeds),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let decay_pipeline = compute_pipeline(device, "particle decay", DECAY_SHADER);
        let decay_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{} decay params", self.name)),
            size: std::mem::size_of::<DecayUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let decay_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particle decay"),
            layout: &decay_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: particles.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: counter.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: decay_params.as_entire_binding(),
                },
            ],
        });

        // The sort's step block takes a dynamic offset, which an
        // auto-derived layout never carries, so this one is explicit.
        let sort_data_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("particle sort data"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let sort_step_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("particle sort step"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<SortStep>() as u64
                    ),
                },
                count: None,
            }],
        });
        let sort_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("particle sort"),
            bind_group_layouts: &[&sort_data_layout, &sort_step_layout],
            push_constant_ranges: &[],
        });
        let sort_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("particle sort"),
            source: wgpu::ShaderSource::Wgsl(SORT_SHADER.into()),
        });
        let sort_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("particle sort"),
            layout: Some(&sort_layout),
            module: &sort_module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let ladder_len = sort_ladder(capacity).len().max(1) as u32;
        let sort_arena = DynamicUniformArena::<SortStep>::new(device, ladder_len);
        let sort_data_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particle sort data"),
            layout: &sort_data_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: particles.as_entire_binding(),
            }],
        });
        let sort_step_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particle sort step"),
            layout: &sort_step_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: sort_arena.binding_resource(),
            }],
        });

        // Seed every slot dead before the first effect runs
        let init_pipeline = compute_pipeline(device, "particle init", INIT_SHADER);
        let init_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("particle init"),
            layout: &init_pipeline.get_bind_group_layout(0),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: particles.as_entire_binding(),
            }],
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("particle init"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("particle init"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&init_pipeline);
            pass.set_bind_group(0, &init_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }
        ctx.queue().submit(std::iter::once(encoder.finish()));

        log::debug!(
            "particle system '{}': allocated {} slots, {} workgroups",
            self.name,
            capacity,
            workgroups
        );

        self.gpu = Some(ParticleGpu {
            particles,
            counter,
            staging,
            seeds,
            effects: Vec::new(),
            effects_built: 0,
            decay_pipeline,
            decay_group,
            decay_params,
            sort_pipeline,
            sort_data_group,
            sort_step_group,
            sort_arena,
        });
        Ok(())
    }

    fn rebuild_effects(&mut self, ctx: &RenderContext) {
        let device = ctx.device();
        let gpu = self.gpu.as_mut().expect("allocated before effects");
        gpu.effects.clear();

        for (index, effect) in self.effects.iter().enumerate() {
            let slot = match effect {
                ParticleEffect::Fountain(_) => {
                    let pipeline =
                        compute_pipeline(device, "particle fountain", FOUNTAIN_SHADER);
                    let params = device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(&format!("{} fountain params {}", self.name, index)),
                        size: std::mem::size_of::<FountainUniform>() as u64,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
                    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("particle fountain"),
                        layout: &pipeline.get_bind_group_layout(0),
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: gpu.particles.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: gpu.seeds.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 2,
                                resource: params.as_entire_binding(),
                            },
                        ],
                    });
                    EffectGpu {
                        pipeline,
                        bind_group,
                        params,
                    }
                }
                ParticleEffect::Force(_) => {
                    let pipeline = compute_pipeline(device, "particle force", FORCE_SHADER);
                    let params = device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(&format!("{} force params {}", self.name, index)),
                        size: std::mem::size_of::<ForceUniform>() as u64,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
                    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("particle force"),
                        layout: &pipeline.get_bind_group_layout(0),
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: gpu.particles.as_entire_binding(),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: params.as_entire_binding(),
                            },
                        ],
                    });
                    EffectGpu {
                        pipeline,
                        bind_group,
                        params,
                    }
                }
            };
            gpu.effects.push(slot);
        }
        gpu.effects_built = self.effects.len();
    }

    /// Releases all GPU state; buffers come back on the next update.
    pub fn dispose(&mut self) {
        self.gpu = None;
        self.live_count = 0;
    }
}

fn compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: None,
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::particles::effects::FountainEmitter;
    use crate::gfx::test_support::test_context;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(effective_capacity(100).unwrap(), 128);
        assert_eq!(effective_capacity(128).unwrap(), 128);
        assert_eq!(effective_capacity(1).unwrap(), 1);
        assert_eq!(effective_capacity(129).unwrap(), 256);
    }

    #[test]
    fn test_capacity_zero_fails() {
        assert!(effective_capacity(0).is_err());
    }

    #[test]
    fn test_particle_is_gpu_sized() {
        assert_eq!(std::mem::size_of::<Particle>(), 32);
    }

    #[test]
    fn test_sort_ladder_shape() {
        let steps = sort_ladder(8);
        // log2(8) = 3 rounds, 1 + 2 + 3 compare distances
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[0], (2, 1));
        assert_eq!(steps[5], (8, 1));
        assert!(sort_ladder(1).is_empty());
    }

    #[test]
    fn test_fountain_fills_pool() {
        let Some(ctx) = test_context() else {
            return;
        };
        let mut system = ParticleSystem::new("test", 64).unwrap();
        let mut fountain = FountainEmitter::default();
        fountain.spawn_rate = 1.0;
        system.add_effect(ParticleEffect::Fountain(fountain));

        // dt of zero spawns without draining any energy
        system.update(&ctx, 0.0).unwrap();
        assert_eq!(system.live_count(), 64);
    }

    #[test]
    fn test_disabled_system_skips_allocation() {
        let Some(ctx) = test_context() else {
            return;
        };
        let mut system = ParticleSystem::new("idle", 16).unwrap();
        system.enabled = false;
        system.update(&ctx, 0.016).unwrap();
        assert!(system.particle_buffer().is_none());
    }
}

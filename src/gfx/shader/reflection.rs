// src/gfx/shader/reflection.rs
//! WGSL reflection
//!
//! Parses and validates shader source through naga, then extracts the
//! layout information the pipeline layer works from: uniform blocks
//! flattened into named variables with byte offsets, and named
//! texture/sampler/storage bindings with their group and binding slots.
//!
//! Flattening follows member paths without the block name: a struct member
//! `light` with field `color` reflects as `light.color`, an array member
//! `cascades` as `cascades[0]`, `cascades[1]`, ... at the array stride.

use naga::proc::Layouter;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::{GfxError, GfxResult};

/// One flattened uniform variable inside a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformVar {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// One `var<uniform>` global: a GPU buffer slot plus its flattened layout.
#[derive(Clone, Debug)]
pub struct UniformBlock {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub size: u32,
    pub vars: Vec<UniformVar>,
}

impl UniformBlock {
    pub fn find_var(&self, name: &str) -> Option<&UniformVar> {
        self.vars.iter().find(|v| v.name == name)
    }
}

/// Scalar interpretation of a sampled texture binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TexelKind {
    Float,
    Sint,
    Uint,
    Depth,
}

/// What a non-uniform binding is, as declared in the shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    Texture {
        dimension: wgpu::TextureViewDimension,
        kind: TexelKind,
        multisampled: bool,
    },
    Sampler {
        comparison: bool,
    },
    StorageBuffer {
        read_only: bool,
    },
}

/// A named texture/sampler/storage slot.
#[derive(Clone, Debug)]
pub struct ShaderBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
}

/// Everything the rest of the crate needs to know about one shader stage.
#[derive(Debug)]
pub struct ShaderReflection {
    pub entry_point: String,
    pub workgroup_size: [u32; 3],
    pub uniform_blocks: Vec<UniformBlock>,
    pub bindings: Vec<ShaderBinding>,
}

impl ShaderReflection {
    /// Locates a flattened variable across all blocks, in declaration
    /// order.
    pub fn find_var(&self, name: &str) -> Option<(usize, &UniformVar)> {
        self.uniform_blocks
            .iter()
            .enumerate()
            .find_map(|(i, block)| block.find_var(name).map(|v| (i, v)))
    }

    pub fn find_binding(&self, name: &str) -> Option<&ShaderBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

/// Parses, validates and reflects one WGSL module, expecting an entry
/// point for `stage`.
pub fn reflect(
    name: &str,
    source: &str,
    stage: naga::ShaderStage,
) -> GfxResult<ShaderReflection> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| {
        let detail = err.emit_to_string(source);
        log::error!("shader '{}' parse failed:\n{}", name, detail);
        GfxError::ShaderCompilation {
            name: name.to_string(),
            detail,
        }
    })?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator.validate(&module).map_err(|err| {
        let detail = err.into_inner().to_string();
        log::error!("shader '{}' validation failed: {}", name, detail);
        GfxError::ShaderCompilation {
            name: name.to_string(),
            detail,
        }
    })?;

    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage)
        .ok_or_else(|| {
            let detail = format!("no {:?} entry point", stage);
            log::error!("shader '{}': {}", name, detail);
            GfxError::ShaderCompilation {
                name: name.to_string(),
                detail,
            }
        })?;

    let mut layouter = Layouter::default();
    layouter
        .update(module.to_ctx())
        .map_err(|err| GfxError::ShaderCompilation {
            name: name.to_string(),
            detail: err.to_string(),
        })?;

    let mut uniform_blocks = Vec::new();
    let mut bindings = Vec::new();

    for (_, global) in module.global_variables.iter() {
        let Some(res) = &global.binding else {
            continue;
        };
        let global_name = global
            .name
            .clone()
            .unwrap_or_else(|| format!("binding_{}_{}", res.group, res.binding));

        match global.space {
            naga::AddressSpace::Uniform => {
                let mut vars = Vec::new();
                match &module.types[global.ty].inner {
                    naga::TypeInner::Struct { members, .. } => {
                        flatten_struct(&module, &layouter, members, "", 0, &mut vars);
                    }
                    _ => {
                        // A bare `var<uniform> m: mat4x4<f32>` reflects as
                        // one variable named after the global itself.
                        vars.push(UniformVar {
                            name: global_name.clone(),
                            offset: 0,
                            size: layouter[global.ty].size,
                        });
                    }
                }
                uniform_blocks.push(UniformBlock {
                    name: global_name,
                    group: res.group,
                    binding: res.binding,
                    size: layouter[global.ty].size,
                    vars,
                });
            }
            naga::AddressSpace::Storage { access } => {
                bindings.push(ShaderBinding {
                    name: global_name,
                    group: res.group,
                    binding: res.binding,
                    kind: BindingKind::StorageBuffer {
                        read_only: !access.contains(naga::StorageAccess::STORE),
                    },
                });
            }
            naga::AddressSpace::Handle => match module.types[global.ty].inner {
                naga::TypeInner::Image {
                    dim,
                    arrayed,
                    class,
                } => {
                    let (kind, multisampled) = match class {
                        naga::ImageClass::Sampled { kind, multi } => (texel_kind(kind), multi),
                        naga::ImageClass::Depth { multi } => (TexelKind::Depth, multi),
                        // Storage textures are outside this crate's
                        // binding model; reflect and refuse at bind time.
                        naga::ImageClass::Storage { .. } => (TexelKind::Float, false),
                    };
                    bindings.push(ShaderBinding {
                        name: global_name,
                        group: res.group,
                        binding: res.binding,
                        kind: BindingKind::Texture {
                            dimension: view_dimension(dim, arrayed),
                            kind,
                            multisampled,
                        },
                    });
                }
                naga::TypeInner::Sampler { comparison } => {
                    bindings.push(ShaderBinding {
                        name: global_name,
                        group: res.group,
                        binding: res.binding,
                        kind: BindingKind::Sampler { comparison },
                    });
                }
                _ => {
                    log::warn!(
                        "shader '{}': ignoring handle binding '{}' of unsupported type",
                        name,
                        global_name
                    );
                }
            },
            _ => {}
        }
    }

    log::debug!(
        "shader '{}': entry '{}', {} uniform block(s), {} binding(s)",
        name,
        entry.name,
        uniform_blocks.len(),
        bindings.len()
    );

    Ok(ShaderReflection {
        entry_point: entry.name.clone(),
        workgroup_size: entry.workgroup_size,
        uniform_blocks,
        bindings,
    })
}

fn texel_kind(kind: naga::ScalarKind) -> TexelKind {
    match kind {
        naga::ScalarKind::Sint => TexelKind::Sint,
        naga::ScalarKind::Uint => TexelKind::Uint,
        _ => TexelKind::Float,
    }
}

fn view_dimension(dim: naga::ImageDimension, arrayed: bool) -> wgpu::TextureViewDimension {
    match (dim, arrayed) {
        (naga::ImageDimension::D1, _) => wgpu::TextureViewDimension::D1,
        (naga::ImageDimension::D2, false) => wgpu::TextureViewDimension::D2,
        (naga::ImageDimension::D2, true) => wgpu::TextureViewDimension::D2Array,
        (naga::ImageDimension::D3, _) => wgpu::TextureViewDimension::D3,
        (naga::ImageDimension::Cube, false) => wgpu::TextureViewDimension::Cube,
        (naga::ImageDimension::Cube, true) => wgpu::TextureViewDimension::CubeArray,
    }
}

fn flatten_struct(
    module: &naga::Module,
    layouter: &Layouter,
    members: &[naga::StructMember],
    prefix: &str,
    base_offset: u32,
    vars: &mut Vec<UniformVar>,
) {
    for (index, member) in members.iter().enumerate() {
        let member_name = match &member.name {
            Some(n) => n.clone(),
            None => format!("field{}", index),
        };
        let path = if prefix.is_empty() {
            member_name
        } else {
            format!("{}.{}", prefix, member_name)
        };
        flatten_type(
            module,
            layouter,
            member.ty,
            &path,
            base_offset + member.offset,
            vars,
        );
    }
}

fn flatten_type(
    module: &naga::Module,
    layouter: &Layouter,
    ty: naga::Handle<naga::Type>,
    path: &str,
    offset: u32,
    vars: &mut Vec<UniformVar>,
) {
    match &module.types[ty].inner {
        naga::TypeInner::Struct { members, .. } => {
            flatten_struct(module, layouter, members, path, offset, vars);
        }
        naga::TypeInner::Array { base, size, stride } => match size {
            naga::ArraySize::Constant(count) => {
                for i in 0..count.get() {
                    let element_path = format!("{}[{}]", path, i);
                    flatten_type(module, layouter, *base, &element_path, offset + i * stride, vars);
                }
            }
            _ => {
                // Runtime-sized arrays cannot appear in the uniform address
                // space; nothing to flatten.
                log::warn!("uniform member '{}' has no fixed element count", path);
            }
        },
        _ => {
            vars.push(UniformVar {
                name: path.to_string(),
                offset,
                size: layouter[ty].size,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_SHADER: &str = r#"
        struct FrameBlock {
            view_proj: mat4x4<f32>,
            eye: vec4<f32>,
            cascades: array<mat4x4<f32>, 4>,
            splits: vec4<f32>,
            intensity: f32,
        }

        @group(0) @binding(0) var<uniform> frame: FrameBlock;

        @vertex
        fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
            return frame.view_proj * vec4<f32>(position, frame.intensity);
        }
    "#;

    #[test]
    fn test_flatten_offsets_and_sizes() {
        let reflection = reflect("frame", FRAME_SHADER, naga::ShaderStage::Vertex)
            .expect("shader must reflect");

        assert_eq!(reflection.entry_point, "vs_main");
        assert_eq!(reflection.uniform_blocks.len(), 1);

        let block = &reflection.uniform_blocks[0];
        assert_eq!(block.name, "frame");
        assert_eq!((block.group, block.binding), (0, 0));

        let var = |name: &str| block.find_var(name).expect(name).clone();
        assert_eq!(var("view_proj"), UniformVar { name: "view_proj".into(), offset: 0, size: 64 });
        assert_eq!(var("eye").offset, 64);
        assert_eq!(var("eye").size, 16);
        // mat4 array elements sit at a 64-byte stride
        assert_eq!(var("cascades[0]").offset, 80);
        assert_eq!(var("cascades[1]").offset, 144);
        assert_eq!(var("cascades[3]").offset, 272);
        assert_eq!(var("cascades[3]").size, 64);
        assert_eq!(var("splits").offset, 336);
        assert_eq!(var("intensity").offset, 352);
        assert_eq!(var("intensity").size, 4);
        // struct size rounds up to its 16-byte alignment
        assert_eq!(block.size, 368);
    }

    #[test]
    fn test_nested_struct_paths_accumulate() {
        let source = r#"
            struct Light {
                color: vec4<f32>,
                direction: vec4<f32>,
            }
            struct Params {
                light: Light,
                strength: f32,
            }
            @group(0) @binding(0) var<uniform> params: Params;

            @fragment
            fn fs_main() -> @location(0) vec4<f32> {
                return params.light.color * params.strength;
            }
        "#;

        let reflection =
            reflect("params", source, naga::ShaderStage::Fragment).expect("shader must reflect");
        let block = &reflection.uniform_blocks[0];

        let color = block.find_var("light.color").expect("nested path");
        assert_eq!(color.offset, 0);
        let direction = block.find_var("light.direction").expect("nested path");
        assert_eq!(direction.offset, 16);
        let strength = block.find_var("strength").expect("plain member");
        assert_eq!(strength.offset, 32);

        // The block name itself is not a variable prefix
        assert!(block.find_var("params.strength").is_none());
    }

    #[test]
    fn test_vec4_array_stride() {
        let source = r#"
            struct Spread {
                values: array<vec4<f32>, 3>,
            }
            @group(0) @binding(0) var<uniform> spread: Spread;

            @fragment
            fn fs_main() -> @location(0) vec4<f32> {
                return spread.values[0];
            }
        "#;

        let reflection =
            reflect("spread", source, naga::ShaderStage::Fragment).expect("shader must reflect");
        let block = &reflection.uniform_blocks[0];
        assert_eq!(block.vars.len(), 3);
        assert_eq!(block.find_var("values[0]").expect("elem").offset, 0);
        assert_eq!(block.find_var("values[1]").expect("elem").offset, 16);
        assert_eq!(block.find_var("values[2]").expect("elem").offset, 32);
    }

    #[test]
    fn test_bindings_reflect_kinds_and_slots() {
        let source = r#"
            @group(0) @binding(0) var t_albedo: texture_2d<f32>;
            @group(0) @binding(1) var s_albedo: sampler;
            @group(3) @binding(0) var t_shadow: texture_depth_2d_array;
            @group(3) @binding(1) var s_shadow: sampler_comparison;
            @group(1) @binding(0) var<storage, read> energies: array<f32>;

            @fragment
            fn fs_main(@builtin(position) pos: vec4<f32>) -> @location(0) vec4<f32> {
                let c = textureSample(t_albedo, s_albedo, pos.xy);
                let s = textureSampleCompare(t_shadow, s_shadow, pos.xy, 0, 0.5);
                return c * s * energies[0];
            }
        "#;

        let reflection =
            reflect("bindings", source, naga::ShaderStage::Fragment).expect("shader must reflect");

        let albedo = reflection.find_binding("t_albedo").expect("albedo");
        assert_eq!((albedo.group, albedo.binding), (0, 0));
        assert!(matches!(
            albedo.kind,
            BindingKind::Texture {
                dimension: wgpu::TextureViewDimension::D2,
                kind: TexelKind::Float,
                multisampled: false,
            }
        ));

        let shadow = reflection.find_binding("t_shadow").expect("shadow");
        assert!(matches!(
            shadow.kind,
            BindingKind::Texture {
                dimension: wgpu::TextureViewDimension::D2Array,
                kind: TexelKind::Depth,
                ..
            }
        ));

        let shadow_sampler = reflection.find_binding("s_shadow").expect("sampler");
        assert!(matches!(
            shadow_sampler.kind,
            BindingKind::Sampler { comparison: true }
        ));

        let energies = reflection.find_binding("energies").expect("storage");
        assert!(matches!(
            energies.kind,
            BindingKind::StorageBuffer { read_only: true }
        ));
        assert_eq!(energies.group, 1);

        assert!(reflection.find_binding("t_missing").is_none());
    }

    #[test]
    fn test_wrong_stage_is_a_compile_error() {
        let err = reflect("frame", FRAME_SHADER, naga::ShaderStage::Compute)
            .expect_err("no compute entry point");
        assert!(matches!(err, GfxError::ShaderCompilation { .. }));
    }

    #[test]
    fn test_parse_error_reports_detail() {
        let err = reflect("broken", "this is not wgsl", naga::ShaderStage::Vertex)
            .expect_err("must fail");
        match err {
            GfxError::ShaderCompilation { name, detail } => {
                assert_eq!(name, "broken");
                assert!(!detail.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Material system for the deferred geometry pass
//!
//! Materials carry PBR factors plus six optional texture slots. Slots left
//! empty fall back to shared 1x1 defaults so one bind group shape covers
//! every material. Materials are stored centrally in [`MaterialManager`]
//! and referenced by index from mesh instances.

use crate::error::GfxResult;
use crate::gfx::context::RenderContext;
use crate::wgpu_utils::uniform_buffer::UniformBuffer;

use super::sampler::{Sampler, SamplerDesc};
use super::texture::{Texture, TextureDesc, ViewKind};
use super::{PixelFormat, TextureUsage};

/// GPU uniform data for materials. Layout mirrors the geometry shader's
/// material block.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniform {
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub emissive: [f32; 3],
    _padding: f32,
}

/// The six texture slots, in bind-slot order after the uniform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialMap {
    Albedo,
    Normal,
    Metallic,
    Roughness,
    Occlusion,
    Emissive,
}

const MAP_COUNT: usize = 6;

/// Material definition with PBR properties
///
/// GPU resources (uniform + bind group) are created against the geometry
/// pipeline's material group layout and shared by every instance that
/// references this material.
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub emissive: [f32; 3],

    maps: [Option<Texture>; MAP_COUNT],
    ubo: Option<UniformBuffer<MaterialUniform>>,
    bind_group: Option<wgpu::BindGroup>,
    maps_changed: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: [0.8, 0.8, 0.8, 1.0],
            metallic: 0.0,
            roughness: 0.5,
            normal_scale: 1.0,
            occlusion_strength: 1.0,
            emissive: [0.0, 0.0, 0.0],
            maps: Default::default(),
            ubo: None,
            bind_group: None,
            maps_changed: false,
        }
    }
}

impl Material {
    /// Creates a new material with basic PBR properties
    ///
    /// # Arguments
    /// * `name` - Display name for this material
    /// * `base_color` - RGBA base color
    /// * `metallic` - Metallic factor (0.0 = dielectric, 1.0 = metallic)
    /// * `roughness` - Surface roughness (0.0 = mirror, 1.0 = rough)
    pub fn new(name: &str, base_color: [f32; 4], metallic: f32, roughness: f32) -> Self {
        Self {
            name: name.to_string(),
            base_color,
            metallic: metallic.clamp(0.0, 1.0),
            roughness: roughness.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Builder pattern: Set base color from RGB values
    pub fn with_color(mut self, r: f32, g: f32, b: f32) -> Self {
        self.base_color = [r, g, b, self.base_color[3]];
        self
    }

    /// Builder pattern: Set alpha transparency
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.base_color[3] = alpha.clamp(0.0, 1.0);
        self
    }

    /// Builder pattern: Set metallic factor
    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic.clamp(0.0, 1.0);
        self
    }

    /// Builder pattern: Set roughness factor
    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    /// Builder pattern: Set emissive color
    pub fn with_emission(mut self, r: f32, g: f32, b: f32) -> Self {
        self.emissive = [r, g, b];
        self
    }

    /// Attaches a texture to one of the six slots, replacing any previous
    /// one. The bind group is rebuilt on the next GPU update.
    pub fn set_map(&mut self, map: MaterialMap, texture: Texture) {
        self.maps[map as usize] = Some(texture);
        self.maps_changed = true;
    }

    pub fn clear_map(&mut self, map: MaterialMap) {
        if self.maps[map as usize].take().is_some() {
            self.maps_changed = true;
        }
    }

    pub fn map(&self, map: MaterialMap) -> Option<&Texture> {
        self.maps[map as usize].as_ref()
    }

    fn uniform(&self) -> MaterialUniform {
        MaterialUniform {
            base_color: self.base_color,
            metallic: self.metallic,
            roughness: self.roughness,
            normal_scale: self.normal_scale,
            occlusion_strength: self.occlusion_strength,
            emissive: self.emissive,
            _padding: 0.0,
        }
    }

    /// Syncs factors to the uniform buffer and (re)builds the bind group
    /// when needed. `layout` is the geometry pipeline's material group
    /// layout; `defaults` fill the empty texture slots.
    pub(crate) fn update_gpu_resources(
        &mut self,
        ctx: &RenderContext,
        layout: &wgpu::BindGroupLayout,
        defaults: &DefaultMaps,
        sampler: &Sampler,
    ) -> GfxResult<()> {
        let uniform = self.uniform();
        if self.ubo.is_none() {
            self.ubo = Some(UniformBuffer::new_with_data(ctx.device(), &uniform));
        } else if let Some(ubo) = &mut self.ubo {
            ubo.update_content(ctx.queue(), uniform);
        }

        if self.bind_group.is_none() || self.maps_changed {
            let ubo = self.ubo.as_ref().expect("created above");
            let mut entries = Vec::with_capacity(2 + MAP_COUNT);
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: ubo.binding_resource(),
            });
            for (slot, map) in self.maps.iter().enumerate() {
                let texture = match map {
                    Some(texture) => texture,
                    None => defaults.for_slot(slot),
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: slot as u32 + 1,
                    resource: wgpu::BindingResource::TextureView(
                        texture.view(ViewKind::ShaderResource)?,
                    ),
                });
            }
            entries.push(wgpu::BindGroupEntry {
                binding: MAP_COUNT as u32 + 1,
                resource: wgpu::BindingResource::Sampler(sampler.raw()),
            });

            self.bind_group = Some(ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("material '{}'", self.name)),
                layout,
                entries: &entries,
            }));
            self.maps_changed = false;
        }

        Ok(())
    }

    /// Gets the bind group for rendering
    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }
}

/// Shared 1x1 fallback textures for empty material slots.
pub(crate) struct DefaultMaps {
    white: Texture,
    flat_normal: Texture,
    black: Texture,
}

impl DefaultMaps {
    fn create(ctx: &RenderContext) -> GfxResult<Self> {
        let usage = TextureUsage::SHADER_RESOURCE;
        // Bytes are BGRA.
        let white = Texture::create(
            ctx,
            &TextureDesc::new(1, 1, PixelFormat::Bgra8UnormSrgb, usage)
                .with_initial_data(&[255, 255, 255, 255])
                .with_label("default white map"),
        )?;
        let flat_normal = Texture::create(
            ctx,
            &TextureDesc::new(1, 1, PixelFormat::Bgra8Unorm, usage)
                .with_initial_data(&[255, 128, 128, 255])
                .with_label("default normal map"),
        )?;
        let black = Texture::create(
            ctx,
            &TextureDesc::new(1, 1, PixelFormat::Bgra8UnormSrgb, usage)
                .with_initial_data(&[0, 0, 0, 255])
                .with_label("default emissive map"),
        )?;
        Ok(Self {
            white,
            flat_normal,
            black,
        })
    }

    fn for_slot(&self, slot: usize) -> &Texture {
        const NORMAL: usize = MaterialMap::Normal as usize;
        const EMISSIVE: usize = MaterialMap::Emissive as usize;
        match slot {
            NORMAL => &self.flat_normal,
            EMISSIVE => &self.black,
            _ => &self.white,
        }
    }
}

/// Centralized material storage, indexed by the slot mesh instances carry.
/// Index 0 is always the default material.
pub struct MaterialManager {
    materials: Vec<Material>,
    defaults: Option<DefaultMaps>,
    sampler: Option<Sampler>,
}

impl MaterialManager {
    /// Creates a new material manager with a default material at index 0
    pub fn new() -> Self {
        Self {
            materials: vec![Material::default()],
            defaults: None,
            sampler: None,
        }
    }

    /// Adds a material and returns its index.
    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    /// Creates a material with default factors and returns it for
    /// configuration. Its index is [`MaterialManager::len`] - 1 afterwards.
    pub fn create_material(&mut self, name: &str) -> &mut Material {
        self.materials
            .push(Material::new(name, [0.8, 0.8, 0.8, 1.0], 0.0, 0.5));
        self.materials.last_mut().expect("just pushed")
    }

    /// Material at `index`, falling back to the default material when the
    /// index is out of range.
    pub fn material(&self, index: usize) -> &Material {
        self.materials.get(index).unwrap_or(&self.materials[0])
    }

    pub fn material_mut(&mut self, index: usize) -> Option<&mut Material> {
        self.materials.get_mut(index)
    }

    /// First material with this name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.materials.iter().position(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Updates GPU resources for all materials. `layout` is the geometry
    /// pipeline's material group layout.
    pub(crate) fn update_all_gpu_resources(
        &mut self,
        ctx: &RenderContext,
        layout: &wgpu::BindGroupLayout,
    ) -> GfxResult<()> {
        if self.defaults.is_none() {
            self.defaults = Some(DefaultMaps::create(ctx)?);
        }
        if self.sampler.is_none() {
            self.sampler = Some(Sampler::create(
                ctx,
                SamplerDesc::linear_wrap(),
                "material sampler",
            ));
        }
        let defaults = self.defaults.as_ref().expect("created above");
        let sampler = self.sampler.as_ref().expect("created above");
        for material in &mut self.materials {
            material.update_gpu_resources(ctx, layout, defaults, sampler)?;
        }
        Ok(())
    }

    /// Bind group for the material at `index`, default on out-of-range.
    pub(crate) fn bind_group_for(&self, index: usize) -> Option<&wgpu::BindGroup> {
        self.material(index).bind_group()
    }
}

impl Default for MaterialManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_clamps_factors() {
        let material = Material::new("m", [1.0, 0.0, 0.0, 1.0], 2.0, -1.0)
            .with_alpha(3.0)
            .with_metallic(-0.5);
        assert_eq!(material.metallic, 0.0);
        assert_eq!(material.roughness, 0.0);
        assert_eq!(material.base_color[3], 1.0);
    }

    #[test]
    fn test_manager_falls_back_to_default() {
        let mut manager = MaterialManager::new();
        let red = manager.add_material(Material::new("red", [1.0, 0.0, 0.0, 1.0], 0.0, 0.8));
        assert_eq!(red, 1);
        assert_eq!(manager.material(red).name, "red");
        assert_eq!(manager.material(999).name, "default");
        assert_eq!(manager.find("red"), Some(1));
        assert_eq!(manager.find("missing"), None);
    }

    #[test]
    fn test_uniform_layout_matches_shader_block() {
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 48);
    }
}

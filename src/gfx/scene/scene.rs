//! # Scene Container
//!
//! Everything the renderer consumes for one frame: mesh instances,
//! lights, gas volumes, particle systems and the material set.

use crate::gfx::geometry;
use crate::gfx::particles::ParticleSystem;
use crate::gfx::resources::MaterialManager;

use super::lights::{GasVolume, Light, SceneLight};
use super::object::{Mesh, MeshInstance};

pub struct Scene {
    pub objects: Vec<MeshInstance>,
    pub lights: Vec<SceneLight>,
    pub volumes: Vec<GasVolume>,
    pub particle_systems: Vec<ParticleSystem>,
    pub material_manager: MaterialManager,
}

impl Scene {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            lights: Vec::new(),
            volumes: Vec::new(),
            particle_systems: Vec::new(),
            material_manager: MaterialManager::new(),
        }
    }

    /// Adds a mesh as a new instance and returns it for configuration.
    pub fn add_object(&mut self, mesh: Mesh) -> &mut MeshInstance {
        self.objects.push(MeshInstance::new(mesh));
        self.objects.last_mut().expect("just pushed")
    }

    /// Adds a unit cube instance.
    pub fn add_cube(&mut self) -> &mut MeshInstance {
        self.add_object(Mesh::from_geometry(&geometry::generate_cube()))
    }

    /// Adds a unit UV sphere instance.
    pub fn add_sphere(&mut self, longitude_segments: u32, latitude_segments: u32) -> &mut MeshInstance {
        self.add_object(Mesh::from_geometry(&geometry::generate_sphere(
            longitude_segments,
            latitude_segments,
        )))
    }

    /// Adds a ground plane instance.
    pub fn add_plane(&mut self, width: f32, depth: f32) -> &mut MeshInstance {
        self.add_object(Mesh::from_geometry(&geometry::generate_plane(
            width, depth, 1, 1,
        )))
    }

    pub fn add_light(&mut self, light: Light) -> &mut SceneLight {
        self.lights.push(SceneLight::new(light));
        self.lights.last_mut().expect("just pushed")
    }

    pub fn add_volume(&mut self, volume: GasVolume) -> &mut GasVolume {
        self.volumes.push(volume);
        self.volumes.last_mut().expect("just pushed")
    }

    pub fn add_particle_system(&mut self, system: ParticleSystem) -> &mut ParticleSystem {
        self.particle_systems.push(system);
        self.particle_systems.last_mut().expect("just pushed")
    }

    /// Objects currently drawn by the geometry pass.
    pub fn enabled_objects(&self) -> impl Iterator<Item = &MeshInstance> {
        self.objects.iter().filter(|o| o.enabled)
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

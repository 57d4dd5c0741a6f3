//! # Lights and Participating Media
//!
//! The light set the deferred pass knows how to shade, as a closed enum.
//! Unknown light kinds cannot exist; the two variants the renderer does
//! not implement yet are carried along and skipped.

use cgmath::{InnerSpace, Vector3};

use super::transform::Transform;

/// Sun-style light with cascaded shadow maps.
#[derive(Clone, Debug)]
pub struct DirectionalLight {
    pub direction: Vector3<f32>,
    pub color: [f32; 3],
    pub intensity: f32,
    pub casts_shadows: bool,
}

impl DirectionalLight {
    pub fn new(direction: Vector3<f32>, color: [f32; 3], intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
            casts_shadows: true,
        }
    }
}

/// Local light with distance falloff, no shadows.
#[derive(Clone, Debug)]
pub struct PointLight {
    pub position: Vector3<f32>,
    pub color: [f32; 3],
    pub radius: f32,
    pub brightness: f32,
    pub intensity: f32,
}

impl PointLight {
    pub fn new(position: Vector3<f32>, color: [f32; 3], radius: f32, intensity: f32) -> Self {
        Self {
            position,
            color,
            radius,
            brightness: 1.0,
            intensity,
        }
    }
}

/// Accepted by the scene, contributes nothing yet.
#[derive(Clone, Debug)]
pub struct SpotLight {
    pub position: Vector3<f32>,
    pub direction: Vector3<f32>,
    pub color: [f32; 3],
    pub intensity: f32,
    pub cone_angle_deg: f32,
}

/// Accepted by the scene, contributes nothing yet.
#[derive(Clone, Debug)]
pub struct AmbientLight {
    pub color: [f32; 3],
    pub intensity: f32,
}

/// Every light kind the renderer can be handed.
#[derive(Clone, Debug)]
pub enum Light {
    Directional(DirectionalLight),
    Point(PointLight),
    Spot(SpotLight),
    Ambient(AmbientLight),
}

/// A light plus its enable switch.
#[derive(Clone, Debug)]
pub struct SceneLight {
    pub light: Light,
    pub enabled: bool,
}

impl SceneLight {
    pub fn new(light: Light) -> Self {
        Self {
            light,
            enabled: true,
        }
    }
}

/// Box-shaped participating medium rendered by the volumetric pass.
#[derive(Clone, Debug)]
pub struct GasVolume {
    pub transform: Transform,
    /// Local-space box half extents before the transform's scale.
    pub half_extents: Vector3<f32>,
    pub absorption: f32,
    pub scattering: f32,
    pub albedo: [f32; 3],
    pub enabled: bool,
}

impl GasVolume {
    pub fn new(transform: Transform, half_extents: Vector3<f32>) -> Self {
        Self {
            transform,
            half_extents,
            absorption: 0.3,
            scattering: 0.7,
            albedo: [1.0, 1.0, 1.0],
            enabled: true,
        }
    }
}

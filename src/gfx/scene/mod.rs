//! # Scene Management Module
//!
//! 3D scene description: mesh instances with transforms and materials,
//! lights, gas volumes and particle systems, plus the vertex format the
//! renderer consumes.
//!
//! ## Key Components
//!
//! - [`Scene`] - The container the renderer walks each frame
//! - [`MeshInstance`] - One placed mesh with transform and material slot
//! - [`Light`] - The closed set of light kinds the deferred pass shades
//! - [`Vertex3D`] - Vertex data with position, normal and texture coordinates
//!
//! ## Usage
//!
//! ```no_run
//! use peat::gfx::scene::Scene;
//! use peat::gfx::scene::lights::{DirectionalLight, Light};
//! use cgmath::Vector3;
//!
//! let mut scene = Scene::new();
//! scene.add_cube().transform.position = Vector3::new(0.0, 0.5, 0.0);
//! scene.add_plane(10.0, 10.0);
//! scene.add_light(Light::Directional(DirectionalLight::new(
//!     Vector3::new(-0.4, -1.0, -0.3),
//!     [1.0, 0.96, 0.9],
//!     2.0,
//! )));
//! ```

pub mod lights;
pub mod object;
pub mod scene;
pub mod transform;
pub mod vertex;

// Re-export main types
pub use lights::{
    AmbientLight, DirectionalLight, GasVolume, Light, PointLight, SceneLight, SpotLight,
};
pub use object::{Mesh, MeshInstance};
pub use scene::Scene;
pub use transform::Transform;
pub use vertex::Vertex3D;

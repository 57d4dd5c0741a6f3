// demos/quickstart.rs
//! Minimal scene: a lit cube on a plane, a smoke volume and a spark
//! fountain. Run with `cargo run --example quickstart`.

use cgmath::Vector3;
use peat::gfx::particles::{ConstantForce, FountainEmitter, ParticleEffect, ParticleSystem};
use peat::gfx::resources::Material;
use peat::gfx::scene::{DirectionalLight, GasVolume, Light, PointLight, Transform};

fn main() {
    let mut app = peat::default();

    let scene = app.scene_mut();

    let ground = scene
        .material_manager
        .add_material(Material::new("ground", [0.55, 0.55, 0.58, 1.0], 0.0, 0.9));
    let paint = scene
        .material_manager
        .add_material(Material::new("paint", [0.8, 0.25, 0.2, 1.0], 0.1, 0.4));

    scene.add_plane(12.0, 12.0).material_index = ground;

    let cube = scene.add_cube();
    cube.name = "spinner".to_string();
    cube.material_index = paint;
    cube.transform.position = Vector3::new(0.0, 0.5, 0.0);

    scene.add_light(Light::Directional(DirectionalLight::new(
        Vector3::new(-0.4, -1.0, -0.3),
        [1.0, 0.96, 0.9],
        2.0,
    )));
    scene.add_light(Light::Point(PointLight::new(
        Vector3::new(1.8, 1.2, 1.5),
        [0.3, 0.5, 1.0],
        6.0,
        3.0,
    )));

    let mut smoke = GasVolume::new(
        Transform::from_position(Vector3::new(-1.5, 1.0, -1.0)),
        Vector3::new(1.0, 1.0, 1.0),
    );
    smoke.albedo = [0.8, 0.8, 0.85];
    scene.add_volume(smoke);

    let mut sparks = ParticleSystem::new("sparks", 4096).expect("particle capacity");
    sparks.transform.position = Vector3::new(1.5, 0.1, -0.5);
    sparks.add_effect(ParticleEffect::Fountain(FountainEmitter::new(
        Vector3::unit_y(),
    )));
    sparks.add_effect(ParticleEffect::Force(ConstantForce::gravity()));
    scene.add_particle_system(sparks);

    app.set_update(|scene, dt| {
        if let Some(cube) = scene.objects.iter_mut().find(|o| o.name == "spinner") {
            cube.transform.rotation.y += 45.0 * dt;
        }
    });

    app.run();
}

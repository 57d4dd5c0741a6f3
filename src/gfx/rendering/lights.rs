//! GPU-side light data
//!
//! Uniform layouts for the lighting passes and the cascaded shadow map
//! math for directional lights. Each cascade fits an orthographic light
//! frustum around one depth slice of the camera frustum; slice depths
//! follow the practical split scheme (a blend of uniform and logarithmic
//! spacing).

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, SquareMatrix, Vector3};

use crate::error::GfxResult;
use crate::gfx::camera::OPENGL_TO_WGPU_MATRIX;
use crate::gfx::context::RenderContext;
use crate::gfx::resources::{PixelFormat, Texture, TextureDesc, TextureUsage, ViewKind};
use crate::gfx::scene::{DirectionalLight, PointLight};

/// Cascades per directional light. The lighting shader declares arrays of
/// this length.
pub const CASCADE_COUNT: usize = 4;

const SPLIT_LAMBDA: f32 = 0.75;

/// Per-light block for the directional lighting pass. One entry per light
/// in a dynamic-offset uniform arena.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DirectionalLightUniform {
    pub cascades: [[[f32; 4]; 4]; CASCADE_COUNT],
    /// Far depth of each cascade slice, in view units.
    pub splits: [f32; 4],
    /// xyz = direction, w = 1 when this light casts shadows.
    pub direction: [f32; 4],
    /// rgb = color, w = intensity.
    pub color: [f32; 4],
}

/// Per-light block for the point lighting pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PointLightUniform {
    /// xyz = position, w = radius.
    pub position: [f32; 4],
    /// rgb = color, w = intensity.
    pub color: [f32; 4],
    /// x = brightness.
    pub params: [f32; 4],
}

impl PointLightUniform {
    pub fn new(light: &PointLight) -> Self {
        Self {
            position: [
                light.position.x,
                light.position.y,
                light.position.z,
                light.radius,
            ],
            color: [light.color[0], light.color[1], light.color[2], light.intensity],
            params: [light.brightness, 0.0, 0.0, 0.0],
        }
    }
}

/// Slice far depths for the cascade set. Blends uniform spacing with
/// logarithmic so near cascades stay tight without starving the far ones.
pub fn cascade_splits(near: f32, far: f32) -> [f32; CASCADE_COUNT] {
    let mut splits = [0.0; CASCADE_COUNT];
    let ratio = far / near;
    let range = far - near;
    for (i, split) in splits.iter_mut().enumerate() {
        let p = (i + 1) as f32 / CASCADE_COUNT as f32;
        let log = near * ratio.powf(p);
        let uniform = near + range * p;
        *split = uniform + (log - uniform) * SPLIT_LAMBDA;
    }
    splits[CASCADE_COUNT - 1] = far;
    splits
}

/// World-space corners of the camera frustum slice between `slice_near`
/// and `slice_far`.
fn slice_corners_world(
    view: Matrix4<f32>,
    fovy_deg: f32,
    aspect: f32,
    slice_near: f32,
    slice_far: f32,
) -> [Point3<f32>; 8] {
    let proj =
        OPENGL_TO_WGPU_MATRIX * cgmath::perspective(cgmath::Deg(fovy_deg), aspect, slice_near, slice_far);
    let inv = (proj * view).invert().unwrap_or_else(Matrix4::identity);

    let mut corners = [Point3::new(0.0, 0.0, 0.0); 8];
    let mut i = 0;
    for x in [-1.0f32, 1.0] {
        for y in [-1.0f32, 1.0] {
            // wgpu clip space: z runs 0 (near) to 1 (far)
            for z in [0.0f32, 1.0] {
                let clip = cgmath::Vector4::new(x, y, z, 1.0);
                let world = inv * clip;
                corners[i] = Point3::from_homogeneous(world);
                i += 1;
            }
        }
    }
    corners
}

/// Light-space view-projection for one cascade: an orthographic frustum
/// fitted around the slice corners, looking along the light direction.
/// The depth range is extended one slice length behind the near plane so
/// casters outside the slice still shadow into it.
pub fn cascade_view_proj(
    light_direction: Vector3<f32>,
    view: Matrix4<f32>,
    fovy_deg: f32,
    aspect: f32,
    slice_near: f32,
    slice_far: f32,
) -> Matrix4<f32> {
    let corners = slice_corners_world(view, fovy_deg, aspect, slice_near, slice_far);

    let mut center = Vector3::new(0.0, 0.0, 0.0);
    for corner in &corners {
        center += corner.to_vec();
    }
    center /= corners.len() as f32;
    let center = Point3::from_vec(center);

    let dir = light_direction.normalize();
    let up = if dir.y.abs() > 0.99 {
        Vector3::unit_z()
    } else {
        Vector3::unit_y()
    };
    let light_view = Matrix4::look_at_rh(center - dir, center, up);

    let mut min = Vector3::new(f32::MAX, f32::MAX, f32::MAX);
    let mut max = Vector3::new(f32::MIN, f32::MIN, f32::MIN);
    for corner in &corners {
        let p = light_view * corner.to_homogeneous();
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        min.z = min.z.min(p.z);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
        max.z = max.z.max(p.z);
    }

    let depth = max.z - min.z;
    // Looking down -z in light view space, so max.z is the near side.
    let light_proj = cgmath::ortho(min.x, max.x, min.y, max.y, -max.z - depth, -min.z);
    OPENGL_TO_WGPU_MATRIX * light_proj * light_view
}

impl DirectionalLightUniform {
    /// Builds the full per-light block for one camera view.
    pub fn new(
        light: &DirectionalLight,
        view: Matrix4<f32>,
        fovy_deg: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let splits = cascade_splits(near, far);
        let mut cascades = [[[0.0; 4]; 4]; CASCADE_COUNT];
        let mut slice_near = near;
        for (i, &split) in splits.iter().enumerate() {
            let matrix =
                cascade_view_proj(light.direction, view, fovy_deg, aspect, slice_near, split);
            cascades[i] = matrix.into();
            slice_near = split;
        }

        Self {
            cascades,
            splits,
            direction: [
                light.direction.x,
                light.direction.y,
                light.direction.z,
                if light.casts_shadows { 1.0 } else { 0.0 },
            ],
            color: [light.color[0], light.color[1], light.color[2], light.intensity],
        }
    }
}

/// Depth array texture holding one shadow map per cascade.
pub struct ShadowMap {
    texture: Texture,
    size: u32,
}

impl ShadowMap {
    pub fn create(ctx: &RenderContext, size: u32) -> GfxResult<Self> {
        let texture = Texture::create(
            ctx,
            &TextureDesc::new(
                size,
                size,
                PixelFormat::R32Typeless,
                TextureUsage::DEPTH_STENCIL.and_shader_resource(),
            )
            .with_array_size(CASCADE_COUNT as u32)
            .with_label("directional shadow map"),
        )?;
        Ok(Self { texture, size })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Depth attachment targeting one cascade slice, cleared to the far
    /// plane.
    pub fn cascade_attachment(
        &self,
        cascade: usize,
    ) -> GfxResult<wgpu::RenderPassDepthStencilAttachment<'_>> {
        let views = self.texture.views(ViewKind::DepthStencil)?;
        Ok(wgpu::RenderPassDepthStencilAttachment {
            view: &views[cascade],
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        })
    }

    pub fn dispose(&mut self) {
        self.texture.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_are_monotonic() {
        let splits = cascade_splits(0.1, 1000.0);
        let mut prev = 0.1;
        for split in splits {
            assert!(split > prev, "split {} not beyond {}", split, prev);
            prev = split;
        }
        assert_eq!(splits[CASCADE_COUNT - 1], 1000.0);
    }

    #[test]
    fn test_near_cascades_tighter_than_uniform() {
        let splits = cascade_splits(0.1, 100.0);
        // First split well below the uniform spacing value of 25.075
        assert!(splits[0] < 10.0);
    }

    #[test]
    fn test_cascade_contains_slice_corners() {
        // Camera at origin looking down -z
        let view = Matrix4::identity();
        let light_dir = Vector3::new(0.3, -1.0, 0.2);
        let vp = cascade_view_proj(light_dir, view, 60.0, 1.5, 1.0, 20.0);

        for corner in slice_corners_world(view, 60.0, 1.5, 1.0, 20.0) {
            let clip = vp * corner.to_homogeneous();
            let eps = 1e-3;
            assert!(clip.x >= -1.0 - eps && clip.x <= 1.0 + eps, "x={}", clip.x);
            assert!(clip.y >= -1.0 - eps && clip.y <= 1.0 + eps, "y={}", clip.y);
            assert!(clip.z >= -eps && clip.z <= 1.0 + eps, "z={}", clip.z);
        }
    }

    #[test]
    fn test_point_uniform_packs_fields() {
        let light = PointLight::new(Vector3::new(1.0, 2.0, 3.0), [1.0, 0.5, 0.25], 8.0, 2.0);
        let uniform = PointLightUniform::new(&light);
        assert_eq!(uniform.position, [1.0, 2.0, 3.0, 8.0]);
        assert_eq!(uniform.color[3], 2.0);
        assert_eq!(uniform.params[0], 1.0);
    }

    #[test]
    fn test_directional_uniform_marks_shadow_flag() {
        let mut light = DirectionalLight::new(Vector3::new(0.0, -1.0, 0.0), [1.0; 3], 1.0);
        light.casts_shadows = false;
        let uniform =
            DirectionalLightUniform::new(&light, Matrix4::identity(), 45.0, 1.0, 0.1, 100.0);
        assert_eq!(uniform.direction[3], 0.0);
        assert_eq!(std::mem::size_of::<DirectionalLightUniform>(), 304);
    }
}

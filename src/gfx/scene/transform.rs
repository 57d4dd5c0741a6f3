//! # Object Transforms
//!
//! Position / rotation / scale triple with cached-free matrix derivation.

use cgmath::{Deg, Matrix3, Matrix4, SquareMatrix, Vector3};

// Scale components this small would make the model matrix singular.
const MIN_SCALE: f32 = 1e-6;

/// Translation, Euler rotation (degrees) and per-axis scale.
///
/// Rotation is applied yaw (Y), then pitch (X), then roll (Z).
#[derive(Clone, Copy, Debug)]
pub struct Transform {
    pub position: Vector3<f32>,
    pub rotation: Vector3<f32>,
    pub scale: Vector3<f32>,
}

impl Transform {
    pub fn new() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            rotation: Vector3::new(0.0, 0.0, 0.0),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn from_position(position: Vector3<f32>) -> Self {
        Self {
            position,
            ..Self::new()
        }
    }

    pub fn with_rotation(mut self, rotation: Vector3<f32>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vector3<f32>) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vector3::new(scale, scale, scale);
        self
    }

    pub fn position(&self) -> Vector3<f32> {
        self.position
    }

    fn rotation_matrix(&self) -> Matrix3<f32> {
        Matrix3::from_angle_y(Deg(self.rotation.y))
            * Matrix3::from_angle_x(Deg(self.rotation.x))
            * Matrix3::from_angle_z(Deg(self.rotation.z))
    }

    /// Model matrix (T * R * S). Scale components are clamped away from
    /// zero so the matrix stays invertible.
    pub fn model(&self) -> Matrix4<f32> {
        let s = self.scale.map(|c| {
            if c.abs() < MIN_SCALE {
                MIN_SCALE.copysign(if c == 0.0 { 1.0 } else { c })
            } else {
                c
            }
        });
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation_matrix())
            * Matrix4::from_nonuniform_scale(s.x, s.y, s.z)
    }

    /// Inverse of [`Transform::model`]; identity if inversion fails.
    pub fn inverse_model(&self) -> Matrix4<f32> {
        self.model().invert().unwrap_or_else(Matrix4::identity)
    }

    /// Inverse-transpose of the model matrix, for transforming normals.
    pub fn normal_matrix(&self) -> Matrix4<f32> {
        use cgmath::Matrix;
        self.inverse_model().transpose()
    }

    /// Unit vector the transform faces along (-Z rotated).
    pub fn forward(&self) -> Vector3<f32> {
        self.rotation_matrix() * Vector3::new(0.0, 0.0, -1.0)
    }

    /// Local up axis (+Y rotated).
    pub fn up(&self) -> Vector3<f32> {
        self.rotation_matrix() * Vector3::new(0.0, 1.0, 0.0)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Point3, Transform as _};

    fn vec_approx_eq(a: Vector3<f32>, b: Vector3<f32>, eps: f32) -> bool {
        (a.x - b.x).abs() < eps && (a.y - b.y).abs() < eps && (a.z - b.z).abs() < eps
    }

    #[test]
    fn test_identity_transform() {
        let t = Transform::new();
        assert_eq!(t.model(), Matrix4::identity());
        assert_eq!(t.inverse_model(), Matrix4::identity());
    }

    #[test]
    fn test_inverse_round_trips_a_point() {
        let t = Transform::from_position(Vector3::new(3.0, -1.0, 2.5))
            .with_rotation(Vector3::new(30.0, 45.0, 10.0))
            .with_uniform_scale(2.0);

        let p = Point3::new(1.0, 2.0, 3.0);
        let there = t.model().transform_point(p);
        let back = t.inverse_model().transform_point(there);

        assert!(vec_approx_eq(back - p, Vector3::new(0.0, 0.0, 0.0), 1e-4));
    }

    #[test]
    fn test_zero_scale_stays_invertible() {
        let t = Transform::new().with_scale(Vector3::new(0.0, 1.0, 1.0));
        let inverse = t.inverse_model();
        let m: &[f32; 16] = inverse.as_ref();
        assert!(m.iter().all(|c| c.is_finite()));
        assert_ne!(inverse, Matrix4::identity());
    }

    #[test]
    fn test_forward_follows_yaw() {
        let t = Transform::new().with_rotation(Vector3::new(0.0, 90.0, 0.0));
        assert!(vec_approx_eq(t.forward(), Vector3::new(-1.0, 0.0, 0.0), 1e-5));
        assert!(vec_approx_eq(t.up(), Vector3::new(0.0, 1.0, 0.0), 1e-5));
    }
}

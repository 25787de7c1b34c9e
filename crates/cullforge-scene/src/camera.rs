//! Viewer placement for the headless pipeline.

use cullforge_core::Frustum;
use glam::{Mat4, Vec3};

/// Perspective camera.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub position: Vec3,
    pub direction: Vec3,
    pub up: Vec3,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            up: Vec3::Y,
            fov: std::f32::consts::FRAC_PI_3,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    /// Camera at `position` looking at `target`, with default lens settings.
    #[must_use]
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_aspect(mut self, aspect: f32) -> Self {
        self.aspect = aspect;
        self
    }

    #[must_use]
    pub const fn with_far(mut self, far: f32) -> Self {
        self.far = far;
        self
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target position.
    pub fn look_at(&mut self, target: Vec3) {
        self.direction = (target - self.position).normalize();
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Extract frustum planes from the current camera state.
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(self.view_projection_matrix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cullforge_core::Aabb;

    #[test]
    fn frustum_sees_what_is_ahead() {
        let cam = Camera::looking_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -10.0));
        let f = cam.frustum();
        assert!(f.test_aabb(&Aabb::new(Vec3::new(-1.0, -1.0, -6.0), Vec3::new(1.0, 1.0, -5.0))));
        assert!(!f.test_aabb(&Aabb::new(Vec3::new(-1.0, -1.0, 5.0), Vec3::new(1.0, 1.0, 6.0))));
    }

    #[test]
    fn view_matrix_moves_target_onto_neg_z() {
        let cam = Camera::looking_at(Vec3::new(3.0, 0.0, 0.0), Vec3::new(3.0, 0.0, -4.0));
        let p = cam.view_matrix().transform_point3(Vec3::new(3.0, 0.0, -4.0));
        assert_relative_eq!(p.z, -4.0, epsilon = 1e-5);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-5);
    }
}

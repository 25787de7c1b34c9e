//! Skinning matrix palette.

use glam::{Affine3A, Mat4};
use serde::{Deserialize, Serialize};

/// Product of two transforms treated as 3×4 affine matrices; the bottom
/// rows of both inputs are ignored and the result's is `(0, 0, 0, 1)`.
#[must_use]
pub fn mul34(lhs: &Mat4, rhs: &Mat4) -> Mat4 {
    Mat4::from(Affine3A::from_mat4(*lhs) * Affine3A::from_mat4(*rhs))
}

/// Four parallel transform arrays indexed by palette slot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatrixPalette {
    /// Bone local-to-world
    pub local_to_world: Vec<Mat4>,
    /// Bone world-to-local
    pub world_to_local: Vec<Mat4>,
    /// Skinned-object local to bone space at bind time
    pub local_to_bone: Vec<Mat4>,
    /// Bone space to skinned-object local at bind time
    pub bone_to_local: Vec<Mat4>,
}

impl MatrixPalette {
    /// Number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.local_to_world.len()
    }

    /// Returns true if there are no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.local_to_world.is_empty()
    }

    /// Append `count` identity slots and return the first.
    #[allow(clippy::cast_possible_truncation)]
    pub fn grow(&mut self, count: usize) -> u32 {
        let base = self.len();
        for arr in [
            &mut self.local_to_world,
            &mut self.world_to_local,
            &mut self.local_to_bone,
            &mut self.bone_to_local,
        ] {
            arr.resize(base + count, Mat4::IDENTITY);
        }
        base as u32
    }

    /// Set a slot's bind-time matrices.
    pub fn set_initial_bone(&mut self, slot: usize, local_to_bone: Mat4, bone_to_local: Mat4) {
        self.local_to_bone[slot] = local_to_bone;
        self.bone_to_local[slot] = bone_to_local;
    }

    /// Recompute a slot's world transforms from a bone transform.
    pub fn set_bone_transform(&mut self, slot: usize, l2w: &Mat4, w2l: &Mat4) {
        self.local_to_world[slot] = mul34(l2w, &self.local_to_bone[slot]);
        self.world_to_local[slot] = mul34(&self.bone_to_local[slot], w2l);
    }

    /// Returns true if `bones` matches the bind matrices from `base` on.
    pub fn matches_at(&self, base: usize, bones: &[Mat4]) -> bool {
        self.local_to_bone
            .get(base..base + bones.len())
            .is_some_and(|slots| slots == bones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::{Quat, Vec3};

    #[test]
    fn mul34_matches_affine_product() {
        let a = Mat4::from_rotation_translation(Quat::from_rotation_y(0.7), Vec3::new(1.0, 2.0, 3.0));
        let b = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::from_rotation_x(-0.3),
            Vec3::new(-4.0, 0.5, 0.0),
        );
        let expect = a * b;
        let got = mul34(&a, &b);
        for (x, y) in got.to_cols_array().iter().zip(expect.to_cols_array()) {
            assert_relative_eq!(*x, y, epsilon = 1e-5);
        }
    }

    #[test]
    fn grow_and_bone_transform() {
        let mut p = MatrixPalette::default();
        assert_eq!(p.grow(2), 0);
        assert_eq!(p.grow(3), 2);
        assert_eq!(p.len(), 5);

        let l2b = Mat4::from_translation(Vec3::X);
        p.set_initial_bone(3, l2b, l2b.inverse());
        let bone = Mat4::from_translation(Vec3::Y);
        p.set_bone_transform(3, &bone, &bone.inverse());
        let moved = p.local_to_world[3].transform_point3(Vec3::ZERO);
        assert_relative_eq!(moved.x, 1.0);
        assert_relative_eq!(moved.y, 1.0);
        assert!(p.matches_at(3, &[l2b]));
        assert!(!p.matches_at(4, &[l2b, l2b]));
    }
}

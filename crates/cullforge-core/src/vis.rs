//! Visibility regions.
//!
//! A region is a volume of space with an index into the visibility bit sets.
//! Each frame [`VisMgr::eval`] works out which regions contain the viewer and
//! produces two sets: `vis_set` (regions whose members may be drawn) and
//! `vis_not` (regions whose members must not be drawn). Drawables and
//! occluders tag themselves with region indices and are filtered against
//! these sets.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::bits::BitVector;
use crate::math::Aabb;

/// A registered visibility region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisRegion {
    /// Bit index in the visibility sets
    pub index: usize,
    /// Members of this region are hidden while the viewer is inside it
    pub is_not: bool,
    /// Entering this region hides everything tagged only as normal
    pub replace_normal: bool,
    /// Volume tested against the view position
    pub bounds: Aabb,
    /// Disabled regions are skipped by `eval`
    pub disabled: bool,
}

impl VisRegion {
    /// Create an enabled region over `bounds`.
    #[must_use]
    pub const fn new(bounds: Aabb) -> Self {
        Self {
            index: 0,
            is_not: false,
            replace_normal: false,
            bounds,
            disabled: false,
        }
    }

    /// Mark the region as an exclusion region.
    #[must_use]
    pub const fn with_is_not(mut self, is_not: bool) -> Self {
        self.is_not = is_not;
        self
    }

    /// Mark the region as replacing the normal set.
    #[must_use]
    pub const fn with_replace_normal(mut self, replace_normal: bool) -> Self {
        self.replace_normal = replace_normal;
        self
    }
}

/// Evaluates visibility regions into `vis_set`/`vis_not` bit sets.
#[derive(Clone, Debug, Default)]
pub struct VisMgr {
    regions: Vec<VisRegion>,
    vis_set: BitVector,
    vis_not: BitVector,
    forced: BitVector,
    normal_disabled: bool,
}

impl VisMgr {
    /// Everything not tagged with any region belongs here.
    pub const NORMAL: usize = 0;
    /// Reserved for player characters.
    pub const CHARACTER: usize = 1;
    const FIRST_REGION: usize = 2;

    /// Create a manager with no regions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a region and return its bit index.
    pub fn register_region(&mut self, mut region: VisRegion) -> usize {
        let index = Self::FIRST_REGION + self.regions.len();
        region.index = index;
        tracing::debug!(index, is_not = region.is_not, "registered vis region");
        self.regions.push(region);
        index
    }

    /// Look up a region by bit index.
    pub fn region(&self, index: usize) -> Option<&VisRegion> {
        index
            .checked_sub(Self::FIRST_REGION)
            .and_then(|i| self.regions.get(i))
    }

    /// Enable or disable a region.
    pub fn set_region_disabled(&mut self, index: usize, disabled: bool) {
        if let Some(i) = index.checked_sub(Self::FIRST_REGION) {
            if let Some(region) = self.regions.get_mut(i) {
                region.disabled = disabled;
            }
        }
    }

    /// Number of registered regions.
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// Force a bit into `vis_set` on every evaluation.
    pub fn force_vis_set(&mut self, index: usize, on: bool) {
        self.forced.set_bit(index, on);
    }

    /// Stop the `NORMAL` bit being set by `eval`.
    pub fn disable_normal(&mut self) {
        self.normal_disabled = true;
    }

    /// Let `eval` set the `NORMAL` bit again.
    pub fn enable_normal(&mut self) {
        self.normal_disabled = false;
    }

    /// Recompute the visibility sets for a viewer at `view_pos`.
    pub fn eval(&mut self, view_pos: Vec3) {
        self.vis_set.clear();
        self.vis_not.clear();
        if !self.normal_disabled {
            self.vis_set.set_bit(Self::NORMAL, true);
        }
        self.vis_set.or_assign(&self.forced);

        for region in &self.regions {
            if region.disabled || !region.bounds.contains_point(view_pos) {
                continue;
            }
            if region.is_not {
                self.vis_not.set_bit(region.index, true);
            } else {
                self.vis_set.set_bit(region.index, true);
            }
            if region.replace_normal {
                self.vis_set.clear_bit(Self::NORMAL);
            }
        }
    }

    /// Regions whose members may be drawn.
    pub const fn vis_set(&self) -> &BitVector {
        &self.vis_set
    }

    /// Regions whose members must not be drawn.
    pub const fn vis_not(&self) -> &BitVector {
        &self.vis_not
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(x: f32) -> Aabb {
        Aabb::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0))
    }

    #[test]
    fn normal_is_set_outside_all_regions() {
        let mut mgr = VisMgr::new();
        let room = mgr.register_region(VisRegion::new(unit_box_at(0.0)));
        assert_eq!(room, 2);

        mgr.eval(Vec3::splat(50.0));
        assert!(mgr.vis_set().is_bit_set(VisMgr::NORMAL));
        assert!(!mgr.vis_set().is_bit_set(room));
        assert!(mgr.vis_not().is_empty());
    }

    #[test]
    fn regions_fill_set_and_not() {
        let mut mgr = VisMgr::new();
        let room = mgr.register_region(VisRegion::new(unit_box_at(0.0)));
        let hide = mgr.register_region(VisRegion::new(unit_box_at(0.0)).with_is_not(true));
        let other = mgr.register_region(VisRegion::new(unit_box_at(5.0)));

        mgr.eval(Vec3::splat(0.5));
        assert!(mgr.vis_set().is_bit_set(room));
        assert!(!mgr.vis_set().is_bit_set(hide));
        assert!(mgr.vis_not().is_bit_set(hide));
        assert!(!mgr.vis_set().is_bit_set(other));
        assert!(mgr.vis_set().is_bit_set(VisMgr::NORMAL));
    }

    #[test]
    fn replace_normal_and_disabled() {
        let mut mgr = VisMgr::new();
        let inner = mgr.register_region(VisRegion::new(unit_box_at(0.0)).with_replace_normal(true));

        mgr.eval(Vec3::splat(0.5));
        assert!(!mgr.vis_set().is_bit_set(VisMgr::NORMAL));
        assert!(mgr.vis_set().is_bit_set(inner));

        mgr.set_region_disabled(inner, true);
        mgr.eval(Vec3::splat(0.5));
        assert!(mgr.vis_set().is_bit_set(VisMgr::NORMAL));
        assert!(!mgr.vis_set().is_bit_set(inner));
    }

    #[test]
    fn forced_bits_and_disabled_normal() {
        let mut mgr = VisMgr::new();
        mgr.force_vis_set(VisMgr::CHARACTER, true);
        mgr.disable_normal();
        mgr.eval(Vec3::ZERO);
        assert!(mgr.vis_set().is_bit_set(VisMgr::CHARACTER));
        assert!(!mgr.vis_set().is_bit_set(VisMgr::NORMAL));

        mgr.enable_normal();
        mgr.force_vis_set(VisMgr::CHARACTER, false);
        mgr.eval(Vec3::ZERO);
        assert_eq!(mgr.vis_set(), &BitVector::from_bits([VisMgr::NORMAL]));
    }
}

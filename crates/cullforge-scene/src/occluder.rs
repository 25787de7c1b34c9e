//! Occluders and the cull polygons they contribute.
//!
//! An occluder is a set of convex, world-space polygons with a priority.
//! Each frame the page tree manager ranks visible occluders, filters their
//! polygons by facing and hands the nearest ones to the pipeline, which
//! turns each into a shadow volume: the region behind the polygon as seen
//! from the viewer.

use bitflags::bitflags;
use cullforge_core::{Aabb, BitVector, VisMgr};
use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

bitflags! {
    /// Cull polygon behaviour.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CullPolyFlags: u8 {
        /// Cuts a window into the occluders around it instead of occluding
        const HOLE = 0x1;
        /// Occludes from both sides
        const TWO_SIDED = 0x2;
    }
}

/// Convex planar polygon in world space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CullPoly {
    pub flags: CullPolyFlags,
    pub verts: Vec<Vec3>,
    /// Unit plane normal, from the counter-clockwise winding
    pub norm: Vec3,
    /// Plane offset: `norm · p + dist == 0` on the plane
    pub dist: f32,
    pub center: Vec3,
    pub radius: f32,
}

impl CullPoly {
    /// Polygon through `verts`, which must be convex, planar and wound
    /// counter-clockwise when seen from the front.
    #[must_use]
    pub fn new(flags: CullPolyFlags, verts: Vec<Vec3>) -> Self {
        let norm = match verts.as_slice() {
            [a, b, c, ..] => (*b - *a).cross(*c - *a).normalize_or_zero(),
            _ => Vec3::ZERO,
        };
        let dist = verts.first().map_or(0.0, |v| -norm.dot(*v));
        #[allow(clippy::cast_precision_loss)]
        let center = if verts.is_empty() {
            Vec3::ZERO
        } else {
            verts.iter().copied().sum::<Vec3>() / verts.len() as f32
        };
        let radius = verts
            .iter()
            .map(|v| v.distance(center))
            .fold(0.0, f32::max);
        Self {
            flags,
            verts,
            norm,
            dist,
            center,
            radius,
        }
    }

    #[inline]
    pub const fn is_hole(&self) -> bool {
        self.flags.contains(CullPolyFlags::HOLE)
    }

    #[inline]
    pub const fn is_two_sided(&self) -> bool {
        self.flags.contains(CullPolyFlags::TWO_SIDED)
    }

    /// Signed distance of `p` from the polygon's plane.
    #[inline]
    pub fn plane_distance(&self, p: Vec3) -> f32 {
        self.norm.dot(p) + self.dist
    }

    /// Returns true if the viewer sees the back of the polygon (or is on
    /// its plane).
    #[inline]
    pub fn is_back_facing(&self, view_pos: Vec3) -> bool {
        self.plane_distance(view_pos) <= 0.0
    }

    /// The volume hidden behind this polygon from `view_pos`.
    ///
    /// Returns `None` for degenerate polygons and when the viewer lies on
    /// the polygon's plane.
    pub fn shadow_volume(&self, view_pos: Vec3) -> Option<ShadowVolume> {
        if self.verts.len() < 3 || self.norm == Vec3::ZERO {
            return None;
        }
        let side = self.plane_distance(view_pos);
        if side == 0.0 {
            return None;
        }

        let mut planes = Vec::with_capacity(self.verts.len() + 1);
        // Far side of the polygon's own plane
        let cap = if side > 0.0 { -self.norm } else { self.norm };
        planes.push(cap.extend(-cap.dot(self.verts[0])));

        for (i, &a) in self.verts.iter().enumerate() {
            let b = self.verts[(i + 1) % self.verts.len()];
            let mut n = (a - view_pos).cross(b - view_pos);
            if n.dot(self.center - view_pos) < 0.0 {
                n = -n;
            }
            planes.push(n.extend(-n.dot(view_pos)));
        }
        Some(ShadowVolume { planes })
    }
}

/// Convex region bounded by planes; a point is inside when it is on the
/// non-negative side of every plane.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadowVolume {
    planes: Vec<Vec4>,
}

impl ShadowVolume {
    #[inline]
    fn distance(plane: Vec4, p: Vec3) -> f32 {
        plane.truncate().dot(p) + plane.w
    }

    /// Returns true if the whole box is inside the volume.
    pub fn contains_box(&self, bounds: &Aabb) -> bool {
        let Some(corners) = bounds.corners() else {
            return false;
        };
        self.planes
            .iter()
            .all(|&pl| corners.iter().all(|&c| Self::distance(pl, c) >= 0.0))
    }

    /// Returns true if the box certainly does not reach into the volume.
    pub fn excludes_box(&self, bounds: &Aabb) -> bool {
        let Some(corners) = bounds.corners() else {
            return true;
        };
        self.planes
            .iter()
            .any(|&pl| corners.iter().all(|&c| Self::distance(pl, c) < 0.0))
    }
}

/// A prioritized set of cull polygons.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Occluder {
    polys: Vec<CullPoly>,
    world_bounds: Aabb,
    priority: f32,
    vis_set: BitVector,
    vis_not: BitVector,
}

impl Occluder {
    /// Occluder over `polys`, visible in the normal region.
    #[must_use]
    pub fn new(priority: f32, polys: Vec<CullPoly>) -> Self {
        let world_bounds = Aabb::from_points(polys.iter().flat_map(|p| p.verts.iter().copied()));
        Self {
            polys,
            world_bounds,
            priority,
            vis_set: BitVector::from_bits([VisMgr::NORMAL]),
            vis_not: BitVector::new(),
        }
    }

    #[inline]
    pub fn polys(&self) -> &[CullPoly] {
        &self.polys
    }

    #[inline]
    pub const fn world_bounds(&self) -> &Aabb {
        &self.world_bounds
    }

    #[inline]
    pub const fn priority(&self) -> f32 {
        self.priority
    }

    /// Add or remove membership of visibility region `region`.
    ///
    /// An is-not region hides the occluder while the viewer is inside it.
    pub fn set_vis_region(&mut self, region: usize, is_not: bool, on: bool) {
        if is_not {
            self.vis_not.set_bit(region, on);
        } else {
            self.vis_set.set_bit(region, on);
        }
    }

    /// Returns true if the occluder belongs to a region in `vis_set`.
    #[inline]
    pub fn in_vis_set(&self, vis_set: &BitVector) -> bool {
        self.vis_set.overlap(vis_set)
    }

    /// Returns true if the occluder is excluded by a region in `vis_not`.
    #[inline]
    pub fn in_vis_not(&self, vis_not: &BitVector) -> bool {
        self.vis_not.overlap(vis_not)
    }
}

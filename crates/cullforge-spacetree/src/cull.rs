//! Harvest predicates.

use cullforge_core::{Aabb, Containment, Frustum};

/// Outcome of testing a node's bounds during a harvest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullResult {
    /// Nothing below is wanted
    Culled,
    /// Everything below is wanted; stop testing
    Clear,
    /// Partially wanted; test the children
    Split,
}

impl From<Containment> for CullResult {
    fn from(containment: Containment) -> Self {
        match containment {
            Containment::Outside => Self::Culled,
            Containment::Inside => Self::Clear,
            Containment::Intersecting => Self::Split,
        }
    }
}

/// Three-way volume test applied to node bounds during a harvest.
pub trait CullPredicate {
    /// Classify `bounds` against this volume.
    fn test(&self, bounds: &Aabb) -> CullResult;
}

impl<T: CullPredicate + ?Sized> CullPredicate for &T {
    fn test(&self, bounds: &Aabb) -> CullResult {
        (**self).test(bounds)
    }
}

impl CullPredicate for Frustum {
    fn test(&self, bounds: &Aabb) -> CullResult {
        self.classify_aabb(bounds).into()
    }
}

/// Accepts everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl CullPredicate for AcceptAll {
    fn test(&self, _bounds: &Aabb) -> CullResult {
        CullResult::Clear
    }
}

/// Box overlap test.
#[derive(Clone, Copy, Debug)]
pub struct BoundsIsect(pub Aabb);

impl CullPredicate for BoundsIsect {
    fn test(&self, bounds: &Aabb) -> CullResult {
        if !self.0.intersects(bounds) {
            CullResult::Culled
        } else if self.0.contains(bounds) {
            CullResult::Clear
        } else {
            CullResult::Split
        }
    }
}

/// Adapts a closure into a predicate.
#[derive(Clone, Copy, Debug)]
pub struct CullFn<F>(pub F);

impl<F: Fn(&Aabb) -> CullResult> CullPredicate for CullFn<F> {
    fn test(&self, bounds: &Aabb) -> CullResult {
        (self.0)(bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn bounds_isect_three_way() {
        let isect = BoundsIsect(Aabb::new(Vec3::ZERO, Vec3::splat(10.0)));
        let inside = Aabb::new(Vec3::ONE, Vec3::splat(2.0));
        let straddle = Aabb::new(Vec3::splat(9.0), Vec3::splat(11.0));
        let outside = Aabb::new(Vec3::splat(20.0), Vec3::splat(21.0));
        assert_eq!(isect.test(&inside), CullResult::Clear);
        assert_eq!(isect.test(&straddle), CullResult::Split);
        assert_eq!(isect.test(&outside), CullResult::Culled);
        assert_eq!(isect.test(&Aabb::EMPTY), CullResult::Culled);
    }

    #[test]
    fn closures_and_references() {
        let split = CullFn(|_: &Aabb| CullResult::Split);
        let by_ref: &dyn CullPredicate = &split;
        assert_eq!(by_ref.test(&Aabb::EMPTY), CullResult::Split);
        assert_eq!((&AcceptAll).test(&Aabb::EMPTY), CullResult::Clear);
    }
}

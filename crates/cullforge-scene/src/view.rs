//! Headless pipeline.
//!
//! [`ViewPipeline`] culls against a camera frustum and the shadow volumes
//! of submitted cull polygons, face-sorts drawables that ask for it, and
//! records draw calls instead of issuing them.

use cullforge_core::{Aabb, Frustum, VisMgr};
use cullforge_drawable::{DrawableProps, DrawableSpans, FaceSortScratch};
use cullforge_spacetree::{CullPredicate, CullResult};
use glam::{Mat4, Vec3};
use tracing::trace;

use crate::camera::Camera;
use crate::occluder::{CullPoly, ShadowVolume};
use crate::pipeline::{DrawableId, PipeDebugFlags, Pipeline};

/// Frustum test refined by occluder shadows.
///
/// A box is culled when it is outside the frustum, or when it lies wholly
/// in some occluder's shadow and reaches into no hole's shadow.
#[derive(Clone, Debug)]
pub struct ViewCull {
    frustum: Frustum,
    shadows: Vec<ShadowVolume>,
    holes: Vec<ShadowVolume>,
}

impl ViewCull {
    #[must_use]
    pub const fn new(frustum: Frustum) -> Self {
        Self {
            frustum,
            shadows: Vec::new(),
            holes: Vec::new(),
        }
    }

    /// Number of occluding shadow volumes in use.
    #[inline]
    pub fn num_shadows(&self) -> usize {
        self.shadows.len()
    }

    fn occluded(&self, bounds: &Aabb) -> bool {
        self.shadows.iter().any(|s| s.contains_box(bounds))
            && self.holes.iter().all(|h| h.excludes_box(bounds))
    }
}

impl CullPredicate for ViewCull {
    fn test(&self, bounds: &Aabb) -> CullResult {
        match self.frustum.test(bounds) {
            CullResult::Culled => CullResult::Culled,
            _ if self.occluded(bounds) => CullResult::Culled,
            // Children may be occluded even when this node is not
            CullResult::Clear if !self.shadows.is_empty() => CullResult::Split,
            result => result,
        }
    }
}

/// One recorded draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderCall {
    pub id: DrawableId,
    pub level: u32,
    pub spans: Vec<u16>,
}

/// Counters for the current frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub prepped: u32,
    pub render_calls: u32,
    pub spans_drawn: u32,
    pub occluder_polys: u32,
}

/// Records what a frame would draw.
#[derive(Debug)]
pub struct ViewPipeline {
    camera: Camera,
    cull: ViewCull,
    debug: PipeDebugFlags,
    local_to_world: Mat4,
    scratch: FaceSortScratch,
    vis_mgr_active: bool,
    stats: FrameStats,
    calls: Vec<RenderCall>,
}

impl ViewPipeline {
    #[must_use]
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            cull: ViewCull::new(camera.frustum()),
            debug: PipeDebugFlags::empty(),
            local_to_world: Mat4::IDENTITY,
            scratch: FaceSortScratch::new(),
            vis_mgr_active: false,
            stats: FrameStats::default(),
            calls: Vec::new(),
        }
    }

    #[inline]
    pub const fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Move the viewer. Submitted occluders are dropped, since their
    /// shadows depend on the view position.
    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
        self.cull = ViewCull::new(camera.frustum());
    }

    pub fn set_debug_flags(&mut self, flags: PipeDebugFlags) {
        self.debug = flags;
    }

    #[inline]
    pub const fn cull(&self) -> &ViewCull {
        &self.cull
    }

    #[inline]
    pub const fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Draws recorded since the last [`ViewPipeline::begin_frame`].
    #[inline]
    pub fn calls(&self) -> &[RenderCall] {
        &self.calls
    }

    #[inline]
    pub const fn vis_mgr_active(&self) -> bool {
        self.vis_mgr_active
    }

    /// Forget the previous frame's draws and counters.
    pub fn begin_frame(&mut self) {
        self.calls.clear();
        self.stats = FrameStats::default();
    }
}

impl Pipeline for ViewPipeline {
    fn view_position(&self) -> Vec3 {
        self.camera.position
    }

    fn world_to_camera(&self) -> Mat4 {
        self.camera.view_matrix()
    }

    fn local_to_world(&self) -> Mat4 {
        self.local_to_world
    }

    fn debug_flags(&self) -> PipeDebugFlags {
        self.debug
    }

    fn test_visible_world(&self, bounds: &Aabb) -> bool {
        self.cull.frustum.test_aabb(bounds)
    }

    fn visibility_test(&self) -> &dyn CullPredicate {
        &self.cull
    }

    fn submit_occluders(&mut self, polys: &mut dyn ExactSizeIterator<Item = &CullPoly>) {
        self.cull.shadows.clear();
        self.cull.holes.clear();
        #[allow(clippy::cast_possible_truncation)]
        {
            self.stats.occluder_polys = polys.len() as u32;
        }
        if self.debug.contains(PipeDebugFlags::NO_OCCLUSION) {
            return;
        }
        let view = self.camera.position;
        for poly in polys {
            if let Some(shadow) = poly.shadow_volume(view) {
                if poly.is_hole() {
                    self.cull.holes.push(shadow);
                } else {
                    self.cull.shadows.push(shadow);
                }
            }
        }
        trace!(
            shadows = self.cull.shadows.len(),
            holes = self.cull.holes.len(),
            "occluders submitted"
        );
    }

    fn clear_occluders(&mut self) {
        self.cull.shadows.clear();
        self.cull.holes.clear();
    }

    fn begin_vis_mgr(&mut self, vis_mgr: Option<&VisMgr>) {
        self.vis_mgr_active = vis_mgr.is_some();
    }

    fn end_vis_mgr(&mut self, _vis_mgr: Option<&VisMgr>) {
        self.vis_mgr_active = false;
    }

    fn prep_for_render(&mut self, drawable: &mut DrawableSpans, vis: &mut Vec<u16>, _vis_mgr: Option<&VisMgr>) {
        if drawable.has_drawable_property(DrawableProps::SORT_FACES)
            && !self.debug.contains(PipeDebugFlags::NO_FACE_SORT)
        {
            drawable.sort_visible_spans(vis, self.camera.position, &mut self.scratch);
        }
        drawable.prep_for_render();
        self.stats.prepped += 1;
    }

    fn render(&mut self, id: DrawableId, drawable: &DrawableSpans, vis: &[u16]) {
        if self.debug.contains(PipeDebugFlags::NO_RENDER) || vis.is_empty() {
            return;
        }
        self.local_to_world = drawable.local_to_world(None);
        self.stats.render_calls += 1;
        #[allow(clippy::cast_possible_truncation)]
        {
            self.stats.spans_drawn += vis.len() as u32;
        }
        self.calls.push(RenderCall {
            id,
            level: drawable.render_level().level(),
            spans: vis.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occluder::CullPolyFlags;

    fn wall_at(z: f32, flags: CullPolyFlags, half: f32) -> CullPoly {
        CullPoly::new(
            flags,
            vec![
                Vec3::new(-half, -half, z),
                Vec3::new(half, -half, z),
                Vec3::new(half, half, z),
                Vec3::new(-half, half, z),
            ],
        )
    }

    fn pipe() -> ViewPipeline {
        ViewPipeline::new(Camera::looking_at(Vec3::ZERO, Vec3::NEG_Z).with_aspect(1.0))
    }

    fn cube_at(z: f32) -> Aabb {
        Aabb::new(Vec3::new(-0.5, -0.5, z - 0.5), Vec3::new(0.5, 0.5, z + 0.5))
    }

    #[test]
    fn occluders_hide_boxes_behind_them() {
        let mut p = pipe();
        let wall = wall_at(-5.0, CullPolyFlags::empty(), 2.0);
        assert_eq!(p.visibility_test().test(&cube_at(-10.0)), CullResult::Clear);

        p.submit_occluders(&mut [&wall].into_iter());
        assert_eq!(p.visibility_test().test(&cube_at(-10.0)), CullResult::Culled);
        assert_ne!(p.visibility_test().test(&cube_at(-3.0)), CullResult::Culled);
        assert_eq!(p.stats().occluder_polys, 1);

        p.clear_occluders();
        assert_eq!(p.visibility_test().test(&cube_at(-10.0)), CullResult::Clear);
    }

    #[test]
    fn holes_let_boxes_through() {
        let mut p = pipe();
        let wall = wall_at(-5.0, CullPolyFlags::empty(), 2.0);
        let hole = wall_at(-5.0, CullPolyFlags::HOLE, 0.5);
        p.submit_occluders(&mut [&wall, &hole].into_iter());
        assert_ne!(p.visibility_test().test(&cube_at(-10.0)), CullResult::Culled);
        let off_axis = Aabb::new(Vec3::new(2.0, 2.0, -12.0), Vec3::new(2.5, 2.5, -11.0));
        assert_eq!(p.visibility_test().test(&off_axis), CullResult::Culled);
    }

    #[test]
    fn no_occlusion_flag_ignores_submissions() {
        let mut p = pipe();
        p.set_debug_flags(PipeDebugFlags::NO_OCCLUSION);
        p.submit_occluders(&mut [&wall_at(-5.0, CullPolyFlags::empty(), 2.0)].into_iter());
        assert_eq!(p.cull().num_shadows(), 0);
        assert_eq!(p.visibility_test().test(&cube_at(-10.0)), CullResult::Clear);
    }

    #[test]
    fn render_records_calls() {
        let mut p = pipe();
        let d = DrawableSpans::default();
        let id = DrawableId { node: 1, index: 2 };
        p.render(id, &d, &[4, 5]);
        p.render(id, &d, &[]);
        assert_eq!(p.calls().len(), 1);
        assert_eq!(p.calls()[0].spans, vec![4, 5]);
        assert_eq!(p.stats().spans_drawn, 2);

        p.begin_frame();
        assert!(p.calls().is_empty());
        assert_eq!(p.stats(), FrameStats::default());
    }
}

//! The render pipeline as seen by the page tree manager.

use bitflags::bitflags;
use cullforge_core::{Aabb, VisMgr};
use cullforge_drawable::DrawableSpans;
use cullforge_spacetree::{CullPredicate, SpaceTree};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::occluder::CullPoly;

bitflags! {
    /// Pipeline debugging switches.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct PipeDebugFlags: u32 {
        /// Harvest every enabled leaf, ignoring the view
        const SHOW_ALL_TREES = 0x1;
        /// Ignore submitted occluders
        const NO_OCCLUSION = 0x2;
        /// Skip per-triangle sorting in prep
        const NO_FACE_SORT = 0x4;
        /// Prep but do not draw
        const NO_RENDER = 0x8;
    }
}

/// Names a drawable by its scene node's position in the manager and its
/// position within that node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DrawableId {
    pub node: u16,
    pub index: u16,
}

/// A drawable and the positions of its spans to draw this frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawVisList {
    pub drawable: DrawableId,
    pub vis: Vec<u16>,
}

/// Everything the page tree manager needs from a renderer.
pub trait Pipeline {
    /// Viewer position in world space.
    fn view_position(&self) -> Vec3;

    fn world_to_camera(&self) -> Mat4;

    /// Transform of the drawable most recently rendered.
    fn local_to_world(&self) -> Mat4;

    fn debug_flags(&self) -> PipeDebugFlags;

    /// Returns true if any part of `bounds` may be on screen.
    fn test_visible_world(&self, bounds: &Aabb) -> bool;

    /// The combined view and occlusion test applied by harvests.
    fn visibility_test(&self) -> &dyn CullPredicate;

    /// Collect the leaves of `tree` that may be visible.
    fn harvest_visible(&self, tree: &SpaceTree, out: &mut Vec<u16>) {
        if self.debug_flags().contains(PipeDebugFlags::SHOW_ALL_TREES) {
            tree.harvest_enabled_leaves(None, out);
        } else {
            tree.harvest_leaves(self.visibility_test(), None, out);
        }
    }

    /// Replace this frame's occluding polygons, nearest first.
    fn submit_occluders(&mut self, polys: &mut dyn ExactSizeIterator<Item = &CullPoly>);

    /// Drop the occluding polygons of the finished frame.
    fn clear_occluders(&mut self) {}

    fn begin_vis_mgr(&mut self, vis_mgr: Option<&VisMgr>);

    fn end_vis_mgr(&mut self, vis_mgr: Option<&VisMgr>);

    /// Get `drawable` ready to draw the spans in `vis`. May reorder or
    /// trim `vis`.
    fn prep_for_render(&mut self, drawable: &mut DrawableSpans, vis: &mut Vec<u16>, vis_mgr: Option<&VisMgr>);

    /// Draw the spans in `vis`, in order.
    fn render(&mut self, id: DrawableId, drawable: &DrawableSpans, vis: &[u16]);
}

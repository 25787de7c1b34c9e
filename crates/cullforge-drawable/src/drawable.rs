//! The drawable: spans, their storage and their space tree.
//!
//! Span positions are shared by the span array, the DI table, the retained
//! source geometry and the space tree's leaves. Anything that inserts or
//! removes spans rewrites the DI table in bulk and throws the tree away; it
//! is rebuilt from span bounds on next use.

use cullforge_core::{Aabb, BitVector, RenderLevel, VisMgr};
use cullforge_spacetree::{CullPredicate, NodeFlags, SpaceTree, SpaceTreeMaker};
use glam::Mat4;
use tracing::{debug, warn};

#[cfg(feature = "profiling")]
use cullforge_profiler::{profile_scope, EventCategory};

use crate::buffer_group::BufferGroup;
use crate::config::DrawableConfig;
use crate::di::{DiIndex, DiTable};
use crate::flags::{Criteria, DrawableProps, SpanProps};
use crate::geometry::GeometrySpan;
use crate::material::MaterialSlots;
use crate::palette::MatrixPalette;
use crate::particle::ParticleSet;
use crate::span::Span;

/// Owner of a batch of spans and the buffer groups they draw from.
#[derive(Clone, Debug)]
pub struct DrawableSpans {
    pub(crate) config: DrawableConfig,
    pub(crate) props: DrawableProps,
    pub(crate) criteria: Criteria,
    pub(crate) render_level: RenderLevel,
    pub(crate) type_mask: u32,
    pub(crate) load_mask: u32,

    pub(crate) local_to_world: Mat4,
    pub(crate) world_to_local: Mat4,
    pub(crate) local_bounds: Aabb,
    pub(crate) world_bounds: Aabb,
    pub(crate) max_world_bounds: Aabb,

    pub(crate) spans: Vec<Span>,
    pub(crate) source_spans: Vec<Option<GeometrySpan>>,
    pub(crate) groups: Vec<BufferGroup>,
    pub(crate) materials: MaterialSlots,
    pub(crate) di: DiTable,
    pub(crate) palette: MatrixPalette,
    pub(crate) particle_sets: Vec<ParticleSet>,
    pub(crate) particle_spans: Vec<u32>,
    pub(crate) blending_spans: Vec<u32>,

    pub(crate) vis_set: BitVector,
    pub(crate) vis_not: BitVector,
    pub(crate) last_vis_set: BitVector,
    pub(crate) last_vis_not: BitVector,
    pub(crate) vis_cache: BitVector,
    pub(crate) use_vis_cache: bool,

    pub(crate) space_tree: Option<SpaceTree>,
    pub(crate) needs_cleanup: bool,
    pub(crate) ready_to_render: bool,
}

impl Default for DrawableSpans {
    fn default() -> Self {
        Self::new(DrawableConfig::default())
    }
}

/// Build a tree over span world bounds; no-draw spans start disabled.
pub(crate) fn build_space_tree(spans: &[Span]) -> SpaceTree {
    let mut maker = SpaceTreeMaker::new();
    for span in spans {
        maker.add_leaf(*span.world_bounds(), span.props().contains(SpanProps::NO_DRAW));
    }
    maker.make_tree()
}

/// The tree in `slot`, built from `spans` if missing.
pub(crate) fn tree_for<'a>(slot: &'a mut Option<SpaceTree>, spans: &[Span]) -> &'a mut SpaceTree {
    slot.get_or_insert_with(|| {
        debug!(spans = spans.len(), "rebuilding drawable space tree");
        build_space_tree(spans)
    })
}

/// Visibility cache from scratch: every span passing the sets, plus its
/// ancestors.
fn full_vis_cache(tree: &SpaceTree, spans: &[Span], vis_set: &BitVector, vis_not: &BitVector) -> BitVector {
    let mut cache = BitVector::new();
    for (i, span) in spans.iter().enumerate() {
        if span.core().passes_vis(vis_set, vis_not) {
            tree.enable_leaf(i, &mut cache);
        }
    }
    cache
}

impl DrawableSpans {
    /// Create an empty drawable.
    #[must_use]
    pub fn new(config: DrawableConfig) -> Self {
        Self {
            config,
            props: DrawableProps::empty(),
            criteria: Criteria::empty(),
            render_level: RenderLevel::default(),
            type_mask: 0,
            load_mask: u32::MAX,
            local_to_world: Mat4::IDENTITY,
            world_to_local: Mat4::IDENTITY,
            local_bounds: Aabb::EMPTY,
            world_bounds: Aabb::EMPTY,
            max_world_bounds: Aabb::EMPTY,
            spans: Vec::new(),
            source_spans: Vec::new(),
            groups: Vec::new(),
            materials: MaterialSlots::new(),
            di: DiTable::new(),
            palette: MatrixPalette::default(),
            particle_sets: Vec::new(),
            particle_spans: Vec::new(),
            blending_spans: Vec::new(),
            vis_set: BitVector::from_bits([VisMgr::NORMAL]),
            vis_not: BitVector::new(),
            last_vis_set: BitVector::new(),
            last_vis_not: BitVector::new(),
            vis_cache: BitVector::new(),
            use_vis_cache: false,
            space_tree: None,
            needs_cleanup: false,
            ready_to_render: false,
        }
    }

    /// Limits in use.
    #[inline]
    pub const fn config(&self) -> &DrawableConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Criteria and drawable-wide properties
    // ------------------------------------------------------------------

    /// Set the batching criteria and the matching drawable properties.
    pub fn set_criteria(
        &mut self,
        criteria: Criteria,
        render_level: RenderLevel,
        type_mask: u32,
        load_mask: u32,
    ) {
        self.criteria = criteria;
        self.render_level = render_level;
        self.type_mask = type_mask;
        self.load_mask = load_mask;
        self.props.remove(Criteria::all().to_props());
        self.props |= criteria.to_props();
    }

    /// Returns true if this drawable was set up with exactly these criteria.
    pub fn does_match(
        &self,
        criteria: Criteria,
        render_level: RenderLevel,
        type_mask: u32,
        load_mask: u32,
    ) -> bool {
        self.criteria == criteria
            && self.render_level == render_level
            && self.type_mask == type_mask
            && self.load_mask == load_mask
    }

    /// Batching criteria.
    #[inline]
    pub const fn criteria(&self) -> Criteria {
        self.criteria
    }

    /// Draw-order key.
    #[inline]
    pub const fn render_level(&self) -> RenderLevel {
        self.render_level
    }

    /// Drawable type bits.
    #[inline]
    pub const fn type_mask(&self) -> u32 {
        self.type_mask
    }

    /// Load mask.
    #[inline]
    pub const fn load_mask(&self) -> u32 {
        self.load_mask
    }

    /// Drawable-wide properties.
    #[inline]
    pub const fn props(&self) -> DrawableProps {
        self.props
    }

    /// Set or clear drawable-wide properties.
    pub fn set_drawable_property(&mut self, props: DrawableProps, on: bool) {
        self.props.set(props, on);
    }

    /// Returns true if any of `props` is set on the drawable.
    #[inline]
    pub const fn has_drawable_property(&self, props: DrawableProps) -> bool {
        self.props.intersects(props)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Number of spans.
    #[inline]
    pub fn num_spans(&self) -> usize {
        self.spans.len()
    }

    /// All spans, by position.
    #[inline]
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Span at position `idx`.
    #[inline]
    pub fn span(&self, idx: usize) -> &Span {
        &self.spans[idx]
    }

    /// Retained source geometry of span `idx`.
    pub fn source_span(&self, idx: usize) -> Option<&GeometrySpan> {
        self.source_spans.get(idx).and_then(Option::as_ref)
    }

    /// Buffer groups.
    #[inline]
    pub fn groups(&self) -> &[BufferGroup] {
        &self.groups
    }

    /// Material slots.
    #[inline]
    pub const fn materials(&self) -> &MaterialSlots {
        &self.materials
    }

    /// DI group `di`.
    #[inline]
    pub fn di_spans(&self, di: u32) -> &DiIndex {
        self.di.get(di)
    }

    /// The DI table.
    #[inline]
    pub const fn di_table(&self) -> &DiTable {
        &self.di
    }

    /// Skinning palette.
    #[inline]
    pub const fn palette(&self) -> &MatrixPalette {
        &self.palette
    }

    /// Particle sets.
    #[inline]
    pub fn particle_sets(&self) -> &[ParticleSet] {
        &self.particle_sets
    }

    /// Positions of particle spans.
    #[inline]
    pub fn particle_spans(&self) -> &[u32] {
        &self.particle_spans
    }

    /// Positions of spans blending more than two matrices per vertex.
    #[inline]
    pub fn blending_spans(&self) -> &[u32] {
        &self.blending_spans
    }

    /// Returns true if any span is skinned.
    pub fn is_skinned(&self) -> bool {
        self.spans.iter().any(|s| s.core().num_matrices > 0)
    }

    /// Returns true if removals are waiting for [`DrawableSpans::compact`].
    #[inline]
    pub const fn needs_compaction(&self) -> bool {
        self.needs_cleanup
    }

    /// Returns true if buffer groups were uploaded since the last change.
    #[inline]
    pub const fn is_ready_to_render(&self) -> bool {
        self.ready_to_render
    }

    /// Upload every buffer group that changed. Idempotent until the next
    /// mutation.
    pub fn prep_for_render(&mut self) {
        if !self.ready_to_render {
            for group in &mut self.groups {
                group.prep_for_rendering();
            }
            self.ready_to_render = true;
        }
    }

    // ------------------------------------------------------------------
    // Space tree
    // ------------------------------------------------------------------

    /// The span tree, rebuilt first if spans were added or removed.
    pub fn space_tree(&mut self) -> &SpaceTree {
        tree_for(&mut self.space_tree, &self.spans)
    }

    /// Returns true if the tree must be rebuilt or refreshed before its
    /// root bounds can be trusted.
    pub fn is_space_tree_dirty(&self) -> bool {
        self.space_tree.as_ref().map_or(true, SpaceTree::is_dirty)
    }

    /// Refresh the tree and return its root bounds.
    pub fn refresh_space_tree(&mut self) -> Aabb {
        let tree = tree_for(&mut self.space_tree, &self.spans);
        tree.refresh();
        tree.world_bounds()
    }

    /// Drop the tree and everything derived from it.
    pub(crate) fn trash_space_tree(&mut self) {
        self.space_tree = None;
        self.last_vis_set.clear();
        self.last_vis_not.clear();
        self.vis_cache.clear();
    }

    /// Collect visible span positions accepted by `pred`, honouring the
    /// visibility cache from the last [`DrawableSpans::set_vis_set`].
    pub fn harvest<P: CullPredicate + ?Sized>(&mut self, pred: &P, out: &mut Vec<u16>) {
        let tree = tree_for(&mut self.space_tree, &self.spans);
        tree.refresh();
        let cache = self.use_vis_cache.then_some(&self.vis_cache);
        tree.harvest_leaves(pred, cache, out);
    }

    // ------------------------------------------------------------------
    // Transforms
    // ------------------------------------------------------------------

    /// Local-to-world of the drawable (`None`) or of span `span`.
    pub fn local_to_world(&self, span: Option<usize>) -> Mat4 {
        span.map_or(self.local_to_world, |i| self.spans[i].core().local_to_world)
    }

    /// World-to-local of the drawable (`None`) or of span `span`.
    pub fn world_to_local(&self, span: Option<usize>) -> Mat4 {
        span.map_or(self.world_to_local, |i| self.spans[i].core().world_to_local)
    }

    /// Apply a transform to the drawable (`None`) or to DI group `di`.
    ///
    /// A matrix-only group updates its palette slots. A regular group moves
    /// each span, unless flagged [`crate::DiFlags::DONT_TRANSFORM`]. Spans
    /// whose new bounds overflow are hidden instead of moved.
    pub fn set_transform(&mut self, di: Option<u32>, l2w: &Mat4, w2l: &Mat4) {
        let Some(di) = di else {
            self.local_to_world = *l2w;
            self.world_to_local = *w2l;
            self.world_bounds = self.local_bounds.transform(l2w);
            return;
        };

        let group = self.di.get(di);
        if group.is_matrix_only() {
            for &slot in &group.indices {
                self.palette.set_bone_transform(slot as usize, l2w, w2l);
            }
        } else if !group.dont_transform() {
            let indices = group.indices.clone();
            for idx in indices {
                self.place_span(idx as usize, l2w, w2l);
            }
        }

        let tree = tree_for(&mut self.space_tree, &self.spans);
        tree.refresh();
        self.world_bounds = tree.world_bounds();
    }

    /// Apply a transform to a single span.
    pub fn set_native_transform(&mut self, span: usize, l2w: &Mat4, w2l: &Mat4) {
        self.place_span(span, l2w, w2l);
    }

    fn place_span(&mut self, idx: usize, l2w: &Mat4, w2l: &Mat4) {
        let core = self.spans[idx].core_mut();
        core.local_to_world = *l2w;
        core.world_to_local = *w2l;
        core.world_bounds = core.local_bounds.transform(l2w);
        let bounds = core.world_bounds;

        if let Some(Some(src)) = self.source_spans.get_mut(idx) {
            src.local_to_world = *l2w;
            src.world_to_local = *w2l;
        }

        let tree = tree_for(&mut self.space_tree, &self.spans);
        if bounds.exceeds(self.config.bounds_limit) {
            warn!(span = idx, ?bounds, "span bounds overflowed, hiding");
            tree.set_leaf_flag(idx, NodeFlags::DISABLED, true);
            self.spans[idx].core_mut().props |= SpanProps::NO_DRAW;
        } else {
            tree.move_leaf(idx, bounds);
        }
    }

    // ------------------------------------------------------------------
    // Span properties
    // ------------------------------------------------------------------

    /// Set or clear `props` on every span of DI group `di`. Toggling
    /// [`SpanProps::NO_DRAW`] also toggles the spans' tree leaves.
    pub fn set_native_property(&mut self, di: u32, props: SpanProps, on: bool) {
        let group = self.di.get(di);
        if group.is_matrix_only() {
            return;
        }
        let tree = tree_for(&mut self.space_tree, &self.spans);
        for &idx in &group.indices {
            let idx = idx as usize;
            self.spans[idx].core_mut().props.set(props, on);
            if props.contains(SpanProps::NO_DRAW) {
                tree.set_leaf_flag(idx, NodeFlags::DISABLED, on);
            }
        }
        self.ready_to_render = false;
    }

    /// Returns true if any span of the drawable (`None`) or of DI group
    /// `di` carries any of `props`.
    pub fn native_property(&self, di: Option<u32>, props: SpanProps) -> bool {
        match di {
            None => self.spans.iter().any(|s| s.props().intersects(props)),
            Some(di) => {
                let group = self.di.get(di);
                !group.is_matrix_only()
                    && group
                        .indices
                        .iter()
                        .any(|&i| self.spans[i as usize].props().intersects(props))
            }
        }
    }

    /// Set or clear sub-type bits on every span of the drawable (`None`) or
    /// of DI group `di`.
    pub fn set_sub_type(&mut self, di: Option<u32>, sub_type: u32, on: bool) {
        let apply = |span: &mut Span| {
            let core = span.core_mut();
            if on {
                core.sub_type |= sub_type;
            } else {
                core.sub_type &= !sub_type;
            }
        };
        match di {
            None => self.spans.iter_mut().for_each(apply),
            Some(di) => {
                for &i in &self.di.get(di).indices {
                    apply(&mut self.spans[i as usize]);
                }
            }
        }
    }

    /// Union of sub-type bits over the drawable (`None`) or DI group `di`.
    pub fn sub_type(&self, di: Option<u32>) -> u32 {
        match di {
            None => self.spans.iter().fold(0, |acc, s| acc | s.core().sub_type),
            Some(di) => self
                .di
                .get(di)
                .indices
                .iter()
                .fold(0, |acc, &i| acc | self.spans[i as usize].core().sub_type),
        }
    }

    // ------------------------------------------------------------------
    // Bounds
    // ------------------------------------------------------------------

    fn union_over(&self, di: u32, pick: impl Fn(&Span) -> Aabb) -> Aabb {
        let group = self.di.get(di);
        if group.is_matrix_only() {
            return Aabb::EMPTY;
        }
        group
            .indices
            .iter()
            .fold(Aabb::EMPTY, |acc, &i| acc.merge(&pick(&self.spans[i as usize])))
    }

    /// Local bounds of the drawable (`None`) or union over DI group `di`.
    pub fn local_bounds(&self, di: Option<u32>) -> Aabb {
        di.map_or(self.local_bounds, |di| {
            self.union_over(di, |s| s.core().local_bounds)
        })
    }

    /// World bounds of the drawable (`None`) or union over DI group `di`.
    pub fn world_bounds(&self, di: Option<u32>) -> Aabb {
        di.map_or(self.world_bounds, |di| {
            self.union_over(di, |s| *s.world_bounds())
        })
    }

    /// Largest world bounds seen when geometry was last added.
    #[inline]
    pub const fn max_world_bounds(&self) -> Aabb {
        self.max_world_bounds
    }

    // ------------------------------------------------------------------
    // Visibility regions
    // ------------------------------------------------------------------

    /// Drawable-wide region membership.
    #[inline]
    pub const fn vis_set(&self) -> &BitVector {
        &self.vis_set
    }

    /// Drawable-wide region exclusions.
    #[inline]
    pub const fn vis_not(&self) -> &BitVector {
        &self.vis_not
    }

    /// The leaf cache harvests honour, if a manager is in use.
    pub fn vis_cache(&self) -> Option<&BitVector> {
        self.use_vis_cache.then_some(&self.vis_cache)
    }

    /// Tag every span of DI group `di` with visibility region `region`.
    ///
    /// An is-not region is recorded as an exclusion. A replace-normal region
    /// also takes the spans out of [`VisMgr::NORMAL`]. Matrix-only groups are
    /// ignored.
    pub fn set_di_span_vis_set(
        &mut self,
        di: u32,
        region: usize,
        is_not: bool,
        replace_normal: bool,
        on: bool,
    ) {
        let group = self.di.get(di);
        if group.is_matrix_only() {
            return;
        }
        for &idx in &group.indices {
            let core = self.spans[idx as usize].core_mut();
            if is_not {
                core.set_vis_not_bit(region, on);
            } else {
                core.set_vis_bit(region, on);
                if replace_normal {
                    core.set_vis_bit(VisMgr::NORMAL, false);
                }
            }
        }

        // The drawable sets must stay a superset of the span sets
        if is_not {
            let keep = on || self.spans.iter().any(|s| s.core().vis_not.is_bit_set(region));
            self.vis_not.set_bit(region, keep);
        } else {
            let keep = on || self.spans.iter().any(|s| s.vis_set().is_bit_set(region));
            self.vis_set.set_bit(region, keep);
        }

        self.last_vis_set.clear();
        self.last_vis_not.clear();
    }

    /// Update the visibility cache for this frame's region sets.
    ///
    /// Work is done only when the sets changed in a region some span of this
    /// drawable cares about. Without a manager the cache is not used.
    pub fn set_vis_set(&mut self, mgr: Option<&VisMgr>) {
        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::VisSelect);

        let Some(mgr) = mgr else {
            self.use_vis_cache = false;
            return;
        };
        self.use_vis_cache = true;

        let mut changed = mgr.vis_set().clone();
        changed.xor_assign(&self.last_vis_set);
        changed.and_assign(&self.vis_set);

        let mut changed_not = mgr.vis_not().clone();
        changed_not.xor_assign(&self.last_vis_not);
        changed_not.and_assign(&self.vis_not);
        changed.or_assign(&changed_not);

        let tree = tree_for(&mut self.space_tree, &self.spans);
        if changed.is_empty() {
            debug_assert_eq!(
                self.vis_cache,
                full_vis_cache(tree, &self.spans, mgr.vis_set(), mgr.vis_not()),
                "incremental visibility cache diverged"
            );
            return;
        }

        self.vis_cache = full_vis_cache(tree, &self.spans, mgr.vis_set(), mgr.vis_not());
        self.last_vis_set.assign(mgr.vis_set());
        self.last_vis_not.assign(mgr.vis_not());
    }

    // ------------------------------------------------------------------
    // Skinning
    // ------------------------------------------------------------------

    /// Recompute world bounds of skinned, drawable spans from the current
    /// palette.
    ///
    /// Each span's local bounds are placed under its max-bone and pen-bone
    /// matrices (or its own transform where either is unset) and the union
    /// becomes its world bounds.
    pub fn update_palette_bounds(&mut self) {
        let tree = tree_for(&mut self.space_tree, &self.spans);
        for (i, span) in self.spans.iter_mut().enumerate() {
            let core = span.core_mut();
            if core.num_matrices == 0 || core.props.contains(SpanProps::NO_DRAW) {
                continue;
            }
            let pick = |bone: u16| {
                if bone == 0 {
                    core.local_to_world
                } else {
                    self.palette.local_to_world[(core.base_matrix + u32::from(bone)) as usize]
                }
            };
            let first = core.local_bounds.transform(&pick(core.max_bone));
            let second = core.local_bounds.transform(&pick(core.pen_bone));
            core.world_bounds = first.merge(&second);
            tree.move_leaf(i, core.world_bounds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::AppendOptions;
    use approx::assert_relative_eq;
    use cullforge_core::VisRegion;
    use cullforge_spacetree::AcceptAll;
    use glam::Vec3;

    fn cube_at(x: f32) -> GeometrySpan {
        GeometrySpan::cube(Aabb::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0)))
    }

    #[test]
    fn criteria_round_trip() {
        let mut d = DrawableSpans::default();
        let level = RenderLevel::new(RenderLevel::BLEND_MAJOR, 3);
        d.set_criteria(Criteria::SORT_FACES, level, 2, 1);
        assert!(d.does_match(Criteria::SORT_FACES, level, 2, 1));
        assert!(!d.does_match(Criteria::SORT_FACES, level, 2, 0));
        assert!(d.has_drawable_property(DrawableProps::SORT_FACES));
        d.set_criteria(Criteria::SORT_SPANS, level, 2, 1);
        assert!(!d.has_drawable_property(DrawableProps::SORT_FACES));
        assert!(d.has_drawable_property(DrawableProps::SORT_SPANS));
    }

    #[test]
    fn transform_moves_spans_and_drawable_bounds() {
        let mut d = DrawableSpans::default();
        let di = d
            .append_di_spans(vec![cube_at(0.0), cube_at(3.0)], AppendOptions::default())
            .unwrap();
        let l2w = Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0));
        d.set_transform(Some(di), &l2w, &l2w.inverse());

        let wb = d.world_bounds(None);
        assert_relative_eq!(wb.min.y, 10.0);
        assert_relative_eq!(wb.max.x, 4.0);
        assert_eq!(d.world_bounds(Some(di)), wb);
        assert_eq!(d.source_span(1).map(|s| s.local_to_world), Some(l2w));
    }

    #[test]
    fn overflowing_transform_hides_span() {
        let mut d = DrawableSpans::default();
        let di = d
            .append_di_spans(vec![cube_at(0.0)], AppendOptions::default())
            .unwrap();
        let far = Mat4::from_translation(Vec3::new(2.0e5, 0.0, 0.0));
        d.set_transform(Some(di), &far, &far.inverse());

        assert!(d.native_property(Some(di), SpanProps::NO_DRAW));
        let mut out = Vec::new();
        d.harvest(&AcceptAll, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn no_draw_toggles_leaves() {
        let mut d = DrawableSpans::default();
        let a = d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default()).unwrap();
        let b = d.append_di_spans(vec![cube_at(5.0)], AppendOptions::default()).unwrap();

        d.set_native_property(a, SpanProps::NO_DRAW, true);
        let mut out = Vec::new();
        d.harvest(&AcceptAll, &mut out);
        assert_eq!(out, vec![1]);
        assert!(d.native_property(Some(a), SpanProps::NO_DRAW));
        assert!(!d.native_property(Some(b), SpanProps::NO_DRAW));

        d.set_native_property(a, SpanProps::NO_DRAW, false);
        out.clear();
        d.harvest(&AcceptAll, &mut out);
        out.sort_unstable();
        assert_eq!(out, vec![0, 1]);
    }

    #[test]
    fn sub_types_union() {
        let mut d = DrawableSpans::default();
        let a = d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default()).unwrap();
        d.append_di_spans(vec![cube_at(5.0)], AppendOptions::default()).unwrap();
        d.set_sub_type(Some(a), 0b100, true);
        d.set_sub_type(None, 0b001, true);
        assert_eq!(d.sub_type(Some(a)), 0b101);
        assert_eq!(d.sub_type(None), 0b101);
        d.set_sub_type(None, 0b100, false);
        assert_eq!(d.sub_type(None), 0b001);
    }

    #[test]
    fn vis_regions_filter_harvest() {
        let mut d = DrawableSpans::default();
        let inside = d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default()).unwrap();
        let hidden = d.append_di_spans(vec![cube_at(5.0)], AppendOptions::default()).unwrap();

        let mut mgr = VisMgr::new();
        let room = mgr.register_region(VisRegion::new(Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0))));
        let not = mgr.register_region(
            VisRegion::new(Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0))).with_is_not(true),
        );
        d.set_di_span_vis_set(inside, room, false, true, true);
        d.set_di_span_vis_set(hidden, not, true, false, true);

        // Outside every region: only NORMAL members show
        mgr.eval(Vec3::splat(100.0));
        d.set_vis_set(Some(&mgr));
        let mut out = Vec::new();
        d.harvest(&AcceptAll, &mut out);
        assert_eq!(out, vec![1]);

        // Inside both: the room span shows, the excluded one does not
        mgr.eval(Vec3::ZERO);
        d.set_vis_set(Some(&mgr));
        out.clear();
        d.harvest(&AcceptAll, &mut out);
        assert_eq!(out, vec![0]);

        // Same sets again take the no-op path
        d.set_vis_set(Some(&mgr));
        out.clear();
        d.harvest(&AcceptAll, &mut out);
        assert_eq!(out, vec![0]);

        // No manager: everything
        d.set_vis_set(None);
        out.clear();
        d.harvest(&AcceptAll, &mut out);
        out.sort_unstable();
        assert_eq!(out, vec![0, 1]);
    }

    #[test]
    fn prep_for_render_is_idempotent() {
        let mut d = DrawableSpans::default();
        d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default()).unwrap();
        assert!(!d.is_ready_to_render());
        d.prep_for_render();
        assert!(d.is_ready_to_render());
        assert!(d.groups().iter().all(|g| !g.is_dirty()));
        d.prep_for_render();
        assert!(d.is_ready_to_render());
    }
}

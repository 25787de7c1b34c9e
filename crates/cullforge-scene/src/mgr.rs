//! Frame driver over all loaded scene nodes.
//!
//! [`PageTreeMgr`] keeps a composite space tree with one leaf per scene
//! node. Each [`PageTreeMgr::render`] call:
//! 1. evaluates the visibility regions at the viewer,
//! 2. pulls moved or hidden nodes into the composite tree,
//! 3. refreshes the composite tree,
//! 4. ranks occluders and submits the nearest cull polygons,
//! 5. harvests visible nodes,
//! 6. collects each visible node's drawables and visible spans,
//! 7. orders drawables by render level,
//! 8. draws them, merging runs of span-sorted drawables at one level into
//!    a single back-to-front sequence.

use cullforge_core::{RadixSort, SortFlags, SortKey, VisMgr};
use cullforge_drawable::{DrawableProps, DrawableSpans};
use cullforge_spacetree::{CullPredicate, NodeFlags, SpaceTree, SpaceTreeMaker};
use glam::Vec3;
use tracing::{debug, trace};

#[cfg(feature = "profiling")]
use cullforge_profiler::{profile_count, profile_scope, Counter, EventCategory};

use crate::config::PageTreeConfig;
use crate::node::{OccluderList, SceneNode};
use crate::occluder::{CullPoly, Occluder};
use crate::pipeline::{DrawVisList, DrawableId, Pipeline};

/// Stable handle to a node added to a [`PageTreeMgr`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey(u32);

/// Which polygon of which queued occluder.
#[derive(Clone, Copy, Debug)]
struct PolyRef {
    node: u16,
    occluder: u32,
    poly: u32,
}

fn occluder_at(nodes: &[SceneNode], node: u16, index: u32) -> &Occluder {
    &nodes[usize::from(node)].occluders()[index as usize]
}

fn poly_at(nodes: &[SceneNode], r: PolyRef) -> &CullPoly {
    &occluder_at(nodes, r.node, r.occluder).polys()[r.poly as usize]
}

fn drawable_at(nodes: &mut [SceneNode], id: DrawableId) -> &mut DrawableSpans {
    nodes[usize::from(id.node)].drawable_mut(usize::from(id.index))
}

/// Working storage for render-level and span ordering.
#[derive(Debug, Default)]
struct DrawScratch {
    sorter: RadixSort,
    keys: Vec<SortKey>,
    /// (position in the run, span) for cross-drawable span sorting
    pairs: Vec<(u16, u16)>,
    drawn: Vec<usize>,
    vis: Vec<u16>,
}

impl DrawScratch {
    /// Order `lev_list` by ascending render level into `sorted`.
    fn sort_by_level(&mut self, nodes: &[SceneNode], lev_list: &mut [DrawVisList], sorted: &mut Vec<DrawVisList>) {
        sorted.clear();
        if lev_list.is_empty() {
            return;
        }
        self.keys.clear();
        self.keys.extend(lev_list.iter().map(|dv| {
            let d = nodes[usize::from(dv.drawable.node)].drawable(usize::from(dv.drawable.index));
            SortKey::from_u32(d.render_level().level())
        }));
        let order = self.sorter.sort(&self.keys, SortFlags::UNSIGNED);
        sorted.extend(order.iter().map(|&o| std::mem::take(&mut lev_list[o as usize])));
    }

    /// Sort the spans of a run of span-sorted drawables together by
    /// distance and draw them back to front.
    ///
    /// Every drawable in the run is prepped once, with its spans in their
    /// global order. Consecutive spans of one drawable go out in a single
    /// render call. Returns the number of spans drawn.
    fn render_sorting_spans<P: Pipeline + ?Sized>(
        &mut self,
        pipe: &mut P,
        nodes: &mut [SceneNode],
        run: &mut [DrawVisList],
        vis_mgr: Option<&VisMgr>,
        fudge: f32,
    ) -> usize {
        self.pairs.clear();
        #[allow(clippy::cast_possible_truncation)]
        for (k, dv) in run.iter().enumerate() {
            self.pairs.extend(dv.vis.iter().map(|&s| (k as u16, s)));
        }
        if self.pairs.is_empty() {
            return 0;
        }

        let view_pos = pipe.view_position();
        {
            #[cfg(feature = "profiling")]
            profile_scope!(EventCategory::ObjectSort);
            #[cfg(feature = "profiling")]
            profile_count!(Counter::ObjectsSorted, self.pairs.len());

            self.keys.clear();
            for &(k, s) in &self.pairs {
                let d = drawable_at(nodes, run[usize::from(k)].drawable);
                let key = if d.has_drawable_property(DrawableProps::SORT_AS_ONE) {
                    let center = d.space_tree().world_bounds().center();
                    -(center - view_pos).length_squared() + f32::from(s) * fudge
                } else {
                    let center = d.space_tree().leaf_bounds(usize::from(s)).center();
                    -(center - view_pos).length_squared()
                };
                self.keys.push(SortKey::from_f32(key));
            }
        }
        let order = self.sorter.sort(&self.keys, SortFlags::empty());

        for dv in run.iter_mut() {
            dv.vis.clear();
        }
        for &o in order {
            let (k, s) = self.pairs[o as usize];
            run[usize::from(k)].vis.push(s);
        }
        for dv in run.iter_mut() {
            pipe.prep_for_render(drawable_at(nodes, dv.drawable), &mut dv.vis, vis_mgr);
        }

        // Replay in global order, one render per stretch of one drawable.
        // Prep may have reordered or trimmed a drawable's list, so spans are
        // taken from it in turn rather than from the pairs.
        self.drawn.clear();
        self.drawn.resize(run.len(), 0);
        self.vis.clear();
        let mut cur = usize::from(self.pairs[order[0] as usize].0);
        for &o in order {
            let k = usize::from(self.pairs[o as usize].0);
            if k != cur {
                if !self.vis.is_empty() {
                    let id = run[cur].drawable;
                    pipe.render(id, drawable_at(nodes, id), &self.vis);
                }
                self.vis.clear();
                cur = k;
            }
            if let Some(&span) = run[k].vis.get(self.drawn[k]) {
                self.vis.push(span);
                self.drawn[k] += 1;
            }
        }
        if !self.vis.is_empty() {
            let id = run[cur].drawable;
            pipe.render(id, drawable_at(nodes, id), &self.vis);
        }

        self.pairs.len()
    }
}

/// Culls and draws every scene node each frame.
#[derive(Debug, Default)]
pub struct PageTreeMgr {
    config: PageTreeConfig,
    nodes: Vec<SceneNode>,
    keys: Vec<NodeKey>,
    next_key: u32,
    space_tree: Option<SpaceTree>,
    vis_mgr: VisMgr,
    occluders: OccluderList,
    cull_polys: Vec<PolyRef>,
    sorted_polys: Vec<PolyRef>,
    occ_sorter: RadixSort,
    occ_keys: Vec<SortKey>,
    occ_refs: Vec<usize>,
    node_list: Vec<u16>,
    lev_list: Vec<DrawVisList>,
    sorted_list: Vec<DrawVisList>,
    draw: DrawScratch,
}

impl PageTreeMgr {
    /// Create an empty manager using `config`.
    #[must_use]
    pub fn new(config: PageTreeConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Current tunables.
    #[inline]
    pub const fn config(&self) -> &PageTreeConfig {
        &self.config
    }

    /// Replace the tunables; applies from the next frame.
    pub fn set_config(&mut self, config: PageTreeConfig) {
        self.config = config;
    }

    /// Visibility regions evaluated each frame.
    #[inline]
    pub const fn vis_mgr(&self) -> &VisMgr {
        &self.vis_mgr
    }

    /// Mutable access for registering and toggling regions.
    #[inline]
    pub fn vis_mgr_mut(&mut self) -> &mut VisMgr {
        &mut self.vis_mgr
    }

    fn active_vis_mgr(&self) -> Option<&VisMgr> {
        (!self.config.disable_vis_mgr).then_some(&self.vis_mgr)
    }

    /// Add a scene node. The composite tree is rebuilt on next use.
    ///
    /// # Panics
    ///
    /// Panics if the manager already holds `i16::MAX` nodes.
    pub fn add_node(&mut self, node: SceneNode) -> NodeKey {
        assert!(
            self.nodes.len() < i16::MAX as usize,
            "page tree manager is full"
        );
        let key = NodeKey(self.next_key);
        self.next_key += 1;
        debug!(node = node.name(), "adding scene node");
        self.nodes.push(node);
        self.keys.push(key);
        self.trash_space_tree();
        key
    }

    /// Remove a scene node and hand it back.
    pub fn remove_node(&mut self, key: NodeKey) -> Option<SceneNode> {
        let pos = self.keys.iter().position(|&k| k == key)?;
        self.keys.remove(pos);
        self.trash_space_tree();
        Some(self.nodes.remove(pos))
    }

    /// Drop every node.
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.keys.clear();
        self.trash_space_tree();
    }

    /// Look up a node by handle.
    pub fn node(&self, key: NodeKey) -> Option<&SceneNode> {
        let pos = self.keys.iter().position(|&k| k == key)?;
        Some(&self.nodes[pos])
    }

    /// Mutable lookup of a node by handle.
    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut SceneNode> {
        let pos = self.keys.iter().position(|&k| k == key)?;
        Some(&mut self.nodes[pos])
    }

    /// Position of a node in this frame's node order, as used by
    /// [`DrawableId::node`].
    pub fn node_position(&self, key: NodeKey) -> Option<u16> {
        #[allow(clippy::cast_possible_truncation)]
        self.keys.iter().position(|&k| k == key).map(|p| p as u16)
    }

    /// Number of nodes held.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn trash_space_tree(&mut self) {
        self.space_tree = None;
    }

    /// The composite tree, if any nodes exist.
    pub fn space_tree(&mut self) -> Option<&SpaceTree> {
        self.build_space_tree().map(|t| &*t)
    }

    fn build_space_tree(&mut self) -> Option<&mut SpaceTree> {
        if self.space_tree.is_none() {
            if self.nodes.is_empty() {
                return None;
            }
            let mut maker = SpaceTreeMaker::new();
            for node in &mut self.nodes {
                let bounds = node.refresh_space_tree();
                maker.add_leaf(bounds, node.is_empty());
            }
            self.space_tree = Some(maker.make_tree());
        }
        self.space_tree.as_mut()
    }

    /// Harvest every node against `pred` into drawable/span lists, using
    /// each drawable's current visibility cache. Returns false if nothing
    /// was found.
    pub fn harvest<C: CullPredicate + ?Sized>(&mut self, pred: &C, out: &mut Vec<DrawVisList>) -> bool {
        out.clear();
        if self.build_space_tree().is_none() {
            return false;
        }
        let Some(tree) = self.space_tree.as_mut() else {
            return false;
        };
        self.node_list.clear();
        tree.refresh();
        tree.harvest_leaves(pred, None, &mut self.node_list);
        for &idx in &self.node_list {
            self.nodes[usize::from(idx)].harvest(idx, pred, out);
        }
        !out.is_empty()
    }

    /// Cull and draw one frame through `pipe`. Returns the number of spans
    /// drawn.
    pub fn render<P: Pipeline + ?Sized>(&mut self, pipe: &mut P) -> usize {
        if self.build_space_tree().is_none() {
            trace!("no scene nodes, skipping render");
            return 0;
        }

        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::RenderScene);

        if !self.config.disable_vis_mgr {
            #[cfg(feature = "profiling")]
            profile_scope!(EventCategory::VisEval);
            self.vis_mgr.eval(pipe.view_position());
        }
        pipe.begin_vis_mgr(self.active_vis_mgr());

        self.refresh_tree();
        self.get_occlusion(pipe);

        self.node_list.clear();
        if let Some(tree) = self.space_tree.as_ref() {
            pipe.harvest_visible(tree, &mut self.node_list);
        }

        self.lev_list.clear();
        let vis_mgr = (!self.config.disable_vis_mgr).then_some(&self.vis_mgr);
        for &idx in &self.node_list {
            self.nodes[usize::from(idx)].collect_for_render(idx, &*pipe, &mut self.lev_list, vis_mgr);
        }

        let drawn = self.render_vis_list(pipe);

        self.reset_occlusion(pipe);
        pipe.end_vis_mgr(self.active_vis_mgr());
        drawn
    }

    /// Pull node changes into the composite tree and refresh it.
    fn refresh_tree(&mut self) {
        let Some(tree) = self.space_tree.as_mut() else {
            return;
        };
        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.sync();
            if node.is_space_tree_dirty() {
                let bounds = node.refresh_space_tree();
                tree.move_leaf(i, bounds);
                if !node.is_empty() && tree.has_leaf_flag(i, NodeFlags::DISABLED) {
                    tree.set_leaf_flag(i, NodeFlags::DISABLED, false);
                }
            }
        }
        tree.refresh();
    }

    /// Rank occluders, filter and sort their polygons, and hand the
    /// nearest to the pipeline. Returns true if any were submitted.
    fn get_occlusion<P: Pipeline + ?Sized>(&mut self, pipe: &mut P) -> bool {
        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::OccluderBuild);

        self.cull_polys.clear();
        self.occluders.clear();
        let vis_mgr = (!self.config.disable_vis_mgr).then_some(&self.vis_mgr);
        #[allow(clippy::cast_possible_truncation)]
        for (i, node) in self.nodes.iter().enumerate() {
            node.submit_occluders(i as u16, &mut self.occluders, vis_mgr);
        }

        if !self.gather_cull_polys(pipe) {
            return false;
        }
        #[cfg(feature = "profiling")]
        profile_count!(Counter::OccluderPolysProcessed, self.cull_polys.len());

        {
            #[cfg(feature = "profiling")]
            profile_scope!(EventCategory::OccluderPolySort);
            self.sort_cull_polys(pipe.view_position());
        }

        if self.sorted_polys.is_empty() {
            return false;
        }
        let nodes = &self.nodes;
        pipe.submit_occluders(&mut self.sorted_polys.iter().map(|&r| poly_at(nodes, r)));
        true
    }

    /// Keep queued occluders the pipeline can see, nearest and highest
    /// priority first, and collect their polygons.
    fn gather_cull_polys<P: Pipeline + ?Sized>(&mut self, pipe: &P) -> bool {
        if self.occluders.is_empty() {
            return false;
        }

        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::OccluderSort);

        let view_pos = pipe.view_position();
        self.occ_keys.clear();
        self.occ_refs.clear();
        for (i, r) in self.occluders.refs().iter().enumerate() {
            let occ = occluder_at(&self.nodes, r.node, r.index);
            if pipe.test_visible_world(occ.world_bounds()) {
                let inv_dist = -(view_pos - occ.world_bounds().center()).length().recip();
                self.occ_keys.push(SortKey::from_f32(occ.priority() * inv_dist));
                self.occ_refs.push(i);
            }
        }
        if self.occ_refs.is_empty() {
            return false;
        }

        let order = self.occ_sorter.sort(&self.occ_keys, SortFlags::empty());
        let used = order.len().min(self.config.max_occluders);
        #[cfg(feature = "profiling")]
        profile_count!(Counter::OccludersUsed, used);

        for &o in &order[..used] {
            let r = self.occluders.refs()[self.occ_refs[o as usize]];
            let occ = occluder_at(&self.nodes, r.node, r.index);
            #[allow(clippy::cast_possible_truncation)]
            self.cull_polys.extend((0..occ.polys().len()).map(|p| PolyRef {
                node: r.node,
                occluder: r.index,
                poly: p as u32,
            }));
        }
        !self.cull_polys.is_empty()
    }

    /// Drop polygons facing the wrong way and keep the nearest.
    ///
    /// Back-facing polygons survive only as holes or when two-sided;
    /// front-facing holes are dropped.
    fn sort_cull_polys(&mut self, view_pos: Vec3) {
        self.sorted_polys.clear();
        self.occ_keys.clear();
        self.occ_refs.clear();
        for (i, &r) in self.cull_polys.iter().enumerate() {
            let poly = poly_at(&self.nodes, r);
            let keep = if poly.is_back_facing(view_pos) {
                poly.is_hole() || poly.is_two_sided()
            } else {
                !poly.is_hole()
            };
            if keep {
                self.occ_keys.push(SortKey::from_f32((poly.center - view_pos).length_squared()));
                self.occ_refs.push(i);
            }
        }
        if self.occ_refs.is_empty() {
            return;
        }
        let order = self.occ_sorter.sort(&self.occ_keys, SortFlags::empty());
        let take = order.len().min(self.config.max_cull_polys);
        self.sorted_polys.extend(
            order[..take]
                .iter()
                .map(|&o| self.cull_polys[self.occ_refs[o as usize]]),
        );
    }

    fn reset_occlusion<P: Pipeline + ?Sized>(&mut self, pipe: &mut P) {
        self.cull_polys.clear();
        self.sorted_polys.clear();
        pipe.clear_occluders();
    }

    /// Draw this frame's lists in render level order.
    fn render_vis_list<P: Pipeline + ?Sized>(&mut self, pipe: &mut P) -> usize {
        self.draw.sort_by_level(&self.nodes, &mut self.lev_list, &mut self.sorted_list);
        if self.sorted_list.is_empty() {
            return 0;
        }

        let vis_mgr = (!self.config.disable_vis_mgr).then_some(&self.vis_mgr);
        let mut drawn = 0;
        let mut i = 0;
        while i < self.sorted_list.len() {
            let id = self.sorted_list[i].drawable;
            let d = drawable_at(&mut self.nodes, id);
            if d.has_drawable_property(DrawableProps::SORT_SPANS) {
                let level = d.render_level().level();
                let mut end = i + 1;
                while end < self.sorted_list.len() {
                    let next = drawable_at(&mut self.nodes, self.sorted_list[end].drawable);
                    if next.render_level().level() != level
                        || !next.has_drawable_property(DrawableProps::SORT_SPANS)
                    {
                        break;
                    }
                    end += 1;
                }
                drawn += self.draw.render_sorting_spans(
                    pipe,
                    &mut self.nodes,
                    &mut self.sorted_list[i..end],
                    vis_mgr,
                    self.config.sort_as_one_fudge,
                );
                i = end;
            } else {
                let dv = &mut self.sorted_list[i];
                pipe.prep_for_render(d, &mut dv.vis, vis_mgr);
                pipe.render(id, d, &dv.vis);
                drawn += dv.vis.len();
                i += 1;
            }
        }
        drawn
    }
}

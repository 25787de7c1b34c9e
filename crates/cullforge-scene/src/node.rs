//! Scene nodes: the unit the page tree manager culls first.
//!
//! A node owns a list of drawables and occluders and keeps its own space
//! tree with one leaf per drawable, bounded by that drawable's span tree.

use cullforge_core::{Aabb, VisMgr};
use cullforge_drawable::{DrawableProps, DrawableSpans};
use cullforge_spacetree::{CullPredicate, NodeFlags, SpaceTree, SpaceTreeMaker};
use tracing::debug;

use crate::occluder::Occluder;
use crate::pipeline::{DrawVisList, DrawableId, Pipeline};

/// Which occluder of which node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OccluderRef {
    pub node: u16,
    pub index: u32,
}

/// Occluders gathered from the scene for one frame.
#[derive(Clone, Debug, Default)]
pub struct OccluderList {
    refs: Vec<OccluderRef>,
}

impl OccluderList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the occluders of node `node` that the current visibility
    /// regions allow. Without a manager, all are queued.
    pub fn add_occluder_list(&mut self, node: u16, occluders: &[Occluder], vis_mgr: Option<&VisMgr>) {
        #[allow(clippy::cast_possible_truncation)]
        let refs = occluders.iter().enumerate().filter_map(|(i, occ)| {
            let keep = vis_mgr.map_or(true, |mgr| {
                !occ.in_vis_not(mgr.vis_not()) && occ.in_vis_set(mgr.vis_set())
            });
            keep.then_some(OccluderRef {
                node,
                index: i as u32,
            })
        });
        self.refs.extend(refs);
    }

    /// Queued occluders in submission order.
    #[inline]
    pub fn refs(&self) -> &[OccluderRef] {
        &self.refs
    }

    /// Number of queued occluders.
    #[inline]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns true if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Forget every queued occluder.
    pub fn clear(&mut self) {
        self.refs.clear();
    }
}

/// Drawables and occluders culled together.
#[derive(Debug, Default)]
pub struct SceneNode {
    name: String,
    drawables: Vec<DrawableSpans>,
    occluders: Vec<Occluder>,
    space_tree: Option<SpaceTree>,
    /// Bounds changed since the owner last refreshed this node
    dirty: bool,
}

fn drawable_hidden(d: &mut DrawableSpans) -> bool {
    d.has_drawable_property(DrawableProps::NO_DRAW) || d.space_tree().is_empty()
}

impl SceneNode {
    /// Create an empty node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Name given at creation.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a drawable and return its position in this node.
    ///
    /// # Panics
    ///
    /// Panics if the node already holds `u16::MAX` drawables.
    pub fn add_drawable(&mut self, drawable: DrawableSpans) -> u16 {
        assert!(
            self.drawables.len() < usize::from(u16::MAX),
            "too many drawables in scene node {}",
            self.name
        );
        #[allow(clippy::cast_possible_truncation)]
        let idx = self.drawables.len() as u16;
        self.drawables.push(drawable);
        self.space_tree = None;
        self.dirty = true;
        idx
    }

    /// Drawable at `idx`.
    #[inline]
    pub fn drawable(&self, idx: usize) -> &DrawableSpans {
        &self.drawables[idx]
    }

    /// Mutable drawable at `idx`. Changes are picked up by [`SceneNode::sync`].
    #[inline]
    pub fn drawable_mut(&mut self, idx: usize) -> &mut DrawableSpans {
        &mut self.drawables[idx]
    }

    /// All drawables in insertion order.
    #[inline]
    pub fn drawables(&self) -> &[DrawableSpans] {
        &self.drawables
    }

    /// Add an occluder culled with this node.
    pub fn add_occluder(&mut self, occluder: Occluder) {
        self.occluders.push(occluder);
    }

    /// All occluders in insertion order.
    #[inline]
    pub fn occluders(&self) -> &[Occluder] {
        &self.occluders
    }

    fn build_space_tree(&mut self) -> SpaceTree {
        let mut maker = SpaceTreeMaker::new();
        for d in &mut self.drawables {
            let bounds = d.refresh_space_tree();
            maker.add_leaf(bounds, drawable_hidden(d));
        }
        let tree = maker.make_tree();
        debug!(node = %self.name, drawables = self.drawables.len(), "built scene node tree");
        tree
    }

    fn tree(&mut self) -> &mut SpaceTree {
        let tree = match self.space_tree.take() {
            Some(tree) => tree,
            None => self.build_space_tree(),
        };
        self.space_tree.insert(tree)
    }

    /// The drawable tree, built first if needed.
    pub fn space_tree(&mut self) -> &SpaceTree {
        self.tree()
    }

    /// Returns true if the node's bounds changed since the last
    /// [`SceneNode::refresh_space_tree`].
    pub fn is_space_tree_dirty(&self) -> bool {
        self.dirty || self.space_tree.as_ref().map_or(true, SpaceTree::is_dirty)
    }

    /// Returns true if nothing in the node can be drawn.
    pub fn is_empty(&self) -> bool {
        self.space_tree.as_ref().map_or(self.drawables.is_empty(), |t| {
            #[allow(clippy::cast_sign_loss)]
            let root = t.node(t.root() as usize);
            t.is_empty() || root.has_flag(NodeFlags::DISABLED)
        })
    }

    /// Pull drawable changes into the node tree: moved drawables give
    /// their leaves new bounds, and drawables that became hidden or
    /// drawable again have their leaves disabled or enabled.
    pub fn sync(&mut self) {
        if self.space_tree.is_none() {
            self.tree();
            return;
        }
        let Some(tree) = self.space_tree.as_mut() else {
            return;
        };
        for (i, d) in self.drawables.iter_mut().enumerate() {
            let bounds = d.refresh_space_tree();
            if tree.leaf_bounds(i) != bounds {
                tree.move_leaf(i, bounds);
                self.dirty = true;
            }
            let hidden = drawable_hidden(d);
            if tree.has_leaf_flag(i, NodeFlags::DISABLED) != hidden {
                tree.set_leaf_flag(i, NodeFlags::DISABLED, hidden);
                self.dirty = true;
            }
        }
    }

    /// Refresh the node tree and return its root bounds.
    pub fn refresh_space_tree(&mut self) -> Aabb {
        self.dirty = false;
        let tree = self.tree();
        tree.refresh();
        tree.world_bounds()
    }

    /// Harvest visible drawables and their visible spans into `out`.
    ///
    /// Each harvested drawable first updates its visibility cache from
    /// `vis_mgr`. Drawables with no visible spans are left out.
    pub fn collect_for_render<P: Pipeline + ?Sized>(
        &mut self,
        node: u16,
        pipe: &P,
        out: &mut Vec<DrawVisList>,
        vis_mgr: Option<&VisMgr>,
    ) {
        let mut hits = Vec::new();
        pipe.harvest_visible(self.tree(), &mut hits);
        for index in hits {
            let d = &mut self.drawables[usize::from(index)];
            d.set_vis_set(vis_mgr);
            let mut vis = Vec::new();
            d.harvest(pipe.visibility_test(), &mut vis);
            if !vis.is_empty() {
                out.push(DrawVisList {
                    drawable: DrawableId { node, index },
                    vis,
                });
            }
        }
    }

    /// Harvest against an arbitrary volume, using each drawable's current
    /// visibility cache.
    pub fn harvest<C: CullPredicate + ?Sized>(&mut self, node: u16, pred: &C, out: &mut Vec<DrawVisList>) {
        let mut hits = Vec::new();
        self.tree().harvest_leaves(pred, None, &mut hits);
        for index in hits {
            let mut vis = Vec::new();
            self.drawables[usize::from(index)].harvest(pred, &mut vis);
            if !vis.is_empty() {
                out.push(DrawVisList {
                    drawable: DrawableId { node, index },
                    vis,
                });
            }
        }
    }

    /// Queue this node's occluders for the frame.
    pub fn submit_occluders(&self, node: u16, list: &mut OccluderList, vis_mgr: Option<&VisMgr>) {
        list.add_occluder_list(node, &self.occluders, vis_mgr);
    }
}

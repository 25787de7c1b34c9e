//! The space tree.
//!
//! A binary bounding volume hierarchy whose shape is fixed at build time and
//! whose bounds change as leaves move. Nodes live in one array: leaves first
//! (leaf `i` is node `i`), then internal nodes from the deepest level up to
//! the root.
//!
//! Moving a leaf only marks its ancestors dirty; [`SpaceTree::refresh`]
//! recomputes their bounds later in one pass. Flags such as
//! [`NodeFlags::DISABLED`] are summarised upward so that an internal node
//! carries a flag exactly when both of its children do.

use cullforge_core::{Aabb, BitVector, Error, Result};

#[cfg(feature = "profiling")]
use cullforge_profiler::{profile_scope, EventCategory};

use crate::cull::{CullPredicate, CullResult};
use crate::node::{NodeFlags, SpaceTreeNode, NO_PARENT};

/// Bounding volume tree over a fixed set of leaves.
#[derive(Clone, Debug, PartialEq)]
pub struct SpaceTree {
    pub(crate) nodes: Vec<SpaceTreeNode>,
    pub(crate) root: i16,
    pub(crate) num_leaves: u32,
}

impl Default for SpaceTree {
    fn default() -> Self {
        Self::empty()
    }
}

impl SpaceTree {
    /// A tree with no leaves: a single node flagged [`NodeFlags::EMPTY`].
    #[must_use]
    pub fn empty() -> Self {
        Self {
            nodes: vec![SpaceTreeNode::empty_root()],
            root: 0,
            num_leaves: 0,
        }
    }

    pub(crate) fn from_parts(nodes: Vec<SpaceTreeNode>, root: i16, num_leaves: u32) -> Self {
        Self {
            nodes,
            root,
            num_leaves,
        }
    }

    /// Returns true if the tree was built from no leaves.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.root_node().has_flag(NodeFlags::EMPTY)
    }

    /// Returns true if a move is waiting for [`SpaceTree::refresh`].
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.root_node().has_flag(NodeFlags::DIRTY)
    }

    /// Root node index.
    #[inline]
    pub const fn root(&self) -> i16 {
        self.root
    }

    /// Number of leaves.
    #[inline]
    pub const fn num_leaves(&self) -> u32 {
        self.num_leaves
    }

    /// Total node count.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Node by index.
    #[inline]
    pub fn node(&self, idx: usize) -> &SpaceTreeNode {
        &self.nodes[idx]
    }

    /// All nodes.
    #[inline]
    pub fn nodes(&self) -> &[SpaceTreeNode] {
        &self.nodes
    }

    #[inline]
    #[allow(clippy::cast_sign_loss)]
    fn root_node(&self) -> &SpaceTreeNode {
        &self.nodes[self.root as usize]
    }

    /// Bounds of the whole tree as of the last refresh.
    #[inline]
    pub fn world_bounds(&self) -> Aabb {
        self.root_node().world_bounds
    }

    /// Current bounds of one leaf.
    pub fn leaf_bounds(&self, idx: usize) -> Aabb {
        self.assert_leaf(idx);
        self.nodes[idx].world_bounds
    }

    fn assert_leaf(&self, idx: usize) {
        assert!(
            idx < self.num_leaves as usize,
            "leaf index {idx} out of range ({} leaves)",
            self.num_leaves
        );
    }

    /// Parent of `idx`, if any.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    fn parent(&self, idx: usize) -> Option<usize> {
        let parent = self.nodes[idx].parent;
        (parent != NO_PARENT).then_some(parent as usize)
    }

    #[inline]
    #[allow(clippy::cast_sign_loss)]
    fn children(&self, idx: usize) -> [usize; 2] {
        let [a, b] = self.nodes[idx].children;
        [a as usize, b as usize]
    }

    /// Flag `idx` and its ancestors dirty, stopping at the first ancestor
    /// that already is.
    fn dirty_from(&mut self, idx: usize) {
        self.nodes[idx].flags |= NodeFlags::DIRTY;
        let mut cur = self.parent(idx);
        while let Some(p) = cur {
            if self.nodes[p].has_flag(NodeFlags::DIRTY) {
                break;
            }
            self.nodes[p].flags |= NodeFlags::DIRTY;
            cur = self.parent(p);
        }
    }

    /// Give a leaf new bounds. Ancestors are updated by the next refresh.
    ///
    /// # Panics
    ///
    /// Panics if the tree is empty or `idx` is not a leaf index.
    pub fn move_leaf(&mut self, idx: usize, bounds: Aabb) {
        assert!(!self.is_empty(), "move_leaf on an empty space tree");
        self.assert_leaf(idx);
        self.nodes[idx].world_bounds = bounds;
        self.dirty_from(idx);
    }

    /// Recompute the bounds of every dirty node.
    pub fn refresh(&mut self) {
        if self.is_empty() {
            return;
        }
        #[allow(clippy::cast_sign_loss)]
        self.refresh_recur(self.root as usize);
    }

    fn refresh_recur(&mut self, idx: usize) {
        if !self.nodes[idx].has_flag(NodeFlags::DIRTY) {
            return;
        }
        if !self.nodes[idx].is_leaf() {
            let [a, b] = self.children(idx);
            self.refresh_recur(a);
            self.refresh_recur(b);
            self.nodes[idx].world_bounds = self.union_enabled(a, b);
        }
        self.nodes[idx].flags.remove(NodeFlags::DIRTY);
    }

    fn union_enabled(&self, a: usize, b: usize) -> Aabb {
        [a, b]
            .into_iter()
            .filter(|&c| !self.nodes[c].has_flag(NodeFlags::DISABLED))
            .fold(Aabb::EMPTY, |acc, c| acc.merge(&self.nodes[c].world_bounds))
    }

    /// Set or clear `flag` on a leaf and keep ancestor summaries in step.
    ///
    /// An ancestor gains the flag once both of its children carry it and
    /// loses it as soon as either does not. Changing
    /// [`NodeFlags::DISABLED`] also dirties the ancestors, since their
    /// bounds depend on it.
    pub fn set_leaf_flag(&mut self, idx: usize, flag: NodeFlags, on: bool) {
        if self.is_empty() {
            return;
        }
        self.assert_leaf(idx);

        if on {
            self.nodes[idx].flags |= flag;
            let mut cur = self.parent(idx);
            while let Some(p) = cur {
                let [a, b] = self.children(p);
                if !(self.nodes[a].has_flag(flag) && self.nodes[b].has_flag(flag)) {
                    break;
                }
                self.nodes[p].flags |= flag;
                cur = self.parent(p);
            }
        } else {
            self.nodes[idx].flags.remove(flag);
            let mut cur = self.parent(idx);
            while let Some(p) = cur {
                if !self.nodes[p].flags.intersects(flag) {
                    break;
                }
                self.nodes[p].flags.remove(flag);
                cur = self.parent(p);
            }
        }

        if flag.contains(NodeFlags::DISABLED) {
            self.dirty_from(idx);
        }
    }

    /// Clear `flag` on a leaf.
    #[inline]
    pub fn clear_leaf_flag(&mut self, idx: usize, flag: NodeFlags) {
        self.set_leaf_flag(idx, flag, false);
    }

    /// Returns true if the leaf carries `flag`.
    pub fn has_leaf_flag(&self, idx: usize, flag: NodeFlags) -> bool {
        self.assert_leaf(idx);
        self.nodes[idx].has_flag(flag)
    }

    /// Mark a leaf and its ancestors active in `cache`.
    pub fn enable_leaf(&self, idx: usize, cache: &mut BitVector) {
        self.assert_leaf(idx);
        cache.set_bit(idx, true);
        let mut cur = self.parent(idx);
        while let Some(p) = cur {
            if cache.is_bit_set(p) {
                break;
            }
            cache.set_bit(p, true);
            cur = self.parent(p);
        }
    }

    /// Mark several leaves active in `cache`.
    pub fn enable_leaves(&self, leaves: &[u16], cache: &mut BitVector) {
        for &leaf in leaves {
            self.enable_leaf(usize::from(leaf), cache);
        }
    }

    #[inline]
    fn pruned(&self, idx: usize, cache: Option<&BitVector>) -> bool {
        self.nodes[idx].has_flag(NodeFlags::DISABLED) || cache.is_some_and(|c| !c.is_bit_set(idx))
    }

    /// Collect the indices of leaves accepted by `pred`.
    ///
    /// Disabled subtrees are always skipped. With a `cache`, nodes not
    /// marked in it are skipped too.
    pub fn harvest_leaves<P: CullPredicate + ?Sized>(
        &self,
        pred: &P,
        cache: Option<&BitVector>,
        out: &mut Vec<u16>,
    ) {
        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::Harvest);

        if self.is_empty() {
            return;
        }
        #[allow(clippy::cast_sign_loss)]
        self.harvest_recur(self.root as usize, pred, cache, out);
    }

    fn harvest_recur<P: CullPredicate + ?Sized>(
        &self,
        idx: usize,
        pred: &P,
        cache: Option<&BitVector>,
        out: &mut Vec<u16>,
    ) {
        if self.pruned(idx, cache) {
            return;
        }
        match pred.test(&self.nodes[idx].world_bounds) {
            CullResult::Culled => {}
            CullResult::Clear => self.gather_recur(idx, cache, out),
            CullResult::Split => {
                if self.nodes[idx].is_leaf() {
                    out.push(self.nodes[idx].leaf_index());
                } else {
                    let [a, b] = self.children(idx);
                    self.harvest_recur(a, pred, cache, out);
                    self.harvest_recur(b, pred, cache, out);
                }
            }
        }
    }

    fn gather_recur(&self, idx: usize, cache: Option<&BitVector>, out: &mut Vec<u16>) {
        if self.pruned(idx, cache) {
            return;
        }
        if self.nodes[idx].is_leaf() {
            out.push(self.nodes[idx].leaf_index());
        } else {
            let [a, b] = self.children(idx);
            self.gather_recur(a, cache, out);
            self.gather_recur(b, cache, out);
        }
    }

    /// Every leaf that is not disabled (and is marked in `cache`, if given).
    pub fn harvest_enabled_leaves(&self, cache: Option<&BitVector>, out: &mut Vec<u16>) {
        if self.is_empty() {
            return;
        }
        #[allow(clippy::cast_sign_loss)]
        self.gather_recur(self.root as usize, cache, out);
    }

    /// Accumulate accepted leaves into a bit set.
    ///
    /// `visited` records subtrees already accepted whole, so harvesting the
    /// same tree against several predicates in one frame does not revisit
    /// them. Callers clear both sets at the start of the frame.
    pub fn harvest_leaves_into<P: CullPredicate + ?Sized>(
        &self,
        pred: &P,
        cache: Option<&BitVector>,
        visited: &mut BitVector,
        out: &mut BitVector,
    ) {
        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::Harvest);

        if self.is_empty() {
            return;
        }
        #[allow(clippy::cast_sign_loss)]
        self.harvest_bits_recur(self.root as usize, pred, cache, visited, out);
    }

    fn harvest_bits_recur<P: CullPredicate + ?Sized>(
        &self,
        idx: usize,
        pred: &P,
        cache: Option<&BitVector>,
        visited: &mut BitVector,
        out: &mut BitVector,
    ) {
        if visited.is_bit_set(idx) || self.pruned(idx, cache) {
            return;
        }
        match pred.test(&self.nodes[idx].world_bounds) {
            CullResult::Culled => {}
            CullResult::Clear => {
                visited.set_bit(idx, true);
                self.gather_bits_recur(idx, cache, out);
            }
            CullResult::Split => {
                if self.nodes[idx].is_leaf() {
                    visited.set_bit(idx, true);
                    out.set_bit(usize::from(self.nodes[idx].leaf_index()), true);
                } else {
                    let [a, b] = self.children(idx);
                    self.harvest_bits_recur(a, pred, cache, visited, out);
                    self.harvest_bits_recur(b, pred, cache, visited, out);
                }
            }
        }
    }

    fn gather_bits_recur(&self, idx: usize, cache: Option<&BitVector>, out: &mut BitVector) {
        if self.pruned(idx, cache) {
            return;
        }
        if self.nodes[idx].is_leaf() {
            out.set_bit(usize::from(self.nodes[idx].leaf_index()), true);
        } else {
            let [a, b] = self.children(idx);
            self.gather_bits_recur(a, cache, out);
            self.gather_bits_recur(b, cache, out);
        }
    }

    /// Check structure, flag summaries and bounds against a full recompute.
    ///
    /// Bounds are only compared on nodes that are not dirty.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidData(msg));
        let n = self.nodes.len();
        #[allow(clippy::cast_sign_loss)]
        let root = self.root as usize;
        if root >= n {
            return invalid(format!("root {root} out of range ({n} nodes)"));
        }
        if self.nodes[root].parent != NO_PARENT {
            return invalid(format!("root {root} has a parent"));
        }
        if self.is_empty() {
            return if self.num_leaves == 0 && n == 1 {
                Ok(())
            } else {
                invalid("empty tree with leaves".into())
            };
        }

        for (idx, node) in self.nodes.iter().enumerate() {
            if (idx < self.num_leaves as usize) != node.is_leaf() {
                return invalid(format!("node {idx} misplaced in leaves-first layout"));
            }
            if node.is_leaf() {
                if usize::from(node.leaf_index()) != idx {
                    return invalid(format!("leaf node {idx} holds index {}", node.leaf_index()));
                }
                continue;
            }
            let [a, b] = node.children;
            for child in [a, b] {
                #[allow(clippy::cast_sign_loss)]
                let c = child as usize;
                if child < 0 || c >= n {
                    return invalid(format!("node {idx} child {child} out of range"));
                }
                if usize::try_from(self.nodes[c].parent).ok() != Some(idx) {
                    return invalid(format!("node {c} does not point back at parent {idx}"));
                }
            }
            let [a, b] = self.children(idx);
            let both_disabled = self.nodes[a].has_flag(NodeFlags::DISABLED)
                && self.nodes[b].has_flag(NodeFlags::DISABLED);
            if both_disabled != node.has_flag(NodeFlags::DISABLED) {
                return invalid(format!("node {idx} disabled flag disagrees with children"));
            }
            if node.has_flag(NodeFlags::DIRTY) {
                continue;
            }
            if self.nodes[a].has_flag(NodeFlags::DIRTY) || self.nodes[b].has_flag(NodeFlags::DIRTY) {
                return invalid(format!("node {idx} is clean above a dirty child"));
            }
            if node.world_bounds != self.union_enabled(a, b) {
                return invalid(format!("node {idx} bounds differ from its children"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cull::{AcceptAll, BoundsIsect};
    use crate::maker::SpaceTreeMaker;
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn boxes(n: usize) -> Vec<Aabb> {
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let x = (i * 3) as f32;
                let y = (i % 4) as f32;
                Aabb::new(Vec3::new(x, y, 0.0), Vec3::new(x + 1.0, y + 1.0, 1.0))
            })
            .collect()
    }

    fn build(bounds: &[Aabb]) -> SpaceTree {
        let mut maker = SpaceTreeMaker::new();
        for b in bounds {
            maker.add_leaf(*b, false);
        }
        maker.make_tree()
    }

    #[test]
    fn empty_tree_is_inert() {
        let mut tree = SpaceTree::empty();
        assert!(tree.is_empty());
        tree.refresh();
        tree.set_leaf_flag(0, NodeFlags::DISABLED, true);
        let mut out = Vec::new();
        tree.harvest_leaves(&AcceptAll, None, &mut out);
        assert!(out.is_empty());
        assert!(tree.validate().is_ok());
    }

    #[test]
    #[should_panic(expected = "empty space tree")]
    fn move_leaf_on_empty_panics() {
        SpaceTree::empty().move_leaf(0, Aabb::EMPTY);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn move_leaf_out_of_range_panics() {
        build(&boxes(3)).move_leaf(3, Aabb::EMPTY);
    }

    #[test]
    fn move_then_refresh_is_idempotent() {
        let mut tree = build(&boxes(9));
        let moved = Aabb::new(Vec3::splat(-50.0), Vec3::splat(-49.0));
        tree.move_leaf(4, moved);
        assert!(tree.is_dirty());

        tree.refresh();
        assert!(!tree.is_dirty());
        assert!(tree.nodes().iter().all(|n| !n.has_flag(NodeFlags::DIRTY)));
        let first = tree.clone();
        tree.refresh();
        assert_eq!(tree, first);
        assert_eq!(tree.world_bounds().min, Vec3::splat(-50.0));
        tree.validate().unwrap();
    }

    #[test]
    fn move_stops_at_dirty_ancestor() {
        let mut tree = build(&boxes(8));
        tree.move_leaf(0, boxes(8)[0]);
        let dirty_after_first = tree
            .nodes()
            .iter()
            .filter(|n| n.has_flag(NodeFlags::DIRTY))
            .count();
        tree.move_leaf(0, boxes(8)[0]);
        let dirty_after_second = tree
            .nodes()
            .iter()
            .filter(|n| n.has_flag(NodeFlags::DIRTY))
            .count();
        assert_eq!(dirty_after_first, dirty_after_second);
        assert!(tree.is_dirty());
    }

    #[test]
    fn disable_removes_bounds_and_enable_restores() {
        let all = boxes(6);
        let mut tree = build(&all);
        let full = tree.world_bounds();

        // Leaf 5 holds the largest x
        tree.set_leaf_flag(5, NodeFlags::DISABLED, true);
        tree.refresh();
        assert_relative_eq!(tree.world_bounds().max.x, 13.0);
        assert_relative_eq!(full.max.x, 16.0);
        tree.validate().unwrap();

        let mut out = Vec::new();
        tree.harvest_leaves(&AcceptAll, None, &mut out);
        assert!(!out.contains(&5));
        assert_eq!(out.len(), 5);

        tree.clear_leaf_flag(5, NodeFlags::DISABLED);
        tree.refresh();
        assert_eq!(tree.world_bounds(), full);
        tree.validate().unwrap();
    }

    #[test]
    fn flag_summary_needs_both_children() {
        let mut tree = build(&boxes(4));
        for i in 0..4 {
            tree.set_leaf_flag(i, NodeFlags::DISABLED, true);
        }
        assert!(tree.node(tree.root() as usize).has_flag(NodeFlags::DISABLED));
        tree.refresh();
        assert!(tree.world_bounds().is_empty());

        tree.set_leaf_flag(2, NodeFlags::DISABLED, false);
        assert!(!tree.node(tree.root() as usize).has_flag(NodeFlags::DISABLED));
        assert!(tree.has_leaf_flag(1, NodeFlags::DISABLED));
        assert!(!tree.has_leaf_flag(2, NodeFlags::DISABLED));
        tree.refresh();
        assert_eq!(tree.world_bounds(), boxes(4)[2]);
        tree.validate().unwrap();
    }

    #[test]
    fn harvest_with_cache() {
        let tree = build(&boxes(10));
        let mut cache = BitVector::new();
        tree.enable_leaves(&[1, 7], &mut cache);

        let mut out = Vec::new();
        tree.harvest_leaves(&AcceptAll, Some(&cache), &mut out);
        out.sort_unstable();
        assert_eq!(out, vec![1, 7]);

        out.clear();
        tree.harvest_enabled_leaves(Some(&cache), &mut out);
        out.sort_unstable();
        assert_eq!(out, vec![1, 7]);
    }

    #[test]
    fn bit_harvest_accumulates_across_predicates() {
        let all = boxes(10);
        let tree = build(&all);
        let mut visited = BitVector::new();
        let mut out = BitVector::new();

        tree.harvest_leaves_into(&BoundsIsect(all[0]), None, &mut visited, &mut out);
        tree.harvest_leaves_into(&BoundsIsect(all[9]), None, &mut visited, &mut out);
        tree.harvest_leaves_into(&AcceptAll, None, &mut visited, &mut out);
        assert_eq!(out.count_ones(), 10);

        let mut fresh = BitVector::new();
        let mut seen = BitVector::new();
        tree.harvest_leaves_into(&BoundsIsect(all[9]), None, &mut seen, &mut fresh);
        assert_eq!(fresh.iter_ones().collect::<Vec<_>>(), vec![9]);
    }
}

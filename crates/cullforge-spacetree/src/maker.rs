//! Space tree construction.
//!
//! Leaves are split along the axis of greatest extent at the median of
//! their centres. Leaves that span more than half of that axis ("giants")
//! would straddle any such split, so they are peeled off into a separate
//! subtree that splits on centroid spread instead.

use cullforge_core::{Aabb, RadixSort, SortFlags, SortKey};
use glam::Vec3;
use tracing::debug;

#[cfg(feature = "profiling")]
use cullforge_profiler::{profile_scope, EventCategory};

use crate::node::{NodeFlags, SpaceTreeNode};
use crate::tree::SpaceTree;

#[derive(Clone, Copy, Debug)]
struct PrepLeaf {
    bounds: Aabb,
    disabled: bool,
}

/// Temporary binary tree built before flattening.
enum PrepNode {
    Leaf(usize),
    Internal(Box<[PrepNode; 2]>),
}

/// Accumulates leaf bounds and builds a [`SpaceTree`] over them.
///
/// ```
/// use cullforge_core::Aabb;
/// use cullforge_spacetree::SpaceTreeMaker;
/// use glam::Vec3;
///
/// let mut maker = SpaceTreeMaker::new();
/// maker.add_leaf(Aabb::new(Vec3::ZERO, Vec3::ONE), false);
/// maker.add_leaf(Aabb::new(Vec3::splat(4.0), Vec3::splat(5.0)), false);
/// let tree = maker.make_tree();
/// assert_eq!(tree.num_leaves(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SpaceTreeMaker {
    leaves: Vec<PrepLeaf>,
    sorter: RadixSort,
}

impl SpaceTreeMaker {
    /// Create a maker with no leaves.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a leaf. Leaf indices follow the order of `add_leaf` calls.
    pub fn add_leaf(&mut self, bounds: Aabb, disabled: bool) -> usize {
        self.leaves.push(PrepLeaf { bounds, disabled });
        self.leaves.len() - 1
    }

    /// Number of queued leaves.
    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    /// Build the tree and reset the maker.
    ///
    /// # Panics
    ///
    /// Panics if the tree would need more nodes than an `i16` can index.
    pub fn make_tree(&mut self) -> SpaceTree {
        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::TreeBuild);

        let leaves = std::mem::take(&mut self.leaves);
        let mut tree = match leaves.len() {
            0 => SpaceTree::empty(),
            1 => SpaceTree::from_parts(vec![SpaceTreeNode::leaf(0, leaves[0].bounds)], 0, 1),
            n => {
                assert!(
                    2 * n - 1 <= i16::MAX as usize,
                    "space tree over {n} leaves exceeds node index range"
                );
                let prep = self.make_tree_recur(&leaves, (0..n).collect());
                flatten(&leaves, &prep)
            }
        };

        for (i, leaf) in leaves.iter().enumerate() {
            if leaf.disabled {
                tree.set_leaf_flag(i, NodeFlags::DISABLED, true);
            }
        }
        tree.refresh();

        debug!(
            leaves = tree.num_leaves(),
            nodes = tree.num_nodes(),
            "built space tree"
        );
        tree
    }

    fn make_tree_recur(&mut self, leaves: &[PrepLeaf], mut indices: Vec<usize>) -> PrepNode {
        if indices.len() == 1 {
            return PrepNode::Leaf(indices[0]);
        }

        let total = indices
            .iter()
            .fold(Aabb::EMPTY, |acc, &i| acc.merge(&leaves[i].bounds));
        let axis = max_axis(total.size());
        let half = total.size()[axis] * 0.5;

        let (giants, rest): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| half > 0.0 && leaves[i].bounds.size()[axis] > half);

        if !giants.is_empty() && !rest.is_empty() {
            let fat = self.make_fat_tree(leaves, giants);
            let thin = self.make_tree_recur(leaves, rest);
            return PrepNode::Internal(Box::new([fat, thin]));
        }
        if rest.is_empty() {
            return self.make_fat_tree(leaves, giants);
        }

        self.sort_by_center(leaves, &mut indices, axis);
        let upper = indices.split_off(indices.len() / 2);
        let a = self.make_tree_recur(leaves, indices);
        let b = self.make_tree_recur(leaves, upper);
        PrepNode::Internal(Box::new([a, b]))
    }

    /// Median split on the axis where leaf centres are most spread out.
    fn make_fat_tree(&mut self, leaves: &[PrepLeaf], mut indices: Vec<usize>) -> PrepNode {
        if indices.len() == 1 {
            return PrepNode::Leaf(indices[0]);
        }

        let (lo, hi) = indices.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(lo, hi), &i| {
                let c = leaves[i].bounds.center();
                (lo.min(c), hi.max(c))
            },
        );
        let axis = max_axis(hi - lo);

        self.sort_by_center(leaves, &mut indices, axis);
        let upper = indices.split_off(indices.len() / 2);
        let a = self.make_fat_tree(leaves, indices);
        let b = self.make_fat_tree(leaves, upper);
        PrepNode::Internal(Box::new([a, b]))
    }

    fn sort_by_center(&mut self, leaves: &[PrepLeaf], indices: &mut Vec<usize>, axis: usize) {
        let keys: Vec<SortKey> = indices
            .iter()
            .map(|&i| SortKey::from_f32(leaves[i].bounds.center()[axis]))
            .collect();
        let order = self.sorter.sort(&keys, SortFlags::empty());
        *indices = order.iter().map(|&o| indices[o as usize]).collect();
    }
}

/// Index of the largest component, preferring the first on ties.
fn max_axis(v: Vec3) -> usize {
    if v.x >= v.y && v.x >= v.z {
        0
    } else if v.y >= v.z {
        1
    } else {
        2
    }
}

/// Lay out the prep tree: leaves at their own indices, then internal nodes
/// level by level from the deepest level up to the root.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn flatten(leaves: &[PrepLeaf], root: &PrepNode) -> SpaceTree {
    let num_leaves = leaves.len();

    let mut levels: Vec<Vec<&[PrepNode; 2]>> = Vec::new();
    let mut frontier: Vec<&[PrepNode; 2]> = match root {
        PrepNode::Internal(children) => vec![&**children],
        PrepNode::Leaf(_) => Vec::new(),
    };
    while !frontier.is_empty() {
        let next: Vec<&[PrepNode; 2]> = frontier
            .iter()
            .copied()
            .flat_map(|children| children.iter())
            .filter_map(|child| match child {
                PrepNode::Internal(grand) => Some(&**grand),
                PrepNode::Leaf(_) => None,
            })
            .collect();
        levels.push(std::mem::replace(&mut frontier, next));
    }

    // First node index of each level, deepest level placed first
    let mut base = vec![0usize; levels.len()];
    let mut next_index = num_leaves;
    for (depth, level) in levels.iter().enumerate().rev() {
        base[depth] = next_index;
        next_index += level.len();
    }

    let mut nodes: Vec<SpaceTreeNode> = leaves
        .iter()
        .enumerate()
        .map(|(i, leaf)| SpaceTreeNode::leaf(i as i16, leaf.bounds))
        .collect();
    nodes.resize(next_index, SpaceTreeNode::internal([0, 0]));

    for (depth, level) in levels.iter().enumerate() {
        let mut child_cursor = 0;
        for (k, children) in level.iter().enumerate() {
            let idx = base[depth] + k;
            let mut linked = [0i16; 2];
            for (slot, child) in children.iter().enumerate() {
                let child_idx = match child {
                    PrepNode::Leaf(leaf) => *leaf,
                    PrepNode::Internal(_) => {
                        child_cursor += 1;
                        base[depth + 1] + child_cursor - 1
                    }
                };
                linked[slot] = child_idx as i16;
                nodes[child_idx].parent = idx as i16;
            }
            nodes[idx].children = linked;
        }
    }

    // Children always sit at lower indices than their parent
    for idx in num_leaves..nodes.len() {
        let [a, b] = nodes[idx].children;
        nodes[idx].world_bounds = nodes[a as usize]
            .world_bounds
            .merge(&nodes[b as usize].world_bounds);
    }

    let root_index = base.first().copied().unwrap_or(0);
    SpaceTree::from_parts(nodes, root_index as i16, num_leaves as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cull::AcceptAll;

    fn unit_at(x: f32, y: f32, z: f32) -> Aabb {
        Aabb::new(Vec3::new(x, y, z), Vec3::new(x + 1.0, y + 1.0, z + 1.0))
    }

    fn check_union_invariant(tree: &SpaceTree) {
        for node in tree.nodes().iter().filter(|n| !n.is_leaf()) {
            let [a, b] = node.children;
            let expected = [a, b]
                .iter()
                .map(|&c| tree.node(c as usize))
                .filter(|c| !c.has_flag(NodeFlags::DISABLED))
                .fold(Aabb::EMPTY, |acc, c| acc.merge(&c.world_bounds));
            assert_eq!(node.world_bounds, expected);
        }
    }

    #[test]
    fn zero_and_one_leaf() {
        let mut maker = SpaceTreeMaker::new();
        let tree = maker.make_tree();
        assert!(tree.is_empty());
        assert_eq!(tree.num_nodes(), 1);
        assert_eq!(tree.num_leaves(), 0);

        maker.add_leaf(unit_at(0.0, 0.0, 0.0), false);
        let tree = maker.make_tree();
        assert!(!tree.is_empty());
        assert_eq!(tree.num_nodes(), 1);
        assert!(tree.node(0).is_leaf());
        assert_eq!(tree.root(), 0);
        assert_eq!(maker.num_leaves(), 0);
    }

    #[test]
    fn leaves_first_layout_with_root_last() {
        let mut maker = SpaceTreeMaker::new();
        for i in 0..13 {
            #[allow(clippy::cast_precision_loss)]
            maker.add_leaf(unit_at(i as f32 * 2.0, 0.0, 0.0), false);
        }
        let tree = maker.make_tree();
        assert_eq!(tree.num_leaves(), 13);
        assert_eq!(tree.num_nodes(), 25);
        assert_eq!(tree.root() as usize, tree.num_nodes() - 1);
        for i in 0..13 {
            assert!(tree.node(i).is_leaf());
            assert_eq!(tree.node(i).leaf_index() as usize, i);
        }
        tree.validate().unwrap();
        check_union_invariant(&tree);

        let mut out = Vec::new();
        tree.harvest_leaves(&AcceptAll, None, &mut out);
        out.sort_unstable();
        assert_eq!(out, (0..13).collect::<Vec<u16>>());
    }

    #[test]
    fn giants_get_their_own_subtree() {
        let mut maker = SpaceTreeMaker::new();
        maker.add_leaf(Aabb::new(Vec3::ZERO, Vec3::new(100.0, 1.0, 1.0)), false);
        for i in 0..6 {
            #[allow(clippy::cast_precision_loss)]
            maker.add_leaf(unit_at(i as f32 * 10.0, 0.0, 0.0), false);
        }
        maker.add_leaf(Aabb::new(Vec3::new(0.0, 5.0, 0.0), Vec3::new(90.0, 6.0, 1.0)), false);
        let tree = maker.make_tree();
        tree.validate().unwrap();

        let root = tree.node(tree.root() as usize);
        let fat = tree.node(root.children[0] as usize);
        let mut giants: Vec<i16> = fat.children.to_vec();
        giants.sort_unstable();
        assert_eq!(giants, vec![0, 7]);
    }

    #[test]
    fn identical_boxes_still_split() {
        let mut maker = SpaceTreeMaker::new();
        for _ in 0..5 {
            maker.add_leaf(unit_at(3.0, 3.0, 3.0), false);
        }
        let tree = maker.make_tree();
        assert_eq!(tree.num_nodes(), 9);
        tree.validate().unwrap();
    }

    #[test]
    fn disabled_leaves_applied_after_build() {
        let mut maker = SpaceTreeMaker::new();
        maker.add_leaf(unit_at(0.0, 0.0, 0.0), false);
        maker.add_leaf(unit_at(50.0, 0.0, 0.0), true);
        maker.add_leaf(unit_at(10.0, 0.0, 0.0), false);
        let tree = maker.make_tree();
        assert!(tree.has_leaf_flag(1, NodeFlags::DISABLED));
        assert!(tree.world_bounds().max.x < 50.0);
        tree.validate().unwrap();
        check_union_invariant(&tree);
    }
}

//! Space tree nodes.

use bitflags::bitflags;
use cullforge_core::Aabb;

bitflags! {
    /// Per-node state.
    ///
    /// `DISABLED` on an internal node means every leaf below it is disabled,
    /// which lets a harvest prune the whole subtree with one test.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u16 {
        /// Node is a leaf; `children[0]` holds its leaf index
        const IS_LEAF = 0x1;
        /// Bounds are stale until the next refresh
        const DIRTY = 0x2;
        /// Excluded from harvests and from parent bounds
        const DISABLED = 0x4;
        /// Root of a tree built from no leaves
        const EMPTY = 0x8;
    }
}

/// Parent index of the root node.
pub const NO_PARENT: i16 = -1;

/// One node of a flattened space tree.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpaceTreeNode {
    /// World-space bounds of everything below this node
    pub world_bounds: Aabb,
    /// State flags
    pub flags: NodeFlags,
    /// Parent node index, or [`NO_PARENT`]
    pub parent: i16,
    /// Child node indices, or `[leaf_index, 0]` for a leaf
    pub children: [i16; 2],
}

impl SpaceTreeNode {
    /// A leaf node for leaf `index`.
    #[must_use]
    pub const fn leaf(index: i16, world_bounds: Aabb) -> Self {
        Self {
            world_bounds,
            flags: NodeFlags::IS_LEAF,
            parent: NO_PARENT,
            children: [index, 0],
        }
    }

    /// An internal node over two children.
    #[must_use]
    pub const fn internal(children: [i16; 2]) -> Self {
        Self {
            world_bounds: Aabb::EMPTY,
            flags: NodeFlags::empty(),
            parent: NO_PARENT,
            children,
        }
    }

    /// The root of a tree with no leaves.
    #[must_use]
    pub const fn empty_root() -> Self {
        Self {
            world_bounds: Aabb::EMPTY,
            flags: NodeFlags::EMPTY,
            parent: NO_PARENT,
            children: [0, 0],
        }
    }

    /// Returns true for leaf nodes.
    #[inline]
    pub const fn is_leaf(&self) -> bool {
        self.flags.contains(NodeFlags::IS_LEAF)
    }

    /// Returns true if every flag in `flag` is set.
    #[inline]
    pub const fn has_flag(&self, flag: NodeFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Leaf index of a leaf node.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub const fn leaf_index(&self) -> u16 {
        self.children[0] as u16
    }
}

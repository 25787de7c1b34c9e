//! Binary persistence.
//!
//! Layout, little-endian:
//!
//! | field      | type  |
//! |------------|-------|
//! | root       | i16   |
//! | num_leaves | u32   |
//! | node_count | u32   |
//! | nodes      | `node_count` × [`NodeRecord`] |

use std::io::{Read, Write};

use bytemuck::{Pod, Zeroable};
use cullforge_core::{Aabb, Error, Result};
use glam::Vec3;

use crate::node::{NodeFlags, SpaceTreeNode};
use crate::tree::SpaceTree;

/// On-disk form of one node. Leaves store `[leaf_index, 0]` as children.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct NodeRecord {
    /// Bounds minimum
    pub min: [f32; 3],
    /// Bounds maximum
    pub max: [f32; 3],
    /// [`NodeFlags`] bits
    pub flags: u16,
    /// Parent index or -1
    pub parent: i16,
    /// Child indices
    pub children: [i16; 2],
}

impl NodeRecord {
    /// Byte size of one record.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Swap to or from little-endian. A no-op on little-endian hosts.
    #[must_use]
    fn swap_le(self) -> Self {
        let f = |v: [f32; 3]| v.map(|x| f32::from_bits(x.to_bits().to_le()));
        Self {
            min: f(self.min),
            max: f(self.max),
            flags: self.flags.to_le(),
            parent: self.parent.to_le(),
            children: self.children.map(i16::to_le),
        }
    }
}

impl From<&SpaceTreeNode> for NodeRecord {
    fn from(node: &SpaceTreeNode) -> Self {
        Self {
            min: node.world_bounds.min.to_array(),
            max: node.world_bounds.max.to_array(),
            flags: node.flags.bits(),
            parent: node.parent,
            children: node.children,
        }
    }
}

impl From<&NodeRecord> for SpaceTreeNode {
    fn from(record: &NodeRecord) -> Self {
        Self {
            world_bounds: Aabb::new(Vec3::from_array(record.min), Vec3::from_array(record.max)),
            flags: NodeFlags::from_bits_truncate(record.flags),
            parent: record.parent,
            children: record.children,
        }
    }
}

const HEADER_SIZE: usize = 10;

impl SpaceTree {
    /// Serialize the tree.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let count = u32::try_from(self.nodes.len())
            .map_err(|_| Error::Serialization("node count exceeds u32".into()))?;
        let mut header = [0u8; HEADER_SIZE];
        header[0..2].copy_from_slice(&self.root.to_le_bytes());
        header[2..6].copy_from_slice(&self.num_leaves.to_le_bytes());
        header[6..10].copy_from_slice(&count.to_le_bytes());
        writer.write_all(&header)?;

        let records: Vec<NodeRecord> = self
            .nodes
            .iter()
            .map(|n| NodeRecord::from(n).swap_le())
            .collect();
        writer.write_all(bytemuck::cast_slice(&records))?;
        Ok(())
    }

    /// Deserialize a tree written by [`SpaceTree::write_to`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;
        let root = i16::from_le_bytes([header[0], header[1]]);
        let num_leaves = u32::from_le_bytes([header[2], header[3], header[4], header[5]]);
        let count = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;

        if count == 0 || count > i16::MAX as usize {
            return Err(Error::InvalidData(format!("bad space tree node count {count}")));
        }
        if num_leaves as usize > count {
            return Err(Error::InvalidData(format!(
                "{num_leaves} leaves in {count} nodes"
            )));
        }

        let mut records = vec![NodeRecord::zeroed(); count];
        reader.read_exact(bytemuck::cast_slice_mut(&mut records))?;
        let nodes = records
            .iter()
            .map(|r| SpaceTreeNode::from(&r.swap_le()))
            .collect();

        let tree = Self::from_parts(nodes, root, num_leaves);
        tree.validate()?;
        Ok(tree)
    }

    /// Serialize into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.nodes.len() * NodeRecord::SIZE);
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Deserialize from a byte slice.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        Self::read_from(&mut bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maker::SpaceTreeMaker;

    #[test]
    fn record_is_32_bytes() {
        assert_eq!(NodeRecord::SIZE, 32);
    }

    #[test]
    fn tree_survives_bytes() {
        let mut maker = SpaceTreeMaker::new();
        for i in 0..7 {
            #[allow(clippy::cast_precision_loss)]
            let x = i as f32 * 4.0;
            maker.add_leaf(Aabb::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 2.0, 3.0)), i == 3);
        }
        let tree = maker.make_tree();

        let bytes = tree.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + tree.num_nodes() * NodeRecord::SIZE);
        let back = SpaceTree::from_bytes(&bytes).unwrap();
        assert_eq!(back, tree);
        assert!(back.has_leaf_flag(3, NodeFlags::DISABLED));
    }

    #[test]
    fn empty_tree_survives_bytes() {
        let bytes = SpaceTree::empty().to_bytes().unwrap();
        assert!(SpaceTree::from_bytes(&bytes).unwrap().is_empty());
    }

    #[test]
    fn truncated_and_corrupt_input_is_rejected() {
        let mut maker = SpaceTreeMaker::new();
        maker.add_leaf(Aabb::new(Vec3::ZERO, Vec3::ONE), false);
        maker.add_leaf(Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0)), false);
        let bytes = maker.make_tree().to_bytes().unwrap();

        assert!(matches!(
            SpaceTree::from_bytes(&bytes[..bytes.len() - 4]),
            Err(Error::Io(_))
        ));

        let mut corrupt = bytes.clone();
        // First child of the root (node 2) points past the end
        let child_offset = HEADER_SIZE + 2 * NodeRecord::SIZE + 28;
        corrupt[child_offset..child_offset + 2].copy_from_slice(&40i16.to_le_bytes());
        assert!(matches!(
            SpaceTree::from_bytes(&corrupt),
            Err(Error::InvalidData(_))
        ));
    }
}

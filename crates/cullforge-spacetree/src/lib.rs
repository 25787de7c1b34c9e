//! Bounding volume hierarchy for visibility culling.
//!
//! - [`SpaceTree`]: fixed-shape tree with movable leaf bounds, flag
//!   summaries and harvest traversals
//! - [`SpaceTreeMaker`]: one-shot builder from a list of leaf bounds
//! - [`CullPredicate`]: the three-way volume test a harvest applies
//!
//! Trees are rebuilt, never reshaped, when the set of leaves changes.

pub mod cull;
pub mod maker;
pub mod node;
pub mod persist;
pub mod tree;

pub use cull::{AcceptAll, BoundsIsect, CullFn, CullPredicate, CullResult};
pub use maker::SpaceTreeMaker;
pub use node::{NodeFlags, SpaceTreeNode, NO_PARENT};
pub use persist::NodeRecord;
pub use tree::SpaceTree;

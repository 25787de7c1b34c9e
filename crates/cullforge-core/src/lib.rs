//! Core types, math, and sorting for cullforge.
//!
//! This crate provides the foundational pieces shared by the culling and
//! batching crates:
//! - Bounding volumes and view frusta
//! - Bit vectors for visibility-region membership
//! - The byte-wise radix sort used for every draw-order decision
//! - Visibility regions and render levels
//! - Common error types

pub mod bits;
pub mod error;
pub mod level;
pub mod math;
pub mod radix;
pub mod vis;

pub use bits::BitVector;
pub use error::{Error, Result};
pub use level::RenderLevel;
pub use math::{Aabb, Containment, Frustum};
pub use radix::{RadixSort, SortFlags, SortKey};
pub use vis::{VisMgr, VisRegion};

/// Engine-wide constants
pub mod constants {
    /// Largest value any world-space bound component may take before the
    /// owning span is treated as overflowed.
    pub const BOUNDS_LIMIT: f32 = 1.0e5;
    /// Maximum vertices held by a single buffer group.
    pub const MAX_VERTS_PER_BUFFER: u32 = 32_000;
    /// Maximum indices held by a single index buffer.
    pub const MAX_INDICES_PER_BUFFER: u32 = 32_000;
    /// Triangle count of one face-sort radix batch.
    pub const TRI_SORT_CHUNK: usize = 4_000;
    /// Maximum occluders considered per frame.
    pub const MAX_OCCLUDERS: usize = 1_000;
    /// Maximum cull polygons submitted per frame.
    pub const MAX_CULL_POLYS: usize = 300;
}

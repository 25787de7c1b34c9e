//! Drawable tunables.

use cullforge_core::constants::{
    BOUNDS_LIMIT, MAX_INDICES_PER_BUFFER, MAX_VERTS_PER_BUFFER, TRI_SORT_CHUNK,
};
use serde::{Deserialize, Serialize};

/// Limits applied by a [`DrawableSpans`](crate::DrawableSpans).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrawableConfig {
    /// Vertex capacity of one buffer group
    pub max_verts_per_buffer: u32,
    /// Index capacity of one index buffer
    pub max_indices_per_buffer: u32,
    /// Triangles per face-sort batch
    pub tri_sort_chunk: usize,
    /// World bounds beyond this magnitude mark a span as overflowed
    pub bounds_limit: f32,
}

impl Default for DrawableConfig {
    fn default() -> Self {
        Self {
            max_verts_per_buffer: MAX_VERTS_PER_BUFFER,
            max_indices_per_buffer: MAX_INDICES_PER_BUFFER,
            tri_sort_chunk: TRI_SORT_CHUNK,
            bounds_limit: BOUNDS_LIMIT,
        }
    }
}

impl DrawableConfig {
    /// Set the per-group vertex capacity.
    #[must_use]
    pub const fn with_max_verts_per_buffer(mut self, max: u32) -> Self {
        self.max_verts_per_buffer = max;
        self
    }

    /// Set the per-buffer index capacity.
    #[must_use]
    pub const fn with_max_indices_per_buffer(mut self, max: u32) -> Self {
        self.max_indices_per_buffer = max;
        self
    }

    /// Set the face-sort batch size.
    #[must_use]
    pub const fn with_tri_sort_chunk(mut self, tris: usize) -> Self {
        self.tri_sort_chunk = tris;
        self
    }

    /// Set the overflow threshold.
    #[must_use]
    pub const fn with_bounds_limit(mut self, limit: f32) -> Self {
        self.bounds_limit = limit;
        self
    }
}

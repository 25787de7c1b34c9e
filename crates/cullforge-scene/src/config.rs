//! Page tree manager tunables.

use cullforge_core::constants::{MAX_CULL_POLYS, MAX_OCCLUDERS};
use serde::{Deserialize, Serialize};

/// Limits and switches for [`crate::PageTreeMgr`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageTreeConfig {
    /// Occluders kept after ranking, per frame
    pub max_occluders: usize,
    /// Cull polygons submitted to the pipeline, per frame
    pub max_cull_polys: usize,
    /// Ignore visibility regions entirely
    pub disable_vis_mgr: bool,
    /// Per-span offset separating spans of a sort-as-one drawable
    pub sort_as_one_fudge: f32,
}

impl Default for PageTreeConfig {
    fn default() -> Self {
        Self {
            max_occluders: MAX_OCCLUDERS,
            max_cull_polys: MAX_CULL_POLYS,
            disable_vis_mgr: false,
            sort_as_one_fudge: 0.1,
        }
    }
}

impl PageTreeConfig {
    #[must_use]
    pub const fn with_max_occluders(mut self, max: usize) -> Self {
        self.max_occluders = max;
        self
    }

    #[must_use]
    pub const fn with_max_cull_polys(mut self, max: usize) -> Self {
        self.max_cull_polys = max;
        self
    }

    #[must_use]
    pub const fn with_disable_vis_mgr(mut self, disable: bool) -> Self {
        self.disable_vis_mgr = disable;
        self
    }

    #[must_use]
    pub const fn with_sort_as_one_fudge(mut self, fudge: f32) -> Self {
        self.sort_as_one_fudge = fudge;
        self
    }
}

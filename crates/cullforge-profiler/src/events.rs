//! Profiler event types and statistics.

use serde::{Deserialize, Serialize};

/// Timed stages of the render path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Whole `PageTreeMgr::render` call.
    #[default]
    RenderScene,
    /// Render-level and span-distance sorting of drawables.
    ObjectSort,
    /// Ranking occluders by priority and distance.
    OccluderSort,
    /// Filtering occluder polygons into the cull list.
    OccluderBuild,
    /// Distance sort of cull polygons.
    OccluderPolySort,
    /// Per-triangle back-to-front sorting.
    FaceSort,
    /// Applying visibility sets to a drawable's tree.
    VisSelect,
    /// Evaluating visibility regions for the viewer.
    VisEval,
    /// Space tree harvest against the view.
    Harvest,
    /// Buffer compaction after span removal.
    GarbageCollect,
    /// Building a space tree from leaf bounds.
    TreeBuild,
    /// Custom event with ID.
    Custom(u32),
}

impl EventCategory {
    /// Get a display name for this category.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RenderScene => "Render Scene",
            Self::ObjectSort => "Object Sort",
            Self::OccluderSort => "Occluder Sort",
            Self::OccluderBuild => "Occluder Build",
            Self::OccluderPolySort => "Occluder Poly Sort",
            Self::FaceSort => "Face Sort",
            Self::VisSelect => "Vis Select",
            Self::VisEval => "Vis Eval",
            Self::Harvest => "Harvest",
            Self::GarbageCollect => "Garbage Collect",
            Self::TreeBuild => "Tree Build",
            Self::Custom(_) => "Custom",
        }
    }

    /// Stable display order.
    #[must_use]
    pub const fn order(&self) -> u32 {
        match self {
            Self::RenderScene => 0,
            Self::VisEval => 1,
            Self::Harvest => 2,
            Self::VisSelect => 3,
            Self::OccluderSort => 4,
            Self::OccluderBuild => 5,
            Self::OccluderPolySort => 6,
            Self::ObjectSort => 7,
            Self::FaceSort => 8,
            Self::TreeBuild => 9,
            Self::GarbageCollect => 10,
            Self::Custom(id) => 100 + *id,
        }
    }
}

/// Per-frame event counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Counter {
    /// Drawables passed through the object sort.
    ObjectsSorted,
    /// Occluders that made the cap.
    OccludersUsed,
    /// Cull polygons considered.
    OccluderPolysProcessed,
    /// Triangles passed through face sorting.
    FacesSorted,
    /// Calls into face sorting.
    FaceSortCalls,
}

impl Counter {
    /// Get a display name for this counter.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ObjectsSorted => "Objects Sorted",
            Self::OccludersUsed => "Occluders Used",
            Self::OccluderPolysProcessed => "Occluder Polys Processed",
            Self::FacesSorted => "Faces Sorted",
            Self::FaceSortCalls => "Face Sort Calls",
        }
    }
}

/// A single timing event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingEvent {
    /// Event category.
    pub category: EventCategory,
    /// Duration in nanoseconds.
    pub duration_ns: u64,
}

impl TimingEvent {
    /// Create a new timing event.
    #[must_use]
    pub const fn new(category: EventCategory, duration_ns: u64) -> Self {
        Self {
            category,
            duration_ns,
        }
    }
}

/// Aggregated statistics for a category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    /// Event category.
    pub category: EventCategory,
    /// Number of events.
    pub count: u32,
    /// Total duration in nanoseconds.
    pub total_ns: u64,
    /// Minimum duration in nanoseconds.
    pub min_ns: u64,
    /// Maximum duration in nanoseconds.
    pub max_ns: u64,
    /// Average duration in nanoseconds (computed from total/count).
    pub avg_ns: u64,
    /// 95th percentile duration (approximate).
    pub p95_ns: u64,
}

impl CategoryStats {
    /// Create new empty stats for a category.
    #[must_use]
    pub const fn new(category: EventCategory) -> Self {
        Self {
            category,
            count: 0,
            total_ns: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            avg_ns: 0,
            p95_ns: 0,
        }
    }

    /// Record a new timing.
    pub fn record(&mut self, duration_ns: u64) {
        self.count += 1;
        self.total_ns += duration_ns;
        self.min_ns = self.min_ns.min(duration_ns);
        self.max_ns = self.max_ns.max(duration_ns);
        self.avg_ns = self.total_ns / u64::from(self.count);
    }

    /// Get average in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_ms(&self) -> f64 {
        self.avg_ns as f64 / 1_000_000.0
    }

    /// Get maximum in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn max_ms(&self) -> f64 {
        self.max_ns as f64 / 1_000_000.0
    }

    /// Get total in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn total_ms(&self) -> f64 {
        self.total_ns as f64 / 1_000_000.0
    }
}

/// Counter value for the last frame and since reset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CounterStats {
    /// Which counter.
    pub counter: Counter,
    /// Value accumulated during the last completed frame.
    pub last_frame: u64,
    /// Value accumulated since the last reset.
    pub total: u64,
}

/// Complete profiler snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilerSnapshot {
    /// Current frame number.
    pub frame_number: u64,
    /// Frame time in milliseconds.
    pub frame_time_ms: f32,
    /// Per-category statistics.
    pub categories: Vec<CategoryStats>,
    /// Per-counter statistics.
    pub counters: Vec<CounterStats>,
}

impl ProfilerSnapshot {
    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from bincode.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Stats for one category, if it recorded anything.
    #[must_use]
    pub fn category(&self, category: EventCategory) -> Option<&CategoryStats> {
        self.categories.iter().find(|s| s.category == category)
    }

    /// Stats for one counter, if it was ever bumped.
    #[must_use]
    pub fn counter(&self, counter: Counter) -> Option<&CounterStats> {
        self.counters.iter().find(|s| s.counter == counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_bincode() {
        let mut stats = CategoryStats::new(EventCategory::FaceSort);
        stats.record(2_000);
        stats.record(4_000);
        let snapshot = ProfilerSnapshot {
            frame_number: 12,
            frame_time_ms: 16.5,
            categories: vec![stats],
            counters: vec![CounterStats {
                counter: Counter::FacesSorted,
                last_frame: 300,
                total: 900,
            }],
        };

        let bytes = snapshot.to_bytes().unwrap();
        let decoded = ProfilerSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.frame_number, 12);
        let face = decoded.category(EventCategory::FaceSort).unwrap();
        assert_eq!(face.count, 2);
        assert_eq!(face.avg_ns, 3_000);
        assert_eq!(decoded.counter(Counter::FacesSorted).unwrap().total, 900);
    }
}

//! Event collection and aggregation.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::events::{
    CategoryStats, Counter, CounterStats, EventCategory, ProfilerSnapshot, TimingEvent,
};

/// Number of recent samples to keep for percentile calculations.
const SAMPLE_HISTORY_SIZE: usize = 100;

/// Collects and aggregates profiling events.
#[derive(Default)]
pub struct Collector {
    /// Events recorded since the last flush.
    pending: Vec<TimingEvent>,
    /// Per-category statistics.
    stats: HashMap<EventCategory, CategoryStats>,
    /// Recent samples per category for percentile calculation.
    samples: HashMap<EventCategory, VecDeque<u64>>,
    /// Counts for the frame in progress.
    frame_counts: HashMap<Counter, u64>,
    /// Counts of the last completed frame and totals.
    counters: HashMap<Counter, CounterStats>,
    frame_number: u64,
    frame_time_ms: f32,
}

impl Collector {
    /// Create a new collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a timing event.
    pub fn record(&mut self, event: TimingEvent) {
        self.pending.push(event);
    }

    /// Record a duration for a category.
    pub fn record_duration(&mut self, category: EventCategory, duration_ns: u64) {
        self.record(TimingEvent::new(category, duration_ns));
    }

    /// Add to a counter for the current frame.
    pub fn count(&mut self, counter: Counter, amount: u64) {
        *self.frame_counts.entry(counter).or_insert(0) += amount;
    }

    /// Update frame info.
    pub fn set_frame_info(&mut self, frame_number: u64, frame_time_ms: f32) {
        self.frame_number = frame_number;
        self.frame_time_ms = frame_time_ms;
    }

    /// Process all pending events and close the frame's counters.
    pub fn flush(&mut self) {
        for event in self.pending.drain(..) {
            let stats = self
                .stats
                .entry(event.category)
                .or_insert_with(|| CategoryStats::new(event.category));
            stats.record(event.duration_ns);

            let samples = self
                .samples
                .entry(event.category)
                .or_insert_with(|| VecDeque::with_capacity(SAMPLE_HISTORY_SIZE));
            if samples.len() >= SAMPLE_HISTORY_SIZE {
                samples.pop_front();
            }
            samples.push_back(event.duration_ns);

            if samples.len() >= 10 {
                let mut sorted: Vec<u64> = samples.iter().copied().collect();
                sorted.sort_unstable();
                stats.p95_ns = sorted[(sorted.len() * 95) / 100];
            }
        }

        for stats in self.counters.values_mut() {
            stats.last_frame = 0;
        }
        for (counter, amount) in self.frame_counts.drain() {
            let stats = self.counters.entry(counter).or_insert(CounterStats {
                counter,
                last_frame: 0,
                total: 0,
            });
            stats.last_frame = amount;
            stats.total += amount;
        }
    }

    /// Reset all statistics.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.stats.clear();
        self.samples.clear();
        self.frame_counts.clear();
        self.counters.clear();
    }

    /// Get a snapshot of current profiling data.
    #[must_use]
    pub fn snapshot(&self) -> ProfilerSnapshot {
        let mut categories: Vec<CategoryStats> = self.stats.values().copied().collect();
        categories.sort_by_key(|s| s.category.order());

        let mut counters: Vec<CounterStats> = self.counters.values().copied().collect();
        counters.sort_by_key(|s| s.counter.name());

        ProfilerSnapshot {
            frame_number: self.frame_number,
            frame_time_ms: self.frame_time_ms,
            categories,
            counters,
        }
    }

    /// Get stats for a specific category.
    #[must_use]
    pub fn get_stats(&self, category: EventCategory) -> Option<&CategoryStats> {
        self.stats.get(&category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_flush() {
        let mut collector = Collector::new();

        collector.record_duration(EventCategory::RenderScene, 16_000_000);
        collector.record_duration(EventCategory::RenderScene, 17_000_000);
        collector.record_duration(EventCategory::FaceSort, 5_000_000);
        assert!(collector.get_stats(EventCategory::RenderScene).is_none());

        collector.flush();

        let render = collector.get_stats(EventCategory::RenderScene).unwrap();
        assert_eq!(render.count, 2);
        assert_eq!(render.min_ns, 16_000_000);
        assert_eq!(render.max_ns, 17_000_000);
        assert_eq!(collector.get_stats(EventCategory::FaceSort).unwrap().count, 1);
    }

    #[test]
    fn counters_roll_per_frame() {
        let mut collector = Collector::new();
        collector.count(Counter::FacesSorted, 100);
        collector.count(Counter::FacesSorted, 50);
        collector.flush();
        collector.flush();
        collector.count(Counter::FacesSorted, 10);
        collector.flush();

        let snapshot = collector.snapshot();
        let faces = snapshot.counter(Counter::FacesSorted).unwrap();
        assert_eq!(faces.last_frame, 10);
        assert_eq!(faces.total, 160);
    }

    #[test]
    fn snapshot_is_ordered_and_reset_clears() {
        let mut collector = Collector::new();
        collector.record_duration(EventCategory::FaceSort, 1);
        collector.record_duration(EventCategory::RenderScene, 1);
        collector.record_duration(EventCategory::Harvest, 1);
        collector.flush();

        let snapshot = collector.snapshot();
        let order: Vec<_> = snapshot.categories.iter().map(|s| s.category).collect();
        assert_eq!(
            order,
            vec![
                EventCategory::RenderScene,
                EventCategory::Harvest,
                EventCategory::FaceSort
            ]
        );

        collector.reset();
        assert!(collector.snapshot().categories.is_empty());
    }

    #[test]
    fn p95_tracks_recent_samples() {
        let mut collector = Collector::new();
        for i in 1..=20u64 {
            collector.record_duration(EventCategory::Harvest, i * 10);
        }
        collector.flush();
        assert_eq!(collector.get_stats(EventCategory::Harvest).unwrap().p95_ns, 200);
    }
}

//! Global profiler context singleton.

use parking_lot::Mutex;

use crate::collector::Collector;
use crate::events::{Counter, EventCategory, ProfilerSnapshot, TimingEvent};

/// Global profiler context.
static PROFILER: Mutex<Option<Collector>> = Mutex::new(None);

/// Initialize the global profiler.
///
/// Call this once at application startup. Events recorded before `init`
/// are discarded.
pub fn init() {
    let mut guard = PROFILER.lock();
    if guard.is_none() {
        *guard = Some(Collector::new());
        tracing::debug!("profiler initialized");
    }
}

/// Shutdown the profiler.
pub fn shutdown() {
    PROFILER.lock().take();
}

/// Record a timing event.
#[inline]
pub fn record(event: TimingEvent) {
    if let Some(collector) = PROFILER.lock().as_mut() {
        collector.record(event);
    }
}

/// Record a duration for a category.
#[inline]
pub fn record_duration(category: EventCategory, duration_ns: u64) {
    record(TimingEvent::new(category, duration_ns));
}

/// Add to a per-frame counter.
#[inline]
pub fn count(counter: Counter, amount: u64) {
    if let Some(collector) = PROFILER.lock().as_mut() {
        collector.count(counter, amount);
    }
}

/// Mark the end of a frame, folding its events into the statistics.
pub fn end_frame(frame_number: u64, frame_time_ms: f32) {
    if let Some(collector) = PROFILER.lock().as_mut() {
        collector.set_frame_info(frame_number, frame_time_ms);
        collector.flush();
    }
}

/// Get a snapshot of current profiling data.
#[must_use]
pub fn snapshot() -> ProfilerSnapshot {
    PROFILER
        .lock()
        .as_ref()
        .map_or_else(ProfilerSnapshot::default, Collector::snapshot)
}

/// Reset all profiling statistics.
pub fn reset() {
    if let Some(collector) = PROFILER.lock().as_mut() {
        collector.reset();
    }
}

/// Check if the profiler is initialized.
#[must_use]
pub fn is_initialized() -> bool {
    PROFILER.lock().is_some()
}

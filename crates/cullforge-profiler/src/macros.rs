//! Profiling macros and scope guards.

use std::time::Instant;

use crate::events::EventCategory;

/// RAII guard that records timing on drop.
pub struct ScopeGuard {
    category: EventCategory,
    start: Instant,
}

impl ScopeGuard {
    /// Create a new scope guard.
    #[inline]
    #[must_use]
    pub fn new(category: EventCategory) -> Self {
        Self {
            category,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopeGuard {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_nanos() as u64;
        crate::context::record_duration(self.category, duration);
    }
}

/// Create a profiling scope that measures execution time until end of scope.
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
///
/// ```ignore
/// use cullforge_profiler::{profile_scope, EventCategory};
///
/// fn harvest() {
///     profile_scope!(EventCategory::Harvest);
///     // ... traversal
/// } // timing recorded here
/// ```
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! profile_scope {
    ($category:expr) => {
        let _guard = $crate::ScopeGuard::new($category);
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! profile_scope {
    ($category:expr) => {};
}

/// Add to a per-frame counter.
///
/// When the `profiling` feature is disabled, this macro expands to nothing.
///
/// ```ignore
/// profile_count!(Counter::FacesSorted, tris.len());
/// ```
#[cfg(feature = "profiling")]
#[macro_export]
macro_rules! profile_count {
    ($counter:expr, $amount:expr) => {
        $crate::count($counter, $amount as u64);
    };
}

#[cfg(not(feature = "profiling"))]
#[macro_export]
macro_rules! profile_count {
    ($counter:expr, $amount:expr) => {};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_guard_records_into_global_collector() {
        crate::init();
        crate::reset();
        {
            let _guard = ScopeGuard::new(EventCategory::Custom(7));
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        crate::end_frame(1, 1.0);
        let snapshot = crate::snapshot();
        let stats = snapshot.category(EventCategory::Custom(7)).unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.max_ns >= 1_000_000);
    }
}

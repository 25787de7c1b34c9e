//! Render-path profiling for cullforge.
//!
//! Timers cover the stages of a frame (visibility evaluation, harvest,
//! occluder ranking, object and face sorting, compaction, tree builds) and
//! counters track how much work each stage did.
//!
//! # Feature Flags
//!
//! - `profiling`: Enable profiling instrumentation. When disabled, all profiling
//!   macros expand to no-ops for zero overhead.
//!
//! # Usage
//!
//! ```ignore
//! cullforge_profiler::init();
//!
//! fn sort_faces(tris: &[Tri]) {
//!     profile_scope!(EventCategory::FaceSort);
//!     profile_count!(Counter::FacesSorted, tris.len());
//!     // ...
//! }
//!
//! cullforge_profiler::end_frame(frame_number, frame_time_ms);
//! ```

mod collector;
mod context;
mod events;
mod macros;

pub use collector::Collector;
pub use context::{count, end_frame, init, is_initialized, record, record_duration, reset, shutdown, snapshot};
pub use events::{CategoryStats, Counter, CounterStats, EventCategory, ProfilerSnapshot, TimingEvent};
pub use macros::ScopeGuard;

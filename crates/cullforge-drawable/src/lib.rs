//! Batched geometry for cullforge.
//!
//! A [`DrawableSpans`] owns many small pieces of geometry (spans) packed
//! into shared vertex and index storage ([`BufferGroup`]s), a space tree
//! over the spans' world bounds for culling, and the per-frame machinery
//! the render path drives:
//! - visibility-region filtering with an incremental leaf cache
//! - per-span or whole-drawable triangle sorting for blended geometry
//! - pooled particle storage fed by emitters
//! - a skinning matrix palette
//!
//! Owners address spans through DI groups ([`DiIndex`]), stable handles
//! to a set of span positions that survive insertions and removals.

pub mod buffer_group;
pub mod config;
pub mod di;
pub mod drawable;
pub mod edit;
pub mod flags;
pub mod geometry;
pub mod material;
pub mod palette;
pub mod particle;
pub mod persist;
pub mod sort;
pub mod span;

pub use buffer_group::{BufferGroup, GroupKey, SpanLocator};
pub use config::DrawableConfig;
pub use di::{DiIndex, DiTable};
pub use drawable::DrawableSpans;
pub use edit::AppendOptions;
pub use flags::{Criteria, DiFlags, DrawableProps, SpanProps, CONVERTED_SPAN_PROPS};
pub use geometry::{GeometrySpan, Vertex, VertexFormat};
pub use material::{MaterialKey, MaterialSlots};
pub use palette::{mul34, MatrixPalette};
pub use particle::{ParticleEmitter, ParticleSet, INDICES_PER_PARTICLE, VERTS_PER_PARTICLE};
pub use sort::FaceSortScratch;
pub use span::{EmitterId, ParticleSpan, SortTriangle, Span, SpanCore};

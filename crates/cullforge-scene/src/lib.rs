//! Per-frame scene culling and draw ordering for cullforge.
//!
//! - [`PageTreeMgr`]: composite culling over scene nodes, occluder ranking
//!   and render-level ordered drawing
//! - [`SceneNode`]: drawables and occluders culled as one unit
//! - [`Occluder`] / [`CullPoly`]: polygons that hide what is behind them
//! - [`Pipeline`]: what the manager needs from a renderer, with
//!   [`ViewPipeline`] as a headless implementation

pub mod camera;
pub mod config;
pub mod mgr;
pub mod node;
pub mod occluder;
pub mod pipeline;
pub mod view;

pub use camera::Camera;
pub use config::PageTreeConfig;
pub use mgr::{NodeKey, PageTreeMgr};
pub use node::{OccluderList, OccluderRef, SceneNode};
pub use occluder::{CullPoly, CullPolyFlags, Occluder, ShadowVolume};
pub use pipeline::{DrawVisList, DrawableId, PipeDebugFlags, Pipeline};
pub use view::{FrameStats, RenderCall, ViewCull, ViewPipeline};

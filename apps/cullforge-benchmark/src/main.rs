//! Cullforge headless frame benchmark.
//!
//! Builds a synthetic city of scene nodes (opaque blocks, span-sorted glass,
//! wall occluders and a face-sorted particle fountain) and orbits a camera
//! around it, pushing every frame through `PageTreeMgr::render` with the
//! recording `ViewPipeline`.
//!
//! # Usage
//!
//! ```bash
//! cargo run --release -p cullforge-benchmark -- [OPTIONS]
//! ```
//!
//! # Options
//!
//! - `--frames <N>`: Frames to render (default: 600)
//! - `--grid <N>`: City is N x N blocks (default: 8)
//! - `--no-occlusion`: Skip occluder submission
//! - `--show-all-trees`: Ignore the view when harvesting nodes
//! - `-h, --help`: Print help
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log level (e.g. `info`, `debug`, `trace`)
//!
//! Build with `--features profiling` to print per-stage timings at the end.

use std::time::Instant;

use anyhow::{bail, Context};
use cullforge_core::{Aabb, RenderLevel, VisRegion};
use cullforge_drawable::{AppendOptions, Criteria, DrawableProps, DrawableSpans, GeometrySpan, ParticleEmitter};
use cullforge_scene::{
    Camera, CullPoly, CullPolyFlags, FrameStats, NodeKey, Occluder, PageTreeMgr, PipeDebugFlags, SceneNode,
    ViewPipeline,
};
use glam::Vec3;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const BLOCK_SPACING: f32 = 20.0;
const CUBES_PER_BLOCK: u32 = 16;
const FOUNTAIN_SPOUTS: u32 = 4;
const PARTICLES_PER_SPOUT: u32 = 24;

struct Options {
    frames: u64,
    grid: u32,
    debug: PipeDebugFlags,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frames: 600,
            grid: 8,
            debug: PipeDebugFlags::empty(),
        }
    }
}

/// The fountain's node and the particle system feeding it.
struct Fountain {
    node: NodeKey,
    drawable: usize,
    system: u32,
}

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = parse_args()?;

    #[cfg(feature = "profiling")]
    {
        cullforge_profiler::init();
        info!("Profiler initialized");
    }

    let mut mgr = PageTreeMgr::default();
    build_city(&mut mgr, options.grid)?;
    let fountain = build_fountain(&mut mgr)?;
    info!(nodes = mgr.num_nodes(), grid = options.grid, "Scene built");

    let radius = options.grid as f32 * BLOCK_SPACING * 0.75;
    let mut pipe = ViewPipeline::new(orbit_camera(0.0, radius));
    pipe.set_debug_flags(options.debug);

    let mut totals = FrameStats::default();
    let mut worst_ms = 0.0_f32;
    let start = Instant::now();
    for frame in 0..options.frames {
        let frame_start = Instant::now();
        let t = frame as f32 / options.frames.max(1) as f32;

        pipe.set_camera(orbit_camera(t * std::f32::consts::TAU, radius));
        spray(&mut mgr, &fountain, t)?;
        pipe.begin_frame();
        let drawn = mgr.render(&mut pipe);

        let stats = pipe.stats();
        totals.prepped += stats.prepped;
        totals.render_calls += stats.render_calls;
        totals.spans_drawn += stats.spans_drawn;
        totals.occluder_polys += stats.occluder_polys;

        let frame_ms = frame_start.elapsed().as_secs_f32() * 1000.0;
        worst_ms = worst_ms.max(frame_ms);
        debug!(frame, drawn, calls = stats.render_calls, frame_ms, "Frame");

        #[cfg(feature = "profiling")]
        cullforge_profiler::end_frame(frame, frame_ms);
    }

    let elapsed = start.elapsed();
    let frames = options.frames.max(1) as f32;
    info!(
        frames = options.frames,
        avg_ms = elapsed.as_secs_f32() * 1000.0 / frames,
        worst_ms,
        "Benchmark complete"
    );
    info!(
        spans_per_frame = totals.spans_drawn as f32 / frames,
        calls_per_frame = totals.render_calls as f32 / frames,
        prepped_per_frame = totals.prepped as f32 / frames,
        occluder_polys_per_frame = totals.occluder_polys as f32 / frames,
        "Averages"
    );

    #[cfg(feature = "profiling")]
    {
        report_profile();
        cullforge_profiler::shutdown();
    }

    Ok(())
}

fn parse_args() -> anyhow::Result<Options> {
    let mut options = Options::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let value = args.next().context("--frames needs a value")?;
                options.frames = value.parse().with_context(|| format!("bad frame count {value:?}"))?;
            }
            "--grid" => {
                let value = args.next().context("--grid needs a value")?;
                options.grid = value.parse().with_context(|| format!("bad grid size {value:?}"))?;
                if options.grid == 0 || options.grid > 64 {
                    bail!("grid size must be between 1 and 64");
                }
            }
            "--no-occlusion" => options.debug |= PipeDebugFlags::NO_OCCLUSION,
            "--show-all-trees" => options.debug |= PipeDebugFlags::SHOW_ALL_TREES,
            other => bail!("unknown option {other:?} (try --help)"),
        }
    }
    Ok(options)
}

fn orbit_camera(angle: f32, radius: f32) -> Camera {
    let eye = Vec3::new(angle.cos() * radius, 12.0, angle.sin() * radius);
    Camera::looking_at(eye, Vec3::ZERO).with_aspect(16.0 / 9.0)
}

fn block_origin(x: u32, z: u32, grid: u32) -> Vec3 {
    let half = grid as f32 * BLOCK_SPACING * 0.5;
    Vec3::new(
        x as f32 * BLOCK_SPACING - half,
        0.0,
        z as f32 * BLOCK_SPACING - half,
    )
}

fn cube_at(min: Vec3, size: Vec3) -> GeometrySpan {
    GeometrySpan::cube(Aabb::new(min, min + size))
}

/// One node per block: an opaque tower cluster, a span-sorted glass canopy
/// and a wall that hides whatever stands behind it.
fn build_city(mgr: &mut PageTreeMgr, grid: u32) -> anyhow::Result<()> {
    let plaza = mgr.vis_mgr_mut().register_region(VisRegion::new(Aabb::new(
        Vec3::new(-BLOCK_SPACING, -1.0, -BLOCK_SPACING),
        Vec3::new(BLOCK_SPACING, 40.0, BLOCK_SPACING),
    )));

    for z in 0..grid {
        for x in 0..grid {
            let origin = block_origin(x, z, grid);
            let mut node = SceneNode::new(format!("block_{x}_{z}"));

            let mut towers = DrawableSpans::default();
            let cubes = (0..CUBES_PER_BLOCK)
                .map(|i| {
                    let height = 2.0 + ((i * 7 + x * 3 + z) % 5) as f32 * 2.0;
                    let min = origin + Vec3::new((i % 4) as f32 * 3.0, 0.0, (i / 4) as f32 * 3.0);
                    cube_at(min, Vec3::new(2.0, height, 2.0))
                })
                .collect();
            towers
                .append_di_spans(cubes, AppendOptions::default())
                .with_context(|| format!("towers of block {x},{z}"))?;
            node.add_drawable(towers);

            let mut glass = DrawableSpans::default();
            glass.set_criteria(
                Criteria::SORT_SPANS,
                RenderLevel::new(RenderLevel::BLEND_MAJOR, 0),
                0,
                u32::MAX,
            );
            let panes = (0..4)
                .map(|i| cube_at(origin + Vec3::new(i as f32 * 3.0, 12.0, 0.0), Vec3::new(2.5, 0.2, 10.0)))
                .collect();
            let canopy = glass
                .append_di_spans(panes, AppendOptions::default())
                .with_context(|| format!("canopy of block {x},{z}"))?;
            // Canopies are only drawn from outside the plaza
            glass.set_di_span_vis_set(canopy, plaza, true, false, true);
            node.add_drawable(glass);

            let wall = CullPoly::new(
                CullPolyFlags::empty(),
                vec![
                    origin + Vec3::new(-1.0, 0.0, -1.0),
                    origin + Vec3::new(12.0, 0.0, -1.0),
                    origin + Vec3::new(12.0, 8.0, -1.0),
                    origin + Vec3::new(-1.0, 8.0, -1.0),
                ],
            );
            node.add_occluder(Occluder::new(1.0, vec![wall]));
            mgr.add_node(node);
        }
    }
    Ok(())
}

fn build_fountain(mgr: &mut PageTreeMgr) -> anyhow::Result<Fountain> {
    let mut drawable = DrawableSpans::default();
    drawable.set_criteria(
        Criteria::SORT_FACES,
        RenderLevel::new(RenderLevel::BLEND_MAJOR, 1),
        0,
        u32::MAX,
    );
    drawable.set_drawable_property(DrawableProps::SORT_FACES, true);
    let system = drawable
        .create_particle_system(FOUNTAIN_SPOUTS, FOUNTAIN_SPOUTS * PARTICLES_PER_SPOUT, None)
        .context("fountain particle system")?;

    let mut node = SceneNode::new("fountain");
    let index = node.add_drawable(drawable);
    let key = mgr.add_node(node);
    Ok(Fountain {
        node: key,
        drawable: usize::from(index),
        system,
    })
}

/// Refill every spout with particles along a parabola that sweeps with `t`.
fn spray(mgr: &mut PageTreeMgr, fountain: &Fountain, t: f32) -> anyhow::Result<()> {
    let drawable = mgr
        .node_mut(fountain.node)
        .context("fountain node was removed")?
        .drawable_mut(fountain.drawable);
    drawable.reset_particle_system(fountain.system)?;
    for spout in 0..FOUNTAIN_SPOUTS {
        let heading = (spout as f32 / FOUNTAIN_SPOUTS as f32 + t) * std::f32::consts::TAU;
        let dir = Vec3::new(heading.cos(), 0.0, heading.sin());
        let positions = (0..PARTICLES_PER_SPOUT)
            .map(|i| {
                let s = i as f32 / PARTICLES_PER_SPOUT as f32;
                dir * (s * 6.0) + Vec3::Y * (1.0 + 8.0 * s * (1.0 - s))
            })
            .collect();
        drawable.assign_emitter_to_particle_system(fountain.system, &ParticleEmitter::new(spout, spout, positions))?;
    }
    Ok(())
}

#[cfg(feature = "profiling")]
fn report_profile() {
    let snapshot = cullforge_profiler::snapshot();
    let mut categories: Vec<_> = snapshot.categories.iter().collect();
    categories.sort_by_key(|stats| stats.category.order());
    for stats in categories {
        info!(
            "{:<20} avg {:>8.3} ms  max {:>8.3} ms  total {:>10.3} ms",
            stats.category.name(),
            stats.avg_ms(),
            stats.max_ms(),
            stats.total_ms()
        );
    }
    for stats in &snapshot.counters {
        info!(
            "{:<26} last frame {:>8}  total {:>10}",
            stats.counter.name(),
            stats.last_frame,
            stats.total
        );
    }
}

fn print_help() {
    eprintln!(
        "Cullforge headless frame benchmark

USAGE:
    cargo run --release -p cullforge-benchmark -- [OPTIONS]

OPTIONS:
    --frames <N>            Frames to render (default: 600)
    --grid <N>              City is N x N blocks, 1 to 64 (default: 8)
    --no-occlusion          Skip occluder submission
    --show-all-trees        Ignore the view when harvesting nodes
    -h, --help              Print this help message

EXAMPLES:
    # Default orbit
    cargo run --release -p cullforge-benchmark

    # Larger city with per-stage timings
    cargo run --release -p cullforge-benchmark --features profiling -- --grid 16

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

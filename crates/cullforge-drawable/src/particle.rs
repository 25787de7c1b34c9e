//! Particle pooling.
//!
//! A particle set reserves vertex and index storage for its maximum particle
//! count once, with the quad topology written up front. Emitters then claim
//! contiguous runs from a cursor that only moves forward until the set is
//! reset.

use cullforge_core::{Aabb, Error, Result};
use cullforge_spacetree::NodeFlags;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer_group::{GroupKey, SpanLocator};
use crate::drawable::{tree_for, DrawableSpans};
use crate::flags::{DiFlags, DrawableProps, SpanProps};
use crate::geometry::{Vertex, VertexFormat};
use crate::material::MaterialKey;
use crate::span::{EmitterId, ParticleSpan, SortTriangle, Span, SpanCore};

/// Vertices per particle quad.
pub const VERTS_PER_PARTICLE: u32 = 4;
/// Indices per particle quad.
pub const INDICES_PER_PARTICLE: u32 = 6;

/// Storage reserved for one particle system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleSet {
    /// Vertex layout
    pub format: VertexFormat,
    /// Buffer group holding the reservation
    pub group: u32,
    /// Index buffer holding the reservation
    pub ib: u32,
    /// First reserved vertex
    pub v_start: u32,
    /// Reserved vertices
    pub v_length: u32,
    /// First reserved index
    pub i_start: u32,
    /// Reserved indices
    pub i_length: u32,
    /// Next unclaimed vertex
    pub next_v_start: u32,
    /// Next unclaimed index
    pub next_i_start: u32,
    /// Spans created for the set
    pub num_spans: u32,
    /// DI group listing the set's spans
    pub di_index: u32,
}

impl ParticleSet {
    /// Rewind both cursors to the start of the reservation.
    pub fn rewind(&mut self) {
        self.next_v_start = self.v_start;
        self.next_i_start = self.i_start;
    }

    /// Vertices still unclaimed.
    #[inline]
    pub const fn verts_left(&self) -> u32 {
        self.v_start + self.v_length - self.next_v_start
    }

    /// Particles that still fit.
    #[inline]
    pub const fn particles_left(&self) -> u32 {
        self.verts_left() / VERTS_PER_PARTICLE
    }

    /// Shift offsets at or past `from` down by `delta` after the group's
    /// vertices were compacted.
    pub fn shift_vertices(&mut self, from: u32, delta: u32) {
        if self.v_start >= from {
            self.v_start -= delta;
            self.next_v_start -= delta;
        }
    }

    /// Shift offsets at or past `from` down by `delta` after index buffer
    /// `ib` was compacted.
    pub fn shift_indices(&mut self, ib: u32, from: u32, delta: u32) {
        if self.ib == ib && self.i_start >= from {
            self.i_start -= delta;
            self.next_i_start -= delta;
        }
    }
}

/// A source of particles as seen by the drawable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleEmitter {
    /// Identity recorded on the span it feeds
    pub id: u32,
    /// Which of the set's spans this emitter draws through
    pub span_index: u32,
    /// Current particle positions
    pub positions: Vec<Vec3>,
    /// Bounds of all particles
    pub bounds: Aabb,
}

impl ParticleEmitter {
    /// An emitter with particles at `positions`.
    #[must_use]
    pub fn new(id: u32, span_index: u32, positions: Vec<Vec3>) -> Self {
        let bounds = Aabb::from_points(positions.iter().copied());
        Self {
            id,
            span_index,
            positions,
            bounds,
        }
    }

    /// Live particles.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn particle_count(&self) -> u32 {
        self.positions.len() as u32
    }

    /// Identity of this emitter.
    #[inline]
    #[must_use]
    pub const fn emitter_id(&self) -> EmitterId {
        EmitterId(self.id)
    }
}

/// Corner texture coordinates of a particle quad, in vertex order.
const QUAD_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

impl DrawableSpans {
    /// Reserve storage for up to `max_particles` particles drawn through
    /// `max_spans` spans, and return the DI group listing those spans.
    ///
    /// The quad index topology is written once here. Spans start hidden
    /// until an emitter is assigned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capacity`] if the reservation cannot fit in a single
    /// buffer group.
    pub fn create_particle_system(
        &mut self,
        max_spans: u32,
        max_particles: u32,
        material: Option<MaterialKey>,
    ) -> Result<u32> {
        let too_many = || {
            Error::Capacity(format!(
                "particle system of {max_particles} particles exceeds buffer limits"
            ))
        };
        let num_verts = max_particles.checked_mul(VERTS_PER_PARTICLE).ok_or_else(too_many)?;
        let num_indices = max_particles
            .checked_mul(INDICES_PER_PARTICLE)
            .ok_or_else(too_many)?;
        if num_verts > self.config.max_verts_per_buffer
            || num_indices >= self.config.max_indices_per_buffer
        {
            return Err(too_many());
        }

        let format = if material.is_some() {
            VertexFormat::UV1
        } else {
            VertexFormat::PLAIN
        };
        let key = GroupKey {
            format,
            vert_volatile: true,
            idx_volatile: false,
            lod: 0,
        };
        let g = self.find_group(key, num_verts);
        let group = &mut self.groups[g as usize];
        let v_start = group.reserve_vertices(num_verts);
        let (ib, i_start) = group.reserve_indices(num_indices)?;
        let quads: Vec<u32> = (0..max_particles)
            .flat_map(|p| {
                let v = v_start + p * VERTS_PER_PARTICLE;
                [v, v + 1, v + 2, v, v + 2, v + 3]
            })
            .collect();
        group.stuff_from_tri_list(ib, i_start, &quads);

        let di = self.di.new_group(DiFlags::DONT_TRANSFORM);
        #[allow(clippy::cast_possible_truncation)]
        let set = self.particle_sets.len() as u32;
        let material = material.map(|m| self.materials.add(m));
        let mut props = SpanProps::RUN_TIME_LIGHT | SpanProps::NO_DRAW | SpanProps::LITE_VTX_PRESHADED;
        if self.props.contains(DrawableProps::SORT_SPANS) {
            props |= SpanProps::FACES_SORTABLE;
        }
        let origin = Aabb::from_point(Vec3::ZERO);

        #[allow(clippy::cast_possible_truncation)]
        let first = self.spans.len() as u32;
        for _ in 0..max_spans {
            self.spans.push(Span::Particle(ParticleSpan {
                core: SpanCore {
                    props,
                    material,
                    local_bounds: origin,
                    world_bounds: origin,
                    locator: SpanLocator {
                        group: g,
                        v_start,
                        v_length: 0,
                        ib,
                        i_start,
                        i_length: 0,
                    },
                    ..SpanCore::default()
                },
                set,
                source: None,
                num_particles: 0,
            }));
            self.source_spans.push(None);
        }
        self.di.get_mut(di).indices.extend(first..first + max_spans);

        self.particle_sets.push(ParticleSet {
            format,
            group: g,
            ib,
            v_start,
            v_length: num_verts,
            i_start,
            i_length: num_indices,
            next_v_start: v_start,
            next_i_start: i_start,
            num_spans: max_spans,
            di_index: di,
        });

        self.needs_cleanup = true;
        self.rebuild_vectors();
        self.trash_space_tree();
        self.ready_to_render = false;
        debug!(di, group = g, max_spans, max_particles, "created particle system");
        Ok(di)
    }

    fn particle_set_for(&self, di: u32) -> Result<usize> {
        self.particle_sets
            .iter()
            .position(|s| s.di_index == di)
            .ok_or_else(|| Error::InvalidData(format!("DI group {di} is not a particle system")))
    }

    /// Hide every span of particle system `di` and rewind its cursors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `di` is not a particle system.
    pub fn reset_particle_system(&mut self, di: u32) -> Result<()> {
        let set_idx = self.particle_set_for(di)?;
        let tree = tree_for(&mut self.space_tree, &self.spans);
        for &idx in &self.di.get(di).indices {
            let Some(p) = self.spans[idx as usize].as_particle_mut() else {
                continue;
            };
            let loc = &mut p.core.locator;
            (loc.v_start, loc.v_length, loc.i_start, loc.i_length) = (0, 0, 0, 0);
            p.core.props |= SpanProps::NO_DRAW;
            p.core.sort_data = None;
            p.source = None;
            p.num_particles = 0;
            tree.set_leaf_flag(idx as usize, NodeFlags::DISABLED, true);
        }

        let set = &mut self.particle_sets[set_idx];
        set.rewind();
        let group = &mut self.groups[set.group as usize];
        group.set_vertex_end(set.next_v_start);
        if self.props.contains(DrawableProps::SORT_FACES) {
            group.set_index_end(set.ib, set.next_i_start);
        }
        self.ready_to_render = false;
        Ok(())
    }

    /// Claim the next run of particle system `di`'s storage for `emitter`
    /// and show the span it feeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `di` is not a particle system,
    /// [`Error::OutOfBounds`] if the emitter names a span the system does
    /// not have, and [`Error::Capacity`] if the remaining reservation is
    /// too small. Nothing is changed on error.
    pub fn assign_emitter_to_particle_system(&mut self, di: u32, emitter: &ParticleEmitter) -> Result<()> {
        let set_idx = self.particle_set_for(di)?;
        let idx = *self
            .di
            .get(di)
            .indices
            .get(emitter.span_index as usize)
            .ok_or_else(|| {
                Error::OutOfBounds(format!(
                    "emitter span {} of particle system {di}",
                    emitter.span_index
                ))
            })? as usize;
        if !self.spans[idx].is_particle() {
            return Err(Error::InvalidData(format!("span {idx} is not a particle span")));
        }

        let count = emitter.particle_count();
        let set = &mut self.particle_sets[set_idx];
        if count > set.particles_left() {
            return Err(Error::Capacity(format!(
                "{count} particles requested, {} left in system {di}",
                set.particles_left()
            )));
        }

        let (v_start, i_start) = (set.next_v_start, set.next_i_start);
        set.next_v_start += count * VERTS_PER_PARTICLE;
        set.next_i_start += count * INDICES_PER_PARTICLE;
        let (g, ib, next_v, next_i) = (set.group, set.ib, set.next_v_start, set.next_i_start);

        let vertices: Vec<Vertex> = emitter
            .positions
            .iter()
            .flat_map(|&pos| {
                QUAD_UVS.map(|uv| Vertex {
                    uv,
                    ..Vertex::new(pos)
                })
            })
            .collect();
        let group = &mut self.groups[g as usize];
        group.write_vertices(v_start, &vertices);
        group.set_vertex_end(next_v);
        let sort_faces = self.props.contains(DrawableProps::SORT_FACES);
        if sort_faces {
            group.set_index_end(ib, next_i);
        }

        if let Some(p) = self.spans[idx].as_particle_mut() {
            p.core.locator = SpanLocator {
                group: g,
                v_start,
                v_length: count * VERTS_PER_PARTICLE,
                ib,
                i_start,
                i_length: count * INDICES_PER_PARTICLE,
            };
            p.source = Some(emitter.emitter_id());
            p.num_particles = count;
            p.core.props.remove(SpanProps::NO_DRAW);
            if sort_faces {
                #[allow(clippy::cast_possible_truncation)]
                let span = idx as u32;
                let data = emitter
                    .positions
                    .iter()
                    .zip((v_start..).step_by(VERTS_PER_PARTICLE as usize))
                    .flat_map(|(&center, v)| {
                        [
                            SortTriangle {
                                center,
                                indices: [v, v + 1, v + 2],
                                span,
                            },
                            SortTriangle {
                                center,
                                indices: [v, v + 2, v + 3],
                                span,
                            },
                        ]
                    })
                    .collect();
                p.core.sort_data = Some(data);
                p.core.props |= SpanProps::FACES_SORTABLE;
            }
            p.core.local_bounds = emitter.bounds;
            p.core.world_bounds = emitter.bounds;
        }

        let tree = tree_for(&mut self.space_tree, &self.spans);
        tree.set_leaf_flag(idx, NodeFlags::DISABLED, false);
        tree.move_leaf(idx, emitter.bounds);
        self.ready_to_render = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursors_and_shifts() {
        let mut set = ParticleSet {
            format: VertexFormat::PLAIN,
            group: 0,
            ib: 0,
            v_start: 40,
            v_length: 400,
            i_start: 60,
            i_length: 600,
            next_v_start: 240,
            next_i_start: 360,
            num_spans: 4,
            di_index: 0,
        };
        assert_eq!(set.particles_left(), 50);

        set.shift_vertices(10, 10);
        set.shift_indices(0, 60, 20);
        set.shift_indices(1, 0, 99);
        assert_eq!((set.v_start, set.next_v_start), (30, 230));
        assert_eq!((set.i_start, set.next_i_start), (40, 340));

        set.rewind();
        assert_eq!(set.particles_left(), 100);
    }

    #[test]
    fn emitter_bounds_cover_particles() {
        let e = ParticleEmitter::new(3, 0, vec![Vec3::ZERO, Vec3::new(2.0, -1.0, 5.0)]);
        assert_eq!(e.particle_count(), 2);
        assert_eq!(e.bounds.min, Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(e.bounds.max, Vec3::new(2.0, 0.0, 5.0));
    }

    #[test]
    fn emitters_claim_consecutive_runs() {
        let mut d = DrawableSpans::default();
        let di = d.create_particle_system(4, 100, None).unwrap();
        assert_eq!(d.num_spans(), 4);
        assert_eq!(d.particle_spans(), &[0, 1, 2, 3]);
        assert!(d.native_property(Some(di), SpanProps::NO_DRAW));
        assert!(d.di_spans(di).dont_transform());

        let fifty = |span| ParticleEmitter::new(1, span, vec![Vec3::new(1.0, 2.0, 3.0); 50]);
        d.assign_emitter_to_particle_system(di, &fifty(0)).unwrap();
        let first = *d.span(0).locator();
        assert_eq!((first.v_length, first.i_length), (200, 300));

        d.assign_emitter_to_particle_system(di, &fifty(1)).unwrap();
        let second = *d.span(1).locator();
        assert_eq!(second.v_start, first.v_start + 200);
        assert_eq!(second.i_start, first.i_start + 300);
        assert!(!d.span(1).props().contains(SpanProps::NO_DRAW));
        assert_eq!(d.span(1).as_particle().map(|p| p.num_particles), Some(50));

        let one_more = ParticleEmitter::new(2, 2, vec![Vec3::ZERO]);
        assert!(matches!(
            d.assign_emitter_to_particle_system(di, &one_more),
            Err(Error::Capacity(_))
        ));

        d.reset_particle_system(di).unwrap();
        assert!(d.native_property(Some(di), SpanProps::NO_DRAW));
        d.assign_emitter_to_particle_system(di, &one_more).unwrap();
        assert_eq!(d.span(2).locator().v_start, first.v_start);
    }

    #[test]
    fn quad_topology_is_prewritten() {
        let mut d = DrawableSpans::default();
        d.create_particle_system(1, 2, Some(MaterialKey(4))).unwrap();
        let set = &d.particle_sets()[0];
        assert_eq!(set.format, VertexFormat::UV1);
        let g = &d.groups()[set.group as usize];
        assert_eq!(
            &g.indices(set.ib)[set.i_start as usize..][..12],
            &[0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]
        );
        assert!(g.key().vert_volatile);
    }

    #[test]
    fn particle_spans_harvest_once_assigned() {
        use cullforge_spacetree::AcceptAll;

        let mut d = DrawableSpans::default();
        d.set_drawable_property(DrawableProps::SORT_FACES, true);
        let di = d.create_particle_system(2, 10, None).unwrap();
        let mut out = Vec::new();
        d.harvest(&AcceptAll, &mut out);
        assert!(out.is_empty());

        let e = ParticleEmitter::new(9, 1, vec![Vec3::ZERO, Vec3::X]);
        d.assign_emitter_to_particle_system(di, &e).unwrap();
        d.harvest(&AcceptAll, &mut out);
        assert_eq!(out, vec![1]);

        let core = d.span(1).core();
        let data = core.sort_data.as_ref().unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data[3].indices, [4, 6, 7]);
        assert_eq!(core.world_bounds, e.bounds);
    }

    #[test]
    fn bad_particle_requests_are_errors() {
        let mut d = DrawableSpans::default();
        assert!(matches!(
            d.create_particle_system(1, 10_000, None),
            Err(Error::Capacity(_))
        ));
        let di = d.create_particle_system(1, 10, None).unwrap();
        let stray = ParticleEmitter::new(0, 5, vec![Vec3::ZERO]);
        assert!(matches!(
            d.assign_emitter_to_particle_system(di, &stray),
            Err(Error::OutOfBounds(_))
        ));
        assert!(d.reset_particle_system(di + 1).is_err());
    }

    #[test]
    fn oversized_particle_counts_do_not_wrap() {
        let cfg = crate::DrawableConfig::default()
            .with_max_verts_per_buffer(u32::MAX)
            .with_max_indices_per_buffer(u32::MAX);
        let mut d = DrawableSpans::new(cfg);
        // Vertex count overflows first, then only the index count does
        for max in [u32::MAX / 4 + 1, u32::MAX / 6 + 1, u32::MAX] {
            assert!(matches!(
                d.create_particle_system(1, max, None),
                Err(Error::Capacity(_))
            ));
        }
        assert!(d.groups().is_empty());
        assert_eq!(d.num_spans(), 0);
    }
}

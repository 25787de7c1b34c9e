//! Renderable spans.
//!
//! Every span shares [`SpanCore`]; particle spans add the bookkeeping for
//! the particle set they draw from. The drawable stores them as one
//! [`Span`] array whose positions double as space tree leaf indices.

use cullforge_core::{Aabb, BitVector, VisMgr};
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::buffer_group::SpanLocator;
use crate::flags::SpanProps;

/// One triangle's sort record: its local-space centre and indices.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortTriangle {
    /// Centroid of the three vertices
    pub center: Vec3,
    /// Absolute vertex indices
    pub indices: [u32; 3],
    /// Owning span position
    pub span: u32,
}

/// State common to every span.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanCore {
    /// Properties
    pub props: SpanProps,
    /// Sub-drawable type bits
    pub sub_type: u32,
    /// Material slot
    pub material: Option<u32>,
    /// Local-to-world transform
    pub local_to_world: Mat4,
    /// World-to-local transform
    pub world_to_local: Mat4,
    /// Bounds in local space
    pub local_bounds: Aabb,
    /// Bounds in world space
    pub world_bounds: Aabb,
    /// Visibility regions this span belongs to
    pub vis_set: BitVector,
    /// Visibility regions that hide this span
    pub vis_not: BitVector,
    /// Buffer storage
    pub locator: SpanLocator,
    /// Skinning matrices per vertex
    pub num_matrices: u8,
    /// First palette slot
    pub base_matrix: u32,
    /// Palette offset of the widest-reaching bone
    pub max_bone: u16,
    /// Palette offset of the second bounds bone
    pub pen_bone: u16,
    /// Fade-in distance
    pub min_dist: f32,
    /// Fade-out distance
    pub max_dist: f32,
    /// Per-triangle sort records, built on first sort
    pub sort_data: Option<Vec<SortTriangle>>,
}

impl Default for SpanCore {
    fn default() -> Self {
        Self {
            props: SpanProps::empty(),
            sub_type: 0,
            material: None,
            local_to_world: Mat4::IDENTITY,
            world_to_local: Mat4::IDENTITY,
            local_bounds: Aabb::EMPTY,
            world_bounds: Aabb::EMPTY,
            vis_set: BitVector::from_bits([VisMgr::NORMAL]),
            vis_not: BitVector::new(),
            locator: SpanLocator::default(),
            num_matrices: 0,
            base_matrix: 0,
            max_bone: 0,
            pen_bone: 0,
            min_dist: -1.0,
            max_dist: -1.0,
            sort_data: None,
        }
    }
}

impl SpanCore {
    /// Set or clear membership of visibility region `bit`.
    pub fn set_vis_bit(&mut self, bit: usize, on: bool) {
        self.vis_set.set_bit(bit, on);
    }

    /// Set or clear exclusion by visibility region `bit`.
    pub fn set_vis_not_bit(&mut self, bit: usize, on: bool) {
        self.vis_not.set_bit(bit, on);
    }

    /// Returns true if this span passes the given visibility sets.
    pub fn passes_vis(&self, vis_set: &BitVector, vis_not: &BitVector) -> bool {
        !self.vis_not.overlap(vis_not) && self.vis_set.overlap(vis_set)
    }

    /// Number of sort records usable for the span's current index range.
    pub fn sortable_tris(&self) -> usize {
        self.sort_data
            .as_ref()
            .map_or(0, |d| d.len().min(self.locator.num_tris() as usize))
    }
}

/// Identifies the emitter feeding a particle span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmitterId(pub u32);

/// A span drawing part of a particle set's reservation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleSpan {
    /// Shared state
    pub core: SpanCore,
    /// Index of the owning particle set
    pub set: u32,
    /// Emitter currently assigned
    pub source: Option<EmitterId>,
    /// Particles drawn
    pub num_particles: u32,
}

/// A span of either kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Span {
    /// Static or skinned mesh geometry
    Icicle(SpanCore),
    /// Pooled particle quads
    Particle(ParticleSpan),
}

impl Span {
    /// Shared state.
    #[inline]
    pub const fn core(&self) -> &SpanCore {
        match self {
            Self::Icicle(core) => core,
            Self::Particle(p) => &p.core,
        }
    }

    /// Shared state, mutably.
    #[inline]
    pub fn core_mut(&mut self) -> &mut SpanCore {
        match self {
            Self::Icicle(core) => core,
            Self::Particle(p) => &mut p.core,
        }
    }

    /// World-space bounds.
    #[inline]
    pub const fn world_bounds(&self) -> &Aabb {
        &self.core().world_bounds
    }

    /// Properties.
    #[inline]
    pub const fn props(&self) -> SpanProps {
        self.core().props
    }

    /// Visibility region membership.
    #[inline]
    pub const fn vis_set(&self) -> &BitVector {
        &self.core().vis_set
    }

    /// Storage location.
    #[inline]
    pub const fn locator(&self) -> &SpanLocator {
        &self.core().locator
    }

    /// Returns true for particle spans.
    #[inline]
    pub const fn is_particle(&self) -> bool {
        matches!(self, Self::Particle(_))
    }

    /// The particle span, if this is one.
    pub const fn as_particle(&self) -> Option<&ParticleSpan> {
        match self {
            Self::Particle(p) => Some(p),
            Self::Icicle(_) => None,
        }
    }

    /// The particle span, mutably, if this is one.
    pub fn as_particle_mut(&mut self) -> Option<&mut ParticleSpan> {
        match self {
            Self::Particle(p) => Some(p),
            Self::Icicle(_) => None,
        }
    }
}

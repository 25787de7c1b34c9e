//! Input geometry handed to a drawable.

use bytemuck::{Pod, Zeroable};
use cullforge_core::Aabb;
use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::flags::SpanProps;
use crate::material::MaterialKey;

/// Packed vertex as stored in buffer groups.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vertex {
    /// Local-space position
    pub position: [f32; 3],
    /// Local-space normal
    pub normal: [f32; 3],
    /// Packed RGBA colour
    pub color: u32,
    /// Texture coordinate
    pub uv: [f32; 2],
}

impl Vertex {
    /// A white vertex at `position` with a +Z normal.
    #[must_use]
    pub fn new(position: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: [0.0, 0.0, 1.0],
            color: 0xFFFF_FFFF,
            uv: [0.0; 2],
        }
    }

    /// Position as a vector.
    #[inline]
    #[must_use]
    pub fn pos(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }
}

/// Vertex layout tag. Spans only share a buffer group with spans of the
/// same format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexFormat(pub u8);

impl VertexFormat {
    /// Position, normal and colour only.
    pub const PLAIN: Self = Self(0);
    /// One UV channel.
    pub const UV1: Self = Self(1);

    /// Format carrying `count` UV channels.
    #[must_use]
    pub const fn from_uv_count(count: u8) -> Self {
        Self(count & 0x0F)
    }
}

/// One mesh piece to append to a drawable.
///
/// Indices are relative to `vertices`; they are rebased when packed into a
/// buffer group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometrySpan {
    /// Vertex layout
    pub format: VertexFormat,
    /// Vertex data
    pub vertices: Vec<Vertex>,
    /// Triangle list
    pub indices: Vec<u32>,
    /// Local-to-world transform
    pub local_to_world: Mat4,
    /// World-to-local transform
    pub world_to_local: Mat4,
    /// Bounds of `vertices`
    pub local_bounds: Aabb,
    /// Material, if any
    pub material: Option<MaterialKey>,
    /// Properties carried into the span
    pub props: SpanProps,
    /// Skinning matrices per vertex; zero for rigid geometry
    pub num_matrices: u8,
    /// First palette slot used by this span
    pub base_matrix: u32,
    /// Palette offset of the bone with the largest reach, or 0
    pub max_bone: u16,
    /// Palette offset of the second bone used for bounds, or 0
    pub pen_bone: u16,
    /// Fade-in distance; negative when unused
    pub min_dist: f32,
    /// Fade-out distance; negative when unused
    pub max_dist: f32,
}

impl GeometrySpan {
    /// Geometry with an identity transform and bounds computed from
    /// `vertices`.
    #[must_use]
    pub fn new(format: VertexFormat, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let local_bounds = Aabb::from_points(vertices.iter().map(Vertex::pos));
        Self {
            format,
            vertices,
            indices,
            local_to_world: Mat4::IDENTITY,
            world_to_local: Mat4::IDENTITY,
            local_bounds,
            material: None,
            props: SpanProps::empty(),
            num_matrices: 0,
            base_matrix: 0,
            max_bone: 0,
            pen_bone: 0,
            min_dist: -1.0,
            max_dist: -1.0,
        }
    }

    /// An axis-aligned box mesh: 8 vertices, 12 triangles.
    #[must_use]
    pub fn cube(bounds: Aabb) -> Self {
        let (lo, hi) = (bounds.min, bounds.max);
        let vertices = (0..8)
            .map(|i| {
                Vertex::new(Vec3::new(
                    if i & 1 == 0 { lo.x } else { hi.x },
                    if i & 2 == 0 { lo.y } else { hi.y },
                    if i & 4 == 0 { lo.z } else { hi.z },
                ))
            })
            .collect();
        let indices = vec![
            0, 2, 1, 1, 2, 3, // -z
            4, 5, 6, 5, 7, 6, // +z
            0, 1, 4, 1, 5, 4, // -y
            2, 6, 3, 3, 6, 7, // +y
            0, 4, 2, 2, 4, 6, // -x
            1, 3, 5, 3, 7, 5, // +x
        ];
        Self::new(VertexFormat::PLAIN, vertices, indices)
    }

    /// Set the transform pair. `world_to_local` is the inverse.
    #[must_use]
    pub fn with_transform(mut self, local_to_world: Mat4) -> Self {
        self.local_to_world = local_to_world;
        self.world_to_local = local_to_world.inverse();
        self
    }

    /// Set the material.
    #[must_use]
    pub const fn with_material(mut self, material: MaterialKey) -> Self {
        self.material = Some(material);
        self
    }

    /// Set span properties.
    #[must_use]
    pub const fn with_props(mut self, props: SpanProps) -> Self {
        self.props = props;
        self
    }

    /// Mark as skinned against palette slots starting at `base_matrix`.
    #[must_use]
    pub const fn with_skinning(
        mut self,
        num_matrices: u8,
        base_matrix: u32,
        max_bone: u16,
        pen_bone: u16,
    ) -> Self {
        self.num_matrices = num_matrices;
        self.base_matrix = base_matrix;
        self.max_bone = max_bone;
        self.pen_bone = pen_bone;
        self
    }

    /// Set fade distances.
    #[must_use]
    pub const fn with_vis_dists(mut self, min_dist: f32, max_dist: f32) -> Self {
        self.min_dist = min_dist;
        self.max_dist = max_dist;
        self
    }

    /// World-space bounds under the current transform.
    #[must_use]
    pub fn world_bounds(&self) -> Aabb {
        self.local_bounds.transform(&self.local_to_world)
    }

    /// Number of vertices.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn num_vertices(&self) -> u32 {
        self.vertices.len() as u32
    }

    /// Number of indices.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn num_indices(&self) -> u32 {
        self.indices.len() as u32
    }
}

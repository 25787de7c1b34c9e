//! Drawable persistence.
//!
//! A drawable is written as one bincode record. The space tree, when built,
//! is embedded in its own binary layout so a loaded drawable does not have
//! to rebuild it. Per-frame state (visibility cache, upload status) is not
//! stored.

use std::io::{Read, Write};

use cullforge_core::{Aabb, BitVector, Error, RenderLevel, Result};
use cullforge_spacetree::SpaceTree;
use glam::Mat4;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer_group::BufferGroup;
use crate::config::DrawableConfig;
use crate::di::DiTable;
use crate::drawable::DrawableSpans;
use crate::flags::{Criteria, DrawableProps};
use crate::geometry::GeometrySpan;
use crate::material::MaterialSlots;
use crate::palette::MatrixPalette;
use crate::particle::ParticleSet;
use crate::span::Span;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct DrawableRecord {
    version: u32,
    config: DrawableConfig,
    props: DrawableProps,
    criteria: Criteria,
    render_level: RenderLevel,
    type_mask: u32,
    load_mask: u32,
    local_to_world: Mat4,
    world_to_local: Mat4,
    local_bounds: Aabb,
    world_bounds: Aabb,
    max_world_bounds: Aabb,
    spans: Vec<Span>,
    source_spans: Vec<Option<GeometrySpan>>,
    groups: Vec<BufferGroup>,
    materials: MaterialSlots,
    di: DiTable,
    palette: MatrixPalette,
    particle_sets: Vec<ParticleSet>,
    vis_set: BitVector,
    vis_not: BitVector,
    needs_cleanup: bool,
    space_tree: Option<Vec<u8>>,
}

fn codec_error(err: bincode::Error) -> Error {
    Error::Serialization(err.to_string())
}

impl DrawableSpans {
    /// Serialize the drawable.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let record = DrawableRecord {
            version: FORMAT_VERSION,
            config: self.config,
            props: self.props,
            criteria: self.criteria,
            render_level: self.render_level,
            type_mask: self.type_mask,
            load_mask: self.load_mask,
            local_to_world: self.local_to_world,
            world_to_local: self.world_to_local,
            local_bounds: self.local_bounds,
            world_bounds: self.world_bounds,
            max_world_bounds: self.max_world_bounds,
            spans: self.spans.clone(),
            source_spans: self.source_spans.clone(),
            groups: self.groups.clone(),
            materials: self.materials.clone(),
            di: self.di.clone(),
            palette: self.palette.clone(),
            particle_sets: self.particle_sets.clone(),
            vis_set: self.vis_set.clone(),
            vis_not: self.vis_not.clone(),
            needs_cleanup: self.needs_cleanup,
            space_tree: self.space_tree.as_ref().map(SpaceTree::to_bytes).transpose()?,
        };
        bincode::serialize_into(writer, &record).map_err(codec_error)
    }

    /// Deserialize a drawable written by [`DrawableSpans::write_to`].
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let record: DrawableRecord = bincode::deserialize_from(reader).map_err(codec_error)?;
        if record.version != FORMAT_VERSION {
            return Err(Error::InvalidData(format!(
                "drawable format version {} unsupported",
                record.version
            )));
        }
        validate_record(&record)?;

        let space_tree = record
            .space_tree
            .as_deref()
            .map(SpaceTree::from_bytes)
            .transpose()?;
        if let Some(tree) = &space_tree {
            if tree.num_leaves() as usize != record.spans.len() {
                return Err(Error::InvalidData(format!(
                    "space tree has {} leaves for {} spans",
                    tree.num_leaves(),
                    record.spans.len()
                )));
            }
        }

        let mut drawable = Self::new(record.config);
        drawable.props = record.props;
        drawable.criteria = record.criteria;
        drawable.render_level = record.render_level;
        drawable.type_mask = record.type_mask;
        drawable.load_mask = record.load_mask;
        drawable.local_to_world = record.local_to_world;
        drawable.world_to_local = record.world_to_local;
        drawable.local_bounds = record.local_bounds;
        drawable.world_bounds = record.world_bounds;
        drawable.max_world_bounds = record.max_world_bounds;
        drawable.spans = record.spans;
        drawable.source_spans = record.source_spans;
        drawable.groups = record.groups;
        drawable.materials = record.materials;
        drawable.di = record.di;
        drawable.palette = record.palette;
        drawable.particle_sets = record.particle_sets;
        drawable.vis_set = record.vis_set;
        drawable.vis_not = record.vis_not;
        drawable.needs_cleanup = record.needs_cleanup;
        drawable.space_tree = space_tree;
        drawable.rebuild_vectors();

        debug!(
            spans = drawable.spans.len(),
            groups = drawable.groups.len(),
            "loaded drawable"
        );
        Ok(drawable)
    }

    /// Serialize into a byte vector.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Deserialize from a byte slice.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        Self::read_from(&mut bytes)
    }
}

/// Check every cross-reference a loaded drawable relies on.
fn validate_record(record: &DrawableRecord) -> Result<()> {
    if record.source_spans.len() != record.spans.len() {
        return Err(Error::InvalidData(format!(
            "{} source entries for {} spans",
            record.source_spans.len(),
            record.spans.len()
        )));
    }
    for (i, span) in record.spans.iter().enumerate() {
        let loc = span.locator();
        let group = record
            .groups
            .get(loc.group as usize)
            .ok_or_else(|| Error::InvalidData(format!("span {i} names missing group {}", loc.group)))?;
        let verts_ok = loc.v_start + loc.v_length <= group.num_verts();
        let indices_ok = loc.i_length == 0
            || (loc.ib < group.num_index_buffers()
                && loc.i_start + loc.i_length <= group.num_indices(loc.ib));
        if !verts_ok || !indices_ok {
            return Err(Error::InvalidData(format!("span {i} storage out of range")));
        }
        if let Some(slot) = span.core().material {
            if record.materials.get(slot).is_none() {
                return Err(Error::InvalidData(format!("span {i} names empty material slot {slot}")));
            }
        }
        if let Some(p) = span.as_particle() {
            if p.set as usize >= record.particle_sets.len() {
                return Err(Error::InvalidData(format!("span {i} names missing particle set {}", p.set)));
            }
        }
    }
    for (d, group) in record.di.iter().enumerate() {
        let limit = if group.is_matrix_only() {
            record.palette.len()
        } else {
            record.spans.len()
        };
        if let Some(bad) = group.indices.iter().find(|&&i| i as usize >= limit) {
            return Err(Error::InvalidData(format!("DI group {d} entry {bad} out of range")));
        }
    }
    Ok(())
}

//! Shared vertex/index storage.
//!
//! A buffer group holds the vertices of every span with one vertex format,
//! volatility and LOD, plus one or more index buffers. Spans address their
//! data by absolute offsets into these arrays; removing data shifts every
//! later offset, which the owning drawable patches during compaction.

use cullforge_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geometry::{Vertex, VertexFormat};

/// Where one span's data lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanLocator {
    /// Buffer group index
    pub group: u32,
    /// First vertex
    pub v_start: u32,
    /// Vertex count
    pub v_length: u32,
    /// Index buffer within the group
    pub ib: u32,
    /// First index
    pub i_start: u32,
    /// Index count
    pub i_length: u32,
}

impl SpanLocator {
    /// Number of triangles.
    #[inline]
    pub const fn num_tris(&self) -> u32 {
        self.i_length / 3
    }
}

/// Matching key for finding a compatible group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    /// Vertex layout
    pub format: VertexFormat,
    /// Vertices rewritten every frame
    pub vert_volatile: bool,
    /// Indices rewritten every frame
    pub idx_volatile: bool,
    /// Level of detail
    pub lod: u32,
}

/// Shared vertex and index storage for spans of one format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BufferGroup {
    key: GroupKey,
    max_verts: u32,
    max_indices: u32,
    vertices: Vec<Vertex>,
    index_buffers: Vec<Vec<u32>>,
    vertex_end: u32,
    index_ends: Vec<u32>,
    dirty: bool,
}

impl BufferGroup {
    /// Create an empty group.
    #[must_use]
    pub const fn new(key: GroupKey, max_verts: u32, max_indices: u32) -> Self {
        Self {
            key,
            max_verts,
            max_indices,
            vertices: Vec::new(),
            index_buffers: Vec::new(),
            vertex_end: 0,
            index_ends: Vec::new(),
            dirty: true,
        }
    }

    /// The matching key.
    #[inline]
    pub const fn key(&self) -> GroupKey {
        self.key
    }

    /// Returns true if this group can take `num_verts` more vertices under
    /// `key`.
    pub fn accepts(&self, key: GroupKey, num_verts: u32) -> bool {
        self.key == key && self.verts_left() >= num_verts
    }

    /// Vertex capacity remaining.
    #[inline]
    pub fn verts_left(&self) -> u32 {
        self.max_verts.saturating_sub(self.num_verts())
    }

    /// Vertices stored.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn num_verts(&self) -> u32 {
        self.vertices.len() as u32
    }

    /// Index buffers in the group.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn num_index_buffers(&self) -> u32 {
        self.index_buffers.len() as u32
    }

    /// Indices stored in buffer `ib`.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn num_indices(&self, ib: u32) -> u32 {
        self.index_buffers[ib as usize].len() as u32
    }

    /// Indices stored across all buffers.
    pub fn total_indices(&self) -> usize {
        self.index_buffers.iter().map(Vec::len).sum()
    }

    /// Vertex data.
    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Index data of buffer `ib`.
    #[inline]
    pub fn indices(&self, ib: u32) -> &[u32] {
        &self.index_buffers[ib as usize]
    }

    /// Append vertices and return the offset of the first.
    pub fn append_vertices(&mut self, verts: &[Vertex]) -> u32 {
        let start = self.num_verts();
        self.vertices.extend_from_slice(verts);
        self.vertex_end = self.num_verts();
        self.dirty = true;
        start
    }

    /// Reserve `count` default vertices and return the offset of the first.
    pub fn reserve_vertices(&mut self, count: u32) -> u32 {
        let start = self.num_verts();
        self.vertices
            .resize(start as usize + count as usize, Vertex::default());
        self.vertex_end = self.num_verts();
        self.dirty = true;
        start
    }

    /// Overwrite vertices starting at `start`.
    pub fn write_vertices(&mut self, start: u32, verts: &[Vertex]) {
        let start = start as usize;
        self.vertices[start..start + verts.len()].copy_from_slice(verts);
        self.dirty = true;
    }

    /// Reserve `count` zeroed indices in a buffer with room for them.
    ///
    /// Returns `(buffer, first index)`. Requests of the per-buffer maximum
    /// or more cannot be satisfied by any buffer.
    pub fn reserve_indices(&mut self, count: u32) -> Result<(u32, u32)> {
        if count >= self.max_indices {
            return Err(Error::Capacity(format!(
                "{count} indices requested, buffer limit is {}",
                self.max_indices
            )));
        }
        let room = self
            .index_buffers
            .last()
            .is_some_and(|last| last.len() + count as usize <= self.max_indices as usize);
        let ib = if room {
            self.num_index_buffers() - 1
        } else {
            self.index_buffers.push(Vec::new());
            self.index_ends.push(0);
            trace!(buffer = self.index_buffers.len() - 1, "new index buffer");
            self.num_index_buffers() - 1
        };
        let buf = &mut self.index_buffers[ib as usize];
        #[allow(clippy::cast_possible_truncation)]
        let start = buf.len() as u32;
        buf.resize(buf.len() + count as usize, 0);
        self.index_ends[ib as usize] = start + count;
        self.dirty = true;
        Ok((ib, start))
    }

    /// Append indices rebased by `base`. Returns `(buffer, first index)`.
    pub fn append_indices(&mut self, indices: &[u32], base: u32) -> Result<(u32, u32)> {
        #[allow(clippy::cast_possible_truncation)]
        let (ib, start) = self.reserve_indices(indices.len() as u32)?;
        let dst = &mut self.index_buffers[ib as usize][start as usize..];
        for (d, &s) in dst.iter_mut().zip(indices) {
            *d = s + base;
        }
        Ok((ib, start))
    }

    /// Remove `count` vertices starting at `start`.
    pub fn delete_vertices(&mut self, start: u32, count: u32) {
        let start = start as usize;
        self.vertices.drain(start..start + count as usize);
        self.vertex_end = self.num_verts();
        self.dirty = true;
    }

    /// Subtract `delta` from every index at or above `from`, in every buffer.
    pub fn adjust_indices(&mut self, from: u32, delta: u32) {
        for buf in &mut self.index_buffers {
            for idx in buf.iter_mut().filter(|i| **i >= from) {
                *idx -= delta;
            }
        }
        self.dirty = true;
    }

    /// Remove `count` indices from buffer `ib` starting at `start`.
    pub fn delete_indices(&mut self, ib: u32, start: u32, count: u32) {
        let buf = &mut self.index_buffers[ib as usize];
        let start = start as usize;
        buf.drain(start..start + count as usize);
        #[allow(clippy::cast_possible_truncation)]
        let len = buf.len() as u32;
        self.index_ends[ib as usize] = len;
        self.dirty = true;
    }

    /// Shrink buffer `ib` to `len` indices.
    pub fn truncate_indices(&mut self, ib: u32, len: u32) {
        self.index_buffers[ib as usize].truncate(len as usize);
        self.index_ends[ib as usize] = len;
        self.dirty = true;
    }

    /// Triangles of a range as index triples.
    pub fn tri_list(&self, ib: u32, start: u32, num_tris: u32) -> Vec<[u32; 3]> {
        let start = start as usize;
        self.index_buffers[ib as usize][start..start + 3 * num_tris as usize]
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect()
    }

    /// Overwrite indices of buffer `ib` from `start` with a flat triangle
    /// list.
    pub fn stuff_from_tri_list(&mut self, ib: u32, start: u32, tris: &[u32]) {
        let start = start as usize;
        self.index_buffers[ib as usize][start..start + tris.len()].copy_from_slice(tris);
        self.dirty = true;
    }

    /// Upload limit for the vertex buffer.
    #[inline]
    pub const fn vertex_end(&self) -> u32 {
        self.vertex_end
    }

    /// Set the upload limit for the vertex buffer.
    pub fn set_vertex_end(&mut self, end: u32) {
        self.vertex_end = end;
        self.dirty = true;
    }

    /// Upload limit for index buffer `ib`.
    #[inline]
    pub fn index_end(&self, ib: u32) -> u32 {
        self.index_ends[ib as usize]
    }

    /// Set the upload limit for index buffer `ib`.
    pub fn set_index_end(&mut self, ib: u32, end: u32) {
        self.index_ends[ib as usize] = end;
        self.dirty = true;
    }

    /// Returns true if data changed since the last
    /// [`BufferGroup::prep_for_rendering`].
    #[inline]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the current contents as uploaded.
    pub fn prep_for_rendering(&mut self) {
        if self.dirty {
            trace!(
                verts = self.vertex_end,
                buffers = self.index_buffers.len(),
                "buffer group upload"
            );
            self.dirty = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn group() -> BufferGroup {
        BufferGroup::new(
            GroupKey {
                format: VertexFormat::PLAIN,
                vert_volatile: false,
                idx_volatile: false,
                lod: 0,
            },
            100,
            12,
        )
    }

    fn verts(n: u32) -> Vec<Vertex> {
        #[allow(clippy::cast_precision_loss)]
        (0..n).map(|i| Vertex::new(Vec3::splat(i as f32))).collect()
    }

    #[test]
    fn indices_are_rebased_and_spill_into_new_buffers() {
        let mut g = group();
        let v0 = g.append_vertices(&verts(3));
        let v1 = g.append_vertices(&verts(3));
        assert_eq!((v0, v1), (0, 3));

        assert_eq!(g.append_indices(&[0, 1, 2, 0, 2, 1], v0).unwrap(), (0, 0));
        assert_eq!(g.append_indices(&[0, 1, 2], v1).unwrap(), (0, 6));
        assert_eq!(g.indices(0)[6..], [3, 4, 5]);
        // 9 + 6 > 12
        assert_eq!(g.append_indices(&[0, 1, 2, 2, 1, 0], v1).unwrap(), (1, 0));
        assert_eq!(g.total_indices(), 15);
    }

    #[test]
    fn oversized_index_requests_fail() {
        let mut g = group();
        assert!(matches!(g.reserve_indices(12), Err(Error::Capacity(_))));
        assert!(g.reserve_indices(11).is_ok());
    }

    #[test]
    fn delete_and_adjust() {
        let mut g = group();
        g.append_vertices(&verts(6));
        g.append_indices(&[0, 1, 2, 3, 4, 5], 0).unwrap();
        g.delete_vertices(0, 3);
        g.adjust_indices(3, 3);
        g.delete_indices(0, 0, 3);
        assert_eq!(g.num_verts(), 3);
        assert_eq!(g.indices(0), [0, 1, 2]);
        assert_eq!(g.vertices()[0].position, [3.0; 3]);
    }

    #[test]
    fn tri_list_round_trips_through_stuff() {
        let mut g = group();
        g.append_vertices(&verts(4));
        g.append_indices(&[0, 1, 2, 0, 2, 3], 0).unwrap();
        let tris = g.tri_list(0, 0, 2);
        assert_eq!(tris, vec![[0, 1, 2], [0, 2, 3]]);
        g.stuff_from_tri_list(0, 0, &[0, 2, 3, 0, 1, 2]);
        assert_eq!(g.tri_list(0, 0, 2), vec![[0, 2, 3], [0, 1, 2]]);
    }

    #[test]
    fn prep_clears_dirty() {
        let mut g = group();
        assert!(g.is_dirty());
        g.prep_for_rendering();
        assert!(!g.is_dirty());
        g.reserve_vertices(4);
        assert!(g.is_dirty());
        assert_eq!(g.vertex_end(), 4);
    }
}

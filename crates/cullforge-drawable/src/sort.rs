//! Per-frame triangle ordering for alpha-blended spans.
//!
//! Two strategies:
//! - [`DrawableSpans::sort_span`] orders one span's triangles by view depth
//!   in place.
//! - [`DrawableSpans::sort_visible_spans`] orders all visible spans'
//!   triangles by distance to the viewer, in batches of whole spans, then
//!   repacks the visible spans contiguously at the front of their index
//!   buffers.
//!
//! Both draw on the spans' sort records, so the index buffers of a
//! face-sorted drawable are regenerated rather than edited.

use cullforge_core::{RadixSort, SortFlags, SortKey};
use glam::{Mat4, Vec3};
use hashbrown::HashMap;

#[cfg(feature = "profiling")]
use cullforge_profiler::{profile_count, profile_scope, Counter, EventCategory};

use crate::drawable::DrawableSpans;
use crate::flags::SpanProps;
use crate::palette::mul34;
use crate::span::SortTriangle;

/// Where a span's sorted triangles are written in the combined list.
#[derive(Clone, Copy, Debug)]
struct SpanCursor {
    base: usize,
    next: isize,
    step: isize,
}

/// Working storage reused across face sorts.
#[derive(Debug, Default)]
pub struct FaceSortScratch {
    sorter: RadixSort,
    keys: Vec<SortKey>,
    bodies: Vec<SortTriangle>,
    tri_list: Vec<u32>,
    cursors: HashMap<u32, SpanCursor>,
    new_starts: HashMap<(u32, u32), u32>,
}

impl FaceSortScratch {
    /// Create empty scratch storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl DrawableSpans {
    /// Order span `idx`'s triangles back to front by depth along the view
    /// axis.
    ///
    /// `world_to_camera` is the view matrix; depth is the camera-space z of
    /// each triangle centre, sorted ascending.
    pub fn sort_span(&mut self, idx: usize, world_to_camera: &Mat4, scratch: &mut FaceSortScratch) {
        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::FaceSort);
        #[cfg(feature = "profiling")]
        profile_count!(Counter::FaceSortCalls, 1);

        self.make_span_sortable(idx);
        let core = self.spans[idx].core();
        let num_tris = core.sortable_tris();
        let Some(data) = core.sort_data.as_deref() else {
            return;
        };
        if num_tris == 0 {
            return;
        }
        #[cfg(feature = "profiling")]
        profile_count!(Counter::FacesSorted, num_tris);

        let w2c = mul34(world_to_camera, &core.local_to_world);
        let row = w2c.row(2);
        let (axis, offset) = (row.truncate(), row.w);

        scratch.keys.clear();
        scratch
            .keys
            .extend(data[..num_tris].iter().map(|t| SortKey::from_f32(axis.dot(t.center) + offset)));
        let order = scratch.sorter.sort(&scratch.keys, SortFlags::empty());

        scratch.tri_list.clear();
        scratch
            .tri_list
            .extend(order.iter().flat_map(|&o| data[o as usize].indices));

        let loc = core.locator;
        self.groups[loc.group as usize].stuff_from_tri_list(loc.ib, loc.i_start, &scratch.tri_list);
        self.ready_to_render = false;
    }

    /// Order the triangles of every span in `vis` back to front by distance
    /// from `view_pos`, treating them as one batch.
    ///
    /// Spans are processed in chunks of whole spans until a chunk reaches
    /// the configured triangle count. Spans flagged
    /// [`SpanProps::REVERSE_SORT`] receive their triangles front to back.
    /// Visible spans are then repacked from offset zero of each index
    /// buffer, in `vis` order.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub fn sort_visible_spans(&mut self, vis: &[u16], view_pos: Vec3, scratch: &mut FaceSortScratch) {
        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::FaceSort);
        #[cfg(feature = "profiling")]
        profile_count!(Counter::FaceSortCalls, 1);

        if vis.is_empty() {
            return;
        }
        for &i in vis {
            self.make_span_sortable(usize::from(i));
        }

        scratch.cursors.clear();
        let mut total = 0usize;
        for &i in vis {
            let core = self.spans[usize::from(i)].core();
            let len = core.sortable_tris() * 3;
            let reverse = core.props.contains(SpanProps::REVERSE_SORT);
            let base = total * 3;
            let first = if reverse && len > 0 { base + len - 3 } else { base };
            scratch.cursors.insert(
                u32::from(i),
                SpanCursor {
                    base,
                    next: first as isize,
                    step: if reverse { -3 } else { 3 },
                },
            );
            total += len / 3;
        }
        if total == 0 {
            return;
        }
        #[cfg(feature = "profiling")]
        profile_count!(Counter::FacesSorted, total);

        scratch.tri_list.clear();
        scratch.tri_list.resize(total * 3, 0);

        let chunk = self.config.tri_sort_chunk.max(1);
        let mut next_vis = 0;
        while next_vis < vis.len() {
            scratch.keys.clear();
            scratch.bodies.clear();
            while next_vis < vis.len() && scratch.bodies.len() < chunk {
                let core = self.spans[usize::from(vis[next_vis])].core();
                let view_local = core.world_to_local.transform_point3(view_pos);
                if let Some(data) = core.sort_data.as_deref() {
                    for tri in &data[..core.sortable_tris()] {
                        let dist = (view_local - tri.center).length_squared();
                        scratch.keys.push(SortKey::from_f32(-dist));
                        scratch.bodies.push(*tri);
                    }
                }
                next_vis += 1;
            }

            let order = scratch.sorter.sort(&scratch.keys, SortFlags::empty());
            for &o in order {
                let tri = &scratch.bodies[o as usize];
                if let Some(cursor) = scratch.cursors.get_mut(&tri.span) {
                    let at = cursor.next as usize;
                    scratch.tri_list[at..at + 3].copy_from_slice(&tri.indices);
                    cursor.next += cursor.step;
                }
            }
        }

        scratch.new_starts.clear();
        for &i in vis {
            let Some(cursor) = scratch.cursors.get(&u32::from(i)) else {
                continue;
            };
            let core = self.spans[usize::from(i)].core_mut();
            let len = core.sortable_tris() * 3;
            let loc = &mut core.locator;
            let start = scratch.new_starts.entry((loc.group, loc.ib)).or_insert(0);
            loc.i_start = *start;
            *start += len as u32;
            self.groups[loc.group as usize].stuff_from_tri_list(
                loc.ib,
                loc.i_start,
                &scratch.tri_list[cursor.base..cursor.base + len],
            );
        }

        self.ready_to_render = false;
    }

    /// Write the spans in `vis` back out in their unsorted triangle order.
    pub fn replay_unsorted_spans(&mut self, vis: &[u16], scratch: &mut FaceSortScratch) {
        for &i in vis {
            let i = usize::from(i);
            self.make_span_sortable(i);
            let core = self.spans[i].core();
            let Some(data) = core.sort_data.as_deref() else {
                continue;
            };
            scratch.tri_list.clear();
            scratch
                .tri_list
                .extend(data[..core.sortable_tris()].iter().flat_map(|t| t.indices));
            let loc = core.locator;
            self.groups[loc.group as usize].stuff_from_tri_list(loc.ib, loc.i_start, &scratch.tri_list);
        }
        self.ready_to_render = false;
    }
}

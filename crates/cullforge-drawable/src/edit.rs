//! Adding, removing and compacting spans.

use cullforge_core::{Error, Result, VisMgr};
use glam::{Mat4, Vec3};
use tracing::{debug, warn};

#[cfg(feature = "profiling")]
use cullforge_profiler::{profile_scope, EventCategory};

use crate::buffer_group::{BufferGroup, GroupKey, SpanLocator};
use crate::drawable::DrawableSpans;
use crate::flags::{DiFlags, DrawableProps, SpanProps, CONVERTED_SPAN_PROPS};
use crate::geometry::GeometrySpan;
use crate::span::{SortTriangle, Span, SpanCore};

/// How [`DrawableSpans::append_di_spans`] places new spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendOptions {
    /// DI group to add to; a fresh group when unset
    pub di: Option<u32>,
    /// Insert ahead of existing spans instead of before the partial-sort tail
    pub add_to_front: bool,
    /// Retain the source geometry for later refreshes
    pub keep_source: bool,
    /// Level of detail of the new geometry
    pub lod: u32,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            di: None,
            add_to_front: false,
            keep_source: true,
            lod: 0,
        }
    }
}

impl AppendOptions {
    /// Add to an existing DI group.
    #[must_use]
    pub const fn with_di(mut self, di: u32) -> Self {
        self.di = Some(di);
        self
    }

    /// Insert at the front.
    #[must_use]
    pub const fn with_add_to_front(mut self, add_to_front: bool) -> Self {
        self.add_to_front = add_to_front;
        self
    }

    /// Retain or drop the source geometry.
    #[must_use]
    pub const fn with_keep_source(mut self, keep_source: bool) -> Self {
        self.keep_source = keep_source;
        self
    }

    /// Set the level of detail.
    #[must_use]
    pub const fn with_lod(mut self, lod: u32) -> Self {
        self.lod = lod;
        self
    }
}

/// Maximal runs of `false` as `(start, len)`, in ascending order.
#[allow(clippy::cast_possible_truncation)]
fn unused_runs(used: &[bool]) -> Vec<(u32, u32)> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &u) in used.iter().enumerate() {
        match (u, start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                runs.push((s as u32, (i - s) as u32));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s as u32, (used.len() - s) as u32));
    }
    runs
}

fn mark(used: &mut [bool], start: u32, len: u32) {
    let start = start as usize;
    if let Some(run) = used.get_mut(start..start + len as usize) {
        run.fill(true);
    }
}

impl DrawableSpans {
    /// Convert geometry into new spans and add them to a DI group.
    ///
    /// Partial-sort pieces always go at the end. Others go in before any
    /// partial-sort spans, or at the front with [`AppendOptions::add_to_front`].
    /// The first piece decides for the whole batch. Existing DI entries at or past the
    /// insertion point are shifted. Returns the DI group index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Capacity`] if a piece has more vertices or indices
    /// than a single buffer can hold. The drawable is left unchanged.
    pub fn append_di_spans(&mut self, spans: Vec<GeometrySpan>, opts: AppendOptions) -> Result<u32> {
        for geo in &spans {
            if geo.num_vertices() > self.config.max_verts_per_buffer
                || geo.num_indices() >= self.config.max_indices_per_buffer
            {
                return Err(Error::Capacity(format!(
                    "span with {} vertices and {} indices exceeds buffer limits",
                    geo.num_vertices(),
                    geo.num_indices()
                )));
            }
        }

        if self.needs_cleanup {
            self.compact();
        }

        let di = self.di.find_or_create(opts.di);
        let character = self.props.contains(DrawableProps::CHARACTER);
        if character {
            self.vis_set.set_bit(VisMgr::CHARACTER, true);
        }

        let insert_at = if spans
            .first()
            .is_some_and(|g| g.props.contains(SpanProps::PARTIAL_SORT))
        {
            self.spans.len()
        } else if opts.add_to_front {
            0
        } else {
            self.spans
                .iter()
                .position(|s| s.props().contains(SpanProps::PARTIAL_SORT))
                .unwrap_or(self.spans.len())
        };

        let count = spans.len();
        let shifting = insert_at < self.spans.len();
        for (i, geo) in spans.into_iter().enumerate() {
            let mut core = self.convert_span(&geo, opts.lod)?;
            if character {
                core.set_vis_bit(VisMgr::CHARACTER, true);
            }
            self.spans.insert(insert_at + i, Span::Icicle(core));
            self.source_spans
                .insert(insert_at + i, opts.keep_source.then_some(geo));
        }

        #[allow(clippy::cast_possible_truncation)]
        let (at, n) = (insert_at as u32, count as u32);
        if shifting {
            self.di.shift_from(at, n);
        }
        self.di.get_mut(di).indices.extend(at..at + n);

        self.reindex_sort_data();
        if self.props.contains(DrawableProps::SORT_FACES) {
            for idx in insert_at..insert_at + count {
                self.make_span_sortable(idx);
            }
        }

        self.local_bounds = self.world_bounds.transform(&self.world_to_local);
        self.max_world_bounds = self.world_bounds;
        self.rebuild_vectors();
        self.trash_space_tree();
        self.ready_to_render = false;

        debug!(di, count, at = insert_at, total = self.spans.len(), "appended spans");
        Ok(di)
    }

    fn convert_span(&mut self, geo: &GeometrySpan, lod: u32) -> Result<SpanCore> {
        let props = geo.props & CONVERTED_SPAN_PROPS;
        if props.contains(SpanProps::VIS_LOS) {
            self.props |= DrawableProps::HAS_VIS_LOS;
        }
        let world_bounds = geo.world_bounds();
        self.world_bounds = self.world_bounds.merge(&world_bounds);

        let key = GroupKey {
            format: geo.format,
            vert_volatile: self.props.contains(DrawableProps::VOLATILE),
            idx_volatile: self.props.contains(DrawableProps::SORT_FACES)
                || props.contains(SpanProps::PARTIAL_SORT),
            lod,
        };
        let g = self.find_group(key, geo.num_vertices());
        let group = &mut self.groups[g as usize];
        let v_start = group.append_vertices(&geo.vertices);
        let (ib, i_start) = group.append_indices(&geo.indices, v_start)?;

        Ok(SpanCore {
            props,
            material: geo.material.map(|m| self.materials.add(m)),
            local_to_world: geo.local_to_world,
            world_to_local: geo.world_to_local,
            local_bounds: geo.local_bounds,
            world_bounds,
            locator: SpanLocator {
                group: g,
                v_start,
                v_length: geo.num_vertices(),
                ib,
                i_start,
                i_length: geo.num_indices(),
            },
            num_matrices: geo.num_matrices,
            base_matrix: geo.base_matrix,
            max_bone: geo.max_bone,
            pen_bone: geo.pen_bone,
            min_dist: geo.min_dist,
            max_dist: geo.max_dist,
            ..SpanCore::default()
        })
    }

    /// First group accepting `num_verts` under `key`, or a new one.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn find_group(&mut self, key: GroupKey, num_verts: u32) -> u32 {
        if let Some(g) = self.groups.iter().position(|g| g.accepts(key, num_verts)) {
            return g as u32;
        }
        self.groups.push(BufferGroup::new(
            key,
            self.config.max_verts_per_buffer,
            self.config.max_indices_per_buffer,
        ));
        debug!(group = self.groups.len() - 1, ?key, "new buffer group");
        (self.groups.len() - 1) as u32
    }

    /// Remove every span of DI group `di`.
    ///
    /// Storage is reclaimed by the next [`DrawableSpans::compact`]. A
    /// matrix-only group just gives up its palette slots.
    ///
    /// # Panics
    ///
    /// Panics if the group was already removed.
    pub fn remove_di_spans(&mut self, di: u32) {
        let group = self.di.get(di);
        if group.is_matrix_only() {
            self.remove_di_matrix_spans(di);
            return;
        }
        assert!(!group.is_empty(), "DI group {di} already removed");

        let mut doomed = group.indices.clone();
        doomed.sort_unstable();
        let mut dropped_set = None;
        for &idx in doomed.iter().rev() {
            let span = self.spans.remove(idx as usize);
            self.source_spans.remove(idx as usize);
            if let Some(slot) = span.core().material {
                if !self.spans.iter().any(|s| s.core().material == Some(slot)) {
                    self.materials.release(slot);
                }
            }
            if let Span::Particle(p) = span {
                dropped_set = Some(p.set);
            }
            self.di.close_gap(idx);
        }

        if let Some(set) = dropped_set {
            self.particle_sets.remove(set as usize);
            for p in self.spans.iter_mut().filter_map(Span::as_particle_mut) {
                if p.set > set {
                    p.set -= 1;
                }
            }
        }

        self.di.get_mut(di).reset();
        self.reindex_sort_data();
        self.trash_space_tree();
        self.rebuild_vectors();
        self.needs_cleanup = true;
        self.ready_to_render = false;
        debug!(di, removed = doomed.len(), remaining = self.spans.len(), "removed spans");
    }

    /// Squeeze out vertex and index storage no span or particle set uses,
    /// patching every offset that pointed past a removed run.
    pub fn compact(&mut self) {
        if !self.needs_cleanup {
            return;
        }
        #[cfg(feature = "profiling")]
        profile_scope!(EventCategory::GarbageCollect);

        let face_sorted = self.props.contains(DrawableProps::SORT_FACES);
        let (mut verts_freed, mut indices_freed) = (0u32, 0u32);
        for g in 0..self.groups.len() {
            #[allow(clippy::cast_possible_truncation)]
            let g32 = g as u32;
            let group = &self.groups[g];
            let mut used_v = vec![false; group.num_verts() as usize];
            let mut used_i: Vec<Vec<bool>> = (0..group.num_index_buffers())
                .map(|ib| vec![false; group.num_indices(ib) as usize])
                .collect();

            for span in &self.spans {
                let loc = span.locator();
                if loc.group == g32 {
                    mark(&mut used_v, loc.v_start, loc.v_length);
                    mark(&mut used_i[loc.ib as usize], loc.i_start, loc.i_length);
                }
            }
            for set in self.particle_sets.iter().filter(|s| s.group == g32) {
                mark(&mut used_v, set.v_start, set.v_length);
                mark(&mut used_i[set.ib as usize], set.i_start, set.i_length);
            }

            for &(start, len) in unused_runs(&used_v).iter().rev() {
                let end = start + len;
                let group = &mut self.groups[g];
                group.delete_vertices(start, len);
                group.adjust_indices(end, len);
                for core in self.spans.iter_mut().map(Span::core_mut) {
                    if core.locator.group != g32 {
                        continue;
                    }
                    if core.locator.v_start >= end {
                        core.locator.v_start -= len;
                    }
                    for tri in core.sort_data.iter_mut().flatten() {
                        for v in tri.indices.iter_mut().filter(|v| **v >= end) {
                            *v -= len;
                        }
                    }
                }
                for set in self.particle_sets.iter_mut().filter(|s| s.group == g32) {
                    set.shift_vertices(end, len);
                }
                verts_freed += len;
            }

            if face_sorted && self.groups[g].key().idx_volatile {
                indices_freed += self.truncate_sorted_indices(g32);
                continue;
            }
            for (ib, used) in used_i.iter().enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let ib = ib as u32;
                for &(start, len) in unused_runs(used).iter().rev() {
                    let end = start + len;
                    self.groups[g].delete_indices(ib, start, len);
                    for core in self.spans.iter_mut().map(Span::core_mut) {
                        let loc = &mut core.locator;
                        if loc.group == g32 && loc.ib == ib && loc.i_start >= end {
                            loc.i_start -= len;
                        }
                    }
                    for set in self.particle_sets.iter_mut().filter(|s| s.group == g32) {
                        set.shift_indices(ib, end, len);
                    }
                    indices_freed += len;
                }
            }
        }

        self.needs_cleanup = false;
        self.ready_to_render = false;
        debug!(verts_freed, indices_freed, "compacted drawable storage");
    }

    /// Shrink each index buffer of face-sorted group `g` to the total index
    /// count of its spans. Face sorting repacks visible spans from offset
    /// zero every frame, so ranges of hidden spans may overlap and only the
    /// total is meaningful. Ranges left past the new end are pulled back
    /// inside. Returns the number of indices dropped.
    fn truncate_sorted_indices(&mut self, g: u32) -> u32 {
        let mut freed = 0;
        for ib in 0..self.groups[g as usize].num_index_buffers() {
            let live: u32 = self
                .spans
                .iter()
                .map(Span::locator)
                .filter(|l| l.group == g && l.ib == ib)
                .map(|l| l.i_length)
                .sum();
            let have = self.groups[g as usize].num_indices(ib);
            if live >= have {
                continue;
            }
            self.groups[g as usize].truncate_indices(ib, live);
            for core in self.spans.iter_mut().map(Span::core_mut) {
                let loc = &mut core.locator;
                if loc.group == g && loc.ib == ib && loc.i_start + loc.i_length > live {
                    loc.i_start = live - loc.i_length;
                }
            }
            freed += have - live;
        }
        freed
    }

    /// Re-upload span `idx` from its retained source geometry.
    pub fn refresh_span(&mut self, idx: usize) {
        if self.needs_cleanup {
            self.compact();
        }
        self.refresh_span_data(idx);
        self.finish_refresh();
    }

    /// Re-upload every span of DI group `di` from retained source geometry.
    pub fn refresh_di_spans(&mut self, di: u32) {
        if self.needs_cleanup {
            self.compact();
        }
        let group = self.di.get(di);
        if group.is_matrix_only() {
            return;
        }
        for idx in group.indices.clone() {
            self.refresh_span_data(idx as usize);
        }
        self.finish_refresh();
    }

    fn refresh_span_data(&mut self, idx: usize) {
        let Some(src) = self.source_spans.get(idx).and_then(Option::as_ref) else {
            warn!(span = idx, "no source geometry retained, skipping refresh");
            return;
        };
        let core = self.spans[idx].core_mut();
        if src.num_vertices() != core.locator.v_length {
            warn!(
                span = idx,
                have = core.locator.v_length,
                source = src.num_vertices(),
                "source vertex count changed, skipping refresh"
            );
            return;
        }

        self.groups[core.locator.group as usize].write_vertices(core.locator.v_start, &src.vertices);
        core.local_to_world = src.local_to_world;
        core.world_to_local = src.world_to_local;
        core.props |= src.props & CONVERTED_SPAN_PROPS;
        core.local_bounds = src.local_bounds;
        core.world_bounds = src.world_bounds();
        self.world_bounds = self.world_bounds.merge(&core.world_bounds);

        if self.props.contains(DrawableProps::SORT_FACES) && !self.spans[idx].is_particle() {
            let core = self.spans[idx].core_mut();
            core.props.remove(SpanProps::FACES_SORTABLE);
            core.sort_data = None;
            self.make_span_sortable(idx);
        }
    }

    fn finish_refresh(&mut self) {
        self.local_bounds = self.world_bounds.transform(&self.world_to_local);
        self.max_world_bounds = self.max_world_bounds.merge(&self.world_bounds);
        self.trash_space_tree();
        self.ready_to_render = false;
    }

    /// Build per-triangle sort records for span `idx` if it has none.
    #[allow(clippy::cast_possible_truncation)]
    pub fn make_span_sortable(&mut self, idx: usize) {
        let core = self.spans[idx].core();
        if core.props.contains(SpanProps::FACES_SORTABLE) {
            return;
        }
        let loc = core.locator;
        let group = &self.groups[loc.group as usize];
        let verts = group.vertices();
        let data = group
            .tri_list(loc.ib, loc.i_start, loc.num_tris())
            .into_iter()
            .map(|indices| SortTriangle {
                center: indices
                    .iter()
                    .map(|&v| verts[v as usize].pos())
                    .sum::<Vec3>()
                    / 3.0,
                indices,
                span: idx as u32,
            })
            .collect();

        let core = self.spans[idx].core_mut();
        core.sort_data = Some(data);
        core.props |= SpanProps::FACES_SORTABLE;
    }

    /// Point every sort record at its span's current position.
    #[allow(clippy::cast_possible_truncation)]
    fn reindex_sort_data(&mut self) {
        for (i, span) in self.spans.iter_mut().enumerate() {
            for tri in span.core_mut().sort_data.iter_mut().flatten() {
                tri.span = i as u32;
            }
        }
    }

    /// Recompute the particle and blending span lists.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn rebuild_vectors(&mut self) {
        self.particle_spans.clear();
        self.blending_spans.clear();
        for (i, span) in self.spans.iter().enumerate() {
            if span.is_particle() {
                self.particle_spans.push(i as u32);
            }
            if span.core().num_matrices > 2 {
                self.blending_spans.push(i as u32);
            }
        }
    }

    // ------------------------------------------------------------------
    // Matrix palette
    // ------------------------------------------------------------------

    /// Add `count` palette slots and return the first.
    pub fn append_di_matrix_spans(&mut self, count: usize) -> u32 {
        if self.needs_cleanup {
            self.compact();
        }
        let base = self.palette.grow(count);
        debug!(base, count, "grew matrix palette");
        base
    }

    /// Create a matrix-only DI group.
    pub fn new_di_matrix_index(&mut self) -> u32 {
        self.di.new_group(DiFlags::MATRIX_ONLY)
    }

    /// Point matrix-only DI group `di` at palette slots
    /// `base..base + count`.
    pub fn assign_di_matrix_slots(&mut self, di: u32, base: u32, count: u32) {
        let group = self.di.get_mut(di);
        debug_assert!(group.is_matrix_only(), "DI group {di} is not matrix-only");
        group.indices.clear();
        group.indices.extend(base..base + count);
    }

    /// Release a matrix-only DI group.
    pub fn remove_di_matrix_spans(&mut self, di: u32) {
        self.di.get_mut(di).reset();
        self.needs_cleanup = true;
    }

    /// Set a palette slot's bind-time matrices.
    pub fn set_initial_bone(&mut self, slot: usize, local_to_bone: Mat4, bone_to_local: Mat4) {
        self.palette.set_initial_bone(slot, local_to_bone, bone_to_local);
    }

    /// Find palette slots already holding `bones` as bind matrices.
    ///
    /// Looks at the bases of skinned spans with the same matrix count, or
    /// every slot with `search_all`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn find_bone_base_matrix(&self, bones: &[Mat4], search_all: bool) -> Option<u32> {
        if search_all {
            let last = self.palette.len().checked_sub(bones.len())?;
            return (0..=last)
                .find(|&i| self.palette.matches_at(i, bones))
                .map(|i| i as u32);
        }
        self.spans
            .iter()
            .map(Span::core)
            .filter(|c| c.num_matrices > 0 && usize::from(c.num_matrices) == bones.len())
            .find(|c| self.palette.matches_at(c.base_matrix as usize, bones))
            .map(|c| c.base_matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialKey;
    use cullforge_core::Aabb;
    use cullforge_spacetree::AcceptAll;

    fn cube_at(x: f32) -> GeometrySpan {
        GeometrySpan::cube(Aabb::new(Vec3::new(x, 0.0, 0.0), Vec3::new(x + 1.0, 1.0, 1.0)))
    }

    fn partial_flags(d: &DrawableSpans) -> Vec<bool> {
        d.spans()
            .iter()
            .map(|s| s.props().contains(SpanProps::PARTIAL_SORT))
            .collect()
    }

    fn totals(d: &DrawableSpans) -> (u32, usize) {
        d.groups()
            .iter()
            .fold((0, 0), |(v, i), g| (v + g.num_verts(), i + g.total_indices()))
    }

    #[test]
    fn runs_of_unused() {
        assert_eq!(unused_runs(&[true, false, false, true, false]), vec![(1, 2), (4, 1)]);
        assert!(unused_runs(&[true, true]).is_empty());
        assert_eq!(unused_runs(&[false; 3]), vec![(0, 3)]);
    }

    #[test]
    fn append_places_spans_and_di_entries() {
        let mut d = DrawableSpans::default();
        let a = d
            .append_di_spans(vec![cube_at(0.0), cube_at(2.0)], AppendOptions::default())
            .unwrap();
        assert_eq!(d.num_spans(), 2);
        assert_eq!(d.di_spans(a).indices, vec![0, 1]);
        assert_eq!(d.groups().len(), 1);
        assert_eq!(d.span(1).locator().v_start, 8);
        assert_eq!(d.span(1).locator().i_start, 36);
        // Indices are rebased into the shared vertex array
        assert!(d.groups()[0].indices(0)[36..].iter().all(|&i| i >= 8));

        let b = d
            .append_di_spans(vec![cube_at(4.0)], AppendOptions::default().with_add_to_front(true))
            .unwrap();
        assert_eq!(d.di_spans(b).indices, vec![0]);
        assert_eq!(d.di_spans(a).indices, vec![1, 2]);
        assert!(d.source_span(0).is_some());
    }

    #[test]
    fn partial_sort_spans_stay_last() {
        let mut d = DrawableSpans::default();
        d.append_di_spans(
            vec![cube_at(0.0).with_props(SpanProps::PARTIAL_SORT)],
            AppendOptions::default(),
        )
        .unwrap();
        // Normal spans land ahead of an existing partial-sort run
        d.append_di_spans(vec![cube_at(2.0)], AppendOptions::default()).unwrap();
        d.append_di_spans(vec![cube_at(4.0)], AppendOptions::default().with_add_to_front(true))
            .unwrap();
        assert_eq!(partial_flags(&d), vec![false, false, true]);
        assert_eq!(d.span(0).world_bounds().min.x, 4.0);

        let mut d = DrawableSpans::default();
        d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default()).unwrap();
        let tail = d
            .append_di_spans(
                vec![cube_at(1.0).with_props(SpanProps::PARTIAL_SORT)],
                AppendOptions::default(),
            )
            .unwrap();
        let mid = d.append_di_spans(vec![cube_at(2.0)], AppendOptions::default()).unwrap();
        assert_eq!(d.di_spans(mid).indices, vec![1]);
        assert_eq!(d.di_spans(tail).indices, vec![2]);
        assert!(d.span(2).props().contains(SpanProps::PARTIAL_SORT));
    }

    #[test]
    fn partial_sort_ignores_add_to_front() {
        let mut d = DrawableSpans::default();
        d.append_di_spans(vec![cube_at(0.0), cube_at(2.0)], AppendOptions::default())
            .unwrap();
        let tail = d
            .append_di_spans(
                vec![cube_at(4.0).with_props(SpanProps::PARTIAL_SORT)],
                AppendOptions::default().with_add_to_front(true),
            )
            .unwrap();
        assert_eq!(d.di_spans(tail).indices, vec![2]);
        assert_eq!(partial_flags(&d), vec![false, false, true]);
    }

    #[test]
    fn oversized_geometry_is_rejected_untouched() {
        let mut d = DrawableSpans::new(crate::DrawableConfig::default().with_max_indices_per_buffer(30));
        let err = d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default());
        assert!(matches!(err, Err(Error::Capacity(_))));
        assert_eq!(d.num_spans(), 0);
        assert!(d.di_table().is_empty());
    }

    #[test]
    fn full_groups_spill_into_new_ones() {
        let cfg = crate::DrawableConfig::default().with_max_verts_per_buffer(20);
        let mut d = DrawableSpans::new(cfg);
        d.append_di_spans(vec![cube_at(0.0), cube_at(2.0), cube_at(4.0)], AppendOptions::default())
            .unwrap();
        assert_eq!(d.groups().len(), 2);
        assert_eq!(d.span(2).locator().group, 1);
        assert_eq!(d.span(2).locator().v_start, 0);
    }

    #[test]
    fn remove_then_compact_restores_storage() {
        let survivor = || cube_at(0.0).with_material(MaterialKey(7));
        let mut reference = DrawableSpans::default();
        reference
            .append_di_spans(vec![survivor()], AppendOptions::default())
            .unwrap();
        let expect = (1, 1, totals(&reference));

        let mut d = DrawableSpans::default();
        let b = d
            .append_di_spans(
                vec![
                    cube_at(2.0).with_material(MaterialKey(9)),
                    cube_at(4.0).with_material(MaterialKey(7)),
                ],
                AppendOptions::default(),
            )
            .unwrap();
        let a = d.append_di_spans(vec![survivor()], AppendOptions::default()).unwrap();
        assert_eq!(d.materials().num_in_use(), 2);
        assert_eq!(d.di_spans(a).indices, vec![2]);

        d.remove_di_spans(b);
        assert!(d.needs_compaction());
        assert_eq!(d.di_spans(a).indices, vec![0]);
        assert_eq!(d.materials().get(1), Some(MaterialKey(7)));
        d.compact();
        assert!(!d.needs_compaction());

        assert_eq!((d.num_spans(), d.materials().num_in_use(), totals(&d)), expect);
        let loc = *d.span(0).locator();
        assert_eq!((loc.v_start, loc.i_start), (0, 0));
        assert!(d.groups()[0].indices(0).iter().all(|&i| i < 8));

        let mut out = Vec::new();
        d.harvest(&AcceptAll, &mut out);
        assert_eq!(out, vec![0]);
    }

    #[test]
    #[should_panic(expected = "already removed")]
    fn double_remove_panics() {
        let mut d = DrawableSpans::default();
        let a = d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default()).unwrap();
        d.remove_di_spans(a);
        d.remove_di_spans(a);
    }

    #[test]
    fn refresh_reuploads_source_vertices() {
        let mut d = DrawableSpans::default();
        let a = d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default()).unwrap();
        d.prep_for_render();

        let moved = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        d.source_spans[0] = Some(cube_at(0.0).with_transform(moved));
        d.refresh_di_spans(a);

        assert!(!d.is_ready_to_render());
        assert_eq!(d.span(0).core().local_to_world, moved);
        assert_eq!(d.world_bounds(Some(a)).min.z, 5.0);
    }

    #[test]
    fn dropped_source_skips_refresh() {
        let mut d = DrawableSpans::default();
        d.append_di_spans(vec![cube_at(0.0)], AppendOptions::default().with_keep_source(false))
            .unwrap();
        assert!(d.source_span(0).is_none());
        let before = d.span(0).clone();
        d.refresh_span(0);
        assert_eq!(d.span(0), &before);
    }

    #[test]
    fn face_sorted_drawables_get_sort_records() {
        let mut d = DrawableSpans::default();
        d.set_drawable_property(DrawableProps::SORT_FACES, true);
        d.append_di_spans(vec![cube_at(0.0), cube_at(2.0)], AppendOptions::default())
            .unwrap();
        let core = d.span(1).core();
        assert!(core.props.contains(SpanProps::FACES_SORTABLE));
        let data = core.sort_data.as_ref().unwrap();
        assert_eq!(data.len(), 12);
        assert!(data.iter().all(|t| t.span == 1 && t.indices.iter().all(|&v| v >= 8)));
        assert!(d.groups()[0].key().idx_volatile);
    }

    #[test]
    fn palette_slots_and_bone_search() {
        let mut d = DrawableSpans::default();
        let base = d.append_di_matrix_spans(3);
        assert_eq!(base, 0);
        let bones = [
            Mat4::from_translation(Vec3::X),
            Mat4::from_translation(Vec3::Y),
        ];
        d.set_initial_bone(1, bones[0], bones[0].inverse());
        d.set_initial_bone(2, bones[1], bones[1].inverse());

        assert_eq!(d.find_bone_base_matrix(&bones, true), Some(1));
        assert_eq!(d.find_bone_base_matrix(&bones, false), None);

        d.append_di_spans(
            vec![cube_at(0.0).with_skinning(2, 1, 0, 0)],
            AppendOptions::default(),
        )
        .unwrap();
        assert_eq!(d.find_bone_base_matrix(&bones, false), Some(1));

        let di = d.new_di_matrix_index();
        d.assign_di_matrix_slots(di, 1, 2);
        let bone = Mat4::from_translation(Vec3::Z);
        d.set_transform(Some(di), &bone, &bone.inverse());
        let p = d.palette().local_to_world[2].transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(0.0, 1.0, 1.0));

        d.remove_di_matrix_spans(di);
        assert!(d.di_spans(di).is_empty());
        assert!(d.needs_compaction());
    }

    #[test]
    fn blending_spans_tracked() {
        let mut d = DrawableSpans::default();
        d.append_di_spans(
            vec![cube_at(0.0), cube_at(2.0).with_skinning(3, 0, 0, 0)],
            AppendOptions::default(),
        )
        .unwrap();
        assert_eq!(d.blending_spans(), &[1]);
        assert!(d.is_skinned());
    }
}

use cullforge_core::{Aabb, Frustum, VisMgr, VisRegion};
use cullforge_drawable::{
    AppendOptions, DrawableProps, DrawableSpans, FaceSortScratch, GeometrySpan, MaterialKey,
    ParticleEmitter, SpanProps,
};
use glam::{Mat4, Vec3};

fn cube(min: Vec3) -> GeometrySpan {
    GeometrySpan::cube(Aabb::new(min, min + Vec3::ONE))
}

fn totals(d: &DrawableSpans) -> (u32, usize) {
    d.groups()
        .iter()
        .fold((0, 0), |(v, i), g| (v + g.num_verts(), i + g.total_indices()))
}

/// Row of cubes along -z, in front of a camera at the origin.
fn corridor(d: &mut DrawableSpans, n: usize) -> Vec<u32> {
    (0..n)
        .map(|i| {
            let z = -4.0 * (i as f32 + 1.0);
            d.append_di_spans(
                vec![cube(Vec3::new(-0.5, -0.5, z)).with_material(MaterialKey(i as u32 % 3))],
                AppendOptions::default(),
            )
            .unwrap()
        })
        .collect()
}

fn frustum() -> Frustum {
    let proj = Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 100.0);
    let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
    Frustum::from_view_projection(proj * view)
}

#[test]
fn append_remove_cycles_leave_no_garbage() {
    let mut d = DrawableSpans::default();
    let keep = corridor(&mut d, 3);
    let baseline = (d.num_spans(), d.materials().num_in_use(), totals(&d));

    for round in 0..4 {
        let extra = corridor(&mut d, 5);
        assert_eq!(d.num_spans(), 8, "round {round}");
        for di in extra {
            d.remove_di_spans(di);
        }
        d.compact();
        assert_eq!((d.num_spans(), d.materials().num_in_use(), totals(&d)), baseline);
    }

    for (pos, di) in keep.iter().enumerate() {
        assert_eq!(d.di_spans(*di).indices, vec![pos as u32]);
    }
}

#[test]
fn harvest_culls_to_the_frustum() {
    let mut d = DrawableSpans::default();
    corridor(&mut d, 4);
    d.append_di_spans(vec![cube(Vec3::new(0.0, 0.0, 10.0))], AppendOptions::default())
        .unwrap();

    let mut out = Vec::new();
    d.harvest(&frustum(), &mut out);
    out.sort_unstable();
    assert_eq!(out, vec![0, 1, 2, 3]);
}

#[test]
fn hidden_region_members_drop_out_of_harvest() {
    let mut d = DrawableSpans::default();
    let dis = corridor(&mut d, 3);

    let mut mgr = VisMgr::new();
    let cellar = mgr.register_region(
        VisRegion::new(Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0))).with_is_not(true),
    );
    d.set_di_span_vis_set(dis[1], cellar, true, false, true);

    for (view, expect) in [(Vec3::ZERO, vec![0, 2]), (Vec3::splat(50.0), vec![0, 1, 2])] {
        mgr.eval(view);
        d.set_vis_set(Some(&mgr));
        let mut out = Vec::new();
        d.harvest(&frustum(), &mut out);
        out.sort_unstable();
        assert_eq!(out, expect, "viewer at {view}");
    }
}

#[test]
fn sorted_particles_follow_the_viewer() {
    let mut d = DrawableSpans::default();
    d.set_drawable_property(DrawableProps::SORT_FACES, true);
    let ps = d.create_particle_system(1, 4, None).unwrap();
    let positions = vec![
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -9.0),
        Vec3::new(0.0, 0.0, -5.0),
    ];
    d.assign_emitter_to_particle_system(ps, &ParticleEmitter::new(7, 0, positions))
        .unwrap();
    assert!(!d.span(0).props().contains(SpanProps::NO_DRAW));

    let mut vis = Vec::new();
    d.harvest(&frustum(), &mut vis);
    assert_eq!(vis, vec![0]);

    let mut scratch = FaceSortScratch::new();
    d.sort_visible_spans(&vis, Vec3::ZERO, &mut scratch);

    let loc = *d.span(0).locator();
    let g = &d.groups()[loc.group as usize];
    let first_z: Vec<f32> = g.indices(loc.ib)[loc.i_start as usize..][..loc.i_length as usize]
        .chunks(6)
        .map(|quad| g.vertices()[quad[0] as usize].pos().z)
        .collect();
    assert_eq!(first_z, vec![-9.0, -5.0, -1.0]);

    d.prep_for_render();
    assert!(d.is_ready_to_render());
}

fn partial_run_is_trailing(d: &DrawableSpans) -> bool {
    let flags: Vec<bool> = d
        .spans()
        .iter()
        .map(|s| s.props().contains(SpanProps::PARTIAL_SORT))
        .collect();
    flags.windows(2).all(|w| !w[0] || w[1])
}

#[test]
fn mixed_edits_keep_partial_sort_spans_trailing() {
    let mut state = 0x9E37_79B9_u32;
    let mut next = move |n: u32| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state % n
    };

    let mut d = DrawableSpans::default();
    let mut live: Vec<(u32, usize)> = Vec::new();
    for step in 0..300 {
        match next(5) {
            0 if !live.is_empty() => {
                let (di, _) = live.swap_remove(next(live.len() as u32) as usize);
                d.remove_di_spans(di);
            }
            1 => d.compact(),
            _ => {
                let partial = next(2) == 0;
                let count = 1 + next(3) as usize;
                let spans = (0..count)
                    .map(|i| {
                        let g = cube(Vec3::new(step as f32, i as f32 * 2.0, 0.0));
                        if partial {
                            g.with_props(SpanProps::PARTIAL_SORT)
                        } else {
                            g
                        }
                    })
                    .collect();
                let opts = AppendOptions::default().with_add_to_front(next(2) == 0);
                live.push((d.append_di_spans(spans, opts).unwrap(), count));
            }
        }

        assert!(partial_run_is_trailing(&d), "partial-sort run broken at step {step}");
        assert_eq!(d.num_spans(), live.iter().map(|&(_, n)| n).sum::<usize>());
        for &(di, n) in &live {
            let indices = &d.di_spans(di).indices;
            assert_eq!(indices.len(), n);
            assert!(indices.iter().all(|&i| (i as usize) < d.num_spans()));
        }
    }
}

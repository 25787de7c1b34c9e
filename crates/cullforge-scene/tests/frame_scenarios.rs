use cullforge_core::{Aabb, RenderLevel, VisRegion};
use cullforge_drawable::{AppendOptions, Criteria, DrawableProps, DrawableSpans, GeometrySpan};
use cullforge_scene::{Camera, PageTreeConfig, PageTreeMgr, PipeDebugFlags, SceneNode, ViewPipeline};
use glam::{Mat4, Vec3};

fn cube(min: Vec3) -> GeometrySpan {
    GeometrySpan::cube(Aabb::new(min, min + Vec3::ONE))
}

fn row(z: f32, n: usize, level: RenderLevel, criteria: Criteria) -> DrawableSpans {
    let mut d = DrawableSpans::default();
    d.set_criteria(criteria, level, 0, u32::MAX);
    let spans = (0..n).map(|i| cube(Vec3::new(i as f32 * 2.0 - 4.0, 0.0, z))).collect();
    d.append_di_spans(spans, AppendOptions::default()).unwrap();
    d
}

fn viewer() -> ViewPipeline {
    ViewPipeline::new(Camera::looking_at(Vec3::ZERO, Vec3::NEG_Z).with_aspect(1.0))
}

#[test]
fn moving_a_drawable_out_of_view_drops_it() {
    let mut node = SceneNode::new("street");
    node.add_drawable(row(-10.0, 3, RenderLevel::default(), Criteria::empty()));
    node.add_drawable(row(-20.0, 3, RenderLevel::default(), Criteria::empty()));
    let mut mgr = PageTreeMgr::default();
    let key = mgr.add_node(node);

    let mut pipe = viewer();
    assert_eq!(mgr.render(&mut pipe), 6);

    // Swing the second row behind the viewer
    let behind = Mat4::from_translation(Vec3::new(0.0, 0.0, 40.0));
    mgr.node_mut(key)
        .unwrap()
        .drawable_mut(1)
        .set_transform(Some(0), &behind, &behind.inverse());
    pipe.begin_frame();
    assert_eq!(mgr.render(&mut pipe), 3);
    assert!(pipe.calls().iter().all(|c| c.id.index == 0));
}

#[test]
fn regions_hide_and_reveal_spans() {
    let mut d = row(-10.0, 2, RenderLevel::default(), Criteria::empty());
    let mut mgr = PageTreeMgr::default();
    let cave = mgr.vis_mgr_mut().register_region(
        VisRegion::new(Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0))).with_is_not(true),
    );
    d.set_di_span_vis_set(0, cave, true, false, true);
    let mut node = SceneNode::new("hill");
    node.add_drawable(d);
    mgr.add_node(node);

    let mut pipe = viewer();
    assert_eq!(mgr.render(&mut pipe), 0);

    mgr.set_config(PageTreeConfig::default().with_disable_vis_mgr(true));
    pipe.begin_frame();
    assert_eq!(mgr.render(&mut pipe), 2);
    assert!(!pipe.vis_mgr_active());
}

#[test]
fn face_sorted_blends_are_prepped_before_drawing() {
    let blend = RenderLevel::new(RenderLevel::BLEND_MAJOR, 0);
    let mut glass = row(-6.0, 2, blend, Criteria::SORT_FACES);
    assert!(glass.has_drawable_property(DrawableProps::SORT_FACES));
    glass.set_drawable_property(DrawableProps::SORT_SPANS, true);

    let mut node = SceneNode::new("windows");
    node.add_drawable(row(-12.0, 1, RenderLevel::default(), Criteria::empty()));
    node.add_drawable(glass);
    let mut mgr = PageTreeMgr::default();
    let key = mgr.add_node(node);

    let mut pipe = viewer();
    assert_eq!(mgr.render(&mut pipe), 3);
    assert_eq!(pipe.calls()[0].level, RenderLevel::default().level());
    assert!(pipe.calls()[1..].iter().all(|c| c.level == blend.level()));
    assert!(mgr.node(key).unwrap().drawable(1).is_ready_to_render());
}

#[test]
fn show_all_trees_ignores_the_view() {
    let mut node = SceneNode::new("everywhere");
    node.add_drawable(row(-10.0, 1, RenderLevel::default(), Criteria::empty()));
    node.add_drawable(row(30.0, 1, RenderLevel::default(), Criteria::empty()));
    let mut mgr = PageTreeMgr::default();
    mgr.add_node(node);

    let mut pipe = viewer();
    assert_eq!(mgr.render(&mut pipe), 1);

    pipe.set_debug_flags(PipeDebugFlags::SHOW_ALL_TREES);
    pipe.begin_frame();
    // Nodes and drawables are all accepted; spans still face the view test
    assert_eq!(mgr.render(&mut pipe), 1);
    assert_eq!(pipe.stats().prepped, 1);
}

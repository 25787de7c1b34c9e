use cullforge_core::Aabb;
use cullforge_spacetree::{AcceptAll, CullFn, CullResult, NodeFlags, SpaceTree, SpaceTreeMaker};
use glam::Vec3;

fn build(bounds: &[Aabb]) -> SpaceTree {
    let mut maker = SpaceTreeMaker::new();
    for b in bounds {
        maker.add_leaf(*b, false);
    }
    maker.make_tree()
}

fn scatter(n: usize) -> Vec<Aabb> {
    let mut state = 0x2545_F491_u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state % 1000) as f32 / 10.0
    };
    (0..n)
        .map(|_| {
            let min = Vec3::new(next(), next(), next());
            let size = Vec3::new(next(), next(), next()) * 0.1 + Vec3::splat(0.1);
            Aabb::new(min, min + size)
        })
        .collect()
}

#[test]
fn split_predicate_finds_only_overlapping_leaf() {
    let tree = build(&[
        Aabb::new(Vec3::ZERO, Vec3::ONE),
        Aabb::new(Vec3::new(10.0, 0.0, 0.0), Vec3::new(11.0, 1.0, 1.0)),
        Aabb::new(Vec3::splat(5.0), Vec3::splat(6.0)),
    ]);
    let query = Aabb::new(Vec3::splat(4.0), Vec3::splat(7.0));
    let pred = CullFn(|b: &Aabb| {
        if query.intersects(b) {
            CullResult::Split
        } else {
            CullResult::Culled
        }
    });

    let mut out = Vec::new();
    tree.harvest_leaves(&pred, None, &mut out);
    assert_eq!(out, vec![2]);
}

#[test]
fn accept_all_returns_every_leaf_once() {
    for n in [0usize, 1, 2, 3, 17, 200] {
        let tree = build(&scatter(n));
        assert_eq!(tree.num_leaves() as usize, n);

        let mut out = Vec::new();
        tree.harvest_leaves(&AcceptAll, None, &mut out);
        out.sort_unstable();
        assert_eq!(out, (0..n as u16).collect::<Vec<_>>());
        tree.validate().unwrap();
    }
}

#[test]
fn many_moves_keep_union_invariant() {
    let bounds = scatter(64);
    let mut tree = build(&bounds);
    for (i, b) in bounds.iter().enumerate().step_by(3) {
        let shifted = Aabb::new(b.min + Vec3::splat(5.0), b.max + Vec3::splat(5.0));
        tree.move_leaf(i, shifted);
    }
    tree.set_leaf_flag(10, NodeFlags::DISABLED, true);
    tree.validate().unwrap();
    tree.refresh();
    tree.validate().unwrap();

    let expected = (0..64)
        .filter(|&i| i != 10)
        .fold(Aabb::EMPTY, |acc, i| acc.merge(&tree.leaf_bounds(i)));
    assert_eq!(tree.world_bounds(), expected);
}

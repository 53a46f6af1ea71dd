//! Stress tests for the bounds tree.

use kinetic_geometry::bounds_tree::intersects_bounds_filter;
use kinetic_geometry::{Aabb, BoundsTree};
use nalgebra::{point, vector};

/// A small deterministic pseudo-random sequence (splitmix64).
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn random_aabb(random: &mut SplitMix64) -> Aabb {
    let center = point![
        (random.next_f64() - 0.5) * 200.0,
        (random.next_f64() - 0.5) * 200.0,
        (random.next_f64() - 0.5) * 200.0
    ];
    let half_extents = vector![
        random.next_f64() * 2.0 + 0.01,
        random.next_f64() * 2.0 + 0.01,
        random.next_f64() * 2.0 + 0.01
    ];
    Aabb::new(center - half_extents, center + half_extents)
}

#[test]
fn ten_thousand_random_boxes_should_round_trip() {
    const OBJECT_COUNT: usize = 10_000;
    const INVARIANT_CHECK_INTERVAL: usize = 250;

    let mut random = SplitMix64::new(0x5EED);
    let bounds: Vec<Aabb> = (0..OBJECT_COUNT).map(|_| random_aabb(&mut random)).collect();

    let mut tree = BoundsTree::new();
    for (idx, aabb) in bounds.iter().enumerate() {
        tree.add(idx, *aabb);
        if idx % INVARIANT_CHECK_INTERVAL == 0 {
            assert!(tree.bounds_are_consistent());
        }
    }
    assert_eq!(tree.len(), OBJECT_COUNT);
    assert!(tree.bounds_are_consistent());

    // Remove in a shuffled order
    let mut removal_order: Vec<usize> = (0..OBJECT_COUNT).collect();
    for idx in (1..removal_order.len()).rev() {
        let other = (random.next_u64() % (idx as u64 + 1)) as usize;
        removal_order.swap(idx, other);
    }

    for (step, &idx) in removal_order.iter().enumerate() {
        assert!(
            tree.remove(&idx, &bounds[idx]),
            "object {idx} not found for removal"
        );
        if step % INVARIANT_CHECK_INTERVAL == 0 {
            assert!(tree.bounds_are_consistent());
        }
    }

    assert_eq!(tree.len(), 0);
    assert!(tree.is_empty());
}

#[test]
fn filtered_queries_should_agree_with_brute_force_on_random_data() {
    let mut random = SplitMix64::new(0xFACADE);
    let bounds: Vec<Aabb> = (0..512).map(|_| random_aabb(&mut random)).collect();

    let mut tree = BoundsTree::new();
    for (idx, aabb) in bounds.iter().enumerate() {
        tree.add(idx, *aabb);
    }
    tree.improve_structure();

    for _ in 0..32 {
        let query = random_aabb(&mut random);

        let mut found: Vec<usize> = tree
            .iter_filtered(intersects_bounds_filter(query))
            .map(|(&idx, _)| idx)
            .collect();
        found.sort_unstable();

        let expected: Vec<usize> = bounds
            .iter()
            .enumerate()
            .filter(|(_, aabb)| aabb.intersects_box(&query))
            .map(|(idx, _)| idx)
            .collect();

        assert_eq!(found, expected);
    }
}

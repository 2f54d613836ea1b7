use life_core::codec::{decode_with_report, encode};
use life_core::stepper::{step, ZoneMap};
use life_core::types::{Cell, DenseGrid, FortifiedZone};
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SIZE: usize = 64;
const ZONE: usize = 8;

fn random_grid(seed: u64, density: f64, owners: u8) -> DenseGrid {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut grid = DenseGrid::new(SIZE);
    for y in 0..SIZE {
        for x in 0..SIZE {
            let owner = rng.gen_range(0..=owners);
            grid.set(x, y, Cell::new(owner, rng.gen_bool(density)));
        }
    }
    grid
}

fn zone_strategy() -> impl Strategy<Value = Vec<FortifiedZone>> {
    prop::collection::vec((1u8..=4, 0u16..SIZE as u16, 0u16..SIZE as u16), 0..4).prop_map(|raw| {
        raw.into_iter()
            .map(|(owner, x, y)| FortifiedZone::new(owner, x, y))
            .collect()
    })
}

// ============================================
// STEPPER
// ============================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_step_is_byte_deterministic(seed in any::<u64>(), zones in zone_strategy()) {
        let grid = random_grid(seed, 0.35, 4);
        let (a, out_a) = step(&grid, &zones, ZONE);
        let (b, out_b) = step(&grid, &zones, ZONE);
        prop_assert_eq!(a.to_bytes(), b.to_bytes());
        prop_assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_only_zone_owner_lives_inside_zone(seed in any::<u64>(), zones in zone_strategy()) {
        let grid = random_grid(seed, 0.4, 4);
        let zone_map = ZoneMap::build(&zones, ZONE, SIZE);
        let (next, _) = step(&grid, &zones, ZONE);

        for (idx, cell) in next.cells().iter().enumerate() {
            let zone_owner = zone_map.owner_at(idx);
            if cell.alive() && zone_owner != 0 {
                prop_assert_eq!(cell.owner(), zone_owner, "intruder alive at {:?}", next.coords(idx));
            }
        }
    }

    #[test]
    fn test_territory_only_moves_on_birth(seed in any::<u64>(), zones in zone_strategy()) {
        let grid = random_grid(seed, 0.3, 4);
        let (next, _) = step(&grid, &zones, ZONE);

        for (before, after) in grid.cells().iter().zip(next.cells()) {
            if before.owner() != after.owner() {
                prop_assert!(!before.alive() && after.alive());
            }
        }
    }

    #[test]
    fn test_zone_map_agrees_with_containment(owner in 1u8..=8, x in 0u16..SIZE as u16, y in 0u16..SIZE as u16) {
        let zone = FortifiedZone::new(owner, x, y);
        let zone_map = ZoneMap::build(&[zone], ZONE, SIZE);
        for idx in 0..SIZE * SIZE {
            let (cx, cy) = (idx % SIZE, idx / SIZE);
            prop_assert_eq!(zone_map.owner_at(idx) == owner, zone.contains(cx, cy, ZONE, SIZE));
        }
    }
}

// ============================================
// CODEC
// ============================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_encode_decode_preserves_every_cell(seed in any::<u64>(), owners in 0u8..=15, generation in any::<u64>()) {
        let grid = random_grid(seed, 0.5, owners);
        let state = encode(&grid, generation);
        let (decoded, report) = decode_with_report(&state, SIZE);

        prop_assert!(report.is_clean());
        prop_assert_eq!(state.generation, generation);
        prop_assert_eq!(decoded, grid);
    }

    #[test]
    fn test_decode_is_idempotent(seed in any::<u64>()) {
        let state = encode(&random_grid(seed, 0.2, 6), 7);
        let (first, _) = decode_with_report(&state, SIZE);
        let (second, _) = decode_with_report(&state, SIZE);
        prop_assert_eq!(first.to_bytes(), second.to_bytes());
    }
}

// Multi-generation regression, seeded
#[test]
fn test_seeded_run_is_reproducible() {
    let zones = vec![FortifiedZone::new(1, 10, 10), FortifiedZone::new(2, 40, 40)];
    let run = || {
        let mut grid = random_grid(12345, 0.3, 3);
        for _ in 0..50 {
            grid = step(&grid, &zones, ZONE).0;
        }
        grid.to_bytes()
    };
    assert_eq!(run(), run());
}

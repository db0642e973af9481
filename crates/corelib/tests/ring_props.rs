//! Property tests for ring invariants.

use proptest::prelude::*;

use corelib::node::{CacheStrategy, Node};
use corelib::ring::{HashRing, PlacementPolicy};
use corelib::token::RingPosition;

fn build(ports: &[u16], policy: PlacementPolicy) -> HashRing {
    let mut ring = HashRing::with_policy(policy);
    for port in ports {
        ring.place(Node::new(
            format!("s{port}"),
            "10.0.0.1",
            *port,
            CacheStrategy::Lru,
            8,
        ))
        .unwrap();
    }
    ring
}

fn ports() -> impl Strategy<Value = Vec<u16>> {
    prop::collection::btree_set(1u16..u16::MAX, 1..40).prop_map(|s| s.into_iter().collect())
}

proptest! {
    #[test]
    fn every_position_has_exactly_one_owner(ports in ports(), samples in prop::collection::vec(any::<u128>(), 1..64)) {
        let ring = build(&ports, PlacementPolicy::Hashed);
        for p in samples {
            let p = RingPosition(p);
            let owners = ring.nodes().filter(|n| n.range.contains(p)).count();
            prop_assert_eq!(owners, 1);
            let owner = ring.lookup(p).unwrap();
            prop_assert!(owner.range.contains(p));
        }
    }

    #[test]
    fn ranges_tile_the_circle(ports in ports()) {
        let ring = build(&ports, PlacementPolicy::Hashed);
        let total: u128 = ring.nodes().map(|n| n.range.width()).fold(0u128, |a, w| a.wrapping_add(w));
        if ring.len() == 1 {
            prop_assert!(ring.nodes().next().unwrap().range.is_full());
        } else {
            // Widths of a proper tiling sum to 2^128, i.e. wrap to zero.
            prop_assert_eq!(total, 0);
        }
        for n in ring.nodes() {
            prop_assert_eq!(n.range.end(), Some(n.id));
            prop_assert_eq!(n.range.start(), Some(n.prev_id));
        }
    }

    #[test]
    fn add_then_remove_is_identity(ports in ports(), extra in 1u16..u16::MAX) {
        prop_assume!(!ports.contains(&extra));
        let mut ring = build(&ports, PlacementPolicy::Hashed);
        let before = ring.snapshot();
        let id = ring.place(Node::new("extra", "10.0.0.1", extra, CacheStrategy::Lru, 8)).unwrap();
        ring.remove(id).unwrap();
        prop_assert_eq!(ring.snapshot(), before);
    }

    #[test]
    fn even_split_stays_within_factor_two(count in 1usize..64) {
        let ports: Vec<u16> = (1..=count as u16).collect();
        let ring = build(&ports, PlacementPolicy::EvenSplit);
        let widths: Vec<u128> = ring.nodes().map(|n| n.range.width()).collect();
        let max = *widths.iter().max().unwrap() as f64;
        let min = *widths.iter().min().unwrap() as f64;
        prop_assert!(max / min <= 2.0 + 1e-9);
    }
}

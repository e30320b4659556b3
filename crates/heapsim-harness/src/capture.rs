//! Deterministic workload capture.
//!
//! Builds churn workloads from a seeded generator and bundles the resulting
//! event log, stats and final snapshot into a versioned fixture. Output is
//! intended for fixture diffing:
//! - no timestamps
//! - stable ordering
//! - seed + step count included for reproducibility

use serde::Serialize;

use heapsim_core::{Arena, ArenaStats, Event, Snapshot};

use crate::runner::{run_ops, Op};

const FIXTURE_VERSION: &str = "v1";
const SCENARIO_ID: &str = "arena_churn";

/// Heap size every captured scenario starts from.
pub const CAPTURE_HEAP_BYTES: usize = 1 << 15;

/// Request sizes the churn generator draws from: tcache-, fastbin-,
/// smallbin- and largebin-sized, plus one that forces top growth.
const CHURN_SIZES: &[usize] = &[8, 24, 40, 64, 100, 200, 400, 520, 900, 2000, 5000, 70000];

#[derive(Debug, Clone, Copy)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

/// Deterministic fixture schema (v1).
#[derive(Debug, Clone, Serialize)]
pub struct ArenaFixtureV1 {
    pub version: String,
    pub scenario: CaptureScenarioV1,
    pub stats: ArenaStats,
    pub events: Vec<Event>,
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureScenarioV1 {
    pub id: String,
    pub seed: u64,
    pub steps: u32,
    pub initial_heap_bytes: usize,
}

/// Generates a churn workload: a mix of allocations across every size
/// tier, releases of live slots, and occasional forced consolidations.
///
/// Each slot is freed at most once, so the trace stays error-free and the
/// fixture diffs cleanly.
pub fn churn_ops(seed: u64, steps: u32) -> Vec<Op> {
    let mut rng = XorShift64::new(seed);
    let mut ops = Vec::with_capacity(steps as usize);
    let mut live: Vec<usize> = Vec::new();
    let mut next_slot = 0usize;

    for _ in 0..steps {
        let roll = rng.next_u64() % 16;
        if roll < 5 && !live.is_empty() {
            let pick = rng.gen_range(0, live.len() - 1);
            let slot = live.swap_remove(pick);
            ops.push(Op::Free { slot });
        } else if roll == 5 {
            ops.push(Op::Consolidate);
        } else {
            let size = CHURN_SIZES[rng.gen_range(0, CHURN_SIZES.len() - 1)];
            ops.push(Op::Malloc { bytes: size });
            live.push(next_slot);
            next_slot += 1;
        }
    }
    ops
}

/// Runs the seeded churn workload and captures the fixture.
pub fn build_churn_fixture(seed: u64, steps: u32) -> ArenaFixtureV1 {
    let mut arena = Arena::new(CAPTURE_HEAP_BYTES);
    let ops = churn_ops(seed, steps);
    run_ops(&mut arena, &ops);
    ArenaFixtureV1 {
        version: String::from(FIXTURE_VERSION),
        scenario: CaptureScenarioV1 {
            id: String::from(SCENARIO_ID),
            seed,
            steps,
            initial_heap_bytes: CAPTURE_HEAP_BYTES,
        },
        stats: arena.stats(),
        events: arena.drain_events(),
        snapshot: arena.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xorshift_is_deterministic() {
        let mut a = XorShift64::new(42);
        let mut b = XorShift64::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_xorshift_zero_seed_is_usable() {
        let mut rng = XorShift64::new(0);
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn test_gen_range_bounds() {
        let mut rng = XorShift64::new(7);
        for _ in 0..1000 {
            let v = rng.gen_range(3, 9);
            assert!((3..=9).contains(&v));
        }
    }

    #[test]
    fn test_churn_ops_never_free_a_slot_twice() {
        let ops = churn_ops(0xDEAD_BEEF, 500);
        let mut freed = std::collections::BTreeSet::new();
        let mut mallocs = 0usize;
        for op in &ops {
            match op {
                Op::Malloc { .. } => mallocs += 1,
                Op::Free { slot } => {
                    assert!(*slot < mallocs, "free of a slot before its malloc");
                    assert!(freed.insert(*slot), "slot {} freed twice", slot);
                }
                Op::FreeNull | Op::Consolidate => {}
            }
        }
        assert!(mallocs > 0);
    }

    #[test]
    fn test_fixture_is_reproducible() {
        let a = build_churn_fixture(0xA5A5, 200);
        let b = build_churn_fixture(0xA5A5, 200);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_fixture_records_scenario_metadata() {
        let fixture = build_churn_fixture(99, 64);
        assert_eq!(fixture.version, "v1");
        assert_eq!(fixture.scenario.seed, 99);
        assert_eq!(fixture.scenario.steps, 64);
        assert_eq!(fixture.scenario.initial_heap_bytes, CAPTURE_HEAP_BYTES);
        assert!(!fixture.events.is_empty());
        assert!(fixture.snapshot.chunks.len() >= 1);
    }
}

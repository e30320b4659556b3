//! Randomized churn sweeps with invariants checked after every operation.

use heapsim_core::{Arena, Event};
use heapsim_harness::capture::{churn_ops, CAPTURE_HEAP_BYTES};
use heapsim_harness::runner::{apply_op, Op};
use heapsim_harness::verify::check_snapshot;

const SWEEP_SEEDS: &[u64] = &[1, 0xDEAD_BEEF, 0xA5A5_5A5A_DEAD_BEEF, 42424242];
const SWEEP_STEPS: u32 = 400;

#[test]
fn invariants_hold_after_every_churn_step() {
    for &seed in SWEEP_SEEDS {
        let ops = churn_ops(seed, SWEEP_STEPS);
        let mut arena = Arena::new(CAPTURE_HEAP_BYTES);
        let mut slots = Vec::new();
        for (step, op) in ops.iter().enumerate() {
            apply_op(&mut arena, &mut slots, *op);
            let report = check_snapshot(&arena.snapshot());
            assert!(
                report.all_passed(),
                "seed {:#x}, step {} ({:?}): {:#?}",
                seed,
                step,
                op,
                report.violations
            );
        }
    }
}

#[test]
fn churn_traces_are_error_free() {
    // The generator never frees a slot twice, so no error events appear.
    let ops = churn_ops(0xDEAD_BEEF, SWEEP_STEPS);
    let mut arena = Arena::new(CAPTURE_HEAP_BYTES);
    let mut slots = Vec::new();
    for op in ops {
        apply_op(&mut arena, &mut slots, op);
    }
    assert!(
        !arena
            .events()
            .iter()
            .any(|ev| matches!(ev, Event::Error { .. })),
        "unexpected error event in a clean churn trace"
    );
}

#[test]
fn invariants_hold_through_explicit_error_paths() {
    let mut arena = Arena::new(CAPTURE_HEAP_BYTES);
    let p = arena.allocate(24).unwrap();
    arena.release(0);
    arena.release(p);
    arena.release(p); // double free
    arena.release(0xDEAD); // unknown pointer
    let report = check_snapshot(&arena.snapshot());
    assert!(report.all_passed(), "{:#?}", report.violations);
    let errors = arena
        .events()
        .iter()
        .filter(|ev| matches!(ev, Event::Error { .. }))
        .count();
    assert_eq!(errors, 3);
}

#[test]
fn heap_growth_is_monotonic_under_churn() {
    let ops = churn_ops(7, SWEEP_STEPS);
    let mut arena = Arena::new(CAPTURE_HEAP_BYTES);
    let mut slots = Vec::new();
    let mut last_end = arena.heap_end();
    for op in ops {
        apply_op(&mut arena, &mut slots, op);
        assert!(arena.heap_end() >= last_end, "heap break shrank");
        last_end = arena.heap_end();
    }
}

#[test]
fn event_log_grows_with_every_operation() {
    let mut arena = Arena::new(CAPTURE_HEAP_BYTES);
    let mut slots = Vec::new();
    let mut last_len = 0usize;
    for op in churn_ops(3, 100) {
        apply_op(&mut arena, &mut slots, op);
        match op {
            // Consolidate with empty fastbins is the one silent operation.
            Op::Consolidate => assert!(arena.events().len() >= last_len),
            _ => assert!(arena.events().len() > last_len),
        }
        last_len = arena.events().len();
    }
}

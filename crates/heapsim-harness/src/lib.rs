//! # heapsim-harness
//!
//! Driver tooling for the heapsim allocator simulator: structural invariant
//! verification over snapshots, line-based scenario scripts, and
//! deterministic churn fixtures for diffing.

#![deny(unsafe_code)]

pub mod capture;
pub mod runner;
pub mod verify;

pub use capture::{build_churn_fixture, churn_ops, ArenaFixtureV1, XorShift64, CAPTURE_HEAP_BYTES};
pub use runner::{apply_op, parse_script, run_ops, Op, ScriptError};
pub use verify::{assert_invariants, check_snapshot, InvariantReport, InvariantViolation};

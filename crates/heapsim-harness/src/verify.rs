//! Arena invariant verification over snapshots.
//!
//! Re-derives container membership from the raw link fields of a
//! [`Snapshot`] and checks the structural invariants the simulator must
//! uphold between operations: single-container membership, prev-in-use flag
//! discipline, the top chunk's position, the gap-free partition, largebin
//! size ordering and tcache bounds. All walks are bounded so a corrupted
//! ring reports a violation instead of spinning.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use heapsim_core::size_class::{ALIGNMENT, MIN_CHUNK_SIZE, TCACHE_CAPACITY, TCACHE_MAX_CHUNK};
use heapsim_core::{ChunkView, Snapshot};

/// One failed invariant check.
#[derive(Debug, Clone, Serialize)]
pub struct InvariantViolation {
    /// Short rule identifier.
    pub rule: &'static str,
    /// What went wrong, with addresses.
    pub detail: String,
}

/// Aggregate result of checking one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct InvariantReport {
    /// Chunks inspected.
    pub chunks: usize,
    /// All failed checks, empty when the snapshot is consistent.
    pub violations: Vec<InvariantViolation>,
}

impl InvariantReport {
    /// True when no check failed.
    pub fn all_passed(&self) -> bool {
        self.violations.is_empty()
    }
}

fn walk_chain(
    snap: &Snapshot,
    head: Option<usize>,
    next: impl Fn(&ChunkView) -> Option<usize>,
) -> Vec<usize> {
    let mut out = Vec::new();
    let Some(start) = head else {
        return out;
    };
    let limit = snap.chunks.len() + 1;
    let mut cur = start;
    while out.len() < limit {
        out.push(cur);
        match snap.chunks.get(&cur).and_then(&next) {
            Some(next_addr) if next_addr != start => cur = next_addr,
            _ => break,
        }
    }
    out
}

/// Checks every universal invariant against a snapshot.
pub fn check_snapshot(snap: &Snapshot) -> InvariantReport {
    let mut violations = Vec::new();

    // Rebuild container membership from the raw links.
    let mut containers: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut quasi: BTreeSet<usize> = BTreeSet::new();

    for (size, stack) in &snap.tcache {
        for &addr in stack {
            containers
                .entry(addr)
                .or_default()
                .push(format!("tcache[{}]", size));
            quasi.insert(addr);
        }
    }
    for (idx, head) in snap.fastbins.iter().enumerate() {
        for addr in walk_chain(snap, *head, |c| c.fd) {
            containers
                .entry(addr)
                .or_default()
                .push(format!("fastbin[{}]", idx));
            quasi.insert(addr);
        }
    }
    for addr in walk_chain(snap, snap.unsorted, |c| c.fd) {
        containers.entry(addr).or_default().push(String::from("unsorted"));
    }
    for (idx, head) in snap.smallbins.iter().enumerate() {
        for addr in walk_chain(snap, *head, |c| c.fd) {
            containers
                .entry(addr)
                .or_default()
                .push(format!("smallbin[{}]", idx));
        }
    }
    for (idx, head) in snap.largebins.iter().enumerate() {
        for addr in walk_chain(snap, *head, |c| c.fd) {
            containers
                .entry(addr)
                .or_default()
                .push(format!("largebin[{}]", idx));
        }
    }

    for (addr, names) in &containers {
        if !snap.chunks.contains_key(addr) {
            violations.push(InvariantViolation {
                rule: "dangling-bin-link",
                detail: format!("{:?} reference missing chunk {:#x}", names, addr),
            });
        }
    }

    // Membership rules: free non-top chunks sit in exactly one container,
    // in-use chunks and the top in none.
    for (addr, chunk) in &snap.chunks {
        let listed = containers.get(addr).map_or(0, Vec::len);
        if *addr == snap.top {
            if chunk.inuse {
                violations.push(InvariantViolation {
                    rule: "top-is-free",
                    detail: format!("top chunk {:#x} is marked in use", addr),
                });
            }
            if listed != 0 {
                violations.push(InvariantViolation {
                    rule: "top-never-binned",
                    detail: format!("top chunk {:#x} appears in {:?}", addr, containers[addr]),
                });
            }
        } else if chunk.inuse {
            if listed != 0 {
                violations.push(InvariantViolation {
                    rule: "inuse-never-binned",
                    detail: format!("in-use chunk {:#x} appears in {:?}", addr, containers[addr]),
                });
            }
        } else if listed != 1 {
            violations.push(InvariantViolation {
                rule: "free-in-one-container",
                detail: format!(
                    "free chunk {:#x} appears in {} containers: {:?}",
                    addr,
                    listed,
                    containers.get(addr)
                ),
            });
        }
    }

    // Geometry: aligned sizes and a gap-free partition ending at the top.
    let entries: Vec<(usize, &ChunkView)> =
        snap.chunks.iter().map(|(addr, chunk)| (*addr, chunk)).collect();
    for (addr, chunk) in &entries {
        if chunk.size < MIN_CHUNK_SIZE || chunk.size % ALIGNMENT != 0 {
            violations.push(InvariantViolation {
                rule: "chunk-size-aligned",
                detail: format!("chunk {:#x} has size {:#x}", addr, chunk.size),
            });
        }
    }
    for pair in entries.windows(2) {
        let (a_addr, a) = pair[0];
        let (b_addr, b) = pair[1];
        if a_addr + a.size != b_addr {
            violations.push(InvariantViolation {
                rule: "partition-no-gaps",
                detail: format!(
                    "chunk {:#x}+{:#x} does not reach next chunk {:#x}",
                    a_addr, a.size, b_addr
                ),
            });
            continue;
        }
        // Flag discipline: quasi-free members read as in use downstream.
        let reads_inuse = a.inuse || quasi.contains(&a_addr);
        if b.prev_inuse != reads_inuse {
            violations.push(InvariantViolation {
                rule: "prev-inuse-propagation",
                detail: format!(
                    "chunk {:#x} prev_inuse={} but predecessor {:#x} reads inuse={}",
                    b_addr, b.prev_inuse, a_addr, reads_inuse
                ),
            });
        }
        if !b.prev_inuse && b.prev_size != a.size {
            violations.push(InvariantViolation {
                rule: "prev-size-propagation",
                detail: format!(
                    "chunk {:#x} prev_size={:#x} but predecessor {:#x} has size {:#x}",
                    b_addr, b.prev_size, a_addr, a.size
                ),
            });
        }
    }
    match entries.last() {
        Some((last_addr, last)) => {
            if *last_addr != snap.top {
                violations.push(InvariantViolation {
                    rule: "top-is-terminal",
                    detail: format!("terminal chunk {:#x} is not the top {:#x}", last_addr, snap.top),
                });
            }
            if *last_addr == snap.top && last.size != snap.top_size {
                violations.push(InvariantViolation {
                    rule: "top-size-consistent",
                    detail: format!(
                        "top chunk reports size {:#x}, snapshot says {:#x}",
                        last.size, snap.top_size
                    ),
                });
            }
        }
        None => violations.push(InvariantViolation {
            rule: "top-is-terminal",
            detail: String::from("snapshot holds no chunks at all"),
        }),
    }

    // Largebin size rings are non-decreasing along fd_nextsize.
    for (idx, head) in snap.largebins.iter().enumerate() {
        let ring = walk_chain(snap, *head, |c| c.fd_nextsize);
        for pair in ring.windows(2) {
            let a = snap.chunks.get(&pair[0]).map_or(0, |c| c.size);
            let b = snap.chunks.get(&pair[1]).map_or(0, |c| c.size);
            if b < a {
                violations.push(InvariantViolation {
                    rule: "largebin-size-ring-sorted",
                    detail: format!(
                        "largebin[{}]: {:#x} ({:#x}) precedes smaller {:#x} ({:#x})",
                        idx, pair[0], a, pair[1], b
                    ),
                });
            }
        }
    }

    // Tcache bounds: capacity, exact sizes, eligibility.
    for (size, stack) in &snap.tcache {
        if stack.len() > TCACHE_CAPACITY {
            violations.push(InvariantViolation {
                rule: "tcache-capacity",
                detail: format!("tcache[{}] holds {} chunks", size, stack.len()),
            });
        }
        if *size > TCACHE_MAX_CHUNK {
            violations.push(InvariantViolation {
                rule: "tcache-eligibility",
                detail: format!("tcache slot for oversize chunk size {}", size),
            });
        }
        for &addr in stack {
            let actual = snap.chunks.get(&addr).map_or(0, |c| c.size);
            if actual != *size {
                violations.push(InvariantViolation {
                    rule: "tcache-exact-size",
                    detail: format!(
                        "tcache[{}] member {:#x} has size {:#x}",
                        size, addr, actual
                    ),
                });
            }
        }
    }

    InvariantReport {
        chunks: snap.chunks.len(),
        violations,
    }
}

/// Panics with the full violation list when a snapshot is inconsistent.
///
/// Test helper; production callers inspect [`check_snapshot`] instead.
pub fn assert_invariants(snap: &Snapshot) {
    let report = check_snapshot(snap);
    assert!(
        report.all_passed(),
        "arena invariant violations: {:#?}",
        report.violations
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapsim_core::Arena;

    #[test]
    fn test_fresh_arena_passes() {
        let arena = Arena::new(32768);
        let report = check_snapshot(&arena.snapshot());
        assert!(report.all_passed(), "{:?}", report.violations);
        assert_eq!(report.chunks, 1);
    }

    #[test]
    fn test_mixed_state_passes() {
        let mut arena = Arena::new(32768);
        let ptrs: Vec<usize> = (0..12).map(|i| arena.allocate(24 + i * 40).unwrap()).collect();
        for &ptr in ptrs.iter().step_by(2) {
            arena.release(ptr);
        }
        arena.consolidate();
        assert_invariants(&arena.snapshot());
    }

    #[test]
    fn test_detects_corrupted_inuse_flag() {
        let mut arena = Arena::new(32768);
        let p = arena.allocate(24).unwrap();
        arena.release(p);
        let mut snap = arena.snapshot();
        // Forge an in-use flag on the tcache member.
        if let Some(chunk) = snap.chunks.get_mut(&(p - 16)) {
            chunk.inuse = true;
        }
        let report = check_snapshot(&snap);
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule == "inuse-never-binned"));
    }

    #[test]
    fn test_detects_partition_gap() {
        let mut arena = Arena::new(32768);
        arena.allocate(100).unwrap();
        let mut snap = arena.snapshot();
        if let Some(chunk) = snap.chunks.get_mut(&0x1000) {
            chunk.size += 16;
        }
        let report = check_snapshot(&snap);
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule == "partition-no-gaps"));
    }

    #[test]
    fn test_detects_prev_inuse_mismatch() {
        let mut arena = Arena::new(32768);
        let p = arena.allocate(2000).unwrap();
        let _guard = arena.allocate(24).unwrap();
        arena.release(p); // real free: successor flags updated
        let mut snap = arena.snapshot();
        let guard_addr = p - 16 + 2016;
        if let Some(chunk) = snap.chunks.get_mut(&guard_addr) {
            chunk.prev_inuse = true;
        }
        let report = check_snapshot(&snap);
        assert!(report
            .violations
            .iter()
            .any(|v| v.rule == "prev-inuse-propagation"));
    }
}

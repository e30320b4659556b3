//! Shared workload helpers for the heapsim benchmarks.

#![deny(unsafe_code)]

use heapsim_core::Arena;

/// Simple LCG; the benches only need cheap, deterministic variety.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.0
    }
}

/// Runs a mixed allocate/release churn of `steps` operations.
pub fn churn(arena: &mut Arena, seed: u64, steps: usize) {
    const SIZES: &[usize] = &[24, 64, 200, 520, 2000];
    let mut rng = Lcg::new(seed);
    let mut live: Vec<usize> = Vec::new();
    for _ in 0..steps {
        let r = rng.next();
        if r % 3 == 0 && !live.is_empty() {
            let idx = (r >> 8) as usize % live.len();
            let ptr = live.swap_remove(idx);
            arena.release(ptr);
        } else {
            let size = SIZES[(r >> 16) as usize % SIZES.len()];
            if let Some(ptr) = arena.allocate(size) {
                live.push(ptr);
            }
        }
    }
}

//! The simulated arena.
//!
//! One `Arena` owns the chunk table, every bin tier, the tcache, and the
//! event log. Each public operation runs synchronously to completion and
//! appends its events in the order the work was performed; a viewer that
//! needs concurrent access takes a [`Snapshot`] instead of sharing state.

use serde::Serialize;

use crate::bins::{BinId, Bins};
use crate::chunk::{Chunk, ChunkStore};
use crate::event::{AllocSource, Event, FreeDest};
use crate::size_class::{
    align_up, fastbin_index, largebin_index, request2size, smallbin_index, tcache_eligible,
    FASTBIN_CONSOLIDATION_THRESHOLD, HEADER_SIZE, MIN_CHUNK_SIZE, MIN_SPLIT_REMAINDER, NFASTBINS,
    SYSMALLOC_MIN_GROW,
};
use crate::snapshot::{ChunkView, Snapshot};
use crate::tcache::Tcache;

/// Base address of the simulated heap; kept above the zero page.
pub const HEAP_BASE: usize = 0x1000;

/// Heap size used by [`Arena::default`].
pub const DEFAULT_HEAP_BYTES: usize = 32768;

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Successful releases.
    pub releases: u64,
    /// Releases rejected with an `error` event.
    pub failed_releases: u64,
    /// Allocations served by the tcache.
    pub tcache_hits: u64,
    /// Allocations served by a fastbin.
    pub fastbin_hits: u64,
    /// Allocations served by a smallbin.
    pub smallbin_hits: u64,
    /// Allocations served by the unsorted bin.
    pub unsorted_hits: u64,
    /// Allocations served by a largebin.
    pub largebin_hits: u64,
    /// Allocations carved from the top chunk.
    pub top_allocs: u64,
    /// Top extensions.
    pub sysmalloc_calls: u64,
    /// Chunk splits, bin finds and top carves alike.
    pub splits: u64,
    /// Coalesce operations that merged at least two chunks.
    pub coalesces: u64,
    /// Consolidations that moved at least one fastbin chunk.
    pub consolidations: u64,
}

/// A single simulated malloc arena.
pub struct Arena {
    chunks: ChunkStore,
    bins: Bins,
    tcache: Tcache,
    events: Vec<Event>,
    stats: ArenaStats,
    base: usize,
    /// Current heap break: `base + total heap bytes`.
    brk: usize,
    /// Address of the top chunk.
    top: usize,
}

impl Arena {
    /// Builds an arena whose heap is `initial_heap_bytes` (rounded up to
    /// alignment), covered by a single top chunk at [`HEAP_BASE`].
    pub fn new(initial_heap_bytes: usize) -> Self {
        let total = align_up(initial_heap_bytes).max(MIN_CHUNK_SIZE);
        let mut chunks = ChunkStore::new();
        chunks.insert(Chunk::new(HEAP_BASE, total));
        Self {
            chunks,
            bins: Bins::new(),
            tcache: Tcache::new(),
            events: Vec::new(),
            stats: ArenaStats::default(),
            base: HEAP_BASE,
            brk: HEAP_BASE + total,
            top: HEAP_BASE,
        }
    }

    // --- public surface ---

    /// Allocates `bytes`, returning the user pointer.
    ///
    /// The search runs tier by tier and stops at the first hit:
    /// tcache, fastbin, (opportunistic consolidation), smallbin, unsorted
    /// first-fit, largebin best-fit, and finally the top chunk, which is
    /// grown on demand and therefore never refuses.
    pub fn allocate(&mut self, bytes: usize) -> Option<usize> {
        let nb = request2size(bytes);

        if let Some(addr) = self.tcache.get(nb) {
            self.stats.tcache_hits += 1;
            self.emit(Event::TcacheGet {
                msg: format!("tcache_get: size {:#x} -> chunk {:#x}", nb, addr),
                size: nb,
            });
            return Some(self.finish_allocation(bytes, nb, addr, AllocSource::Tcache));
        }

        if let Some(idx) = fastbin_index(nb) {
            if let Some(addr) = self.bins.fast_pop(&mut self.chunks, idx) {
                self.stats.fastbin_hits += 1;
                self.emit(Event::BinUnlink {
                    msg: format!("unlink chunk {:#x} from fastbin[{}]", addr, idx),
                    bin: BinId::Fast(idx),
                    addr,
                    size: nb,
                });
                return Some(self.finish_allocation(bytes, nb, addr, AllocSource::Fastbin(idx)));
            }
        }

        if self.top_size() < FASTBIN_CONSOLIDATION_THRESHOLD {
            self.malloc_consolidate();
        }

        if let Some(idx) = smallbin_index(nb) {
            if let Some(addr) = self.bins.small_take(&mut self.chunks, idx) {
                self.stats.smallbin_hits += 1;
                self.emit(Event::BinUnlink {
                    msg: format!("unlink chunk {:#x} from smallbin[{}]", addr, idx),
                    bin: BinId::Small(idx),
                    addr,
                    size: nb,
                });
                return Some(self.finish_allocation(bytes, nb, addr, AllocSource::Smallbin(idx)));
            }
        }

        if let Some(addr) = self.bins.unsorted_take_first(&mut self.chunks, nb) {
            self.stats.unsorted_hits += 1;
            let size = self.chunk_size(addr);
            self.emit(Event::BinUnlink {
                msg: format!("unlink chunk {:#x} from unsorted", addr),
                bin: BinId::Unsorted,
                addr,
                size,
            });
            self.split_found(addr, nb);
            return Some(self.finish_allocation(bytes, nb, addr, AllocSource::Unsorted));
        }

        if let Some((idx, addr)) = self.bins.large_best_fit(&mut self.chunks, nb) {
            self.stats.largebin_hits += 1;
            let size = self.chunk_size(addr);
            self.emit(Event::BinUnlink {
                msg: format!("unlink chunk {:#x} from largebin[{}]", addr, idx),
                bin: BinId::Large(idx),
                addr,
                size,
            });
            self.split_found(addr, nb);
            return Some(self.finish_allocation(bytes, nb, addr, AllocSource::Largebin(idx)));
        }

        if self.top_size() < nb + MIN_CHUNK_SIZE {
            self.sysmalloc_grow(nb);
        }
        let addr = self.take_from_top(nb);
        self.stats.top_allocs += 1;
        Some(self.finish_allocation(bytes, nb, addr, AllocSource::Top))
    }

    /// Calloc shape: `count * size` bytes with an overflow check.
    ///
    /// Zeroing is implicit; the model stores no byte payloads.
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> Option<usize> {
        let Some(total) = count.checked_mul(size) else {
            self.emit(Event::Error {
                msg: format!("calloc({}, {}): multiplication overflow", count, size),
            });
            return None;
        };
        self.allocate(total)
    }

    /// Realloc shape.
    ///
    /// Null pointer acts as `allocate`; zero size acts as `release`. A
    /// pointer that does not name a live allocation is recorded as an error
    /// and a fresh allocation is returned. When the normalized chunk size is
    /// unchanged the pointer is returned as is, with no state change.
    pub fn reallocate(&mut self, ptr: usize, new_size: usize) -> Option<usize> {
        if ptr == 0 {
            return self.allocate(new_size);
        }
        if new_size == 0 {
            self.release(ptr);
            return None;
        }
        let live = ptr
            .checked_sub(HEADER_SIZE)
            .and_then(|addr| self.chunks.get(addr))
            .filter(|chunk| chunk.inuse)
            .map(|chunk| chunk.size);
        let Some(old_nb) = live else {
            self.emit(Event::Error {
                msg: format!("realloc({:#x}): unknown or stale pointer", ptr),
            });
            return self.allocate(new_size);
        };
        if request2size(new_size) == old_nb {
            return Some(ptr);
        }
        let new_ptr = self.allocate(new_size)?;
        self.release(ptr);
        Some(new_ptr)
    }

    /// Releases a user pointer.
    ///
    /// Null, unknown and already-free pointers record an `error` event and
    /// leave the arena untouched. Live chunks are routed to the tcache, a
    /// fastbin, the top, or the unsorted bin after neighbour coalescing.
    pub fn release(&mut self, ptr: usize) {
        if ptr == 0 {
            self.stats.failed_releases += 1;
            self.emit(Event::Error {
                msg: String::from("free(NULL): ignored"),
            });
            return;
        }
        let live = ptr
            .checked_sub(HEADER_SIZE)
            .filter(|&addr| self.chunks.get(addr).is_some_and(|chunk| chunk.inuse));
        let Some(addr) = live else {
            self.stats.failed_releases += 1;
            self.emit(Event::Error {
                msg: format!("free({:#x}): double free or invalid pointer", ptr),
            });
            return;
        };
        self.stats.releases += 1;

        let nb = self.chunk_size(addr);
        if let Some(chunk) = self.chunks.get_mut(addr) {
            chunk.inuse = false;
        }

        // Quasi-free tiers first: neither updates the successor's flags.
        if tcache_eligible(nb) && !self.tcache.is_full(nb) {
            self.tcache.put(nb, addr);
            self.emit(Event::TcachePut {
                msg: format!("tcache_put: size {:#x} <- chunk {:#x}", nb, addr),
                size: nb,
            });
            self.emit_free(ptr, nb, FreeDest::Tcache);
            return;
        }
        if let Some(idx) = fastbin_index(nb) {
            self.bins.fast_push(&mut self.chunks, idx, addr);
            self.emit(Event::BinInsert {
                msg: format!("insert chunk {:#x} into fastbin[{}]", addr, idx),
                bin: BinId::Fast(idx),
                addr,
                size: nb,
            });
            self.emit_free(ptr, nb, FreeDest::Fastbin(idx));
            return;
        }

        let merged = self.coalesce_free(addr);
        let merged_size = self.chunk_size(merged);
        if merged + merged_size == self.top {
            self.absorb_into_top(merged);
            self.emit_free(ptr, nb, FreeDest::Top);
            return;
        }
        self.bins.unsorted_insert(&mut self.chunks, merged);
        self.emit(Event::BinInsert {
            msg: format!("insert chunk {:#x} into unsorted", merged),
            bin: BinId::Unsorted,
            addr: merged,
            size: merged_size,
        });
        self.emit_free(ptr, nb, FreeDest::Unsorted);
    }

    /// Forces a fastbin consolidation.
    pub fn consolidate(&mut self) {
        self.malloc_consolidate();
    }

    /// Deep, read-only copy of the arena state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            top: self.top,
            top_size: self.top_size(),
            fastbins: self.bins.fastbin_heads().to_vec(),
            unsorted: self.bins.unsorted_head(),
            smallbins: self.bins.smallbin_heads().to_vec(),
            largebins: self.bins.largebin_heads().to_vec(),
            tcache: self.tcache.entries(),
            chunks: self
                .chunks
                .iter()
                .map(|(addr, chunk)| (addr, ChunkView::from(chunk)))
                .collect(),
        }
    }

    /// The append-only event log.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Drains the event log, leaving it empty.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Operation counters.
    pub fn stats(&self) -> ArenaStats {
        self.stats
    }

    /// Looks up the chunk backing a user pointer.
    pub fn chunk_by_user_pointer(&self, ptr: usize) -> Option<&Chunk> {
        self.chunks.get(ptr.checked_sub(HEADER_SIZE)?)
    }

    /// Address of the top chunk.
    pub fn top(&self) -> usize {
        self.top
    }

    /// Size of the top chunk.
    pub fn top_size(&self) -> usize {
        self.top_chunk().size
    }

    /// Base address of the heap.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Current heap break (first address past the heap).
    pub fn heap_end(&self) -> usize {
        self.brk
    }

    // --- allocation internals ---

    fn finish_allocation(
        &mut self,
        bytes: usize,
        nb: usize,
        addr: usize,
        source: AllocSource,
    ) -> usize {
        self.stats.allocations += 1;
        if let Some(chunk) = self.chunks.get_mut(addr) {
            chunk.inuse = true;
            chunk.clear_links();
        }
        if let Some(next) = self.chunks.phys_next(addr) {
            if let Some(chunk) = self.chunks.get_mut(next) {
                chunk.prev_inuse = true;
            }
        }
        let user = addr + HEADER_SIZE;
        self.emit(Event::Malloc {
            msg: format!("malloc({}) = {:#x} via {}", bytes, user, source),
            bytes,
            nb,
            result: user,
            source,
        });
        user
    }

    /// Split policy for chunks found in the unsorted or large bins: carve
    /// `nb` off the front when the remainder stays a valid chunk, and file
    /// the remainder in its small or large bin.
    fn split_found(&mut self, addr: usize, nb: usize) {
        let total = self.chunk_size(addr);
        if total < nb + MIN_SPLIT_REMAINDER {
            return;
        }
        let rem_size = total - nb;
        let rem_addr = addr + nb;
        if let Some(chunk) = self.chunks.get_mut(addr) {
            chunk.size = nb;
        }
        let mut remainder = Chunk::new(rem_addr, rem_size);
        remainder.prev_inuse = true;
        self.chunks.insert(remainder);
        if let Some(next) = self.chunks.phys_next(rem_addr) {
            if let Some(chunk) = self.chunks.get_mut(next) {
                chunk.prev_inuse = false;
                chunk.prev_size = rem_size;
            }
        }
        self.stats.splits += 1;
        self.emit(Event::Split {
            msg: format!(
                "split chunk {:#x}: keep {:#x} bytes, remainder {:#x} at {:#x}",
                addr, nb, rem_size, rem_addr
            ),
            from: addr,
            into: [addr, rem_addr],
            sizes: [nb, rem_size],
        });
        self.place_remainder(rem_addr, rem_size);
    }

    fn place_remainder(&mut self, addr: usize, size: usize) {
        if let Some(idx) = smallbin_index(size) {
            self.bins.small_insert(&mut self.chunks, idx, addr);
            self.emit(Event::BinInsert {
                msg: format!("insert chunk {:#x} into smallbin[{}]", addr, idx),
                bin: BinId::Small(idx),
                addr,
                size,
            });
        } else {
            let idx = largebin_index(size);
            self.bins.large_insert(&mut self.chunks, idx, addr);
            self.emit(Event::BinInsert {
                msg: format!("insert chunk {:#x} into largebin[{}]", addr, idx),
                bin: BinId::Large(idx),
                addr,
                size,
            });
        }
    }

    /// Carves `nb` bytes off the front of the top chunk.
    ///
    /// The caller guarantees the top is large enough; the returned chunk
    /// inherits the old top's backward flags and the new top starts past it.
    fn take_from_top(&mut self, nb: usize) -> usize {
        let old_top = self.top;
        let Some(old) = self.chunks.remove(old_top) else {
            panic!("top chunk {:#x} missing from the chunk table", old_top);
        };
        debug_assert!(old.size >= nb + MIN_CHUNK_SIZE);
        let new_top = old_top + nb;
        let rest = old.size - nb;

        let mut returned = Chunk::new(old_top, nb);
        returned.prev_inuse = old.prev_inuse;
        returned.prev_size = old.prev_size;
        self.chunks.insert(returned);
        self.chunks.insert(Chunk::new(new_top, rest));
        self.top = new_top;

        self.stats.splits += 1;
        self.emit(Event::Split {
            msg: format!(
                "split top {:#x}: keep {:#x} bytes, top moves to {:#x}",
                old_top, nb, new_top
            ),
            from: old_top,
            into: [old_top, new_top],
            sizes: [nb, rest],
        });
        old_top
    }

    /// Extends the top so it can serve a request of `nb` bytes.
    fn sysmalloc_grow(&mut self, nb: usize) {
        let grow = align_up(nb.max(SYSMALLOC_MIN_GROW));
        let old_brk = self.brk;
        self.brk += grow;
        let top = self.top;
        if let Some(chunk) = self.chunks.get_mut(top) {
            chunk.size += grow;
        }
        self.stats.sysmalloc_calls += 1;
        self.emit(Event::Sysmalloc {
            msg: format!("sysmalloc: grew heap by {:#x} bytes", grow),
            bytes: grow,
            old_top: old_brk,
            new_top: self.brk,
        });
    }

    // --- release internals ---

    /// Merges a free chunk with its physical neighbours.
    ///
    /// Only neighbours locatable in the unsorted, small or large bins take
    /// part; tcache and fastbin members are quasi-in-use and are skipped, and
    /// forward merging never crosses into the top. Returns the merged
    /// chunk's address and leaves the successor's backward flags updated.
    fn coalesce_free(&mut self, addr: usize) -> usize {
        let mut cur = addr;
        let mut absorbed_prev = None;
        let mut absorbed_next = None;

        if let Some(next) = self.chunks.phys_next(cur) {
            let free = next != self.top && self.chunks.get(next).is_some_and(|c| !c.inuse);
            if free {
                if let Some(bin) = self.bins.locate(&self.chunks, next) {
                    let next_size = self.chunk_size(next);
                    self.emit(Event::BinUnlink {
                        msg: format!("unlink neighbour {:#x} from {}", next, bin),
                        bin,
                        addr: next,
                        size: next_size,
                    });
                    self.bins.unlink(&mut self.chunks, bin, next);
                    self.chunks.remove(next);
                    if let Some(chunk) = self.chunks.get_mut(cur) {
                        chunk.size += next_size;
                    }
                    absorbed_next = Some(next);
                }
            }
        }

        let prev_candidate = self.chunks.phys_prev(cur);
        if let Some(prev) = prev_candidate {
            let free = self.chunks.get(prev).is_some_and(|c| !c.inuse);
            if free {
                if let Some(bin) = self.bins.locate(&self.chunks, prev) {
                    let prev_size = self.chunk_size(prev);
                    self.emit(Event::BinUnlink {
                        msg: format!("unlink neighbour {:#x} from {}", prev, bin),
                        bin,
                        addr: prev,
                        size: prev_size,
                    });
                    self.bins.unlink(&mut self.chunks, bin, prev);
                    let cur_size = self.chunk_size(cur);
                    self.chunks.remove(cur);
                    if let Some(chunk) = self.chunks.get_mut(prev) {
                        chunk.size += cur_size;
                    }
                    absorbed_prev = Some(prev);
                    cur = prev;
                }
            }
        }

        let size = self.chunk_size(cur);
        if let Some(next) = self.chunks.phys_next(cur) {
            if let Some(chunk) = self.chunks.get_mut(next) {
                chunk.prev_inuse = false;
                chunk.prev_size = size;
            }
        }

        if absorbed_prev.is_some() || absorbed_next.is_some() {
            let mut parts = Vec::new();
            if let Some(prev) = absorbed_prev {
                parts.push(prev);
            }
            parts.push(addr);
            if let Some(next) = absorbed_next {
                parts.push(next);
            }
            self.stats.coalesces += 1;
            self.emit(Event::Coalesce {
                msg: format!(
                    "coalesced {} chunks into {:#x} ({:#x} bytes)",
                    parts.len(),
                    cur,
                    size
                ),
                result: cur,
                size,
                parts,
            });
        }
        cur
    }

    /// Absorbs the top into `merged`, which becomes the new top.
    fn absorb_into_top(&mut self, merged: usize) {
        let old_top = self.top;
        let Some(top) = self.chunks.remove(old_top) else {
            panic!("top chunk {:#x} missing from the chunk table", old_top);
        };
        let mut new_size = 0;
        if let Some(chunk) = self.chunks.get_mut(merged) {
            chunk.size += top.size;
            chunk.inuse = false;
            chunk.clear_links();
            new_size = chunk.size;
        }
        self.top = merged;
        self.stats.coalesces += 1;
        self.emit(Event::Coalesce {
            msg: format!("merged chunk {:#x} into top ({:#x} bytes)", merged, new_size),
            result: merged,
            size: new_size,
            parts: vec![merged, old_top],
        });
    }

    /// Drains every fastbin: each chunk is coalesced and then merged into
    /// the top or filed in the unsorted bin. Emits one `consolidate` event
    /// when anything moved.
    fn malloc_consolidate(&mut self) -> usize {
        let mut moved = 0;
        for idx in 0..NFASTBINS {
            while let Some(addr) = self.bins.fast_pop(&mut self.chunks, idx) {
                let size = self.chunk_size(addr);
                self.emit(Event::BinUnlink {
                    msg: format!("drain chunk {:#x} from fastbin[{}]", addr, idx),
                    bin: BinId::Fast(idx),
                    addr,
                    size,
                });
                let merged = self.coalesce_free(addr);
                let merged_size = self.chunk_size(merged);
                if merged + merged_size == self.top {
                    self.absorb_into_top(merged);
                } else {
                    self.bins.unsorted_insert(&mut self.chunks, merged);
                    self.emit(Event::BinInsert {
                        msg: format!("insert chunk {:#x} into unsorted", merged),
                        bin: BinId::Unsorted,
                        addr: merged,
                        size: merged_size,
                    });
                }
                moved += 1;
            }
        }
        if moved > 0 {
            self.stats.consolidations += 1;
            self.emit(Event::Consolidate {
                msg: format!("consolidate: drained {} fastbin chunk(s)", moved),
            });
        }
        moved
    }

    // --- small helpers ---

    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    fn emit_free(&mut self, ptr: usize, size: usize, dest: FreeDest) {
        self.emit(Event::Free {
            msg: format!("free({:#x}) -> {}", ptr, dest),
            ptr,
            size,
            into_bin: dest,
        });
    }

    fn chunk_size(&self, addr: usize) -> usize {
        match self.chunks.get(addr) {
            Some(chunk) => chunk.size,
            None => panic!("chunk {:#x} missing from the chunk table", addr),
        }
    }

    fn top_chunk(&self) -> &Chunk {
        match self.chunks.get(self.top) {
            Some(chunk) => chunk,
            None => panic!("top chunk {:#x} missing from the chunk table", self.top),
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(DEFAULT_HEAP_BYTES)
    }
}

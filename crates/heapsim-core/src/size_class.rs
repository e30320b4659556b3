//! Size classification for the simulated heap.
//!
//! Pure functions mapping request sizes to chunk sizes and chunk sizes to
//! bin indices. The boundaries between the exact-size tiers (tcache,
//! fastbin, smallbin) and the range-bucketed tier (largebin) all live here.

/// Size of one header word; the chunk header is two of these.
pub const SIZE_SZ: usize = 8;

/// Header overhead per chunk. The user payload starts at `addr + HEADER_SIZE`.
pub const HEADER_SIZE: usize = 2 * SIZE_SZ;

/// Chunk alignment. Every chunk size is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Minimum chunk size.
pub const MIN_CHUNK_SIZE: usize = 16;

/// Smallest remainder a split may leave behind.
pub const MIN_SPLIT_REMAINDER: usize = MIN_CHUNK_SIZE + ALIGNMENT;

/// Number of fastbin slots.
pub const NFASTBINS: usize = 10;

/// Smallest fastbin chunk size (`request2size(16)`).
pub const MIN_FAST_CHUNK: usize = 32;

/// Largest fastbin chunk size (`request2size(80)`). Slots above this stay
/// empty, as glibc's default `global_max_fast` leaves its top fastbins unused.
pub const MAX_FAST_CHUNK: usize = 96;

/// Number of smallbin slots.
pub const NSMALLBINS: usize = 64;

/// Largest smallbin chunk size (`request2size(512)`).
pub const MAX_SMALL_CHUNK: usize = 528;

/// Number of largebin slots.
pub const NLARGEBINS: usize = 32;

/// Largest user request eligible for the tcache.
pub const TCACHE_MAX_REQUEST: usize = 64;

/// Largest chunk size eligible for the tcache (`request2size(64)`).
/// The smallest ineligible aligned chunk size is therefore 96.
pub const TCACHE_MAX_CHUNK: usize = 80;

/// Per-size tcache capacity.
pub const TCACHE_CAPACITY: usize = 7;

/// Top-size threshold below which allocation drains the fastbins first.
pub const FASTBIN_CONSOLIDATION_THRESHOLD: usize = 8192;

/// Minimum growth granted by one `sysmalloc` extension of the top.
pub const SYSMALLOC_MIN_GROW: usize = 65536;

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
pub fn align_up(size: usize) -> usize {
    (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Converts a user request in bytes to a chunk size including the header.
pub fn request2size(req: usize) -> usize {
    align_up(req + HEADER_SIZE).max(MIN_CHUNK_SIZE)
}

/// Fastbin index for an exact chunk size, or `None` if the size is not
/// fastbin eligible.
pub fn fastbin_index(chunk_size: usize) -> Option<usize> {
    if (MIN_FAST_CHUNK..=MAX_FAST_CHUNK).contains(&chunk_size)
        && chunk_size % ALIGNMENT == 0
    {
        Some((chunk_size - MIN_FAST_CHUNK) / ALIGNMENT)
    } else {
        None
    }
}

/// Smallbin index for an exact chunk size, or `None` above the smallbin range.
pub fn smallbin_index(chunk_size: usize) -> Option<usize> {
    if chunk_size >= MIN_CHUNK_SIZE
        && chunk_size <= MAX_SMALL_CHUNK
        && chunk_size % ALIGNMENT == 0
    {
        Some((chunk_size - MIN_CHUNK_SIZE) / ALIGNMENT)
    } else {
        None
    }
}

/// Largebin index: coarse `floor(log2(size))`, clamped to the bin array.
pub fn largebin_index(chunk_size: usize) -> usize {
    debug_assert!(chunk_size >= MIN_CHUNK_SIZE);
    (chunk_size.ilog2() as usize).min(NLARGEBINS - 1)
}

/// Whether a chunk size may enter the tcache.
pub fn tcache_eligible(chunk_size: usize) -> bool {
    chunk_size <= TCACHE_MAX_CHUNK
}

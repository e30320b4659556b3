//! Chunk records and the address-keyed chunk store.
//!
//! Chunks never reference each other directly; all list linkage (`fd`, `bk`,
//! `fd_nextsize`, `bk_nextsize`) is expressed as optional addresses resolved
//! through the store. This keeps the cyclic bin lists acyclic in the type
//! system and makes snapshots plain deep copies.

use std::collections::BTreeMap;

/// One contiguous region of the simulated heap, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Start of the header.
    pub addr: usize,
    /// Total size in bytes, header included; always a multiple of 16.
    /// Flag bits are not folded into this field.
    pub size: usize,
    /// Size of the physically preceding chunk; meaningful only while
    /// `prev_inuse` is false.
    pub prev_size: usize,
    /// Whether the chunk is currently handed out to a user.
    pub inuse: bool,
    /// Whether the physically preceding chunk is in use (or quasi-in-use).
    pub prev_inuse: bool,
    /// Forward bin-list neighbour, when free and listed.
    pub fd: Option<usize>,
    /// Backward bin-list neighbour, when free and listed.
    pub bk: Option<usize>,
    /// Forward size-ring neighbour; largebin members only.
    pub fd_nextsize: Option<usize>,
    /// Backward size-ring neighbour; largebin members only.
    pub bk_nextsize: Option<usize>,
}

impl Chunk {
    /// Creates a free, unlisted chunk.
    pub fn new(addr: usize, size: usize) -> Self {
        Self {
            addr,
            size,
            prev_size: 0,
            inuse: false,
            prev_inuse: true,
            fd: None,
            bk: None,
            fd_nextsize: None,
            bk_nextsize: None,
        }
    }

    /// End address of the chunk (first byte past it).
    pub fn end(&self) -> usize {
        self.addr + self.size
    }

    /// Clears all four list links.
    pub fn clear_links(&mut self) {
        self.fd = None;
        self.bk = None;
        self.fd_nextsize = None;
        self.bk_nextsize = None;
    }
}

/// Address-ordered table of every live chunk in the arena.
#[derive(Debug, Clone, Default)]
pub struct ChunkStore {
    chunks: BTreeMap<usize, Chunk>,
}

impl ChunkStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks currently tracked.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when no chunks are tracked.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Registers a chunk under its own address.
    pub fn insert(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk.addr, chunk);
    }

    /// Removes and returns the chunk at `addr`.
    pub fn remove(&mut self, addr: usize) -> Option<Chunk> {
        self.chunks.remove(&addr)
    }

    /// Chunk at exactly `addr`.
    pub fn get(&self, addr: usize) -> Option<&Chunk> {
        self.chunks.get(&addr)
    }

    /// Mutable chunk at exactly `addr`.
    pub fn get_mut(&mut self, addr: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(&addr)
    }

    /// Whether a chunk starts at `addr`.
    pub fn contains(&self, addr: usize) -> bool {
        self.chunks.contains_key(&addr)
    }

    /// Address of the physically following chunk, if one exists.
    ///
    /// The top chunk is the unique chunk without a successor.
    pub fn phys_next(&self, addr: usize) -> Option<usize> {
        let end = self.chunks.get(&addr)?.end();
        self.chunks.contains_key(&end).then_some(end)
    }

    /// Address of the physically preceding chunk, derived from `prev_size`.
    ///
    /// Only meaningful while the chunk's `prev_inuse` flag is clear.
    pub fn phys_prev(&self, addr: usize) -> Option<usize> {
        let chunk = self.chunks.get(&addr)?;
        if chunk.prev_inuse || chunk.prev_size == 0 {
            return None;
        }
        let prev = addr.checked_sub(chunk.prev_size)?;
        self.chunks.contains_key(&prev).then_some(prev)
    }

    /// Iterates chunks in address order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Chunk)> + '_ {
        self.chunks.iter().map(|(addr, chunk)| (*addr, chunk))
    }
}

//! # heapsim-core
//!
//! An educational simulator of a glibc-style segregated-fit heap allocator
//! (ptmalloc2 lineage). A single [`Arena`] owns an abstract chunk address
//! space and the tiered free-list hierarchy (per-size tcache, fastbins,
//! unsorted bin, smallbins, largebins and the top chunk) and replays
//! ptmalloc2's placement, splitting, coalescing and consolidation rules on
//! every call. Each operation appends structured [`Event`] records, and
//! [`Arena::snapshot`] hands out deep read-only views for a viewer to step
//! through.
//!
//! The simulator reproduces chunk shape, placement and bin membership, not
//! byte payloads or bit-exact glibc numerics.
//!
//! ```
//! use heapsim_core::{Arena, Event};
//!
//! let mut arena = Arena::new(32768);
//! let p = arena.allocate(24).expect("the top always grows on demand");
//! arena.release(p);
//! assert_eq!(arena.allocate(24), Some(p)); // served straight from the tcache
//! assert!(matches!(arena.events().last(), Some(Event::Malloc { .. })));
//! ```

#![deny(unsafe_code)]

pub mod arena;
pub mod bins;
pub mod chunk;
pub mod event;
pub mod size_class;
pub mod snapshot;
pub mod tcache;

pub use arena::{Arena, ArenaStats, DEFAULT_HEAP_BYTES, HEAP_BASE};
pub use bins::BinId;
pub use chunk::Chunk;
pub use event::{AllocSource, Event, FreeDest};
pub use snapshot::{ChunkView, Snapshot};

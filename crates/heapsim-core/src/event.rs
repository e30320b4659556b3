//! Structured event records.
//!
//! Every arena operation appends events in the order the work was performed;
//! the log is append-only and kept in memory, and a viewer steps through it
//! to replay allocator behaviour. The taxonomy is closed: eleven variants,
//! serialized with kebab-case `type` tags.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::bins::BinId;

/// Tier that satisfied an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocSource {
    Tcache,
    Fastbin(usize),
    Smallbin(usize),
    Unsorted,
    Largebin(usize),
    Top,
}

impl fmt::Display for AllocSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocSource::Tcache => write!(f, "tcache"),
            AllocSource::Fastbin(_) => write!(f, "fastbin"),
            AllocSource::Smallbin(i) => write!(f, "smallbin[{}]", i),
            AllocSource::Unsorted => write!(f, "unsorted"),
            AllocSource::Largebin(_) => write!(f, "largebin"),
            AllocSource::Top => write!(f, "top"),
        }
    }
}

impl Serialize for AllocSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Destination a released chunk was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeDest {
    Tcache,
    Fastbin(usize),
    Unsorted,
    Top,
}

impl fmt::Display for FreeDest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeDest::Tcache => write!(f, "tcache"),
            FreeDest::Fastbin(_) => write!(f, "fastbin"),
            FreeDest::Unsorted => write!(f, "unsorted"),
            FreeDest::Top => write!(f, "top"),
        }
    }
}

impl Serialize for FreeDest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One record in the arena's append-only trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    /// The top chunk was extended.
    Sysmalloc {
        msg: String,
        /// Bytes added to the heap.
        bytes: usize,
        /// Heap break before growth.
        #[serde(rename = "oldTop")]
        old_top: usize,
        /// Heap break after growth.
        #[serde(rename = "newTop")]
        new_top: usize,
    },
    /// An allocation completed.
    Malloc {
        msg: String,
        /// User-requested bytes.
        bytes: usize,
        /// Normalized chunk size.
        nb: usize,
        /// User pointer handed out.
        result: usize,
        /// Tier that satisfied the request.
        source: AllocSource,
    },
    /// A release completed.
    Free {
        msg: String,
        /// User pointer passed in.
        ptr: usize,
        /// Chunk size released.
        size: usize,
        /// Where the chunk went.
        #[serde(rename = "into")]
        into_bin: FreeDest,
    },
    /// Fastbins were drained.
    Consolidate { msg: String },
    /// A chunk entered the tcache.
    TcachePut {
        msg: String,
        /// Exact chunk size of the slot.
        size: usize,
    },
    /// A chunk left the tcache.
    TcacheGet {
        msg: String,
        /// Exact chunk size of the slot.
        size: usize,
    },
    /// A chunk entered a bin.
    BinInsert {
        msg: String,
        bin: BinId,
        addr: usize,
        size: usize,
    },
    /// A chunk left a bin.
    BinUnlink {
        msg: String,
        bin: BinId,
        addr: usize,
        size: usize,
    },
    /// A found chunk was divided into a returned part and a remainder.
    Split {
        msg: String,
        /// Address of the chunk that was split.
        from: usize,
        /// Addresses of the two resulting chunks, low part first.
        into: [usize; 2],
        /// Sizes of the two resulting chunks.
        sizes: [usize; 2],
    },
    /// Physically adjacent free chunks were merged.
    Coalesce {
        msg: String,
        /// Address of the merged chunk.
        result: usize,
        /// Size of the merged chunk.
        size: usize,
        /// Addresses that were merged, in address order.
        parts: Vec<usize>,
    },
    /// An invalid request was rejected without mutating the arena.
    Error { msg: String },
}

impl Event {
    /// The serialized `type` tag of this event.
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Sysmalloc { .. } => "sysmalloc",
            Event::Malloc { .. } => "malloc",
            Event::Free { .. } => "free",
            Event::Consolidate { .. } => "consolidate",
            Event::TcachePut { .. } => "tcache-put",
            Event::TcacheGet { .. } => "tcache-get",
            Event::BinInsert { .. } => "bin-insert",
            Event::BinUnlink { .. } => "bin-unlink",
            Event::Split { .. } => "split",
            Event::Coalesce { .. } => "coalesce",
            Event::Error { .. } => "error",
        }
    }

    /// The human-readable message carried by every variant.
    pub fn msg(&self) -> &str {
        match self {
            Event::Sysmalloc { msg, .. }
            | Event::Malloc { msg, .. }
            | Event::Free { msg, .. }
            | Event::Consolidate { msg }
            | Event::TcachePut { msg, .. }
            | Event::TcacheGet { msg, .. }
            | Event::BinInsert { msg, .. }
            | Event::BinUnlink { msg, .. }
            | Event::Split { msg, .. }
            | Event::Coalesce { msg, .. }
            | Event::Error { msg } => msg,
        }
    }
}

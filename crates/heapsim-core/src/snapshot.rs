//! Deep, read-only views of the arena.
//!
//! A snapshot shares no mutable storage with the arena: every field is an
//! owned copy, so it can be handed to a viewer thread and diffed against
//! later snapshots without coordination.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::chunk::Chunk;

/// Copy of one chunk's header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkView {
    pub size: usize,
    pub prev_size: usize,
    pub inuse: bool,
    pub prev_inuse: bool,
    pub fd: Option<usize>,
    pub bk: Option<usize>,
    pub fd_nextsize: Option<usize>,
    pub bk_nextsize: Option<usize>,
}

impl From<&Chunk> for ChunkView {
    fn from(chunk: &Chunk) -> Self {
        Self {
            size: chunk.size,
            prev_size: chunk.prev_size,
            inuse: chunk.inuse,
            prev_inuse: chunk.prev_inuse,
            fd: chunk.fd,
            bk: chunk.bk,
            fd_nextsize: chunk.fd_nextsize,
            bk_nextsize: chunk.bk_nextsize,
        }
    }
}

/// Structurally independent copy of the whole arena state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    /// Address of the top chunk.
    pub top: usize,
    /// Size of the top chunk.
    #[serde(rename = "topSize")]
    pub top_size: usize,
    /// Fastbin head addresses, slot order.
    pub fastbins: Vec<Option<usize>>,
    /// Unsorted bin head address.
    pub unsorted: Option<usize>,
    /// Smallbin head addresses, slot order.
    pub smallbins: Vec<Option<usize>>,
    /// Largebin head addresses, slot order.
    pub largebins: Vec<Option<usize>>,
    /// Per-size tcache stacks, bottom of stack first.
    pub tcache: BTreeMap<usize, Vec<usize>>,
    /// Every chunk in the arena, keyed by address.
    pub chunks: BTreeMap<usize, ChunkView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_view_copies_all_fields() {
        let mut chunk = Chunk::new(0x1000, 64);
        chunk.prev_size = 32;
        chunk.prev_inuse = false;
        chunk.fd = Some(0x2000);
        chunk.bk = Some(0x3000);
        let view = ChunkView::from(&chunk);
        assert_eq!(view.size, 64);
        assert_eq!(view.prev_size, 32);
        assert!(!view.prev_inuse);
        assert_eq!(view.fd, Some(0x2000));
        assert_eq!(view.bk, Some(0x3000));
        assert_eq!(view.fd_nextsize, None);
    }

    #[test]
    fn test_snapshot_serializes_normative_names() {
        let mut chunks = BTreeMap::new();
        chunks.insert(0x1000, ChunkView::from(&Chunk::new(0x1000, 0x8000)));
        let snap = Snapshot {
            top: 0x1000,
            top_size: 0x8000,
            fastbins: vec![None; 10],
            unsorted: None,
            smallbins: vec![None; 64],
            largebins: vec![None; 32],
            tcache: BTreeMap::new(),
            chunks,
        };
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["top"], 0x1000);
        assert_eq!(json["topSize"], 0x8000);
        assert!(json["chunks"]["4096"].is_object());
        assert_eq!(json["chunks"]["4096"]["prev_inuse"], true);
        assert_eq!(json["fastbins"].as_array().unwrap().len(), 10);
    }
}

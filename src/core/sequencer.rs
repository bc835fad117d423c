//! Chunk index assignment for a capture session.
//!
//! Indices start at 1. An addendum continues numbering from the parent
//! record's final chunk count so indices never collide on the remote side.

/// Per-session chunk counter. Performs no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSequencer {
    /// Value the counter resets to (0, or the parent's chunk count)
    base: u32,

    /// Last index handed out
    counter: u32,
}

impl Default for ChunkSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkSequencer {
    /// Sequencer for a fresh record
    pub fn new() -> Self {
        Self { base: 0, counter: 0 }
    }

    /// Sequencer for an addendum to a record that already has `parent_chunk_count` chunks
    pub fn for_addendum(parent_chunk_count: u32) -> Self {
        Self {
            base: parent_chunk_count,
            counter: parent_chunk_count,
        }
    }

    /// Assign the next chunk index
    pub fn next_index(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }

    /// Last index handed out (equals the base before the first call)
    pub fn current(&self) -> u32 {
        self.counter
    }

    /// Number of indices issued since the last reset
    pub fn issued(&self) -> u32 {
        self.counter - self.base
    }

    /// Restart numbering for a fresh (non-resumed) recording
    pub fn reset(&mut self) {
        self.counter = self.base;
    }
}

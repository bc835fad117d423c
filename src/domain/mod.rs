//! Domain types for the capture-and-sync engine.
//!
//! This module contains the core data structures:
//! - Record: a capture session and its metadata
//! - Chunk: one segment of captured audio, plus the upload path scheme
//! - PendingMutation: a deferred create/update/delete operation

pub mod chunk;
pub mod mutation;
pub mod record;

// Re-export commonly used types
pub use chunk::{Chunk, PathScheme};
pub use mutation::{MutationKind, PendingMutation, RecordRef, RecordUpdate};
pub use record::{Record, RecordFields, RecordId};

//! fieldsync - Offline-resilient capture-and-sync engine
//!
//! Captures a continuous audio stream as fixed-size chunks, uploads them
//! reliably over an intermittent connection, and keeps a local working set
//! of records consistent with a remote system of record.
//!
//! # Architecture
//!
//! - Chunks are numbered by a per-session sequencer and either uploaded
//!   directly or persisted in a worker-owned durable store while offline
//! - Record operations made offline go into a persisted FIFO queue that is
//!   replayed all-or-nothing once the connection returns
//! - Local and server records are merged into one deduplicated view
//!
//! # Modules
//!
//! - `adapters`: Remote storage, record API and connectivity probe
//! - `core`: Upload pipeline, mutation queue, connectivity, reconciliation
//! - `domain`: Data structures (Record, Chunk, PendingMutation)
//! - `store`: Durable chunk store worker and key-value state
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Capture two chunks offline, then sync
//! fieldsync capture --offline --label "Ward round" part1.wav part2.wav
//! fieldsync sync
//!
//! # Inspect local state
//! fieldsync status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{CaptureSession, EngineParts, SyncEngine, SyncNotice};
pub use domain::{Chunk, PendingMutation, Record, RecordFields, RecordId};
pub use store::{KvStore, LocalStore, StoreLocation};

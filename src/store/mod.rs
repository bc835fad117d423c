//! Local persistence.
//!
//! - **Chunk store**: a worker-isolated SQLite store for chunk payloads that
//!   could not be uploaded yet, driven through a request/response protocol
//! - **Key-value store**: small JSON documents (mutation queue, record cache)
//!
//! ```text
//! LocalStore (async handle) ──Envelope──▶ StoreWorker thread ──▶ SQLite
//!            ◀──StoreResponse──
//! ```

pub mod client;
pub mod kv;
pub mod protocol;
pub mod worker;

// Re-export key types
pub use client::{LocalStore, StoreError, StoredChunk};
pub use kv::{KvError, KvStore};
pub use protocol::{RequestType, StoreRequest, StoreResponse};
pub use worker::{chunk_key, parse_chunk_key, StoreLocation};

//! Chunk types and the upload path scheme.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::record::RecordId;

/// One fixed-duration segment of captured audio.
///
/// An empty payload is a legal terminal marker ("no audio detected") and is
/// processed like any other chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub record_id: RecordId,

    /// 1-based index within the record (offset for addenda)
    pub index: u32,

    pub payload: Arc<[u8]>,
}

impl Chunk {
    pub fn new(record_id: RecordId, index: u32, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            record_id,
            index,
            payload: payload.into(),
        }
    }

    /// Whether this is an empty terminal marker
    pub fn is_terminal_marker(&self) -> bool {
        self.payload.is_empty()
    }

    /// Idempotency key: "{record_id}-{index}:{sha256_16}"
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.payload);
        let digest = hasher.finalize();
        format!(
            "{}-{}:{}",
            self.record_id,
            self.index,
            hex::encode(&digest[..8])
        )
    }
}

/// Destination path scheme: `{user_id}/{record_id}-{chunk_index}.{ext}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathScheme {
    pub user_id: String,

    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_extension() -> String {
    "wav".to_string()
}

impl PathScheme {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            extension: default_extension(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Build the upload path for a chunk
    pub fn path_for(&self, record_id: &RecordId, chunk_index: u32) -> String {
        format!(
            "{}/{}-{}.{}",
            self.user_id, record_id, chunk_index, self.extension
        )
    }
}

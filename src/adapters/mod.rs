//! Adapter interfaces for external systems.
//!
//! The sync engine talks to two remote collaborators: a storage endpoint that
//! accepts chunk uploads, and the record CRUD API of the system of record.
//! Both are traits so tests can substitute scripted fakes.

pub mod probe;
pub mod remote;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Record, RecordFields, RecordId};

// Re-export the HTTP adapters
pub use probe::HttpProbe;
pub use remote::{HttpRemote, RemoteConfig};

/// Result object returned by the storage endpoint.
///
/// Remote storage APIs may report failure in the result rather than by
/// failing the call; `error` carries that message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOutcome {
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Storage upload endpoint
#[async_trait]
pub trait ChunkUploader: Send + Sync {
    /// Upload a payload to `path`. Must be safe to retry with identical content.
    async fn upload(&self, path: &str, payload: &[u8], idempotency_key: &str)
        -> Result<UploadOutcome>;
}

/// Record CRUD API of the system of record.
///
/// Writes carry the idempotency key of the mutation they apply, so the remote
/// can drop a replay it has already applied.
#[async_trait]
pub trait RecordApi: Send + Sync {
    async fn create_record(&self, record: &Record, idempotency_key: &str) -> Result<RecordId>;

    async fn update_record(
        &self,
        id: &RecordId,
        fields: &RecordFields,
        idempotency_key: &str,
    ) -> Result<()>;

    async fn delete_record(&self, id: &RecordId, idempotency_key: &str) -> Result<()>;

    async fn list_records(&self) -> Result<Vec<Record>>;
}

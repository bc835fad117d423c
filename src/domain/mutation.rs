//! Record-level operations deferred while the remote is unreachable.
//!
//! Serialized as `{"type": "...", "data": {...}}` so the persisted queue is a
//! flat JSON array that other tooling can read directly.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::record::{Record, RecordFields, RecordId};

/// A queued create/update/delete operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PendingMutation {
    /// Create the record remotely
    Create(Record),

    /// Apply a partial update
    Update(RecordUpdate),

    /// Delete the record
    Delete(RecordRef),
}

/// Payload of an update mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: RecordId,

    #[serde(flatten)]
    pub fields: RecordFields,
}

/// Payload of a delete mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: RecordId,
}

/// Kind of mutation, reported when a replay fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        f.pad(s)
    }
}

impl PendingMutation {
    pub fn create(record: Record) -> Self {
        Self::Create(record)
    }

    pub fn update(id: RecordId, fields: RecordFields) -> Self {
        Self::Update(RecordUpdate { id, fields })
    }

    pub fn delete(id: RecordId) -> Self {
        Self::Delete(RecordRef { id })
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Create(_) => MutationKind::Create,
            Self::Update(_) => MutationKind::Update,
            Self::Delete(_) => MutationKind::Delete,
        }
    }

    /// The record this mutation targets
    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::Create(record) => &record.id,
            Self::Update(update) => &update.id,
            Self::Delete(target) => &target.id,
        }
    }

    /// Idempotency key format: "{kind}:{record_id}:{sha256_16}"
    ///
    /// Derived from the serialized mutation, so every replay of the same
    /// queued entry sends the same key.
    pub fn idempotency_key(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        let digest = hasher.finalize();
        Ok(format!(
            "{}:{}:{}",
            self.kind(),
            self.record_id(),
            hex::encode(&digest[..8])
        ))
    }
}

//! Record (capture session) types.
//!
//! A record is created client-side the moment capture starts and becomes
//! authoritative once the remote accepts its create operation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, client-generated, globally unique record identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single capture session and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Client-generated identifier
    pub id: RecordId,

    /// User-editable label
    #[serde(default)]
    pub label: String,

    /// Session ordinal (list ordering only)
    #[serde(default)]
    pub sequence_tag: u32,

    /// Number of committed chunks
    #[serde(default)]
    pub chunk_count: u32,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// Whether capture is currently paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    /// Capture language hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Server-computed processing result (absent until processed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,

    /// When the server finished processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,

    /// Server-side processing error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Record {
    /// Create a new, empty record stamped with the current time
    pub fn new(label: impl Into<String>, sequence_tag: u32) -> Self {
        Self {
            id: RecordId::generate(),
            label: label.into(),
            sequence_tag,
            chunk_count: 0,
            created_at: Utc::now(),
            paused: None,
            language: None,
            summary: None,
            processed_at: None,
            error: None,
        }
    }

    /// Builder: use a specific identifier
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.id = id;
        self
    }

    /// Builder: use a specific creation time
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, fields: &RecordFields) {
        if let Some(label) = &fields.label {
            self.label = label.clone();
        }
        if let Some(chunk_count) = fields.chunk_count {
            self.chunk_count = chunk_count;
        }
        if let Some(paused) = fields.paused {
            self.paused = Some(paused);
        }
        if let Some(language) = &fields.language {
            self.language = Some(language.clone());
        }
    }

    /// Whether the server has produced a processing result
    pub fn is_processed(&self) -> bool {
        self.summary.is_some()
    }
}

/// Partial field set carried by an update operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl RecordFields {
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }

    pub fn chunk_count(chunk_count: u32) -> Self {
        Self {
            chunk_count: Some(chunk_count),
            ..Default::default()
        }
    }

    pub fn paused(paused: bool) -> Self {
        Self {
            paused: Some(paused),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.chunk_count.is_none()
            && self.paused.is_none()
            && self.language.is_none()
    }
}

//! Request/response contract between the store client and its worker.
//!
//! Everything that crosses the boundary is owned and serializable: payloads
//! travel as base64 text, never as shared buffers.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Request types understood by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "save")]
    Save,
    #[serde(rename = "get")]
    Get,
    #[serde(rename = "getAllPatientMids")]
    GetAllRecordIds,
    #[serde(rename = "clear")]
    Clear,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Save => "save",
            Self::Get => "get",
            Self::GetAllRecordIds => "getAllPatientMids",
            Self::Clear => "clear",
        }
    }
}

/// A request sent to the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreRequest {
    #[serde(rename = "init")]
    Init,

    #[serde(rename = "save")]
    Save {
        record_id: String,
        chunk_index: u32,
        /// base64-encoded payload
        payload: String,
    },

    #[serde(rename = "get")]
    Get { record_id: String },

    #[serde(rename = "getAllPatientMids")]
    GetAllRecordIds,

    /// Remove a record's chunks; only the listed indices when given
    #[serde(rename = "clear")]
    Clear {
        record_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_indices: Option<Vec<u32>>,
    },
}

impl StoreRequest {
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Init => RequestType::Init,
            Self::Save { .. } => RequestType::Save,
            Self::Get { .. } => RequestType::Get,
            Self::GetAllRecordIds => RequestType::GetAllRecordIds,
            Self::Clear { .. } => RequestType::Clear,
        }
    }
}

/// Outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// A stored chunk as it crosses the boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedChunk {
    pub chunk_index: u32,
    /// base64-encoded payload
    pub data: String,
}

/// Result body of a successful request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreResult {
    Chunks(Vec<EncodedChunk>),
    RecordIds(Vec<String>),
}

/// Why a request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Request arrived before a successful `init`
    NotReady,
    /// The storage engine reported an error
    Engine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFault {
    pub kind: FaultKind,
    pub message: String,
}

/// Response shape: `{type, status, result?, error?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreResponse {
    #[serde(rename = "type")]
    pub request_type: RequestType,

    pub status: ResponseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<StoreResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StoreFault>,
}

impl StoreResponse {
    pub fn success(request_type: RequestType, result: Option<StoreResult>) -> Self {
        Self {
            request_type,
            status: ResponseStatus::Success,
            result,
            error: None,
        }
    }

    pub fn failure(request_type: RequestType, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            request_type,
            status: ResponseStatus::Error,
            result: None,
            error: Some(StoreFault {
                kind,
                message: message.into(),
            }),
        }
    }
}

/// A request paired with the channel its response goes back on
#[derive(Debug)]
pub struct Envelope {
    pub request: StoreRequest,
    pub reply: oneshot::Sender<StoreResponse>,
}

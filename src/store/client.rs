//! Async client for the durable local chunk store.
//!
//! `LocalStore` is a cheap, cloneable handle. Each operation becomes one
//! request envelope sent to the worker thread; the caller suspends until the
//! worker replies. Payloads are base64-encoded before they leave the caller
//! and decoded again on the way back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

use crate::domain::RecordId;

use super::protocol::{
    Envelope, FaultKind, ResponseStatus, StoreRequest, StoreResponse, StoreResult,
};
use super::worker::{StoreLocation, StoreWorker};

/// Request channel depth; callers wait for a reply anyway
const CHANNEL_CAPACITY: usize = 64;

/// Errors returned by the local store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store not ready")]
    NotReady,

    #[error("store worker has stopped")]
    Closed,

    #[error("store engine error: {0}")]
    Engine(String),

    #[error("payload decode error for chunk {chunk_index}: {source}")]
    Codec {
        chunk_index: u32,
        #[source]
        source: base64::DecodeError,
    },

    #[error("unexpected {0} response from store worker")]
    UnexpectedResponse(&'static str),

    #[error("failed to start store worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A chunk read back from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub chunk_index: u32,
    pub payload: Vec<u8>,
}

/// Handle to the chunk store worker
#[derive(Clone)]
pub struct LocalStore {
    tx: mpsc::Sender<Envelope>,
    ready: Arc<AtomicBool>,
}

impl LocalStore {
    /// Spawn the worker thread. The store still needs `init()` before use.
    pub fn spawn(location: StoreLocation) -> Result<Self, StoreError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let worker = StoreWorker::new(location);

        std::thread::Builder::new()
            .name("chunk-store".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(Self {
            tx,
            ready: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawn and initialize in one step
    pub async fn open(location: StoreLocation) -> Result<Self, StoreError> {
        let store = Self::spawn(location)?;
        store.init().await?;
        Ok(store)
    }

    /// Whether `init()` has completed successfully
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn request(&self, request: StoreRequest) -> Result<StoreResponse, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| StoreError::Closed)?;

        let response = rx.await.map_err(|_| StoreError::Closed)?;

        if response.status == ResponseStatus::Error {
            return Err(match response.error {
                Some(fault) if fault.kind == FaultKind::NotReady => StoreError::NotReady,
                Some(fault) => StoreError::Engine(fault.message),
                None => StoreError::Engine("unknown store failure".to_string()),
            });
        }

        Ok(response)
    }

    /// Open the underlying database
    pub async fn init(&self) -> Result<(), StoreError> {
        self.request(StoreRequest::Init).await?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Persist one chunk payload (overwrites an existing entry for the same index)
    #[instrument(skip(self, record_id, payload), fields(record_id = %record_id, bytes = payload.len()))]
    pub async fn put(
        &self,
        record_id: &RecordId,
        chunk_index: u32,
        payload: &[u8],
    ) -> Result<(), StoreError> {
        self.request(StoreRequest::Save {
            record_id: record_id.to_string(),
            chunk_index,
            payload: BASE64_STANDARD.encode(payload),
        })
        .await?;
        debug!("Chunk persisted locally");
        Ok(())
    }

    /// All stored chunks for a record, ascending by chunk index
    pub async fn get_all(&self, record_id: &RecordId) -> Result<Vec<StoredChunk>, StoreError> {
        let response = self
            .request(StoreRequest::Get {
                record_id: record_id.to_string(),
            })
            .await?;

        let encoded = match response.result {
            Some(StoreResult::Chunks(chunks)) => chunks,
            None => Vec::new(),
            Some(StoreResult::RecordIds(_)) => return Err(StoreError::UnexpectedResponse("get")),
        };

        encoded
            .into_iter()
            .map(|chunk| {
                let payload = BASE64_STANDARD
                    .decode(chunk.data.as_bytes())
                    .map_err(|source| StoreError::Codec {
                        chunk_index: chunk.chunk_index,
                        source,
                    })?;
                Ok(StoredChunk {
                    chunk_index: chunk.chunk_index,
                    payload,
                })
            })
            .collect()
    }

    /// Every record id that has at least one stored chunk
    pub async fn list_record_ids(&self) -> Result<Vec<RecordId>, StoreError> {
        let response = self.request(StoreRequest::GetAllRecordIds).await?;

        match response.result {
            Some(StoreResult::RecordIds(ids)) => Ok(ids.into_iter().map(RecordId::from).collect()),
            None => Ok(Vec::new()),
            Some(StoreResult::Chunks(_)) => {
                Err(StoreError::UnexpectedResponse("getAllPatientMids"))
            }
        }
    }

    /// Remove every stored chunk for a record
    pub async fn clear(&self, record_id: &RecordId) -> Result<(), StoreError> {
        self.request(StoreRequest::Clear {
            record_id: record_id.to_string(),
            chunk_indices: None,
        })
        .await?;
        Ok(())
    }

    /// Remove only the listed chunk indices for a record
    pub async fn remove_chunks(
        &self,
        record_id: &RecordId,
        chunk_indices: &[u32],
    ) -> Result<(), StoreError> {
        if chunk_indices.is_empty() {
            return Ok(());
        }

        self.request(StoreRequest::Clear {
            record_id: record_id.to_string(),
            chunk_indices: Some(chunk_indices.to_vec()),
        })
        .await?;
        Ok(())
    }
}

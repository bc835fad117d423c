//! Store worker: owns the SQLite connection on a dedicated thread.
//!
//! The worker answers one request at a time. Until `init` succeeds every
//! other request is rejected with a not-ready fault.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::protocol::{
    EncodedChunk, Envelope, FaultKind, RequestType, StoreRequest, StoreResponse, StoreResult,
};

/// Where the worker keeps its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// SQLite database file
    File(PathBuf),

    /// Process-local database (tests, ephemeral sessions)
    Memory,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    key TEXT PRIMARY KEY,
    chunk_index INTEGER NOT NULL,
    payload TEXT NOT NULL,
    stored_at TEXT NOT NULL
);
";

/// Composite key: "{record_id}-{chunk_index}"
pub fn chunk_key(record_id: &str, chunk_index: u32) -> String {
    format!("{}-{}", record_id, chunk_index)
}

/// Split a composite key back into `(record_id, chunk_index)`.
///
/// The index is the segment after the last '-', so record ids may contain
/// dashes themselves.
pub fn parse_chunk_key(key: &str) -> Option<(&str, u32)> {
    let (record_id, index) = key.rsplit_once('-')?;
    if record_id.is_empty() {
        return None;
    }
    let index = index.parse().ok()?;
    Some((record_id, index))
}

#[derive(Debug, Error)]
enum WorkerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection not open")]
    NotOpen,
}

type WorkerResult<T> = Result<T, WorkerError>;

pub(crate) struct StoreWorker {
    location: StoreLocation,
    conn: Option<Connection>,
}

impl StoreWorker {
    pub(crate) fn new(location: StoreLocation) -> Self {
        Self {
            location,
            conn: None,
        }
    }

    /// Serve requests until every sender is dropped
    pub(crate) fn run(mut self, mut rx: mpsc::Receiver<Envelope>) {
        debug!(location = ?self.location, "Store worker started");

        while let Some(envelope) = rx.blocking_recv() {
            let response = self.handle(envelope.request);
            // Caller may have given up waiting; nothing to do then
            let _ = envelope.reply.send(response);
        }

        debug!("Store worker stopped");
    }

    fn handle(&mut self, request: StoreRequest) -> StoreResponse {
        let request_type = request.request_type();

        if request_type != RequestType::Init && self.conn.is_none() {
            return StoreResponse::failure(request_type, FaultKind::NotReady, "store not ready");
        }

        let outcome = match request {
            StoreRequest::Init => self.init().map(|_| None),
            StoreRequest::Save {
                record_id,
                chunk_index,
                payload,
            } => self.save(&record_id, chunk_index, &payload).map(|_| None),
            StoreRequest::Get { record_id } => {
                self.get(&record_id).map(|c| Some(StoreResult::Chunks(c)))
            }
            StoreRequest::GetAllRecordIds => {
                self.record_ids().map(|ids| Some(StoreResult::RecordIds(ids)))
            }
            StoreRequest::Clear {
                record_id,
                chunk_indices,
            } => self
                .clear(&record_id, chunk_indices.as_deref())
                .map(|_| None),
        };

        match outcome {
            Ok(result) => StoreResponse::success(request_type, result),
            Err(e) => {
                error!(request = request_type.as_str(), error = %e, "Store request failed");
                StoreResponse::failure(request_type, FaultKind::Engine, e.to_string())
            }
        }
    }

    fn conn(&self) -> WorkerResult<&Connection> {
        self.conn.as_ref().ok_or(WorkerError::NotOpen)
    }

    fn init(&mut self) -> WorkerResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        let conn = match &self.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let conn = Connection::open(path)?;
                conn.execute_batch("PRAGMA journal_mode=WAL;")?;
                conn
            }
            StoreLocation::Memory => Connection::open_in_memory()?,
        };

        conn.execute_batch(SCHEMA)?;
        info!(location = ?self.location, "Chunk store initialized");
        self.conn = Some(conn);
        Ok(())
    }

    fn save(&self, record_id: &str, chunk_index: u32, payload: &str) -> WorkerResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO chunks (key, chunk_index, payload, stored_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                chunk_key(record_id, chunk_index),
                chunk_index,
                payload,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Chunks for one record, ordered by their recorded index
    fn get(&self, record_id: &str) -> WorkerResult<Vec<EncodedChunk>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key, chunk_index, payload FROM chunks ORDER BY chunk_index, rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            let (key, chunk_index, data) = row?;
            if matches!(parse_chunk_key(&key), Some((id, _)) if id == record_id) {
                chunks.push(EncodedChunk { chunk_index, data });
            }
        }
        Ok(chunks)
    }

    /// Distinct record ids, in first-stored order
    fn record_ids(&self) -> WorkerResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM chunks ORDER BY rowid")?;
        let keys = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for key in keys {
            let key = key?;
            if let Some((id, _)) = parse_chunk_key(&key) {
                if seen.insert(id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Delete a record's chunks, restricted to `only` when given
    fn clear(&mut self, record_id: &str, only: Option<&[u32]>) -> WorkerResult<()> {
        let conn = self.conn.as_mut().ok_or(WorkerError::NotOpen)?;
        let tx = conn.transaction()?;

        let keys: Vec<String> = {
            let mut stmt = tx.prepare("SELECT key FROM chunks")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut keys = Vec::new();
            for key in rows {
                let key = key?;
                let selected = match parse_chunk_key(&key) {
                    Some((id, index)) if id == record_id => {
                        only.map_or(true, |indices| indices.contains(&index))
                    }
                    _ => false,
                };
                if selected {
                    keys.push(key);
                }
            }
            keys
        };

        for key in &keys {
            tx.execute("DELETE FROM chunks WHERE key = ?1", params![key])?;
        }
        tx.commit()?;

        debug!(record_id, removed = keys.len(), "Cleared stored chunks");
        Ok(())
    }
}

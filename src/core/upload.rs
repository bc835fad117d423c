//! Upload pipeline: per-record in-flight uploads with bounded retry.
//!
//! `submit` is fire-and-forget: when online it spawns an upload task and
//! files it under the record; when offline the payload goes to the durable
//! local store instead. `finalize` awaits one record's tasks in passes,
//! resubmitting failures with the exact same path and bytes. Attempts are
//! counted per chunk, so a chunk submitted while a record is finalizing gets
//! the full retry budget.
//!
//! Task bookkeeping is owned by the pipeline instance, so independent
//! pipelines (e.g. in tests) never share state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ChunkUploader, UploadOutcome};
use crate::domain::{Chunk, PathScheme, RecordId};
use crate::store::{LocalStore, StoreError};

use super::connectivity::ConnectivitySource;
use super::notice::{Notifier, SyncNotice};
use super::retry::RetryPolicy;

/// Errors from the upload pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

/// Where a submitted chunk went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRoute {
    /// Upload task started
    Uploading,
    /// Persisted in the local store for a later flush
    StoredLocally,
}

/// An in-flight attempt to upload one chunk.
///
/// Owns the chunk and its destination path so a retry reuses the exact bytes.
struct UploadTask {
    chunk: Chunk,
    path: String,
    /// 1-based attempt this handle represents
    attempt: u32,
    handle: JoinHandle<anyhow::Result<UploadOutcome>>,
}

/// An upload that did not succeed within the retry budget
#[derive(Debug, Clone)]
pub struct FailedUpload {
    pub chunk: Chunk,
    pub path: String,
    pub error: String,
}

/// Result of finalizing one record
#[derive(Debug, Clone, Default)]
pub struct FinalizeReport {
    /// Chunk indices confirmed uploaded
    pub uploaded: Vec<u32>,

    /// Uploads that exhausted every attempt
    pub failed: Vec<FailedUpload>,

    /// Chunk indices moved to the local store because connectivity dropped
    pub deferred: Vec<u32>,

    /// Number of await passes run
    pub passes: u32,
}

impl FinalizeReport {
    /// Every chunk either uploaded or safely stored
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of flushing a record's stored chunks
#[derive(Debug, Clone, Default)]
pub struct FlushReport {
    /// Chunks read back from the store
    pub stored: usize,

    /// Finalize outcome for those chunks
    pub finalize: FinalizeReport,

    /// Chunks left in the store for a later sync (failed or deferred)
    pub restored: usize,
}

/// Per-engine upload pipeline
pub struct UploadPipeline {
    uploader: Arc<dyn ChunkUploader>,
    store: LocalStore,
    connectivity: Arc<dyn ConnectivitySource>,
    scheme: PathScheme,
    retry: RetryPolicy,
    notifier: Notifier,

    /// record id -> outstanding upload tasks
    tasks: Mutex<HashMap<RecordId, Vec<UploadTask>>>,
}

impl UploadPipeline {
    pub fn new(
        uploader: Arc<dyn ChunkUploader>,
        store: LocalStore,
        connectivity: Arc<dyn ConnectivitySource>,
        scheme: PathScheme,
        retry: RetryPolicy,
        notifier: Notifier,
    ) -> Self {
        Self {
            uploader,
            store,
            connectivity,
            scheme,
            retry,
            notifier,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn scheme(&self) -> &PathScheme {
        &self.scheme
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Number of outstanding tasks for a record
    pub async fn pending(&self, record_id: &RecordId) -> usize {
        self.tasks
            .lock()
            .await
            .get(record_id)
            .map(|tasks| tasks.len())
            .unwrap_or(0)
    }

    /// Submit a chunk for upload (or local persistence when offline)
    pub async fn submit(&self, chunk: Chunk) -> Result<SubmitRoute, PipelineError> {
        if self.connectivity.is_online() {
            let path = self.scheme.path_for(&chunk.record_id, chunk.index);
            self.spawn_upload(chunk, path, 1).await;
            return Ok(SubmitRoute::Uploading);
        }

        self.persist(&chunk).await?;
        Ok(SubmitRoute::StoredLocally)
    }

    async fn persist(&self, chunk: &Chunk) -> Result<(), PipelineError> {
        if !self.store.is_ready() {
            error!(
                record_id = %chunk.record_id,
                chunk_index = chunk.index,
                "Local store is not ready; unable to save chunk"
            );
            return Err(StoreError::NotReady.into());
        }

        self.store
            .put(&chunk.record_id, chunk.index, &chunk.payload)
            .await?;
        debug!(record_id = %chunk.record_id, chunk_index = chunk.index, "Chunk stored offline");
        Ok(())
    }

    fn start_upload(&self, chunk: &Chunk, path: &str) -> JoinHandle<anyhow::Result<UploadOutcome>> {
        let uploader = Arc::clone(&self.uploader);
        let payload = Arc::clone(&chunk.payload);
        let key = chunk.idempotency_key();
        let path = path.to_string();

        tokio::spawn(async move { uploader.upload(&path, &payload, &key).await })
    }

    async fn spawn_upload(&self, chunk: Chunk, path: String, attempt: u32) {
        let handle = self.start_upload(&chunk, &path);
        let record_id = chunk.record_id.clone();
        debug!(
            %record_id,
            chunk_index = chunk.index,
            %path,
            attempt,
            terminal = chunk.is_terminal_marker(),
            "Upload started"
        );

        self.tasks
            .lock()
            .await
            .entry(record_id)
            .or_default()
            .push(UploadTask {
                chunk,
                path,
                attempt,
                handle,
            });
    }

    /// Await every outstanding upload for a record, retrying failures.
    ///
    /// Never fails: uploads still failing after the last pass are logged,
    /// reported, and written to the local store so a later resync can retry.
    pub async fn finalize(&self, record_id: &RecordId) -> FinalizeReport {
        let report = self.run_passes(record_id).await;

        for failed in &report.failed {
            if let Err(e) = self.persist(&failed.chunk).await {
                warn!(
                    %record_id,
                    chunk_index = failed.chunk.index,
                    error = %e,
                    "Could not keep failed chunk for a later sync"
                );
            }
        }

        report
    }

    #[instrument(skip(self, record_id), fields(record_id = %record_id))]
    async fn run_passes(&self, record_id: &RecordId) -> FinalizeReport {
        let mut report = FinalizeReport::default();

        loop {
            // Tasks submitted while we await land in a fresh list and are
            // picked up by the next pass.
            let tasks = self
                .tasks
                .lock()
                .await
                .remove(record_id)
                .unwrap_or_default();

            if tasks.is_empty() {
                break;
            }

            report.passes += 1;

            let mut failures = Vec::new();
            for task in tasks {
                let attempt = task.attempt;
                let error = match task.handle.await {
                    Ok(Ok(outcome)) if outcome.is_ok() => {
                        report.uploaded.push(task.chunk.index);
                        continue;
                    }
                    Ok(Ok(outcome)) => {
                        let message = outcome.error.unwrap_or_default();
                        warn!(path = %task.path, attempt, error = %message, "Upload rejected");
                        message
                    }
                    Ok(Err(e)) => {
                        warn!(path = %task.path, attempt, error = %e, "Upload failed");
                        e.to_string()
                    }
                    Err(e) => {
                        warn!(path = %task.path, attempt, error = %e, "Upload task aborted");
                        e.to_string()
                    }
                };
                failures.push((
                    FailedUpload {
                        chunk: task.chunk,
                        path: task.path,
                        error,
                    },
                    attempt,
                ));
            }

            let mut retries = Vec::new();
            let mut wait = Duration::ZERO;
            for (failed, attempt) in failures {
                match self.retry.backoff(attempt) {
                    Some(delay) => {
                        wait = wait.max(delay);
                        retries.push((failed, attempt + 1));
                    }
                    None => {
                        error!(
                            path = %failed.path,
                            attempt,
                            "Upload failed after all retry attempts"
                        );
                        report.failed.push(failed);
                    }
                }
            }

            if retries.is_empty() {
                continue;
            }

            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }

            for (failed, attempt) in retries {
                if self.connectivity.is_online() {
                    self.spawn_upload(failed.chunk, failed.path, attempt).await;
                } else {
                    match self.persist(&failed.chunk).await {
                        Ok(()) => report.deferred.push(failed.chunk.index),
                        Err(e) => {
                            warn!(chunk_index = failed.chunk.index, error = %e, "Could not defer chunk");
                            report.failed.push(failed);
                        }
                    }
                }
            }
        }

        if !report.failed.is_empty() {
            self.notifier.notify(SyncNotice::UploadsExhausted {
                record_id: record_id.clone(),
                failed: report.failed.len(),
            });
        }

        info!(
            uploaded = report.uploaded.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            passes = report.passes,
            "Finalize complete"
        );
        report
    }

    /// Push a record's stored chunks through the pipeline.
    ///
    /// Paths are rebuilt from each chunk's recorded index. Only the stored
    /// chunks that uploaded are removed afterwards, so chunks written while
    /// the flush runs stay in the store. Chunks that still fail after every
    /// retry are kept for the next sync.
    #[instrument(skip(self, record_id), fields(record_id = %record_id))]
    pub async fn flush_stored(&self, record_id: &RecordId) -> Result<FlushReport, PipelineError> {
        let stored = self.store.get_all(record_id).await?;
        let mut report = FlushReport {
            stored: stored.len(),
            ..Default::default()
        };

        let mut snapshot = Vec::with_capacity(stored.len());
        for entry in stored {
            snapshot.push(entry.chunk_index);
            let chunk = Chunk::new(record_id.clone(), entry.chunk_index, entry.payload);
            let path = self.scheme.path_for(record_id, chunk.index);
            self.spawn_upload(chunk, path, 1).await;
        }

        report.finalize = self.run_passes(record_id).await;

        let uploaded: Vec<u32> = snapshot
            .iter()
            .copied()
            .filter(|index| report.finalize.uploaded.contains(index))
            .collect();
        self.store.remove_chunks(record_id, &uploaded).await?;

        // Failures outside the snapshot were submitted live during the flush
        for failed in &report.finalize.failed {
            if !snapshot.contains(&failed.chunk.index) {
                self.persist(&failed.chunk).await?;
            }
        }
        report.restored = report.finalize.failed.len() + report.finalize.deferred.len();

        info!(
            stored = report.stored,
            uploaded = report.finalize.uploaded.len(),
            restored = report.restored,
            "Flushed stored chunks"
        );
        Ok(report)
    }
}

//! Sync engine: wires the pipeline, queue, local cache and connectivity
//! controller together and exposes record operations with offline fallback.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{ChunkUploader, RecordApi};
use crate::domain::{PathScheme, PendingMutation, Record, RecordFields, RecordId};
use crate::store::{KvStore, LocalStore};

use super::connectivity::{ConnectivityController, ConnectivitySource, ResyncReport};
use super::mutation_queue::{self, MutationQueue};
use super::notice::{Notifier, SyncNotice};
use super::reconcile::{drop_confirmed_shadows, status_for, RecordStatus, RecordView};
use super::records::LocalRecords;
use super::retry::RetryPolicy;
use super::session::CaptureSession;
use super::upload::UploadPipeline;

/// Label given to records started without one
pub const DEFAULT_LABEL: &str = "Untitled";

/// Collaborators and settings needed to build an engine
pub struct EngineParts {
    /// Durable chunk store (must be initialized before capture)
    pub store: LocalStore,

    /// Key-value state directory (queue and record cache)
    pub state: KvStore,

    pub uploader: Arc<dyn ChunkUploader>,
    pub api: Arc<dyn RecordApi>,
    pub connectivity: Arc<dyn ConnectivitySource>,
    pub scheme: PathScheme,
    pub retry: RetryPolicy,

    /// Quiet period after reconnecting before resync
    pub reconnect_debounce: Duration,
}

/// What the engine is doing right now, for row status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Activity {
    /// Record currently capturing
    pub recording: Option<RecordId>,

    /// Record whose uploads are being finalized
    pub uploading: Option<RecordId>,

    /// Client-created record the server has not confirmed yet
    pub pending_create: Option<RecordId>,
}

struct EngineInner {
    api: Arc<dyn RecordApi>,
    connectivity: Arc<dyn ConnectivitySource>,
    pipeline: Arc<UploadPipeline>,
    queue: Arc<MutationQueue>,
    records: LocalRecords,
    controller: Arc<ConnectivityController>,
    notifier: Notifier,
    view: Mutex<RecordView>,
    activity: watch::Sender<Activity>,
}

/// Offline-resilient capture-and-sync engine. Cloning shares the engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Build an engine and load its persisted queue
    pub async fn open(parts: EngineParts) -> Result<Self> {
        let notifier = Notifier::new();

        let queue = Arc::new(
            MutationQueue::open(parts.state.clone(), notifier.clone())
                .await
                .context("Failed to open mutation queue")?,
        );

        let pipeline = Arc::new(UploadPipeline::new(
            parts.uploader,
            parts.store,
            Arc::clone(&parts.connectivity),
            parts.scheme,
            parts.retry,
            notifier.clone(),
        ));

        let controller = Arc::new(
            ConnectivityController::new(
                Arc::clone(&parts.connectivity),
                Arc::clone(&queue),
                Arc::clone(&pipeline),
                Arc::clone(&parts.api),
                notifier.clone(),
            )
            .with_debounce(parts.reconnect_debounce),
        );

        let (activity, _) = watch::channel(Activity::default());

        debug!(pending = queue.pending_count(), "Sync engine opened");

        Ok(Self {
            inner: Arc::new(EngineInner {
                api: parts.api,
                connectivity: parts.connectivity,
                pipeline,
                queue,
                records: LocalRecords::new(parts.state),
                controller,
                notifier,
                view: Mutex::new(RecordView::new()),
                activity,
            }),
        })
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncNotice> {
        self.inner.notifier.subscribe()
    }

    pub fn pipeline(&self) -> &UploadPipeline {
        &self.inner.pipeline
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.inner.queue
    }

    pub fn records(&self) -> &LocalRecords {
        &self.inner.records
    }

    pub fn store(&self) -> &LocalStore {
        self.inner.pipeline.store()
    }

    pub fn activity(&self) -> Activity {
        self.inner.activity.borrow().clone()
    }

    pub(crate) fn set_recording(&self, id: Option<RecordId>) {
        self.inner.activity.send_modify(|a| a.recording = id);
    }

    pub(crate) fn set_uploading(&self, id: Option<RecordId>) {
        self.inner.activity.send_modify(|a| a.uploading = id);
    }

    /// Whether a record write may go straight to the remote.
    ///
    /// Writes queue behind older pending mutations (or a running drain) so
    /// the remote sees them in the order they were made.
    fn sends_directly(&self) -> bool {
        self.is_online()
            && self.inner.queue.pending_count() == 0
            && !self.inner.queue.is_processing()
    }

    /// Create a record locally, then remotely if possible.
    ///
    /// Falls back to the mutation queue when offline, when older mutations
    /// are still pending, or when the remote call fails.
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    pub async fn create_record(&self, record: Record) -> Result<RecordId> {
        let id = record.id.clone();
        self.inner
            .records
            .upsert(record.clone())
            .await
            .context("Failed to cache record")?;
        self.inner
            .activity
            .send_modify(|a| a.pending_create = Some(id.clone()));

        let mutation = PendingMutation::create(record);
        if self.sends_directly() {
            match mutation_queue::send(self.inner.api.as_ref(), &mutation).await {
                Ok(()) => {
                    info!("Record created");
                    return Ok(id);
                }
                Err(e) => warn!(error = %e, "Create failed; queueing"),
            }
        }

        self.inner
            .queue
            .enqueue(mutation)
            .await
            .context("Failed to queue create")?;
        Ok(id)
    }

    /// Apply a partial update locally, then remotely if possible
    #[instrument(skip(self, id, changes), fields(record_id = %id))]
    pub async fn update_record(&self, id: &RecordId, changes: RecordFields) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        self.inner
            .records
            .apply_fields(id, &changes)
            .await
            .context("Failed to update cached record")?;

        let mutation = PendingMutation::update(id.clone(), changes);
        if self.sends_directly() {
            match mutation_queue::send(self.inner.api.as_ref(), &mutation).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!(error = %e, "Update failed; queueing"),
            }
        }

        self.inner
            .queue
            .enqueue(mutation)
            .await
            .context("Failed to queue update")?;
        Ok(())
    }

    /// Delete a record.
    ///
    /// A direct delete that fails is returned and the local copy is kept.
    /// Offline, or behind pending mutations, the delete is queued. Either way
    /// a successful call drops the local copy.
    #[instrument(skip(self, id), fields(record_id = %id))]
    pub async fn delete_record(&self, id: &RecordId) -> Result<()> {
        let mutation = PendingMutation::delete(id.clone());
        if self.sends_directly() {
            mutation_queue::send(self.inner.api.as_ref(), &mutation)
                .await
                .with_context(|| format!("Failed to delete record {}", id))?;
        } else {
            self.inner
                .queue
                .enqueue(mutation)
                .await
                .context("Failed to queue delete")?;
        }

        self.inner
            .records
            .remove(id)
            .await
            .context("Failed to drop cached record")?;

        self.inner.activity.send_modify(|a| {
            if a.pending_create.as_ref() == Some(id) {
                a.pending_create = None;
            }
        });

        self.inner.view.lock().await.remove(id);
        Ok(())
    }

    /// Re-merge server and local records into the view.
    ///
    /// Offline (or when listing fails) the view is built from the local cache
    /// alone. The merged rows are written back to the cache.
    pub async fn refresh_view(&self) -> Result<RecordView> {
        let local = self
            .inner
            .records
            .load()
            .await
            .context("Failed to load cached records")?;

        let server = if self.is_online() {
            match self.inner.api.list_records().await {
                Ok(records) => Some(records),
                Err(e) => {
                    warn!(error = %e, "Failed to list remote records");
                    None
                }
            }
        } else {
            None
        };

        let mut activity = self.activity();
        let local = match &server {
            Some(server) => {
                let shadows = drop_confirmed_shadows(&local, server);
                if let Some(pending) = &activity.pending_create {
                    if server.iter().any(|r| &r.id == pending) {
                        debug!(record_id = %pending, "Create confirmed by remote");
                        activity.pending_create = None;
                        self.inner.activity.send_modify(|a| a.pending_create = None);
                    }
                }
                shadows
            }
            None => local,
        };
        let server = server.unwrap_or_default();

        let mut view = self.inner.view.lock().await;
        view.apply(&server, &local, activity.pending_create.as_ref());

        self.inner
            .records
            .save(view.rows())
            .await
            .context("Failed to save record cache")?;

        Ok(view.clone())
    }

    /// Current view without refreshing
    pub async fn view(&self) -> RecordView {
        self.inner.view.lock().await.clone()
    }

    /// Select a row by id
    pub async fn select(&self, id: &RecordId) -> bool {
        self.inner.view.lock().await.select(id)
    }

    /// Display status for a record given current activity
    pub fn status_of(&self, record: &Record) -> RecordStatus {
        let activity = self.activity();
        status_for(
            record,
            activity.recording.as_ref(),
            activity.uploading.as_ref(),
        )
    }

    /// One manual resync pass (queue drain, then stored chunk flush)
    pub async fn sync_now(&self) -> ResyncReport {
        self.inner.controller.resync().await
    }

    /// Start reacting to connectivity transitions in the background
    pub fn watch_connectivity(&self) -> JoinHandle<()> {
        Arc::clone(&self.inner.controller).spawn()
    }

    /// Begin capturing a new record
    pub async fn start_capture(&self, label: &str) -> Result<CaptureSession> {
        let label = match label.trim() {
            "" => DEFAULT_LABEL,
            trimmed => trimmed,
        };

        let cached = self
            .inner
            .records
            .load()
            .await
            .context("Failed to load cached records")?;
        let sequence_tag = cached
            .iter()
            .map(|r| r.sequence_tag)
            .max()
            .map_or(1, |tag| tag + 1);

        Ok(CaptureSession::new(self.clone(), Record::new(label, sequence_tag)))
    }

    /// Continue capturing into an existing record, numbering after its last chunk
    pub async fn start_addendum(&self, parent: &RecordId) -> Result<CaptureSession> {
        let cached = self
            .inner
            .records
            .get(parent)
            .await
            .context("Failed to load cached records")?;

        let record = match cached {
            Some(record) => record,
            None => self
                .view()
                .await
                .rows()
                .iter()
                .find(|r| &r.id == parent)
                .cloned()
                .with_context(|| format!("Unknown record {}", parent))?,
        };

        Ok(CaptureSession::addendum(self.clone(), record))
    }
}

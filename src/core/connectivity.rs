//! Connectivity tracking and reconnect resync.
//!
//! A [`ConnectivitySource`] publishes online/offline state through a watch
//! channel. The [`ConnectivityController`] listens for transitions and, after
//! coming back online, drains the mutation queue and flushes every record
//! that has chunks in the local store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::RecordApi;
use crate::domain::RecordId;
use crate::store::LocalStore;

use super::mutation_queue::MutationQueue;
use super::notice::{Notifier, SyncNotice};
use super::upload::UploadPipeline;

/// Anything that can report whether the remote is reachable
pub trait ConnectivitySource: Send + Sync {
    /// Current state
    fn is_online(&self) -> bool;

    /// Receiver that observes every state change
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity set explicitly by the host (or a test)
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    /// Update state; subscribers only wake on an actual change
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
    }
}

impl ConnectivitySource for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Outcome of one reconnect resync
#[derive(Debug, Clone, Default)]
pub struct ResyncReport {
    /// Mutations replayed (0 if the drain stopped at a failure)
    pub mutations_replayed: usize,

    /// Drain failure, if any; flushing still runs
    pub queue_error: Option<String>,

    /// Records whose stored chunks were flushed
    pub records_flushed: Vec<RecordId>,

    /// Chunks confirmed uploaded across all flushed records
    pub chunks_uploaded: usize,

    /// Chunks left in the store for the next resync
    pub chunks_restored: usize,
}

/// Reacts to connectivity transitions
pub struct ConnectivityController {
    source: Arc<dyn ConnectivitySource>,
    queue: Arc<MutationQueue>,
    pipeline: Arc<UploadPipeline>,
    store: LocalStore,
    api: Arc<dyn RecordApi>,
    notifier: Notifier,

    /// Quiet period after coming online before resyncing
    debounce: Duration,
}

impl ConnectivityController {
    pub fn new(
        source: Arc<dyn ConnectivitySource>,
        queue: Arc<MutationQueue>,
        pipeline: Arc<UploadPipeline>,
        api: Arc<dyn RecordApi>,
        notifier: Notifier,
    ) -> Self {
        let store = pipeline.store().clone();
        Self {
            source,
            queue,
            pipeline,
            store,
            api,
            notifier,
            debounce: Duration::from_millis(1000),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Drain queued mutations, then flush every record with stored chunks.
    ///
    /// A queue failure is reported but does not block chunk flushing.
    pub async fn resync(&self) -> ResyncReport {
        let mut report = ResyncReport::default();

        match self.queue.drain(self.api.as_ref()).await {
            Ok(count) => report.mutations_replayed = count,
            Err(e) => {
                warn!(error = %e, "Mutation replay stopped");
                report.queue_error = Some(e.to_string());
            }
        }

        if !self.store.is_ready() {
            warn!("Local store is not ready; skipping chunk flush");
            return report;
        }

        let record_ids = match self.store.list_record_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list stored records");
                return report;
            }
        };

        for record_id in record_ids {
            match self.pipeline.flush_stored(&record_id).await {
                Ok(flush) => {
                    let uploaded = flush.finalize.uploaded.len();
                    report.chunks_uploaded += uploaded;
                    report.chunks_restored += flush.restored;
                    self.notifier.notify(SyncNotice::ChunksFlushed {
                        record_id: record_id.clone(),
                        uploaded,
                    });
                    report.records_flushed.push(record_id);
                }
                Err(e) => warn!(%record_id, error = %e, "Failed to flush stored chunks"),
            }
        }

        info!(
            replayed = report.mutations_replayed,
            flushed = report.records_flushed.len(),
            uploaded = report.chunks_uploaded,
            "Resync complete"
        );
        report
    }

    /// React to one observed state
    pub async fn handle_transition(&self, online: bool) -> Option<ResyncReport> {
        if !online {
            info!("Connection lost");
            self.notifier.notify(SyncNotice::Offline);
            return None;
        }

        info!("Connection restored");
        self.notifier.notify(SyncNotice::Online);

        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }

        // Flapped back offline during the quiet period
        if !self.source.is_online() {
            debug!("Went offline before resync started");
            return None;
        }

        Some(self.resync().await)
    }

    /// Watch for transitions until the source is dropped
    pub async fn run(self: Arc<Self>) {
        let mut rx = self.source.subscribe();
        let _ = rx.borrow_and_update();

        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            self.handle_transition(online).await;
        }

        debug!("Connectivity source closed");
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

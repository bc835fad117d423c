//! User-facing sync notifications.
//!
//! Nothing in the engine is fatal to the host; failures surface as notices
//! that a UI (or the CLI) can show, while the data stays queued.

use tokio::sync::broadcast;

use crate::domain::{MutationKind, RecordId};

const NOTICE_CAPACITY: usize = 256;

/// A notification emitted by the sync engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// Connection restored
    Online,

    /// Connection lost; changes will sync later
    Offline,

    /// The mutation queue replayed completely
    QueueSynced { count: usize },

    /// Queue replay stopped at a failing mutation; the queue is intact
    SyncError { kind: MutationKind, message: String },

    /// Stored chunks for a record were pushed to the remote
    ChunksFlushed { record_id: RecordId, uploaded: usize },

    /// Uploads still failing after every retry pass
    UploadsExhausted { record_id: RecordId, failed: usize },
}

/// Broadcast handle for notices. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SyncNotice>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.tx.subscribe()
    }

    /// Publish a notice; having no subscribers is fine
    pub fn notify(&self, notice: SyncNotice) {
        let _ = self.tx.send(notice);
    }
}

//! Persisted FIFO queue of record mutations made while offline.
//!
//! The queue is one flat JSON array under a single key of the [`KvStore`].
//! Replay is all-or-nothing from the head: nothing is removed until every
//! replayed entry has succeeded, and the first failure stops the drain with
//! the whole queue left in place.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Context;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::adapters::RecordApi;
use crate::domain::{MutationKind, PendingMutation};
use crate::store::{KvError, KvStore};

use super::notice::{Notifier, SyncNotice};

/// Storage key of the persisted queue
pub const QUEUE_KEY: &str = "pending_mutations";

/// Errors that can occur with the mutation queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] KvError),

    #[error("Failed to sync {kind} at position {position}: {message}")]
    Replay {
        position: usize,
        kind: MutationKind,
        message: String,
    },
}

/// Apply one mutation to the remote, tagged with its idempotency key.
///
/// Used both for direct writes and for queue replay, so a mutation that
/// failed directly and was queued is replayed under the same key.
pub async fn send(api: &dyn RecordApi, mutation: &PendingMutation) -> anyhow::Result<()> {
    let key = mutation
        .idempotency_key()
        .context("Failed to derive idempotency key")?;

    match mutation {
        PendingMutation::Create(record) => {
            let remote_id = api.create_record(record, &key).await?;
            if remote_id != record.id {
                warn!(record_id = %record.id, %remote_id, "Remote assigned a different id");
            }
        }
        PendingMutation::Update(update) => {
            api.update_record(&update.id, &update.fields, &key).await?;
        }
        PendingMutation::Delete(target) => api.delete_record(&target.id, &key).await?,
    }

    Ok(())
}

/// Ordered, persisted log of pending mutations
pub struct MutationQueue {
    kv: KvStore,
    notifier: Notifier,

    /// Serializes read-modify-write of the persisted array
    write_lock: Mutex<()>,

    /// Serializes drains
    drain_lock: Mutex<()>,

    pending: AtomicUsize,
    processing: AtomicBool,
}

impl MutationQueue {
    /// Open the queue and load its pending count
    pub async fn open(kv: KvStore, notifier: Notifier) -> Result<Self, QueueError> {
        let queue = Self {
            kv,
            notifier,
            write_lock: Mutex::new(()),
            drain_lock: Mutex::new(()),
            pending: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
        };

        let loaded = queue.load().await?;
        queue.pending.store(loaded.len(), Ordering::SeqCst);
        Ok(queue)
    }

    /// All pending mutations, oldest first
    pub async fn load(&self) -> Result<Vec<PendingMutation>, QueueError> {
        Ok(self
            .kv
            .get_json::<Vec<PendingMutation>>(QUEUE_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Number of pending mutations as of the last write
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether a drain is running
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Append a mutation to the tail
    pub async fn enqueue(&self, mutation: PendingMutation) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().await;

        let mut queue = self.load().await?;
        debug!(
            kind = %mutation.kind(),
            record_id = %mutation.record_id(),
            position = queue.len(),
            "Mutation queued"
        );
        queue.push(mutation);
        self.kv.set_json(QUEUE_KEY, &queue).await?;
        self.pending.store(queue.len(), Ordering::SeqCst);

        Ok(())
    }

    /// Replay every pending mutation in order.
    ///
    /// Returns the number replayed. On the first failure, stops and leaves the
    /// queue untouched. Entries enqueued while the drain runs are kept.
    #[instrument(skip(self, api))]
    pub async fn drain(&self, api: &dyn RecordApi) -> Result<usize, QueueError> {
        let _drain = self.drain_lock.lock().await;

        let snapshot = {
            let _guard = self.write_lock.lock().await;
            self.load().await?
        };

        if snapshot.is_empty() {
            return Ok(0);
        }

        self.processing.store(true, Ordering::SeqCst);
        let result = self.replay(api, &snapshot).await;
        self.processing.store(false, Ordering::SeqCst);

        if let Err(e) = result {
            if let QueueError::Replay { kind, message, .. } = &e {
                self.notifier.notify(SyncNotice::SyncError {
                    kind: *kind,
                    message: message.clone(),
                });
            }
            return Err(e);
        }

        let replayed = snapshot.len();
        {
            let _guard = self.write_lock.lock().await;
            let mut current = self.load().await?;
            current.drain(..replayed.min(current.len()));

            if current.is_empty() {
                self.kv.remove(QUEUE_KEY).await?;
            } else {
                self.kv.set_json(QUEUE_KEY, &current).await?;
            }
            self.pending.store(current.len(), Ordering::SeqCst);
        }

        info!(count = replayed, "Mutation queue synced");
        self.notifier.notify(SyncNotice::QueueSynced { count: replayed });
        Ok(replayed)
    }

    async fn replay(
        &self,
        api: &dyn RecordApi,
        mutations: &[PendingMutation],
    ) -> Result<(), QueueError> {
        for (position, mutation) in mutations.iter().enumerate() {
            if let Err(e) = send(api, mutation).await {
                warn!(
                    position,
                    kind = %mutation.kind(),
                    record_id = %mutation.record_id(),
                    error = %e,
                    "Replay failed; queue kept intact"
                );
                return Err(QueueError::Replay {
                    position,
                    kind: mutation.kind(),
                    message: format!("{:#}", e),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Record, RecordFields, RecordId};
    use tempfile::TempDir;

    async fn queue() -> (MutationQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let kv = KvStore::open(dir.path()).await.unwrap();
        let queue = MutationQueue::open(kv, Notifier::new()).await.unwrap();
        (queue, dir)
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order() {
        let (queue, _dir) = queue().await;
        let record = Record::new("Visit", 1);
        let id = record.id.clone();

        queue.enqueue(PendingMutation::create(record)).await.unwrap();
        queue
            .enqueue(PendingMutation::update(id.clone(), RecordFields::label("Renamed")))
            .await
            .unwrap();
        queue.enqueue(PendingMutation::delete(id)).await.unwrap();

        let kinds: Vec<MutationKind> = queue.load().await.unwrap().iter().map(|m| m.kind()).collect();
        assert_eq!(
            kinds,
            vec![MutationKind::Create, MutationKind::Update, MutationKind::Delete]
        );
        assert_eq!(queue.pending_count(), 3);
    }

    #[tokio::test]
    async fn test_pending_count_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let kv = KvStore::open(dir.path()).await.unwrap();
            let queue = MutationQueue::open(kv, Notifier::new()).await.unwrap();
            queue
                .enqueue(PendingMutation::delete(RecordId::new("gone")))
                .await
                .unwrap();
        }

        let kv = KvStore::open(dir.path()).await.unwrap();
        let reopened = MutationQueue::open(kv, Notifier::new()).await.unwrap();
        assert_eq!(reopened.pending_count(), 1);
        assert!(!reopened.is_processing());
    }
}

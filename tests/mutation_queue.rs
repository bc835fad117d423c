//! Mutation Queue Integration Tests
//!
//! Tests for in-order replay, all-or-nothing draining and persistence of the
//! pending mutation list.

mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use common::MockRecordApi;
use fieldsync::adapters::RecordApi;
use fieldsync::core::{MutationQueue, Notifier, QueueError, SyncNotice, QUEUE_KEY};
use fieldsync::domain::{MutationKind, PendingMutation, Record, RecordFields, RecordId};
use fieldsync::store::KvStore;

async fn open_queue(dir: &TempDir) -> (MutationQueue, KvStore, Notifier) {
    let kv = KvStore::open(dir.path()).await.unwrap();
    let notifier = Notifier::new();
    let queue = MutationQueue::open(kv.clone(), notifier.clone()).await.unwrap();
    (queue, kv, notifier)
}

fn record(id: &str) -> Record {
    Record::new(id, 1).with_id(RecordId::new(id))
}

#[tokio::test]
async fn test_failed_create_blocks_dependent_update() {
    let dir = TempDir::new().unwrap();
    let (queue, _kv, notifier) = open_queue(&dir).await;
    let mut notices = notifier.subscribe();
    let api = MockRecordApi::new();
    let a = RecordId::new("A");

    queue
        .enqueue(PendingMutation::create(record("A")))
        .await
        .unwrap();
    queue
        .enqueue(PendingMutation::update(a.clone(), RecordFields::label("Renamed")))
        .await
        .unwrap();

    api.fail_on(MutationKind::Create, &a);
    let err = assert_err!(queue.drain(api.as_ref()).await);

    match err {
        QueueError::Replay { position, kind, .. } => {
            assert_eq!(position, 0);
            assert_eq!(kind, MutationKind::Create);
        }
        other => panic!("unexpected error: {}", other),
    }

    // The update was never attempted
    assert_eq!(api.calls(), vec!["create:A".to_string()]);

    let remaining = queue.load().await.unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].kind(), MutationKind::Create);
    assert_eq!(remaining[1].kind(), MutationKind::Update);
    assert_eq!(queue.pending_count(), 2);

    match notices.try_recv().unwrap() {
        SyncNotice::SyncError { kind, .. } => assert_eq!(kind, MutationKind::Create),
        other => panic!("unexpected notice: {:?}", other),
    }
}

#[tokio::test]
async fn test_full_replay_clears_queue() {
    let dir = TempDir::new().unwrap();
    let (queue, kv, notifier) = open_queue(&dir).await;
    let mut notices = notifier.subscribe();
    let api = MockRecordApi::new();
    let a = RecordId::new("A");

    queue
        .enqueue(PendingMutation::create(record("A")))
        .await
        .unwrap();
    queue
        .enqueue(PendingMutation::update(a.clone(), RecordFields::chunk_count(4)))
        .await
        .unwrap();

    let replayed = assert_ok!(queue.drain(api.as_ref()).await);
    assert_eq!(replayed, 2);
    assert_eq!(api.calls(), vec!["create:A", "update:A"]);
    assert_eq!(api.records()[0].chunk_count, 4);

    assert_eq!(queue.pending_count(), 0);
    assert!(queue.load().await.unwrap().is_empty());
    assert!(kv.get(QUEUE_KEY).await.unwrap().is_none());
    assert_eq!(notices.try_recv().unwrap(), SyncNotice::QueueSynced { count: 2 });
}

#[tokio::test]
async fn test_failure_midway_keeps_entire_queue() {
    let dir = TempDir::new().unwrap();
    let (queue, _kv, _notifier) = open_queue(&dir).await;
    let api = MockRecordApi::new();
    let a = RecordId::new("A");
    let b = RecordId::new("B");

    api.insert(record("B"));
    queue
        .enqueue(PendingMutation::create(record("A")))
        .await
        .unwrap();
    queue
        .enqueue(PendingMutation::update(a.clone(), RecordFields::paused(true)))
        .await
        .unwrap();
    queue
        .enqueue(PendingMutation::delete(b.clone()))
        .await
        .unwrap();

    api.fail_on(MutationKind::Delete, &b);
    let err = assert_err!(queue.drain(api.as_ref()).await);
    assert!(matches!(err, QueueError::Replay { position: 2, kind: MutationKind::Delete, .. }));
    assert_eq!(queue.load().await.unwrap().len(), 3);

    // Next attempt replays from the head again
    api.clear_failures();
    let replayed = queue.drain(api.as_ref()).await.unwrap();
    assert_eq!(replayed, 3);
    assert_eq!(
        api.calls(),
        vec!["create:A", "update:A", "delete:B", "create:A", "update:A", "delete:B"]
    );
    assert_eq!(queue.pending_count(), 0);

    // Each entry is resent under the key it carried the first time
    let keys = api.keys();
    assert_eq!(&keys[..3], &keys[3..]);
    assert!(keys[0].starts_with("create:A:"));
    assert!(keys[2].starts_with("delete:B:"));
}

#[tokio::test]
async fn test_queue_is_a_flat_json_array() {
    let dir = TempDir::new().unwrap();
    let (queue, kv, _notifier) = open_queue(&dir).await;

    queue
        .enqueue(PendingMutation::delete(RecordId::new("gone")))
        .await
        .unwrap();

    let raw = kv.get(QUEUE_KEY).await.unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        value,
        serde_json::json!([{ "type": "delete", "data": { "id": "gone" } }])
    );
}

#[tokio::test]
async fn test_drain_of_empty_queue() {
    let dir = TempDir::new().unwrap();
    let (queue, _kv, _notifier) = open_queue(&dir).await;
    let api = MockRecordApi::new();

    assert_eq!(queue.drain(api.as_ref()).await.unwrap(), 0);
    assert!(api.calls().is_empty());
}

/// Record API that enqueues another mutation while a drain is replaying
struct EnqueuesDuringReplay {
    queue: Arc<MutationQueue>,
    inner: Arc<MockRecordApi>,
}

#[async_trait]
impl RecordApi for EnqueuesDuringReplay {
    async fn create_record(&self, record: &Record, idempotency_key: &str) -> Result<RecordId> {
        self.queue
            .enqueue(PendingMutation::delete(RecordId::new("late")))
            .await?;
        self.inner.create_record(record, idempotency_key).await
    }

    async fn update_record(
        &self,
        id: &RecordId,
        fields: &RecordFields,
        idempotency_key: &str,
    ) -> Result<()> {
        self.inner.update_record(id, fields, idempotency_key).await
    }

    async fn delete_record(&self, id: &RecordId, idempotency_key: &str) -> Result<()> {
        self.inner.delete_record(id, idempotency_key).await
    }

    async fn list_records(&self) -> Result<Vec<Record>> {
        self.inner.list_records().await
    }
}

#[tokio::test]
async fn test_entries_enqueued_during_drain_survive() {
    let dir = TempDir::new().unwrap();
    let kv = KvStore::open(dir.path()).await.unwrap();
    let queue = Arc::new(MutationQueue::open(kv, Notifier::new()).await.unwrap());
    let api = EnqueuesDuringReplay {
        queue: queue.clone(),
        inner: MockRecordApi::new(),
    };

    queue
        .enqueue(PendingMutation::create(record("A")))
        .await
        .unwrap();

    let replayed = queue.drain(&api).await.unwrap();
    assert_eq!(replayed, 1);

    let remaining = queue.load().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind(), MutationKind::Delete);
    assert_eq!(remaining[0].record_id().as_str(), "late");
    assert_eq!(queue.pending_count(), 1);
}

//! Durable Local Store Integration Tests
//!
//! Exercises the worker-backed chunk store through its async client,
//! including persistence across reopening the database file.

use fieldsync::domain::RecordId;
use fieldsync::store::{LocalStore, StoreError, StoreLocation};
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_round_trip_is_byte_identical() {
    let store = LocalStore::open(StoreLocation::Memory).await.unwrap();
    let id = RecordId::new("9b2f6c1e-4a77-4d0e-9a0b-0f3c7e8d1a22");
    let payload: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 256) as u8).collect();

    assert_ok!(store.put(&id, 1, &payload).await);

    let chunks = store.get_all(&id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_index, 1);
    assert_eq!(chunks[0].payload, payload);
}

#[tokio::test]
async fn test_get_all_orders_by_chunk_index() {
    let store = LocalStore::open(StoreLocation::Memory).await.unwrap();
    let id = RecordId::new("rec");

    for index in [3u32, 1, 10, 2] {
        store
            .put(&id, index, format!("chunk-{}", index).as_bytes())
            .await
            .unwrap();
    }

    let chunks = store.get_all(&id).await.unwrap();
    let indices: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, vec![1, 2, 3, 10]);
    assert_eq!(chunks[3].payload, b"chunk-10".to_vec());
}

#[tokio::test]
async fn test_list_and_clear_records() {
    let store = LocalStore::open(StoreLocation::Memory).await.unwrap();
    let a = RecordId::new("rec-a");
    let b = RecordId::new("rec-b");

    store.put(&a, 1, b"a1").await.unwrap();
    store.put(&b, 1, b"b1").await.unwrap();
    store.put(&a, 2, b"a2").await.unwrap();

    let ids = store.list_record_ids().await.unwrap();
    assert_eq!(ids, vec![a.clone(), b.clone()]);

    store.clear(&a).await.unwrap();
    assert!(store.get_all(&a).await.unwrap().is_empty());
    assert_eq!(store.get_all(&b).await.unwrap().len(), 1);
    assert_eq!(store.list_record_ids().await.unwrap(), vec![b]);
}

#[tokio::test]
async fn test_not_ready_until_init() {
    let store = LocalStore::spawn(StoreLocation::Memory).unwrap();
    let id = RecordId::new("rec");

    let err = assert_err!(store.get_all(&id).await);
    assert!(matches!(err, StoreError::NotReady));
    let err = assert_err!(store.list_record_ids().await);
    assert!(matches!(err, StoreError::NotReady));

    assert_ok!(store.init().await);
    assert!(store.get_all(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chunks_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("chunks.sqlite3");
    let id = RecordId::new("rec");

    {
        let store = LocalStore::open(StoreLocation::File(db.clone())).await.unwrap();
        store.put(&id, 1, b"first").await.unwrap();
        store.put(&id, 2, b"").await.unwrap();
    }

    let reopened = LocalStore::open(StoreLocation::File(db)).await.unwrap();
    let chunks = reopened.get_all(&id).await.unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].payload, b"first".to_vec());
    assert!(chunks[1].payload.is_empty());
}

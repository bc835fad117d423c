//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use fieldsync::adapters::{ChunkUploader, RecordApi, UploadOutcome};
use fieldsync::core::{
    ConnectivitySource, EngineParts, ManualConnectivity, Notifier, RetryPolicy, SyncEngine,
    UploadPipeline,
};
use fieldsync::domain::{MutationKind, PathScheme, Record, RecordFields, RecordId};
use fieldsync::store::{KvStore, LocalStore, StoreLocation};

/// How an injected upload failure shows up
#[derive(Debug, Clone, Copy)]
pub enum FailureMode {
    /// The call succeeds but the result carries an error
    Rejected,
    /// The call itself errors
    Transport,
}

/// One recorded upload attempt
#[derive(Debug, Clone)]
pub struct UploadCall {
    pub path: String,
    pub payload: Vec<u8>,
    pub idempotency_key: String,
}

/// Scripted storage endpoint
#[derive(Default)]
pub struct MockUploader {
    calls: Mutex<Vec<UploadCall>>,

    /// path -> remaining failures (None = always fail)
    failures: Mutex<HashMap<String, (Option<u32>, FailureMode)>>,

    /// (path, 1-based attempt) -> gate the upload waits on
    holds: Mutex<HashMap<(String, usize), Arc<Semaphore>>>,
}

impl MockUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every upload to `path`
    pub fn fail_always(&self, path: &str, mode: FailureMode) {
        self.failures
            .lock()
            .unwrap()
            .insert(path.to_string(), (None, mode));
    }

    /// Fail the next `times` uploads to `path`
    pub fn fail_times(&self, path: &str, times: u32, mode: FailureMode) {
        self.failures
            .lock()
            .unwrap()
            .insert(path.to_string(), (Some(times), mode));
    }

    /// Block the given attempt at `path` until the returned gate gets a permit.
    ///
    /// The call is recorded before it blocks, so `attempts_for` sees it.
    pub fn hold(&self, path: &str, attempt: usize) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.holds
            .lock()
            .unwrap()
            .insert((path.to_string(), attempt), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<UploadCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path == path)
            .count()
    }

    /// Paths that were uploaded at least once, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.path.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ChunkUploader for MockUploader {
    async fn upload(
        &self,
        path: &str,
        payload: &[u8],
        idempotency_key: &str,
    ) -> Result<UploadOutcome> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(UploadCall {
                path: path.to_string(),
                payload: payload.to_vec(),
                idempotency_key: idempotency_key.to_string(),
            });
            calls.iter().filter(|c| c.path == path).count()
        };

        let gate = self
            .holds
            .lock()
            .unwrap()
            .get(&(path.to_string(), attempt))
            .cloned();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        let mode = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(path) {
                Some((None, mode)) => Some(*mode),
                Some((Some(remaining), mode)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*mode)
                }
                _ => None,
            }
        };

        match mode {
            None => Ok(UploadOutcome::ok()),
            Some(FailureMode::Rejected) => Ok(UploadOutcome::failed("object already exists")),
            Some(FailureMode::Transport) => anyhow::bail!("connection reset"),
        }
    }
}

/// In-memory system of record
#[derive(Default)]
pub struct MockRecordApi {
    records: Mutex<Vec<Record>>,
    calls: Mutex<Vec<String>>,
    keys: Mutex<Vec<String>>,
    failing: Mutex<HashSet<(MutationKind, RecordId)>>,
    fail_list: Mutex<bool>,
}

impl MockRecordApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the given operation on `id` fail until cleared
    pub fn fail_on(&self, kind: MutationKind, id: &RecordId) {
        self.failing.lock().unwrap().insert((kind, id.clone()));
    }

    pub fn clear_failures(&self) {
        self.failing.lock().unwrap().clear();
        *self.fail_list.lock().unwrap() = false;
    }

    pub fn fail_listing(&self) {
        *self.fail_list.lock().unwrap() = true;
    }

    /// Seed a server-side record
    pub fn insert(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }

    pub fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    /// Calls in order, as "kind:id"
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Idempotency keys in call order
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }

    fn check(&self, kind: MutationKind, id: &RecordId, key: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{}:{}", kind, id));
        self.keys.lock().unwrap().push(key.to_string());
        if self.failing.lock().unwrap().contains(&(kind, id.clone())) {
            anyhow::bail!("{} rejected for {}", kind, id);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordApi for MockRecordApi {
    async fn create_record(&self, record: &Record, idempotency_key: &str) -> Result<RecordId> {
        self.check(MutationKind::Create, &record.id, idempotency_key)?;
        self.records.lock().unwrap().push(record.clone());
        Ok(record.id.clone())
    }

    async fn update_record(
        &self,
        id: &RecordId,
        fields: &RecordFields,
        idempotency_key: &str,
    ) -> Result<()> {
        self.check(MutationKind::Update, id, idempotency_key)?;
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| &r.id == id) {
            Some(record) => {
                record.apply(fields);
                Ok(())
            }
            None => anyhow::bail!("record {} not found", id),
        }
    }

    async fn delete_record(&self, id: &RecordId, idempotency_key: &str) -> Result<()> {
        self.check(MutationKind::Delete, id, idempotency_key)?;
        self.records.lock().unwrap().retain(|r| &r.id != id);
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<Record>> {
        if *self.fail_list.lock().unwrap() {
            anyhow::bail!("listing unavailable");
        }
        Ok(self.records())
    }
}

pub const USER: &str = "user-1";

pub fn scheme() -> PathScheme {
    PathScheme::new(USER)
}

pub async fn memory_store() -> LocalStore {
    LocalStore::open(StoreLocation::Memory).await.unwrap()
}

/// Standalone pipeline over an in-memory store
pub struct PipelineHarness {
    pub pipeline: Arc<UploadPipeline>,
    pub store: LocalStore,
    pub uploader: Arc<MockUploader>,
    pub connectivity: Arc<ManualConnectivity>,
    pub notifier: Notifier,
}

pub async fn pipeline(online: bool) -> PipelineHarness {
    let store = memory_store().await;
    let uploader = MockUploader::new();
    let connectivity = Arc::new(ManualConnectivity::new(online));
    let notifier = Notifier::new();

    let source: Arc<dyn ConnectivitySource> = connectivity.clone();
    let pipeline = Arc::new(UploadPipeline::new(
        uploader.clone(),
        store.clone(),
        source,
        scheme(),
        RetryPolicy::immediate(3),
        notifier.clone(),
    ));

    PipelineHarness {
        pipeline,
        store,
        uploader,
        connectivity,
        notifier,
    }
}

/// Full engine over fakes
pub struct EngineHarness {
    pub engine: SyncEngine,
    pub uploader: Arc<MockUploader>,
    pub api: Arc<MockRecordApi>,
    pub connectivity: Arc<ManualConnectivity>,
    pub state_dir: TempDir,
}

pub async fn engine(online: bool) -> EngineHarness {
    let state_dir = TempDir::new().unwrap();
    let uploader = MockUploader::new();
    let api = MockRecordApi::new();
    let connectivity = Arc::new(ManualConnectivity::new(online));

    let engine = SyncEngine::open(EngineParts {
        store: memory_store().await,
        state: KvStore::open(state_dir.path()).await.unwrap(),
        uploader: uploader.clone(),
        api: api.clone(),
        connectivity: connectivity.clone(),
        scheme: scheme(),
        retry: RetryPolicy::immediate(3),
        reconnect_debounce: Duration::ZERO,
    })
    .await
    .unwrap();

    EngineHarness {
        engine,
        uploader,
        api,
        connectivity,
        state_dir,
    }
}

/// Poll until `check` passes or the timeout elapses
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

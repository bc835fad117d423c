//! Command-line interface for fieldsync.
//!
//! Provides commands for inspecting local sync state, running a resync
//! against the remote, watching connectivity, and feeding recorded chunk
//! files through a capture session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::adapters::{ChunkUploader, HttpProbe, HttpRemote, RecordApi, UploadOutcome};
use crate::config::{self, paths, ResolvedConfig};
use crate::core::{
    ConnectivitySource, EngineParts, ManualConnectivity, MutationQueue, Notifier, SyncEngine,
    SyncNotice,
};
use crate::domain::{PendingMutation, Record, RecordFields, RecordId};
use crate::store::{KvStore, LocalStore, StoreLocation};

pub mod capture;

/// fieldsync - Offline-resilient capture-and-sync engine
#[derive(Parser, Debug)]
#[command(name = "fieldsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show pending mutations and stored chunks
    Status,

    /// List pending mutations in replay order
    Queue,

    /// List chunks waiting in the local store
    Store {
        /// Only show this record
        #[arg(short, long)]
        record: Option<String>,

        /// Drop the record's stored chunks instead of listing them
        #[arg(long, requires = "record")]
        discard: bool,
    },

    /// Run one resync pass against the remote
    Sync,

    /// Watch connectivity and resync on reconnect (until Ctrl-C)
    Watch,

    /// Print the merged record view
    Records {
        /// Use only the local cache
        #[arg(long)]
        offline: bool,
    },

    /// Feed chunk files through a capture session
    Capture {
        #[command(flatten)]
        args: capture::CaptureArgs,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Status => show_status().await,
            Commands::Queue => list_queue().await,
            Commands::Store { record, discard } => match (record, discard) {
                (Some(record), true) => discard_stored(RecordId::new(record)).await,
                (record, _) => list_store(record).await,
            },
            Commands::Sync => sync_once().await,
            Commands::Watch => watch().await,
            Commands::Records { offline } => list_records(offline).await,
            Commands::Capture { args } => capture::run(args).await,
            Commands::Config => show_config(),
        }
    }
}

const NO_REMOTE: &str = "No remote configured (set FIELDSYNC_REMOTE_URL or remote.base_url)";

/// Open the durable chunk store under the configured home
pub(crate) async fn open_store() -> Result<LocalStore> {
    open_store_at(paths::chunk_store_db()?).await
}

async fn open_store_at(db: PathBuf) -> Result<LocalStore> {
    if let Some(parent) = db.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    LocalStore::open(StoreLocation::File(db))
        .await
        .context("Failed to open chunk store")
}

pub(crate) async fn open_state() -> Result<KvStore> {
    open_state_at(&paths::state_dir()?).await
}

async fn open_state_at(dir: &Path) -> Result<KvStore> {
    KvStore::open(dir)
        .await
        .context("Failed to open state directory")
}

/// Connectivity source for commands that talk to the remote
pub(crate) enum Connectivity {
    /// Probe the remote base URL
    Probe,
    /// Treat the remote as unreachable
    Offline,
}

/// Stand-in remote for offline commands run without a base URL
struct Unconfigured;

#[async_trait]
impl ChunkUploader for Unconfigured {
    async fn upload(&self, _path: &str, _payload: &[u8], _key: &str) -> Result<UploadOutcome> {
        anyhow::bail!(NO_REMOTE)
    }
}

#[async_trait]
impl RecordApi for Unconfigured {
    async fn create_record(&self, _record: &Record, _key: &str) -> Result<RecordId> {
        anyhow::bail!(NO_REMOTE)
    }

    async fn update_record(
        &self,
        _id: &RecordId,
        _fields: &RecordFields,
        _key: &str,
    ) -> Result<()> {
        anyhow::bail!(NO_REMOTE)
    }

    async fn delete_record(&self, _id: &RecordId, _key: &str) -> Result<()> {
        anyhow::bail!(NO_REMOTE)
    }

    async fn list_records(&self) -> Result<Vec<Record>> {
        anyhow::bail!(NO_REMOTE)
    }
}

/// Build an engine from the global configuration
pub(crate) async fn open_engine(
    connectivity: Connectivity,
) -> Result<(SyncEngine, Option<Arc<HttpProbe>>)> {
    open_engine_with(config::config()?, connectivity).await
}

/// Build an engine rooted at `cfg.home`.
///
/// Probing needs a remote. Offline commands work without one; their writes
/// stay in the local store and queue.
pub(crate) async fn open_engine_with(
    cfg: &ResolvedConfig,
    connectivity: Connectivity,
) -> Result<(SyncEngine, Option<Arc<HttpProbe>>)> {
    let remote_config = cfg.remote_config();

    let (source, probe): (Arc<dyn ConnectivitySource>, Option<Arc<HttpProbe>>) =
        match connectivity {
            Connectivity::Probe => {
                let base_url = remote_config
                    .as_ref()
                    .map(|rc| rc.base_url.clone())
                    .context(NO_REMOTE)?;
                let probe = Arc::new(HttpProbe::new(base_url, cfg.sync.probe_interval(), false));
                let online = probe.check().await;
                info!(online, "Initial connectivity");
                let source: Arc<dyn ConnectivitySource> = probe.clone();
                (source, Some(probe))
            }
            Connectivity::Offline => {
                let source: Arc<dyn ConnectivitySource> = Arc::new(ManualConnectivity::new(false));
                (source, None)
            }
        };

    let (uploader, api): (Arc<dyn ChunkUploader>, Arc<dyn RecordApi>) = match remote_config {
        Some(remote_config) => {
            let remote = Arc::new(HttpRemote::new(remote_config));
            (remote.clone(), remote)
        }
        None => {
            info!("No remote configured; working offline");
            let remote = Arc::new(Unconfigured);
            (remote.clone(), remote)
        }
    };

    let engine = SyncEngine::open(EngineParts {
        store: open_store_at(paths::chunk_store_db_in(&cfg.home)).await?,
        state: open_state_at(&paths::state_dir_in(&cfg.home)).await?,
        uploader,
        api,
        connectivity: source,
        scheme: cfg.path_scheme(),
        retry: cfg.upload.clone(),
        reconnect_debounce: cfg.sync.reconnect_debounce(),
    })
    .await?;

    Ok((engine, probe))
}

async fn show_status() -> Result<()> {
    let queue = MutationQueue::open(open_state().await?, Notifier::new()).await?;
    let store = open_store().await?;
    let record_ids = store.list_record_ids().await?;

    println!("Pending mutations: {}", queue.pending_count());
    println!("Records with stored chunks: {}", record_ids.len());
    for id in record_ids {
        let chunks = store.get_all(&id).await?;
        println!("  {} ({} chunks)", id, chunks.len());
    }

    Ok(())
}

async fn list_queue() -> Result<()> {
    let queue = MutationQueue::open(open_state().await?, Notifier::new()).await?;
    let pending = queue.load().await?;

    if pending.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    println!("{:<4} {:<8} {:<38} {}", "#", "KIND", "RECORD ID", "DETAIL");
    println!("{}", "-".repeat(75));

    for (position, mutation) in pending.iter().enumerate() {
        let detail = match mutation {
            PendingMutation::Create(record) => format!("\"{}\"", record.label),
            PendingMutation::Update(update) => serde_json::to_string(&update.fields)?,
            PendingMutation::Delete(_) => String::new(),
        };
        println!(
            "{:<4} {:<8} {:<38} {}",
            position,
            mutation.kind(),
            mutation.record_id(),
            detail
        );
    }

    Ok(())
}

async fn list_store(record: Option<String>) -> Result<()> {
    let store = open_store().await?;
    let record_ids = match record {
        Some(id) => vec![RecordId::new(id)],
        None => store.list_record_ids().await?,
    };

    if record_ids.is_empty() {
        println!("No stored chunks");
        return Ok(());
    }

    println!("{:<38} {:<8} {:>10}", "RECORD ID", "CHUNK", "BYTES");
    println!("{}", "-".repeat(58));

    for id in record_ids {
        for chunk in store.get_all(&id).await? {
            println!("{:<38} {:<8} {:>10}", id, chunk.chunk_index, chunk.payload.len());
        }
    }

    Ok(())
}

async fn discard_stored(id: RecordId) -> Result<()> {
    let store = open_store().await?;
    let count = store.get_all(&id).await?.len();
    store.clear(&id).await?;

    info!(record_id = %id, count, "Discarded stored chunks");
    println!("Discarded {} stored chunk(s) for {}", count, id);
    Ok(())
}

async fn sync_once() -> Result<()> {
    let (engine, _probe) = open_engine(Connectivity::Probe).await?;

    if !engine.is_online() {
        anyhow::bail!("Remote is unreachable; nothing synced");
    }

    let report = engine.sync_now().await;

    println!("Mutations replayed: {}", report.mutations_replayed);
    if let Some(error) = &report.queue_error {
        println!("Queue error:        {}", error);
    }
    println!("Records flushed:    {}", report.records_flushed.len());
    println!("Chunks uploaded:    {}", report.chunks_uploaded);
    if report.chunks_restored > 0 {
        println!("Chunks kept local:  {}", report.chunks_restored);
    }

    Ok(())
}

async fn watch() -> Result<()> {
    let (engine, probe) = open_engine(Connectivity::Probe).await?;
    let probe = probe.context("Watch requires the connectivity probe")?;

    let mut notices = engine.subscribe();
    let probe_task = probe.spawn();
    let controller_task = engine.watch_connectivity();

    if engine.is_online() {
        let report = engine.sync_now().await;
        info!(
            replayed = report.mutations_replayed,
            flushed = report.records_flushed.len(),
            "Startup sync complete"
        );
    }

    println!("Watching connectivity (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notices.recv() => match notice {
                Ok(notice) => print_notice(&notice),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    println!("({} notices skipped)", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    probe_task.abort();
    controller_task.abort();
    Ok(())
}

pub(crate) fn print_notice(notice: &SyncNotice) {
    match notice {
        SyncNotice::Online => println!("Online: syncing pending changes"),
        SyncNotice::Offline => println!("Offline: changes will sync when the connection returns"),
        SyncNotice::QueueSynced { count } => println!("Synced {} pending change(s)", count),
        SyncNotice::SyncError { kind, message } => {
            println!("Sync error while replaying {}: {} (will retry)", kind, message)
        }
        SyncNotice::ChunksFlushed {
            record_id,
            uploaded,
        } => println!("Uploaded {} stored chunk(s) for {}", uploaded, record_id),
        SyncNotice::UploadsExhausted { record_id, failed } => println!(
            "{} upload(s) for {} failed after retries; kept for next sync",
            failed, record_id
        ),
    }
}

async fn list_records(offline: bool) -> Result<()> {
    let connectivity = if offline {
        Connectivity::Offline
    } else {
        Connectivity::Probe
    };
    let (engine, _probe) = open_engine(connectivity).await?;
    let view = engine.refresh_view().await?;

    if view.rows().is_empty() {
        println!("No records");
        return Ok(());
    }

    println!(
        "{:<2} {:<38} {:<24} {:>6} {:<10} {}",
        "", "RECORD ID", "LABEL", "CHUNKS", "STATUS", "CREATED"
    );
    println!("{}", "-".repeat(100));

    for record in view.rows() {
        let marker = if view.selected_id() == Some(&record.id) {
            ">"
        } else {
            ""
        };
        println!(
            "{:<2} {:<38} {:<24} {:>6} {:<10} {}",
            marker,
            record.id,
            record.label,
            record.chunk_count,
            format!("{:?}", engine.status_of(record)),
            record.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg: &ResolvedConfig = config::config()?;

    println!("fieldsync configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:        {}", cfg.home.display());
    println!("  Chunk store: {}", paths::chunk_store_db()?.display());
    println!("  State:       {}", paths::state_dir()?.display());
    println!();
    println!("Remote:");
    println!(
        "  Base URL:  {}",
        cfg.remote.base_url.as_deref().unwrap_or("(not configured)")
    );
    println!("  Bucket:    {}", cfg.remote.bucket);
    println!("  User:      {}", cfg.remote.user_id);
    println!("  Extension: {}", cfg.remote.chunk_extension);
    println!(
        "  Token:     {}",
        if cfg.remote.token.is_some() { "(set)" } else { "(none)" }
    );
    println!();
    println!("Upload retry:");
    println!("  Max attempts:  {}", cfg.upload.max_attempts);
    println!("  Initial delay: {}ms", cfg.upload.initial_delay_ms);
    println!("  Max delay:     {}ms", cfg.upload.max_delay_ms);
    println!();
    println!("Sync:");
    println!("  Reconnect debounce: {}ms", cfg.sync.reconnect_debounce_ms);
    println!("  Probe interval:     {}s", cfg.sync.probe_interval_secs);

    Ok(())
}

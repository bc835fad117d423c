//! Core sync engine.
//!
//! This module contains:
//! - ChunkSequencer: chunk index assignment
//! - UploadPipeline: per-record uploads with bounded retry
//! - MutationQueue: persisted FIFO of offline record operations
//! - ConnectivityController: reconnect resync
//! - Reconciliation: merged record view and selection
//! - SyncEngine / CaptureSession: composition root and capture state machine

pub mod connectivity;
pub mod engine;
pub mod mutation_queue;
pub mod notice;
pub mod reconcile;
pub mod records;
pub mod retry;
pub mod sequencer;
pub mod session;
pub mod upload;

// Re-export commonly used types
pub use connectivity::{
    ConnectivityController, ConnectivitySource, ManualConnectivity, ResyncReport,
};
pub use engine::{Activity, EngineParts, SyncEngine, DEFAULT_LABEL};
pub use mutation_queue::{MutationQueue, QueueError, QUEUE_KEY};
pub use notice::{Notifier, SyncNotice};
pub use reconcile::{drop_confirmed_shadows, merge, status_for, RecordStatus, RecordView};
pub use records::{LocalRecords, RECORDS_KEY};
pub use retry::RetryPolicy;
pub use sequencer::ChunkSequencer;
pub use session::{CaptureSession, CaptureState, SessionError};
pub use upload::{
    FailedUpload, FinalizeReport, FlushReport, PipelineError, SubmitRoute, UploadPipeline,
};

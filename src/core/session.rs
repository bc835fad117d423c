//! Capture session state machine around one record.
//!
//! ```text
//! Idle -> Recording <-> Paused -> Stopped
//!             \__________________/
//! ```
//!
//! Chunk indices come from a [`ChunkSequencer`]; pausing and resuming keeps
//! numbering, a fresh start resets it.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::domain::{Chunk, Record, RecordFields, RecordId};

use super::engine::SyncEngine;
use super::sequencer::ChunkSequencer;
use super::upload::{FinalizeReport, PipelineError, SubmitRoute};

/// Errors from a capture session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: CaptureState,
        action: &'static str,
    },

    #[error("Chunk submission failed: {0}")]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Record(#[from] anyhow::Error),
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.pad(s)
    }
}

/// One recording (or addendum) of a record
pub struct CaptureSession {
    engine: SyncEngine,
    record: Record,
    sequencer: ChunkSequencer,
    state: CaptureState,

    /// Continuing an existing record
    addendum: bool,

    /// Create has been issued for this record
    created: bool,
}

impl CaptureSession {
    pub(crate) fn new(engine: SyncEngine, record: Record) -> Self {
        Self {
            engine,
            record,
            sequencer: ChunkSequencer::new(),
            state: CaptureState::Idle,
            addendum: false,
            created: false,
        }
    }

    pub(crate) fn addendum(engine: SyncEngine, parent: Record) -> Self {
        Self {
            engine,
            sequencer: ChunkSequencer::for_addendum(parent.chunk_count),
            record: parent,
            state: CaptureState::Idle,
            addendum: true,
            created: true,
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_id(&self) -> &RecordId {
        &self.record.id
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_addendum(&self) -> bool {
        self.addendum
    }

    /// Start recording, or resume when paused
    #[instrument(skip(self), fields(record_id = %self.record.id))]
    pub async fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            CaptureState::Idle => {
                self.sequencer.reset();

                if !self.created && self.record.chunk_count == 0 {
                    self.engine.create_record(self.record.clone()).await?;
                    self.created = true;
                }
                info!(addendum = self.addendum, "Capture started");
            }
            CaptureState::Paused => {
                debug!(next = self.sequencer.current() + 1, "Capture resumed");
            }
            state => {
                return Err(SessionError::InvalidTransition {
                    state,
                    action: "start",
                })
            }
        }

        self.engine
            .update_record(&self.record.id, RecordFields::paused(false))
            .await?;
        self.record.paused = Some(false);
        self.state = CaptureState::Recording;
        self.engine.set_recording(Some(self.record.id.clone()));
        Ok(())
    }

    /// Pause recording; numbering continues on resume
    pub async fn pause(&mut self) -> Result<(), SessionError> {
        if self.state != CaptureState::Recording {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "pause",
            });
        }

        self.engine
            .update_record(&self.record.id, RecordFields::paused(true))
            .await?;
        self.record.paused = Some(true);
        self.state = CaptureState::Paused;
        debug!(record_id = %self.record.id, "Capture paused");
        Ok(())
    }

    /// Submit the next captured chunk and return its index.
    ///
    /// Silence still takes an index and is sent as an empty payload.
    pub async fn push_chunk(
        &mut self,
        payload: Vec<u8>,
        sound_detected: bool,
    ) -> Result<u32, SessionError> {
        if self.state != CaptureState::Recording {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                action: "push a chunk",
            });
        }

        let payload = if sound_detected { payload } else { Vec::new() };
        self.submit(payload).await
    }

    async fn submit(&mut self, payload: Vec<u8>) -> Result<u32, SessionError> {
        let index = self.sequencer.next_index();
        let chunk = Chunk::new(self.record.id.clone(), index, payload);
        let route = self.engine.pipeline().submit(chunk).await?;

        debug!(
            record_id = %self.record.id,
            chunk_index = index,
            stored = route == SubmitRoute::StoredLocally,
            "Chunk submitted"
        );
        Ok(index)
    }

    /// Stop the session.
    ///
    /// Submits the terminal chunk (empty when paused or silent), commits the
    /// chunk count, and when online finalizes the record's uploads.
    #[instrument(skip(self, final_payload), fields(record_id = %self.record.id))]
    pub async fn stop(
        &mut self,
        final_payload: Option<Vec<u8>>,
        sound_detected: bool,
    ) -> Result<Option<FinalizeReport>, SessionError> {
        let paused = match self.state {
            CaptureState::Recording => false,
            CaptureState::Paused => true,
            state => {
                return Err(SessionError::InvalidTransition {
                    state,
                    action: "stop",
                })
            }
        };

        let payload = match final_payload {
            Some(bytes) if !paused && sound_detected => bytes,
            _ => Vec::new(),
        };
        self.submit(payload).await?;

        let chunk_count = self.sequencer.current();
        self.record.chunk_count = chunk_count;
        self.record.paused = Some(false);
        self.state = CaptureState::Stopped;
        self.engine.set_recording(None);

        self.engine
            .update_record(
                &self.record.id,
                RecordFields {
                    chunk_count: Some(chunk_count),
                    paused: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        info!(chunk_count, issued = self.sequencer.issued(), "Capture stopped");

        if !self.engine.is_online() {
            debug!("Offline; chunks stay in the local store until resync");
            return Ok(None);
        }

        self.engine.set_uploading(Some(self.record.id.clone()));
        let report = self.engine.pipeline().finalize(&self.record.id).await;
        self.engine.set_uploading(None);

        Ok(Some(report))
    }
}

//! Reconciliation of server-confirmed and locally-known records.
//!
//! Everything here is pure: no I/O, no suspension.

use std::collections::HashSet;

use crate::domain::{Record, RecordId};

/// Merge server and local records into one deduplicated view.
///
/// Server records are listed first, so when an id appears in both sources the
/// server copy wins. The result is sorted newest first.
pub fn merge(server: &[Record], local: &[Record]) -> Vec<Record> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Record> = server
        .iter()
        .chain(local.iter())
        .filter(|record| seen.insert(record.id.clone()))
        .cloned()
        .collect();

    // Stable, so equal timestamps keep server-first order
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    merged
}

/// Drop local copies whose id the server now knows.
///
/// Once the server lists a record the local shadow is redundant; keeping it
/// would show a duplicate after the create lands.
pub fn drop_confirmed_shadows(local: &[Record], server: &[Record]) -> Vec<Record> {
    let confirmed: HashSet<&RecordId> = server.iter().map(|r| &r.id).collect();
    local
        .iter()
        .filter(|r| !confirmed.contains(&r.id))
        .cloned()
        .collect()
}

/// Display state of one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// The record currently capturing
    Listening,
    /// Capture stopped; uploads are being finalized
    Uploading,
    /// Uploaded, waiting for the server's processing result
    Analyzing,
    /// Processing result available
    Ready,
}

/// Derive a row's status from the record and the engine's current activity
pub fn status_for(
    record: &Record,
    recording: Option<&RecordId>,
    uploading: Option<&RecordId>,
) -> RecordStatus {
    if recording == Some(&record.id) {
        RecordStatus::Listening
    } else if uploading == Some(&record.id) {
        RecordStatus::Uploading
    } else if !record.is_processed() {
        RecordStatus::Analyzing
    } else {
        RecordStatus::Ready
    }
}

/// Merged rows plus a selection that survives re-merges
#[derive(Debug, Clone, Default)]
pub struct RecordView {
    rows: Vec<Record>,
    selected: Option<RecordId>,
}

impl RecordView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn selected_id(&self) -> Option<&RecordId> {
        self.selected.as_ref()
    }

    pub fn selected(&self) -> Option<&Record> {
        let id = self.selected.as_ref()?;
        self.rows.iter().find(|r| &r.id == id)
    }

    /// Select a row by id; ignored if the id is not in the view
    pub fn select(&mut self, id: &RecordId) -> bool {
        if self.rows.iter().any(|r| &r.id == id) {
            self.selected = Some(id.clone());
            return true;
        }
        false
    }

    /// Drop a row; a removed selection moves to the newest row
    pub fn remove(&mut self, id: &RecordId) {
        self.rows.retain(|r| &r.id != id);
        if self.selected.as_ref() == Some(id) {
            self.selected = self.rows.first().map(|r| r.id.clone());
        }
    }

    /// Re-merge and re-resolve the selection by id.
    ///
    /// If the selected record vanished, falls back to `pending` (a client-side
    /// record that is still being created), then to the newest row.
    pub fn apply(&mut self, server: &[Record], local: &[Record], pending: Option<&RecordId>) {
        self.rows = merge(server, local);

        let contains = |id: &RecordId| self.rows.iter().any(|r| &r.id == id);

        let keep = self.selected.as_ref().filter(|id| contains(*id)).cloned();
        self.selected = keep
            .or_else(|| pending.filter(|id| contains(*id)).cloned())
            .or_else(|| self.rows.first().map(|r| r.id.clone()));
    }
}

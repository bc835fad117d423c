//! Local cache of records known on this device.
//!
//! Holds client-created records that the remote may not have yet, plus the
//! last merged view so the device keeps server copies while offline.

use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{Record, RecordFields, RecordId};
use crate::store::{KvError, KvStore};

/// Storage key of the cached records
pub const RECORDS_KEY: &str = "local_records";

pub struct LocalRecords {
    kv: KvStore,
    write_lock: Mutex<()>,
}

impl LocalRecords {
    pub fn new(kv: KvStore) -> Self {
        Self {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> Result<Vec<Record>, KvError> {
        Ok(self
            .kv
            .get_json::<Vec<Record>>(RECORDS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Replace the cached set
    pub async fn save(&self, records: &[Record]) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        self.kv.set_json(RECORDS_KEY, records).await
    }

    pub async fn get(&self, id: &RecordId) -> Result<Option<Record>, KvError> {
        Ok(self.load().await?.into_iter().find(|r| &r.id == id))
    }

    /// Insert a record, or replace the cached copy with the same id
    pub async fn upsert(&self, record: Record) -> Result<(), KvError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;

        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }

        self.kv.set_json(RECORDS_KEY, &records).await
    }

    /// Apply a partial update; returns the updated copy if the record is cached
    pub async fn apply_fields(
        &self,
        id: &RecordId,
        fields: &RecordFields,
    ) -> Result<Option<Record>, KvError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;

        let Some(record) = records.iter_mut().find(|r| &r.id == id) else {
            debug!(record_id = %id, "Update for uncached record");
            return Ok(None);
        };
        record.apply(fields);
        let updated = record.clone();

        self.kv.set_json(RECORDS_KEY, &records).await?;
        Ok(Some(updated))
    }

    /// Drop a record; returns whether it was cached
    pub async fn remove(&self, id: &RecordId) -> Result<bool, KvError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        let before = records.len();
        records.retain(|r| &r.id != id);

        if records.len() == before {
            return Ok(false);
        }

        self.kv.set_json(RECORDS_KEY, &records).await?;
        Ok(true)
    }
}

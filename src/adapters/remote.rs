//! HTTP adapter for the remote storage endpoint and record API.
//!
//! Token refresh is owned by the auth collaborator; this client only carries
//! the bearer token it was given.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Record, RecordFields, RecordId};

use super::{ChunkUploader, RecordApi, UploadOutcome};

/// Connection settings for the remote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL, e.g. "https://api.example.com"
    pub base_url: String,

    /// Storage bucket chunks are uploaded into
    pub bucket: String,

    /// Bearer token supplied by the auth collaborator
    pub token: String,
}

/// Response body of the create endpoint
#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: RecordId,
}

/// Error body returned by the storage endpoint
#[derive(Debug, Deserialize)]
struct StorageErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// reqwest-backed client
pub struct HttpRemote {
    config: RemoteConfig,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base(), self.config.bucket, path)
    }

    fn records_url(&self) -> String {
        format!("{}/api/records", self.base())
    }

    fn record_url(&self, id: &RecordId) -> String {
        format!("{}/api/records/{}", self.base(), id)
    }

    async fn ensure_success(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{} failed with {}: {}", action, status, body)
    }
}

#[async_trait]
impl ChunkUploader for HttpRemote {
    async fn upload(
        &self,
        path: &str,
        payload: &[u8],
        idempotency_key: &str,
    ) -> Result<UploadOutcome> {
        let response = self
            .client
            .post(self.storage_url(path))
            .bearer_auth(&self.config.token)
            .header("x-upsert", "false")
            .header("cache-control", "max-age=3600")
            .header("idempotency-key", idempotency_key)
            .body(payload.to_vec())
            .send()
            .await
            .with_context(|| format!("Failed to upload chunk to {}", path))?;

        let status = response.status();
        if status.is_success() {
            debug!(path, %status, "Chunk uploaded");
            return Ok(UploadOutcome::ok());
        }

        // Rejections are reported in the result so the pipeline can retry them
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<StorageErrorBody>(&body)
            .ok()
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_else(|| match status {
                StatusCode::CONFLICT => "object already exists".to_string(),
                _ => format!("upload rejected with {}", status),
            });

        Ok(UploadOutcome::failed(message))
    }
}

#[async_trait]
impl RecordApi for HttpRemote {
    async fn create_record(&self, record: &Record, idempotency_key: &str) -> Result<RecordId> {
        let response = self
            .client
            .post(self.records_url())
            .bearer_auth(&self.config.token)
            .header("idempotency-key", idempotency_key)
            .json(record)
            .send()
            .await
            .context("Failed to send create request")?;

        let created: CreatedRecord = Self::ensure_success(response, "Create record")
            .await?
            .json()
            .await
            .context("Failed to parse create response")?;

        Ok(created.id)
    }

    async fn update_record(
        &self,
        id: &RecordId,
        fields: &RecordFields,
        idempotency_key: &str,
    ) -> Result<()> {
        let response = self
            .client
            .patch(self.record_url(id))
            .bearer_auth(&self.config.token)
            .header("idempotency-key", idempotency_key)
            .json(fields)
            .send()
            .await
            .context("Failed to send update request")?;

        Self::ensure_success(response, "Update record").await?;
        Ok(())
    }

    async fn delete_record(&self, id: &RecordId, idempotency_key: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.record_url(id))
            .bearer_auth(&self.config.token)
            .header("idempotency-key", idempotency_key)
            .send()
            .await
            .context("Failed to send delete request")?;

        Self::ensure_success(response, "Delete record").await?;
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<Record>> {
        let response = self
            .client
            .get(self.records_url())
            .bearer_auth(&self.config.token)
            .send()
            .await
            .context("Failed to send list request")?;

        Self::ensure_success(response, "List records")
            .await?
            .json()
            .await
            .context("Failed to parse record list")
    }
}

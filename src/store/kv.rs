//! Flat key-value persistence for small JSON documents.
//!
//! Each key maps to `{dir}/{key}.json`. Writes go through a temp file in the
//! same directory and are renamed into place while holding an exclusive lock
//! on `{dir}/.lock`, so readers never observe a half-written document.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;

/// Errors from the key-value store
#[derive(Debug, Error)]
pub enum KvError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background write task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Directory-backed key-value store
#[derive(Debug, Clone)]
pub struct KvStore {
    dir: PathBuf,
}

impl KvStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, KvError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, KvError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(KvError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }

    /// Read the raw value for a key
    pub async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the value for a key
    pub async fn set(&self, key: &str, value: String) -> Result<(), KvError> {
        let path = self.path_for(key)?;
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || -> Result<(), KvError> {
            let lock = lock_dir(&dir)?;
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(value.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            FileExt::unlock(&lock)?;
            Ok(())
        })
        .await?
    }

    /// Remove a key (no-op if absent)
    pub async fn remove(&self, key: &str) -> Result<(), KvError> {
        let path = self.path_for(key)?;
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || -> Result<(), KvError> {
            let lock = lock_dir(&dir)?;
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            FileExt::unlock(&lock)?;
            Ok(())
        })
        .await?
    }

    /// Read and deserialize a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, KvError> {
        match self.get(key).await? {
            Some(content) if !content.trim().is_empty() => Ok(Some(serde_json::from_str(&content)?)),
            _ => Ok(None),
        }
    }

    /// Serialize and store a JSON value
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), KvError> {
        let content = serde_json::to_string(value)?;
        self.set(key, content).await
    }
}

fn lock_dir(dir: &Path) -> Result<File, KvError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(dir.join(".lock"))?;
    file.lock_exclusive()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_remove() {
        let temp = TempDir::new().unwrap();
        let kv = KvStore::open(temp.path()).await.unwrap();

        assert_eq!(kv.get("queue").await.unwrap(), None);

        kv.set("queue", "[1,2]".to_string()).await.unwrap();
        assert_eq!(kv.get("queue").await.unwrap(), Some("[1,2]".to_string()));

        kv.remove("queue").await.unwrap();
        assert_eq!(kv.get("queue").await.unwrap(), None);

        // Removing twice is fine
        kv.remove("queue").await.unwrap();
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let temp = TempDir::new().unwrap();
        let kv = KvStore::open(temp.path()).await.unwrap();

        kv.set_json("numbers", &vec![1u32, 2, 3]).await.unwrap();
        let numbers: Option<Vec<u32>> = kv.get_json("numbers").await.unwrap();
        assert_eq!(numbers, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let temp = TempDir::new().unwrap();
        let kv = KvStore::open(temp.path()).await.unwrap();

        assert!(matches!(
            kv.get("../escape").await,
            Err(KvError::InvalidKey(_))
        ));
    }
}

//! Configuration for fieldsync.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FIELDSYNC_HOME, FIELDSYNC_REMOTE_URL,
//!    FIELDSYNC_TOKEN, FIELDSYNC_USER_ID)
//! 2. Config file (.fieldsync/config.yaml)
//! 3. Defaults (~/.fieldsync)
//!
//! Config file discovery:
//! - Searches current directory and parents for .fieldsync/config.yaml
//! - `paths.home` in the config file is relative to the .fieldsync/ directory

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::RemoteConfig;
use crate::core::RetryPolicy;
use crate::domain::PathScheme;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".fieldsync";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub upload: Option<RetryPolicy>,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the .fieldsync/ directory)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteSection {
    pub base_url: Option<String>,
    pub bucket: Option<String>,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub chunk_extension: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncSection {
    pub reconnect_debounce_ms: Option<u64>,
    pub probe_interval_secs: Option<u64>,
}

/// Remote settings after defaults are applied
#[derive(Debug, Clone, Serialize)]
pub struct RemoteSettings {
    pub base_url: Option<String>,
    pub bucket: String,
    pub user_id: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub chunk_extension: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            bucket: "recordings".to_string(),
            user_id: "local".to_string(),
            token: None,
            chunk_extension: "wav".to_string(),
        }
    }
}

/// Connectivity settings after defaults are applied
#[derive(Debug, Clone, Serialize)]
pub struct SyncSettings {
    pub reconnect_debounce_ms: u64,
    pub probe_interval_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            reconnect_debounce_ms: 1000,
            probe_interval_secs: 10,
        }
    }
}

impl SyncSettings {
    pub fn reconnect_debounce(&self) -> Duration {
        Duration::from_millis(self.reconnect_debounce_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to fieldsync home (engine state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub remote: RemoteSettings,
    pub upload: RetryPolicy,
    pub sync: SyncSettings,
}

impl ResolvedConfig {
    /// Connection settings, if a remote is configured
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        let base_url = self.remote.base_url.clone()?;
        Some(RemoteConfig {
            base_url,
            bucket: self.remote.bucket.clone(),
            token: self.remote.token.clone().unwrap_or_default(),
        })
    }

    /// Upload path scheme for this user
    pub fn path_scheme(&self) -> PathScheme {
        PathScheme::new(self.remote.user_id.clone())
            .with_extension(self.remote.chunk_extension.clone())
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a parsed config file and environment lookups over the defaults
fn resolve(
    found: Option<(PathBuf, ConfigFile)>,
    default_home: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let (config_file, file) = match found {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let home = env("FIELDSYNC_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            file.as_ref()
                .and_then(|f| f.paths.home.as_deref())
                .map(|home| resolve_path(config_dir, home))
        })
        .unwrap_or(default_home);

    let section = file.as_ref().map(|f| f.remote.clone()).unwrap_or_default();
    let defaults = RemoteSettings::default();
    let remote = RemoteSettings {
        base_url: env("FIELDSYNC_REMOTE_URL").or(section.base_url),
        bucket: section.bucket.unwrap_or(defaults.bucket),
        user_id: env("FIELDSYNC_USER_ID")
            .or(section.user_id)
            .unwrap_or(defaults.user_id),
        token: env("FIELDSYNC_TOKEN").or(section.token),
        chunk_extension: section.chunk_extension.unwrap_or(defaults.chunk_extension),
    };

    let upload = file
        .as_ref()
        .and_then(|f| f.upload.clone())
        .unwrap_or_default();

    let sync_section = file.as_ref().map(|f| f.sync.clone()).unwrap_or_default();
    let sync_defaults = SyncSettings::default();
    let sync = SyncSettings {
        reconnect_debounce_ms: sync_section
            .reconnect_debounce_ms
            .unwrap_or(sync_defaults.reconnect_debounce_ms),
        probe_interval_secs: sync_section
            .probe_interval_secs
            .unwrap_or(sync_defaults.probe_interval_secs),
    };

    ResolvedConfig {
        home,
        config_file,
        remote,
        upload,
        sync,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let found = match find_config_file() {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    Ok(resolve(found, default_home, |key| std::env::var(key).ok()))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the fieldsync home directory (engine state).
pub fn fieldsync_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, PathBuf::from("/home/u/.fieldsync"), no_env);

        assert_eq!(config.home, PathBuf::from("/home/u/.fieldsync"));
        assert!(config.config_file.is_none());
        assert!(config.remote_config().is_none());
        assert_eq!(config.upload.max_attempts, 3);
        assert_eq!(config.sync.reconnect_debounce_ms, 1000);
        assert_eq!(config.path_scheme().extension, "wav");
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let config_dir = temp.path().join(".fieldsync");
        std::fs::create_dir_all(&config_dir).unwrap();

        let config_path = config_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
remote:
  base_url: https://api.example.com
  bucket: voice
  user_id: clinician-7
  chunk_extension: webm
upload:
  max_attempts: 5
sync:
  reconnect_debounce_ms: 250
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.version, "1.0");
        assert_eq!(parsed.paths.home, Some("./state".to_string()));

        let config = resolve(
            Some((config_path, parsed)),
            PathBuf::from("/unused"),
            no_env,
        );
        assert_eq!(config.home, config_dir.join("./state"));
        assert_eq!(config.upload.max_attempts, 5);
        assert_eq!(config.upload.initial_delay_ms, 500);
        assert_eq!(config.sync.reconnect_debounce_ms, 250);
        assert_eq!(config.sync.probe_interval_secs, 10);

        let remote = config.remote_config().unwrap();
        assert_eq!(remote.bucket, "voice");
        assert_eq!(
            config.path_scheme().path_for(&"r1".into(), 2),
            "clinician-7/r1-2.webm"
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str(
            r#"
version: "1.0"
remote:
  base_url: https://file.example.com
  user_id: from-file
"#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("FIELDSYNC_HOME", "/tmp/fs-home"),
            ("FIELDSYNC_REMOTE_URL", "https://env.example.com"),
            ("FIELDSYNC_USER_ID", "from-env"),
            ("FIELDSYNC_TOKEN", "secret"),
        ]
        .into_iter()
        .collect();

        let config = resolve(
            Some((PathBuf::from("/proj/.fieldsync/config.yaml"), file)),
            PathBuf::from("/unused"),
            |key| env.get(key).map(|v| v.to_string()),
        );

        assert_eq!(config.home, PathBuf::from("/tmp/fs-home"));
        assert_eq!(config.remote.user_id, "from-env");
        let remote = config.remote_config().unwrap();
        assert_eq!(remote.base_url, "https://env.example.com");
        assert_eq!(remote.token, "secret");
    }
}

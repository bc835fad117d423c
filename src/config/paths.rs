//! Canonical on-disk locations.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! | Location | Purpose |
//! |----------|---------|
//! | `$FIELDSYNC_HOME/chunks.sqlite3` | Durable chunk store |
//! | `$FIELDSYNC_HOME/state/` | Mutation queue and local record cache |

use std::path::{Path, PathBuf};

use anyhow::Result;

/// Get the fieldsync home directory (~/.fieldsync)
pub fn home() -> Result<PathBuf> {
    crate::config::fieldsync_home()
}

/// Get the chunk store database path
pub fn chunk_store_db() -> Result<PathBuf> {
    Ok(chunk_store_db_in(&home()?))
}

/// Get the key-value state directory
pub fn state_dir() -> Result<PathBuf> {
    Ok(state_dir_in(&home()?))
}

pub fn chunk_store_db_in(home: &Path) -> PathBuf {
    home.join("chunks.sqlite3")
}

pub fn state_dir_in(home: &Path) -> PathBuf {
    home.join("state")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_under_home() {
        let home = Path::new("/data/fieldsync");
        assert_eq!(
            chunk_store_db_in(home),
            PathBuf::from("/data/fieldsync/chunks.sqlite3")
        );
        assert_eq!(state_dir_in(home), PathBuf::from("/data/fieldsync/state"));
    }
}

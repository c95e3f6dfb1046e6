use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{KvStore, StoreError};

/// All keys in one file: `~/.cache/ecomind/store.bin`
///
/// Loaded on first access and rewritten in full on every `set`. The write
/// goes to a sibling temp file first and is renamed over the old one, so a
/// crash mid-write leaves the previous contents intact.
pub struct FileStore {
    path: Option<PathBuf>,
    entries: Mutex<Option<HashMap<String, String>>>,
}

fn store_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "ecomind").map(|d| d.cache_dir().join("store.bin"))
}

impl FileStore {
    pub fn new() -> Self {
        Self::with_path(store_path())
    }

    /// Store backed by `path`; `None` keeps everything in memory.
    pub fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            path,
            entries: Mutex::new(None),
        }
    }
}

async fn load(path: &Path) -> Result<HashMap<String, String>, StoreError> {
    let data = match tokio::fs::read(path).await {
        Ok(d) => d,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    match bitcode::deserialize(&data) {
        Ok(map) => Ok(map),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable store file, starting empty");
            Ok(HashMap::new())
        }
    }
}

async fn persist(path: &Path, entries: &HashMap<String, String>) -> Result<(), StoreError> {
    let data = bitcode::serialize(entries).map_err(|e| StoreError::Encode(e.to_string()))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("bin.tmp");
    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), keys = entries.len(), "store flushed");
    Ok(())
}

impl FileStore {
    async fn loaded(&self) -> Result<MutexGuard<'_, Option<HashMap<String, String>>>, StoreError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            let map = match &self.path {
                Some(p) => load(p).await?,
                None => HashMap::new(),
            };
            *guard = Some(map);
        }
        Ok(guard)
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.loaded().await?;
        Ok(guard.as_ref().and_then(|m| m.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut guard = self.loaded().await?;
        let Some(entries) = guard.as_mut() else {
            return Err(StoreError::Backend("store not loaded".to_string()));
        };

        let previous = entries.insert(key.to_string(), value);
        if let Some(path) = &self.path {
            if let Err(e) = persist(path, entries).await {
                // Keep memory in step with disk.
                match previous {
                    Some(old) => entries.insert(key.to_string(), old),
                    None => entries.remove(key),
                };
                return Err(e);
            }
        }
        Ok(())
    }
}

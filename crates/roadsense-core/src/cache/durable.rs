//! Durable tier backends.
//!
//! - [`FileStore`] keeps one JSON file per key in a cache directory
//! - [`MemoryStore`] keeps values in process memory (tests, ephemeral sessions)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::CacheError;

/// String key/value storage that survives process restarts.
///
/// Values are opaque strings (serialized cache entries). Implementations must
/// be safe to call from several tasks at once.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn save(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;

    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    async fn clear(&self) -> Result<(), CacheError> {
        for key in self.keys().await? {
            self.remove(&key).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Durable store writing `<dir>/<key>.json`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        // Readers never see a half-written entry
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(key) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                keys.push(key.to_string());
            }
        }
        debug!(dir = %self.dir.display(), count = keys.len(), "Listed durable cache keys");
        Ok(keys)
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// In-memory durable store. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.inner.write().await.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

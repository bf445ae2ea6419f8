//! Local data sources
//!
//! A [`Provider`] is the contract between a node and whatever holds
//! its data locally. The cluster core only ever asks three things of
//! it: does a key exist, which keys exist under a prefix, and
//! (re)materialize one key now. Update calls are serialized per node
//! and may be long-running; errors are surfaced to the caller but
//! never retried by the core.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::common::utils::normalize_key;
use crate::common::{Error, Result};

#[async_trait]
pub trait Provider: Send + Sync {
    /// Does the local data source currently hold `key`?
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// Keys under `prefix` (all keys when the prefix is empty or "/").
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Bring the local data for `key` up to date. Returning `Ok` means
    /// the data is now materialized and current.
    async fn update(&self, key: &str) -> Result<()>;
}

fn prefix_matches(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() || prefix == "/" {
        return true;
    }
    let prefix = normalize_key(prefix);
    key == prefix || key.starts_with(&format!("{}/", prefix))
}

/// Serves a directory tree: every regular file is a key, named by its
/// slash-normalized path relative to the root. The corpus is assumed
/// to be materialized out of band, so `update` just verifies presence.
pub struct DirProvider {
    root: PathBuf,
}

impl DirProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let key = normalize_key(key);
        self.root.join(key.trim_start_matches('/'))
    }
}

#[async_trait]
impl Provider for DirProvider {
    async fn has_key(&self, key: &str) -> Result<bool> {
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let rel = path
                        .strip_prefix(&self.root)
                        .map_err(|e| Error::Other(e.to_string()))?;
                    let key = normalize_key(&rel.to_string_lossy().replace('\\', "/"));
                    if prefix_matches(&key, prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn update(&self, key: &str) -> Result<()> {
        if self.has_key(key).await? {
            Ok(())
        } else {
            Err(Error::NotFound(normalize_key(key)))
        }
    }
}

/// In-memory key set, for demos and tests.
#[derive(Default)]
pub struct MemoryProvider {
    keys: Mutex<BTreeSet<String>>,
}

impl MemoryProvider {
    pub fn new(keys: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            keys: Mutex::new(
                keys.into_iter()
                    .map(|k| normalize_key(k.as_ref()))
                    .collect(),
            ),
        }
    }

    pub fn insert(&self, key: &str) {
        self.keys.lock().unwrap().insert(normalize_key(key));
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.keys.lock().unwrap().contains(&normalize_key(key)))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys
            .lock()
            .unwrap()
            .iter()
            .filter(|k| prefix_matches(k, prefix))
            .cloned()
            .collect())
    }

    async fn update(&self, key: &str) -> Result<()> {
        self.insert(key);
        Ok(())
    }
}

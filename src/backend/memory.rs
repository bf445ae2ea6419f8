//! In-memory coordination store
//!
//! Backs tests and single-process setups. Directory TTLs are enforced
//! lazily: every operation first drops expired directories together
//! with their whole subtree, which is what a leased directory expiry
//! does in the production store.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{project_suffixes, Backend, ChangeEvent, EventAction};
use crate::common::utils::slash;
use crate::common::{Error, Result};

struct Watcher {
    id: u64,
    /// Slash-normalized subtree root, no trailing slash.
    prefix: String,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Inner {
    /// Leaf values by slash-normalized path.
    entries: BTreeMap<String, String>,
    /// Explicitly created directories and their expiry deadline.
    dirs: BTreeMap<String, Option<Instant>>,
    watchers: Vec<Watcher>,
    next_watcher_id: u64,
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    /// Drop directories whose lease lapsed, along with everything
    /// beneath them.
    fn prune_expired(&mut self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .dirs
            .iter()
            .filter(|(_, deadline)| matches!(deadline, Some(d) if *d <= now))
            .map(|(path, _)| path.clone())
            .collect();

        for dir in expired {
            let subtree = format!("{}/", dir);
            self.dirs
                .retain(|d, _| d != &dir && !d.starts_with(&subtree));
            let removed: Vec<String> = self
                .entries
                .keys()
                .filter(|k| k.starts_with(&subtree))
                .cloned()
                .collect();
            for path in removed {
                self.entries.remove(&path);
                self.notify(EventAction::Delete, &path, None);
            }
        }
    }

    fn notify(&mut self, action: EventAction, path: &str, value: Option<&str>) {
        let mut dead = Vec::new();
        for w in &self.watchers {
            let matches = w.prefix == "/"
                || path == w.prefix
                || path.starts_with(&format!("{}/", w.prefix));
            if !matches {
                continue;
            }
            let event = ChangeEvent {
                action,
                path: path.to_string(),
                value: value.map(str::to_string),
            };
            if w.tx.send(event).is_err() {
                dead.push(w.id);
            }
        }
        self.watchers.retain(|w| !dead.contains(&w.id));
    }

    fn child_suffixes(&self, path: &str) -> (BTreeSet<String>, BTreeSet<String>) {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let leaves = self
            .entries
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(str::to_string)
            .collect();
        let dirs = self
            .dirs
            .keys()
            .filter_map(|d| d.strip_prefix(&prefix))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        (leaves, dirs)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<String> {
        let path = slash(path);
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired();
        inner
            .entries
            .get(&path)
            .cloned()
            .ok_or(Error::NotFound(path))
    }

    async fn set(&self, path: &str, value: &str) -> Result<()> {
        let path = slash(path);
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired();
        inner.entries.insert(path.clone(), value.to_string());
        // Re-writes notify as well: the touch is the payload.
        inner.notify(EventAction::Set, &path, Some(value));
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = slash(path);
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired();
        if inner.entries.remove(&path).is_none() {
            return Err(Error::NotFound(path));
        }
        inner.notify(EventAction::Delete, &path, None);
        Ok(())
    }

    async fn set_dir(&self, path: &str, ttl_secs: u64) -> Result<()> {
        let path = slash(path);
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired();
        if inner.dirs.contains_key(&path) {
            return Err(Error::AlreadyExists(path));
        }
        let deadline = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
        inner.dirs.insert(path, deadline);
        Ok(())
    }

    async fn update_dir(&self, path: &str, ttl_secs: u64) -> Result<()> {
        let path = slash(path);
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired();
        match inner.dirs.get_mut(&path) {
            Some(deadline) => {
                *deadline =
                    (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
                Ok(())
            }
            None => Err(Error::NotFound(path)),
        }
    }

    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let path = slash(path);
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired();
        let (leaves, dirs) = inner.child_suffixes(&path);
        Ok(project_suffixes(&leaves, &dirs, recursive, false))
    }

    async fn list_keys(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let path = slash(path);
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired();
        let (leaves, dirs) = inner.child_suffixes(&path);
        Ok(project_suffixes(&leaves, &dirs, recursive, true))
    }

    async fn watch(
        &self,
        path: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        let prefix = slash(path);
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_watcher_id;
            inner.next_watcher_id += 1;
            inner.watchers.push(Watcher { id, prefix, tx });
            id
        };

        // Deregister the watcher on cancellation; dropping the sender
        // closes the caller's stream.
        let shared = self.inner.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            shared.lock().unwrap().watchers.retain(|w| w.id != id);
        });

        Ok(rx)
    }
}

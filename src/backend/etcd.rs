//! etcd-backed coordination store
//!
//! Maps the hierarchical directory model onto the flat etcd v3
//! keyspace. A directory is reified as a marker key with a trailing
//! slash (`<root>/nodes/<enc>/`); its lease carries the directory TTL.
//! Writes attach the nearest leased ancestor directory's lease, so a
//! membership expiry takes the node's `__keys` index down with it
//! while entries outside the leased subtree survive.

use async_trait::async_trait;
use etcd_client::{Client, EventType, GetOptions, PutOptions, WatchOptions};
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{project_suffixes, Backend, ChangeEvent, EventAction};
use crate::common::utils::slash;
use crate::common::{Error, Result};

#[derive(Clone)]
pub struct EtcdBackend {
    client: Client,
    /// Normalized root: leading slash, no trailing slash; empty when
    /// the configured root is "/".
    root: String,
}

fn normalize_root(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        slash(trimmed)
    }
}

impl EtcdBackend {
    /// Connect to etcd and root all paths under `root_prefix`.
    pub async fn connect(endpoints: &[String], root_prefix: &str) -> Result<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self::new(client, root_prefix))
    }

    /// Wrap an existing etcd client.
    pub fn new(client: Client, root_prefix: &str) -> Self {
        Self {
            client,
            root: normalize_root(root_prefix),
        }
    }

    fn full(&self, path: &str) -> String {
        format!("{}{}", self.root, slash(path))
    }

    fn dir_marker(&self, path: &str) -> String {
        format!("{}/", self.full(path))
    }

    /// Lease of the nearest ancestor directory marker, 0 when no
    /// leased ancestor exists.
    async fn ancestor_lease(&self, path: &str) -> Result<i64> {
        let p = slash(path);
        let mut segments: Vec<&str> = p.trim_matches('/').split('/').collect();
        segments.pop(); // the leaf itself is not a directory

        let mut client = self.client.clone();
        while !segments.is_empty() {
            let marker = format!("{}/{}/", self.root, segments.join("/"));
            let resp = client.get(marker, None).await?;
            if let Some(kv) = resp.kvs().first() {
                return Ok(kv.lease());
            }
            segments.pop();
        }
        Ok(0)
    }

    async fn read_suffixes(&self, path: &str) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let full = self.full(path);
        let prefix = if full.ends_with('/') {
            full
        } else {
            format!("{}/", full)
        };

        let mut client = self.client.clone();
        let resp = client
            .get(
                prefix.clone(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await?;

        let mut leaves = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for kv in resp.kvs() {
            let key = kv.key_str()?;
            let Some(suffix) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if suffix.is_empty() {
                continue;
            }
            match suffix.strip_suffix('/') {
                Some(dir) => {
                    dirs.insert(dir.to_string());
                }
                None => {
                    leaves.insert(suffix.to_string());
                }
            }
        }
        Ok((leaves, dirs))
    }
}

#[async_trait]
impl Backend for EtcdBackend {
    async fn get(&self, path: &str) -> Result<String> {
        let full = self.full(path);
        let mut client = self.client.clone();
        let resp = client.get(full.clone(), None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(kv.value_str()?.to_string()),
            None => Err(Error::NotFound(slash(path))),
        }
    }

    async fn set(&self, path: &str, value: &str) -> Result<()> {
        let lease = self.ancestor_lease(path).await?;
        let options = (lease != 0).then(|| PutOptions::new().with_lease(lease));
        let mut client = self.client.clone();
        client.put(self.full(path), value, options).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut client = self.client.clone();
        let resp = client.delete(self.full(path), None).await?;
        if resp.deleted() == 0 {
            return Err(Error::NotFound(slash(path)));
        }
        Ok(())
    }

    async fn set_dir(&self, path: &str, ttl_secs: u64) -> Result<()> {
        let marker = self.dir_marker(path);
        let mut client = self.client.clone();

        let existing = client.get(marker.clone(), None).await?;
        if !existing.kvs().is_empty() {
            return Err(Error::AlreadyExists(slash(path)));
        }

        let options = if ttl_secs > 0 {
            let lease = client.lease_grant(ttl_secs as i64, None).await?;
            Some(PutOptions::new().with_lease(lease.id()))
        } else {
            None
        };
        client.put(marker, "", options).await?;
        Ok(())
    }

    async fn update_dir(&self, path: &str, ttl_secs: u64) -> Result<()> {
        let marker = self.dir_marker(path);
        let mut client = self.client.clone();

        let resp = client.get(marker.clone(), None).await?;
        let Some(kv) = resp.kvs().first() else {
            return Err(Error::NotFound(slash(path)));
        };

        let lease = kv.lease();
        if lease != 0 {
            let (mut keeper, mut stream) = client.lease_keep_alive(lease).await?;
            keeper.keep_alive().await?;
            match stream.message().await? {
                Some(resp) if resp.ttl() > 0 => Ok(()),
                // The lease lapsed between our read and the refresh.
                _ => Err(Error::NotFound(slash(path))),
            }
        } else if ttl_secs > 0 {
            let grant = client.lease_grant(ttl_secs as i64, None).await?;
            client
                .put(marker, "", Some(PutOptions::new().with_lease(grant.id())))
                .await?;
            Ok(())
        } else {
            Ok(())
        }
    }

    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let (leaves, dirs) = self.read_suffixes(path).await?;
        Ok(project_suffixes(&leaves, &dirs, recursive, false))
    }

    async fn list_keys(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let (leaves, dirs) = self.read_suffixes(path).await?;
        Ok(project_suffixes(&leaves, &dirs, recursive, true))
    }

    async fn watch(
        &self,
        path: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        let prefix = format!("{}/", self.full(path));
        let root = self.root.clone();

        let mut client = self.client.clone();
        let (mut watcher, mut stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = watcher.cancel().await;
                        break;
                    }
                    msg = stream.message() => {
                        let resp = match msg {
                            Ok(Some(resp)) => resp,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!("etcd watch stream error: {}", e);
                                break;
                            }
                        };
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let Ok(key) = kv.key_str() else { continue };
                            if key.ends_with('/') {
                                continue; // directory markers are not entries
                            }
                            let rel = key.strip_prefix(root.as_str()).unwrap_or(key);
                            let (action, value) = match event.event_type() {
                                EventType::Put => (
                                    EventAction::Set,
                                    kv.value_str().ok().map(str::to_string),
                                ),
                                EventType::Delete => (EventAction::Delete, None),
                            };
                            let change = ChangeEvent {
                                action,
                                path: slash(rel),
                                value,
                            };
                            if tx.send(change).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

//! Coordination-store abstraction
//!
//! keymesh keeps all shared cluster state in a hierarchical key-value
//! store with TTL-leased directories and change watches. [`Backend`] is
//! the capability set the rest of the crate programs against; two
//! implementations exist: [`memory::MemoryBackend`] for tests and
//! [`etcd::EtcdBackend`] for production.

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::common::Result;

pub use etcd::EtcdBackend;
pub use memory::MemoryBackend;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    /// A value was created or (re-)written. Idempotent re-writes emit
    /// this too; a re-set of a registration marker is how a node is
    /// asked to refresh a key.
    Set,
    /// A value was removed, explicitly or by lease expiry.
    Delete,
}

/// One change observed under a watched subtree.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub action: EventAction,
    /// Slash-normalized path of the changed entry, relative to the
    /// backend root (the same form callers pass to [`Backend::set`]).
    pub path: String,
    pub value: Option<String>,
}

/// Capability set over the hierarchical coordination store.
///
/// Paths are accepted with or without a leading slash. Listing a
/// subtree that does not exist yields an empty sequence, not an error;
/// "not found" and "already exists" are distinguishable error kinds so
/// callers can recover (`set_dir` -> `update_dir` fallback, empty
/// listings).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read a single value. `NotFound` if the path has no value.
    async fn get(&self, path: &str) -> Result<String>;

    /// Write a single value, creating intermediate directories as
    /// needed.
    async fn set(&self, path: &str, value: &str) -> Result<()>;

    /// Remove a single value. `NotFound` if absent.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Create a directory with a TTL lease (`ttl_secs == 0` means no
    /// TTL). Fails with `AlreadyExists` when the directory is already
    /// present; the caller then refreshes with [`Backend::update_dir`].
    async fn set_dir(&self, path: &str, ttl_secs: u64) -> Result<()>;

    /// Refresh the TTL on an existing directory without touching its
    /// contents. `NotFound` if the directory is absent.
    async fn update_dir(&self, path: &str, ttl_secs: u64) -> Result<()>;

    /// List entries under `path` as suffixes relative to it. Both
    /// values and directories are returned; `recursive` descends the
    /// whole subtree, otherwise only immediate children are returned.
    async fn list(&self, path: &str, recursive: bool) -> Result<Vec<String>>;

    /// As [`Backend::list`], excluding directories.
    async fn list_keys(&self, path: &str, recursive: bool) -> Result<Vec<String>>;

    /// Watch the subtree rooted at `path`. Events arrive in store
    /// order until `cancel` fires, at which point the channel closes.
    async fn watch(
        &self,
        path: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>>;
}

/// Project raw leaf suffixes and known directory suffixes into a list
/// result. Directories implied by deeper leaves are synthesized so that
/// a recursive `list` shows every intermediate level, the way the
/// store's own recursive reads do.
pub(crate) fn project_suffixes(
    leaves: &BTreeSet<String>,
    dirs: &BTreeSet<String>,
    recursive: bool,
    keys_only: bool,
) -> Vec<String> {
    fn insert_ancestors(out: &mut BTreeSet<String>, suffix: &str) {
        let mut idx = 0;
        while let Some(pos) = suffix[idx..].find('/') {
            out.insert(suffix[..idx + pos].to_string());
            idx += pos + 1;
        }
    }

    let mut all_dirs: BTreeSet<String> = dirs.clone();
    for dir in dirs {
        insert_ancestors(&mut all_dirs, dir);
    }
    for leaf in leaves {
        insert_ancestors(&mut all_dirs, leaf);
    }

    let mut out = BTreeSet::new();
    if recursive {
        out.extend(leaves.iter().cloned());
        if !keys_only {
            out.extend(all_dirs);
        }
    } else {
        for leaf in leaves {
            if !leaf.contains('/') {
                out.insert(leaf.clone());
            }
        }
        if !keys_only {
            for dir in all_dirs {
                if let Some(first) = dir.split('/').next() {
                    if !first.is_empty() {
                        out.insert(first.to_string());
                    }
                }
            }
        }
    }
    out.into_iter().collect()
}

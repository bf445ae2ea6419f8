//! Bidirectional key<->node registry
//!
//! A registration (key, node) is reified as two empty marker entries,
//! one per index:
//!
//! ```text
//! data/<key>/__nodes/<node>   node holds key
//! nodes/<node>/__keys/<key>   key is assigned to node
//! ```
//!
//! The two indexes are written sequentially, data index first. Readers
//! must tolerate transiently seeing one but not the other; the node's
//! startup registration and the balancer restore the invariant.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::Backend;
use crate::common::utils::{decode_node, encode_node, normalize_key, slash};
use crate::common::Result;

const NODES_MARKER: &str = "__nodes";
const KEYS_MARKER: &str = "__keys";

/// Stateless handle over the registry layout. Carries only the shared
/// backend reference; cheap to clone.
#[derive(Clone)]
pub struct Registry {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    fn nodes_dir(key: &str) -> String {
        format!("data{}/{}", normalize_key(key), NODES_MARKER)
    }

    fn keys_dir(node: &str) -> String {
        format!("nodes/{}/{}", encode_node(node), KEYS_MARKER)
    }

    /// Record that `node` holds `key`, in both indexes. Idempotent;
    /// re-adding an existing registration re-sets the `__keys` marker,
    /// which is what asks the owning node to refresh the key.
    pub async fn add(&self, key: &str, node: &str) -> Result<()> {
        let key = normalize_key(key);
        self.backend
            .set(&format!("{}/{}", Self::nodes_dir(&key), encode_node(node)), "")
            .await?;
        self.backend
            .set(&format!("{}{}", Self::keys_dir(node), key), "")
            .await?;
        Ok(())
    }

    /// Remove the registration from both indexes. A marker that is
    /// already gone is logged and skipped; the other index is still
    /// cleaned up.
    pub async fn remove(&self, key: &str, node: &str) -> Result<()> {
        let key = normalize_key(key);
        for path in [
            format!("{}/{}", Self::nodes_dir(&key), encode_node(node)),
            format!("{}{}", Self::keys_dir(node), key),
        ] {
            match self.backend.delete(&path).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    tracing::debug!(%path, "registration marker already gone");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Keys assigned to `node`, with their leading slash restored.
    pub async fn keys_for_node(&self, node: &str) -> Result<Vec<String>> {
        let suffixes = self
            .backend
            .list_keys(&Self::keys_dir(node), true)
            .await?;
        Ok(suffixes.iter().map(|s| slash(s)).collect())
    }

    /// Nodes that hold `key`, decoded, in store order.
    pub async fn nodes_for_key(&self, key: &str) -> Result<Vec<String>> {
        let suffixes = self.backend.list_keys(&Self::nodes_dir(key), false).await?;
        suffixes.iter().map(|s| decode_node(s)).collect()
    }

    /// Snapshot of the whole key->nodes mapping, derived from one
    /// recursive read of the `data/` subtree. Keys whose `__nodes`
    /// directory is empty appear with no nodes.
    pub async fn key_map(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let entries = self.backend.list("data", true).await?;

        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for suffix in &entries {
            if let Some(key) = suffix.strip_suffix(&format!("/{}", NODES_MARKER)) {
                map.entry(slash(key)).or_default();
            } else if let Some((key, node)) =
                suffix.split_once(&format!("/{}/", NODES_MARKER))
            {
                map.entry(slash(key)).or_default().push(decode_node(node)?);
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{EventAction, MemoryBackend};
    use tokio_util::sync::CancellationToken;

    fn registry() -> Registry {
        Registry::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn test_add_populates_both_indexes() {
        let r = registry();
        r.add("/alice", "example.com:80").await.unwrap();

        assert_eq!(
            r.nodes_for_key("/alice").await.unwrap(),
            vec!["example.com:80"]
        );
        assert_eq!(
            r.keys_for_node("example.com:80").await.unwrap(),
            vec!["/alice"]
        );
    }

    #[tokio::test]
    async fn test_remove_clears_both_indexes() {
        let r = registry();
        r.add("/alice", "example.com:80").await.unwrap();
        r.remove("/alice", "example.com:80").await.unwrap();

        assert!(r.nodes_for_key("/alice").await.unwrap().is_empty());
        assert!(r.keys_for_node("example.com:80").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_fatal() {
        let r = registry();
        r.remove("/alice", "example.com:80").await.unwrap();
    }

    #[tokio::test]
    async fn test_add_is_idempotent_and_touches() {
        let backend = Arc::new(MemoryBackend::new());
        let r = Registry::new(backend.clone() as Arc<dyn Backend>);

        r.add("/alice", "example.com:80").await.unwrap();

        let cancel = CancellationToken::new();
        let mut rx = backend
            .watch("nodes/example.com%3A80/__keys", cancel.clone())
            .await
            .unwrap();

        // Second add succeeds and still fires a watch event.
        r.add("/alice", "example.com:80").await.unwrap();
        assert_eq!(
            r.nodes_for_key("/alice").await.unwrap(),
            vec!["example.com:80"]
        );

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.action, EventAction::Set);
        assert!(ev.path.ends_with("/__keys/alice"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_empty_results_are_empty_not_errors() {
        let r = registry();
        assert!(r.nodes_for_key("/ghost").await.unwrap().is_empty());
        assert!(r.keys_for_node("ghost:80").await.unwrap().is_empty());
        assert!(r.key_map().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_normalization_on_add() {
        let r = registry();
        r.add("alice", "example.com:80").await.unwrap();
        assert_eq!(
            r.nodes_for_key("/alice").await.unwrap(),
            vec!["example.com:80"]
        );
        assert_eq!(
            r.keys_for_node("example.com:80").await.unwrap(),
            vec!["/alice"]
        );
    }

    #[tokio::test]
    async fn test_key_map() {
        let backend = Arc::new(MemoryBackend::new());
        let r = Registry::new(backend.clone() as Arc<dyn Backend>);

        r.add("/alice", "a.example.com:80").await.unwrap();
        r.add("/alice", "b.example.com:80").await.unwrap();
        r.add("/github.com/x/y", "a.example.com:80").await.unwrap();
        // A key with an empty __nodes directory is an orphan, not an
        // absent key.
        backend.set_dir("data/orphan/__nodes", 0).await.unwrap();

        let map = r.key_map().await.unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(
            map["/alice"],
            vec!["a.example.com:80", "b.example.com:80"]
        );
        assert_eq!(map["/github.com/x/y"], vec!["a.example.com:80"]);
        assert!(map["/orphan"].is_empty());
    }
}

//! Consumer-side routing API
//!
//! A [`Client`] turns keys into live node authorities via the
//! registry, and hands out [`KeyedTransport`]s: HTTP round-trippers
//! that try each holder of a key in order, deregister the ones that
//! fail, and return the first success. Failover is how the cluster
//! self-heals from the read path.

use std::sync::Arc;

use crate::backend::Backend;
use crate::common::utils::{decode_node, normalize_key, slash};
use crate::common::{key_bucket, Error, Result};
use crate::registry::Registry;

pub struct Client {
    backend: Arc<dyn Backend>,
    registry: Registry,
    http: reqwest::Client,
}

impl Client {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            registry: Registry::new(backend.clone()),
            backend,
            http: reqwest::Client::new(),
        }
    }

    /// The registry this client routes against.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// All nodes currently in the cluster, in store order.
    pub async fn nodes_in_cluster(&self) -> Result<Vec<String>> {
        let entries = self.backend.list("nodes", false).await?;
        entries.iter().map(|e| decode_node(e)).collect()
    }

    /// Nodes that hold `key` according to the registry.
    pub async fn nodes_for_key(&self, key: &str) -> Result<Vec<String>> {
        self.registry.nodes_for_key(key).await
    }

    /// Ask the cluster to update `key`. An orphan key is first bucketed
    /// onto a cluster node; a held key has every holder's registration
    /// re-set, which triggers the watch-driven update on each node.
    /// Returns the nodes that were asked to update.
    pub async fn update(&self, key: &str) -> Result<Vec<String>> {
        let key = normalize_key(key);
        let nodes = self.registry.nodes_for_key(&key).await?;

        if nodes.is_empty() {
            let cluster = self.nodes_in_cluster().await?;
            if cluster.is_empty() {
                return Err(Error::NoNodesForKey(key));
            }
            let pick = cluster[key_bucket(&key, cluster.len())].clone();
            self.registry.add(&key, &pick).await?;
            return Ok(vec![pick]);
        }

        for node in &nodes {
            self.registry.add(&key, node).await?;
        }
        Ok(nodes)
    }

    /// A transport routing requests for `key` to its registered
    /// holders. `NoNodesForKey` when the key has none. An `underlying`
    /// HTTP client may be supplied to control timeouts and pooling.
    pub async fn transport_for_key(
        &self,
        key: &str,
        underlying: Option<reqwest::Client>,
    ) -> Result<KeyedTransport> {
        let key = normalize_key(key);
        let nodes = self.registry.nodes_for_key(&key).await?;
        if nodes.is_empty() {
            return Err(Error::NoNodesForKey(key));
        }
        Ok(self.keyed_transport(key, None, underlying))
    }

    /// A transport pinned to an explicit candidate list, bypassing
    /// resolution. The balancer uses this for per-node liveness checks.
    pub(crate) fn pinned_transport(
        &self,
        key: &str,
        nodes: Vec<String>,
        underlying: Option<reqwest::Client>,
    ) -> KeyedTransport {
        self.keyed_transport(normalize_key(key), Some(nodes), underlying)
    }

    fn keyed_transport(
        &self,
        key: String,
        pinned: Option<Vec<String>>,
        underlying: Option<reqwest::Client>,
    ) -> KeyedTransport {
        KeyedTransport {
            key,
            pinned,
            registry: self.registry.clone(),
            http: underlying.unwrap_or_else(|| self.http.clone()),
        }
    }
}

/// HTTP round-tripper bound to one key.
#[derive(Debug)]
pub struct KeyedTransport {
    key: String,
    /// When set, candidates are fixed; otherwise resolved per call.
    pinned: Option<Vec<String>>,
    registry: Registry,
    http: reqwest::Client,
}

impl KeyedTransport {
    /// Send `req` to the first candidate node that answers with a
    /// status in `[200, 399]`. Any other status or transport error
    /// deregisters that (key, node) binding and falls through to the
    /// next candidate; after the last one, the last error is returned.
    pub async fn round_trip(&self, req: reqwest::Request) -> Result<reqwest::Response> {
        let nodes = match &self.pinned {
            Some(nodes) => nodes.clone(),
            None => self.registry.nodes_for_key(&self.key).await?,
        };
        if nodes.is_empty() {
            return Err(Error::NoNodesForKey(self.key.clone()));
        }

        let mut last_err = None;
        for node in &nodes {
            let mut attempt = req
                .try_clone()
                .ok_or_else(|| Error::Other("request body cannot be retried".into()))?;
            set_authority(attempt.url_mut(), node)?;
            let url = attempt.url().clone();

            let err = match self.http.execute(attempt).await {
                Ok(resp) if resp.status().as_u16() >= 200 && resp.status().as_u16() < 400 => {
                    return Ok(resp);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    Error::Upstream {
                        status,
                        body: body.trim().to_string(),
                    }
                }
                Err(e) => Error::Transport(e),
            };

            tracing::warn!(
                key = %self.key, %node, %url, error = %err,
                "request failed, deregistering node from key"
            );
            self.registry.remove(&self.key, node).await?;
            last_err = Some(err);
        }

        Err(last_err.unwrap_or(Error::NoNodesForKey(self.key.clone())))
    }

    /// GET a key-relative path through the transport.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        // Placeholder authority; round_trip rewrites it per candidate.
        let url = format!("http://keymesh.invalid{}", slash(path));
        let req = self.http.get(&url).build()?;
        self.round_trip(req).await
    }
}

/// Point `url` at `node` ("host" or "host:port"), keeping scheme,
/// path, query, and fragment.
fn set_authority(url: &mut reqwest::Url, node: &str) -> Result<()> {
    let (host, port) = match node.rsplit_once(':') {
        Some((h, p)) => {
            let port = p
                .parse::<u16>()
                .map_err(|_| Error::Other(format!("bad port in node name {:?}", node)))?;
            (h, Some(port))
        }
        None => (node, None),
    };
    url.set_host(Some(host))
        .map_err(|e| Error::Other(format!("bad host in node name {:?}: {}", node, e)))?;
    url.set_port(port)
        .map_err(|_| Error::Other(format!("cannot set port for node {:?}", node)))?;
    Ok(())
}

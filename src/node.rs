//! Node lifecycle
//!
//! A node publishes one provider's keys to the cluster and reacts to
//! assignment changes. `start` joins the cluster and launches three
//! background tasks sharing one cancellation token:
//!
//! - lease refresher: re-leases the membership directory once per TTL
//! - registry watcher: runs `Provider::update` for every non-delete
//!   change under `nodes/<self>/__keys/`
//! - balancer: periodically registers orphan keys, probes registered
//!   holders for liveness, and age-refreshes a sample of local keys
//!
//! `stop` cancels the token and waits for all three to exit. The
//! membership lease is left to lapse on its own.

use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, EventAction};
use crate::client::Client;
use crate::common::utils::{clean_node_name, encode_node, slash};
use crate::common::{key_bucket, NodeConfig, Result};
use crate::provider::Provider;
use crate::registry::Registry;

pub struct Node {
    name: String,
    backend: Arc<dyn Backend>,
    registry: Registry,
    provider: Arc<dyn Provider>,
    config: NodeConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    /// Create a node advertising `name` ("host:port") to the cluster.
    /// The name must be reachable by the other clients and nodes; it
    /// is where this node's data is served.
    pub fn new(
        name: &str,
        backend: Arc<dyn Backend>,
        provider: Arc<dyn Provider>,
        config: NodeConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: clean_node_name(name)?,
            registry: Registry::new(backend.clone()),
            backend,
            provider,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// The advertised node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Join the cluster, register the provider's existing keys, and
    /// launch the background tasks. Call once.
    pub async fn start(&self) -> Result<()> {
        tracing::info!(node = %self.name, "starting node");

        refresh_membership(&self.backend, &self.name, self.config.membership_ttl_secs).await?;
        self.register_existing_keys().await?;

        // Subscribe before spawning so a watch failure surfaces here.
        let watch_prefix = format!("nodes/{}/__keys", encode_node(&self.name));
        let events = self
            .backend
            .watch(&watch_prefix, self.cancel.child_token())
            .await?;

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(self.spawn_lease_refresher());
        tasks.push(self.spawn_watcher(watch_prefix, events));
        tasks.push(self.spawn_balancer());
        Ok(())
    }

    /// Signal all background tasks and wait for them to exit. The
    /// membership lease is not removed; it expires on its own.
    pub async fn stop(&self) {
        tracing::info!(node = %self.name, "stopping node");
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Run one balancer cycle now, outside the periodic schedule.
    pub async fn balance(&self) -> Result<()> {
        run_balance(
            &self.name,
            &self.backend,
            &self.registry,
            &self.provider,
            &self.config,
        )
        .await
    }

    /// Register every key the provider already holds, so the node can
    /// serve its on-disk data the moment it joins.
    async fn register_existing_keys(&self) -> Result<()> {
        let keys = self.provider.keys("").await?;
        if keys.is_empty() {
            return Ok(());
        }

        tracing::info!(
            node = %self.name,
            count = keys.len(),
            "registering existing provider keys"
        );
        for key in &keys {
            self.registry.add(key, &self.name).await?;
        }
        Ok(())
    }

    fn spawn_lease_refresher(&self) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let name = self.name.clone();
        let ttl = self.config.membership_ttl_secs;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let period = Duration::from_secs(ttl);
            let mut tick =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = refresh_membership(&backend, &name, ttl).await {
                            tracing::warn!(node = %name, error = %e, "membership refresh failed");
                        }
                    }
                }
            }
        })
    }

    fn spawn_watcher(
        &self,
        watch_prefix: String,
        mut events: tokio::sync::mpsc::UnboundedReceiver<crate::backend::ChangeEvent>,
    ) -> JoinHandle<()> {
        let provider = self.provider.clone();
        let name = self.name.clone();
        let subtree = format!("{}/", slash(&watch_prefix));

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // A delete means the key was deregistered from this
                // node; nothing to materialize.
                if event.action == EventAction::Delete {
                    continue;
                }
                let Some(suffix) = event.path.strip_prefix(subtree.as_str()) else {
                    continue;
                };
                let key = slash(suffix);
                tracing::info!(node = %name, %key, "registry changed, updating key in data source");
                if let Err(e) = provider.update(&key).await {
                    tracing::warn!(node = %name, %key, error = %e, "provider update failed");
                }
            }
            tracing::debug!(node = %name, "registry watcher stopped");
        })
    }

    fn spawn_balancer(&self) -> JoinHandle<()> {
        let backend = self.backend.clone();
        let registry = self.registry.clone();
        let provider = self.provider.clone();
        let name = self.name.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let period = config.balance_interval();
            let mut tick =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) =
                            run_balance(&name, &backend, &registry, &provider, &config).await
                        {
                            tracing::warn!(node = %name, error = %e, "balance cycle failed, will retry next interval");
                        }
                    }
                }
            }
        })
    }
}

/// Re-lease the membership directory, creating it if needed.
async fn refresh_membership(backend: &Arc<dyn Backend>, name: &str, ttl_secs: u64) -> Result<()> {
    let path = format!("nodes/{}", encode_node(name));
    match backend.set_dir(&path, ttl_secs).await {
        Err(e) if e.is_already_exists() => backend.update_dir(&path, ttl_secs).await,
        other => other,
    }
}

/// One balancer cycle. Best-effort: every per-key failure is logged
/// and the cycle moves on.
async fn run_balance(
    name: &str,
    backend: &Arc<dyn Backend>,
    registry: &Registry,
    provider: &Arc<dyn Provider>,
    config: &NodeConfig,
) -> Result<()> {
    let key_map = registry.key_map().await?;
    if key_map.is_empty() {
        return Ok(());
    }

    let client = Client::new(backend.clone());
    let cluster = client.nodes_in_cluster().await?;

    let started = std::time::Instant::now();
    tracing::info!(
        node = %name,
        keys = key_map.len(),
        cluster = ?cluster,
        "balancer: starting cycle"
    );

    let mut actions = 0usize;
    for (key, holders) in &key_map {
        if holders.is_empty() {
            // Orphaned key: assign it to the node every agent agrees on.
            if cluster.is_empty() {
                continue;
            }
            let pick = &cluster[key_bucket(key, cluster.len())];
            tracing::info!(node = %name, %key, target = %pick, "balancer: registering orphan key");
            match registry.add(key, pick).await {
                Ok(()) => actions += 1,
                Err(e) => {
                    tracing::warn!(node = %name, %key, error = %e, "balancer: orphan registration failed");
                }
            }
            continue;
        }

        // Probe each holder; a failed probe deregisters the binding
        // through the transport.
        for holder in holders {
            let transport = client.pinned_transport(key, vec![holder.clone()], None);
            if let Err(e) = transport.get(key).await {
                actions += 1;
                tracing::warn!(
                    node = %name, %key, holder = %holder, error = %e,
                    "balancer: liveness check failed, key deregistered from holder"
                );
            }
        }

        // Refresh a sample of locally held keys to keep data from
        // aging out, without hammering the origin every cycle.
        let sampled = rand::thread_rng().gen_range(0..config.update_sample_inverse) == 0;
        if sampled && holders.iter().any(|h| h == name) {
            match provider.update(key).await {
                Ok(()) => actions += 1,
                Err(e) => {
                    tracing::warn!(node = %name, %key, error = %e, "balancer: local update failed");
                }
            }
        }
    }

    tracing::info!(
        node = %name,
        keys = key_map.len(),
        actions,
        elapsed = ?started.elapsed(),
        "balancer: cycle complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::provider::MemoryProvider;

    fn quick_config() -> NodeConfig {
        NodeConfig {
            membership_ttl_secs: 30,
            balance_interval_secs: 60,
            update_sample_inverse: 10,
        }
    }

    #[test]
    fn test_new_rejects_bad_name() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let provider = Arc::new(MemoryProvider::default());
        assert!(Node::new(":80", backend, provider, quick_config()).is_err());
    }

    #[test]
    fn test_new_strips_scheme() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let provider = Arc::new(MemoryProvider::default());
        let node = Node::new(
            "http://example.com:7070",
            backend,
            provider,
            quick_config(),
        )
        .unwrap();
        assert_eq!(node.name(), "example.com:7070");
    }

    #[tokio::test]
    async fn test_refresh_membership_falls_back_to_update() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        refresh_membership(&backend, "example.com:80", 30)
            .await
            .unwrap();
        // Second refresh finds the directory and refreshes it in place.
        refresh_membership(&backend, "example.com:80", 30)
            .await
            .unwrap();
        assert_eq!(backend.list("nodes", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_registers_and_stop_joins() {
        let backend = Arc::new(MemoryBackend::new());
        let provider = Arc::new(MemoryProvider::new(["/alice", "/bob"]));
        let node = Node::new(
            "example.com:7070",
            backend.clone() as Arc<dyn Backend>,
            provider,
            quick_config(),
        )
        .unwrap();

        node.start().await.unwrap();

        let registry = Registry::new(backend.clone() as Arc<dyn Backend>);
        assert_eq!(
            registry.keys_for_node("example.com:7070").await.unwrap(),
            vec!["/alice", "/bob"]
        );
        assert_eq!(
            registry.nodes_for_key("/alice").await.unwrap(),
            vec!["example.com:7070"]
        );
        assert_eq!(backend.list("nodes", false).await.unwrap().len(), 1);

        node.stop().await;
    }
}

//! Operator commands for cluster management

use crate::client::Client;
use crate::common::utils::slash;
use crate::common::Result;

/// One registration's observed health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Healthy,
    Unreachable,
}

/// Point-in-time view of the cluster's routing state.
#[derive(Debug, Default)]
pub struct StatusReport {
    pub nodes: usize,
    pub keys: usize,
    /// Keys with no registered holder.
    pub orphaned_keys: usize,
    pub healthy_bindings: usize,
    pub unreachable_bindings: usize,
}

/// Probe every registration once and report. Read-only: unlike the
/// balancer's liveness pass, a failed probe here deregisters nothing.
pub async fn cluster_status(client: &Client) -> Result<StatusReport> {
    let nodes = client.nodes_in_cluster().await?;
    let key_map = client.registry().key_map().await?;

    let http = reqwest::Client::new();
    let mut report = StatusReport {
        nodes: nodes.len(),
        keys: key_map.len(),
        ..Default::default()
    };

    for (key, holders) in &key_map {
        if holders.is_empty() {
            report.orphaned_keys += 1;
            continue;
        }
        for holder in holders {
            match probe_binding(&http, key, holder).await {
                BindingState::Healthy => report.healthy_bindings += 1,
                BindingState::Unreachable => {
                    tracing::warn!(%key, %holder, "status: binding unreachable");
                    report.unreachable_bindings += 1;
                }
            }
        }
    }

    Ok(report)
}

async fn probe_binding(http: &reqwest::Client, key: &str, holder: &str) -> BindingState {
    let url = format!("http://{}{}", holder, slash(key));
    match http.get(&url).send().await {
        Ok(resp) if resp.status().as_u16() < 400 => BindingState::Healthy,
        _ => BindingState::Unreachable,
    }
}

/// Remove every registration naming `node`, in both indexes. Used to
/// clear out a permanently dead node without waiting for balancer
/// cycles to probe each of its keys. Returns the evicted keys.
///
/// Both indexes are consulted: after a membership lease expires, the
/// node's own `__keys` index is gone and only the `data/` side still
/// names it.
pub async fn evict_node(client: &Client, node: &str) -> Result<Vec<String>> {
    let mut keys = client.registry().keys_for_node(node).await?;
    for (key, holders) in client.registry().key_map().await? {
        if holders.iter().any(|h| h == node) && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys.sort();

    for key in &keys {
        client.registry().remove(key, node).await?;
    }
    if !keys.is_empty() {
        tracing::info!(%node, count = keys.len(), "evicted node registrations");
    }
    Ok(keys)
}

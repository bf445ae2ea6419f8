//! Configuration for keymesh components

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default root prefix for all coordination-store paths.
pub const DEFAULT_ROOT_PREFIX: &str = "/datad/";

/// Node lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Cluster membership lease TTL in seconds. The lease is refreshed
    /// once per TTL; must be at least 1.
    #[serde(default = "default_membership_ttl")]
    pub membership_ttl_secs: u64,

    /// Interval between balancer cycles, in seconds.
    #[serde(default = "default_balance_interval")]
    pub balance_interval_secs: u64,

    /// The balancer refreshes each locally-held key with probability
    /// 1/N per cycle. Bounds load on upstream origins; must be at
    /// least 1.
    #[serde(default = "default_update_sample_inverse")]
    pub update_sample_inverse: u32,
}

fn default_membership_ttl() -> u64 {
    30
}
fn default_balance_interval() -> u64 {
    60
}
fn default_update_sample_inverse() -> u32 {
    10
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            membership_ttl_secs: default_membership_ttl(),
            balance_interval_secs: default_balance_interval(),
            update_sample_inverse: default_update_sample_inverse(),
        }
    }
}

impl NodeConfig {
    pub fn membership_ttl(&self) -> Duration {
        Duration::from_secs(self.membership_ttl_secs)
    }

    pub fn balance_interval(&self) -> Duration {
        Duration::from_secs(self.balance_interval_secs)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.membership_ttl_secs < 1 {
            return Err(crate::Error::InvalidConfig(
                "membership_ttl_secs must be at least 1".into(),
            ));
        }
        if self.update_sample_inverse < 1 {
            return Err(crate::Error::InvalidConfig(
                "update_sample_inverse must be at least 1".into(),
            ));
        }
        if self.balance_interval_secs == 0 {
            return Err(crate::Error::InvalidConfig(
                "balance_interval_secs must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

/// Daemon configuration for `keymesh-node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name ("host:port") advertised to the cluster. Must be reachable
    /// by other clients and nodes.
    pub name: String,

    /// Local bind address for the data server.
    pub bind_addr: SocketAddr,

    /// Optional bind address for the provider control surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_bind: Option<SocketAddr>,

    /// Directory tree served as this node's data.
    pub data_dir: PathBuf,

    /// etcd endpoints.
    #[serde(default = "default_etcd_endpoints")]
    pub etcd_endpoints: Vec<String>,

    /// Root prefix for all coordination-store paths.
    #[serde(default = "default_root_prefix")]
    pub root_prefix: String,

    /// Node lifecycle tunables.
    #[serde(default)]
    pub node: NodeConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_etcd_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}
fn default_root_prefix() -> String {
    DEFAULT_ROOT_PREFIX.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save to file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::Other(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.is_empty() {
            return Err(crate::Error::InvalidConfig("name is required".into()));
        }
        if self.etcd_endpoints.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "at least one etcd endpoint is required".into(),
            ));
        }
        if self.root_prefix.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "root_prefix is required".into(),
            ));
        }
        self.node.validate()
    }
}

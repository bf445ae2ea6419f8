//! CLI for cluster inspection and routing operations

use clap::{Parser, Subcommand};
use keymesh::common::DEFAULT_ROOT_PREFIX;
use keymesh::{Client, EtcdBackend};
use std::io::Write;
use std::sync::Arc;

/// CLI arguments for cluster management.
#[derive(Parser)]
#[command(name = "keymeshctl")]
#[command(about = "keymesh cluster CLI")]
#[command(version)]
struct Cli {
    /// etcd endpoint (repeatable)
    #[arg(long = "etcd", default_value = "http://127.0.0.1:2379")]
    etcd_endpoints: Vec<String>,

    /// Root prefix for coordination-store paths
    #[arg(long, default_value = DEFAULT_ROOT_PREFIX)]
    root_prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all nodes in the cluster
    Nodes,

    /// Show the nodes registered for a key
    Key {
        /// Key to look up
        key: String,
    },

    /// Dump the whole key -> nodes mapping
    Keymap,

    /// Ask the cluster to update a key (registers an orphan first)
    Update {
        /// Key to update
        key: String,
    },

    /// Fetch a key's data through the routing transport
    Get {
        /// Key to fetch
        key: String,

        /// Request path, when it differs from the key
        #[arg(long)]
        path: Option<String>,
    },

    /// Register a key to a node
    Register {
        /// Key
        key: String,
        /// Node ("host:port")
        node: String,
    },

    /// Deregister a key from a node
    Deregister {
        /// Key
        key: String,
        /// Node ("host:port")
        node: String,
    },

    /// Probe every registration and print a health report
    Status,

    /// Remove all registrations naming a dead node
    Evict {
        /// Node ("host:port")
        node: String,
    },

    /// List keys on a node's provider surface
    ProviderKeys {
        /// Provider surface URL, e.g. http://10.0.0.5:7071
        url: String,

        /// Restrict to keys under this prefix
        #[arg(long, default_value = "")]
        prefix: String,
    },

    /// Trigger an update on a node's provider surface
    ProviderUpdate {
        /// Provider surface URL, e.g. http://10.0.0.5:7071
        url: String,
        /// Key to update
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let backend = Arc::new(
        EtcdBackend::connect(&cli.etcd_endpoints, &cli.root_prefix).await?,
    );
    let client = Client::new(backend);

    match cli.command {
        Commands::Nodes => {
            for node in client.nodes_in_cluster().await? {
                println!("{}", node);
            }
        }

        Commands::Key { key } => {
            for node in client.nodes_for_key(&key).await? {
                println!("{}", node);
            }
        }

        Commands::Keymap => {
            for (key, nodes) in client.registry().key_map().await? {
                println!("{}\t{}", key, nodes.join(","));
            }
        }

        Commands::Update { key } => {
            let nodes = client.update(&key).await?;
            println!("update {} requested on: {}", key, nodes.join(","));
        }

        Commands::Get { key, path } => {
            let transport = client.transport_for_key(&key, None).await?;
            let resp = transport.get(path.as_deref().unwrap_or(&key)).await?;
            let body = resp.bytes().await?;
            std::io::stdout().write_all(&body)?;
        }

        Commands::Register { key, node } => {
            client.registry().add(&key, &node).await?;
            println!("registered {} -> {}", key, node);
        }

        Commands::Deregister { key, node } => {
            client.registry().remove(&key, &node).await?;
            println!("deregistered {} -> {}", key, node);
        }

        Commands::Status => {
            let report = keymesh::cluster_status(&client).await?;
            println!("Cluster status:");
            println!("  Nodes: {}", report.nodes);
            println!("  Keys: {}", report.keys);
            println!("  Orphaned keys: {}", report.orphaned_keys);
            println!("  Healthy bindings: {}", report.healthy_bindings);
            println!("  Unreachable bindings: {}", report.unreachable_bindings);
        }

        Commands::Evict { node } => {
            let keys = keymesh::evict_node(&client, &node).await?;
            println!("evicted {} registrations from {}", keys.len(), node);
            for key in keys {
                println!("  {}", key);
            }
        }

        Commands::ProviderKeys { url, prefix } => {
            let provider = keymesh::HttpProvider::new(&url);
            for key in keymesh::Provider::keys(&provider, &prefix).await? {
                println!("{}", key);
            }
        }

        Commands::ProviderUpdate { url, key } => {
            let provider = keymesh::HttpProvider::new(&url);
            keymesh::Provider::update(&provider, &key).await?;
            println!("updated {}", key);
        }
    }

    Ok(())
}

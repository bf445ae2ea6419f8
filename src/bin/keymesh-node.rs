use anyhow::Result;
use clap::Parser;
use keymesh::common::{parse_duration, DEFAULT_ROOT_PREFIX};
use keymesh::{data_router, Config, DirProvider, EtcdBackend, Node, NodeConfig};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "keymesh-node")]
#[command(about = "Keymesh node - publish a local data directory to the cluster")]
struct Args {
    /// Name ("host:port") advertised to the cluster; must be reachable
    /// by the other clients and nodes
    #[arg(short, long)]
    name: Option<String>,

    /// Address to bind the data server on
    #[arg(short, long, default_value = "0.0.0.0:7070")]
    bind: SocketAddr,

    /// Directory tree served as this node's data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// etcd endpoint (repeatable)
    #[arg(long = "etcd", default_value = "http://127.0.0.1:2379")]
    etcd_endpoints: Vec<String>,

    /// Root prefix for coordination-store paths
    #[arg(long, default_value = DEFAULT_ROOT_PREFIX)]
    root_prefix: String,

    /// Membership lease TTL (e.g. "30s")
    #[arg(long, default_value = "30s")]
    ttl: String,

    /// Balancer interval (e.g. "60s", "5m")
    #[arg(long, default_value = "60s")]
    balance_interval: String,

    /// Balancer refreshes each local key with probability 1/N per cycle
    #[arg(long, default_value = "10")]
    update_sample_inverse: u32,

    /// Optional bind address for the provider control surface
    #[arg(long)]
    provider_bind: Option<SocketAddr>,

    /// Load configuration from a JSON file instead of flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        if let Some(path) = &self.config {
            return Ok(Config::from_file(path)?);
        }
        let name = self
            .name
            .ok_or_else(|| anyhow::anyhow!("--name is required (or use --config)"))?;
        Ok(Config {
            name,
            bind_addr: self.bind,
            provider_bind: self.provider_bind,
            data_dir: self.data_dir,
            etcd_endpoints: self.etcd_endpoints,
            root_prefix: self.root_prefix,
            node: NodeConfig {
                membership_ttl_secs: parse_duration(&self.ttl)?.as_secs(),
                balance_interval_secs: parse_duration(&self.balance_interval)?.as_secs(),
                update_sample_inverse: self.update_sample_inverse,
            },
            log_level: self.log_level,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.into_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    config.validate()?;

    tracing::info!("starting keymesh node");
    tracing::info!("  name: {}", config.name);
    tracing::info!("  data server: {}", config.bind_addr);
    tracing::info!("  data dir: {}", config.data_dir.display());
    tracing::info!("  etcd: {:?}", config.etcd_endpoints);
    tracing::info!("  registry root: {}", config.root_prefix);

    let backend = Arc::new(
        EtcdBackend::connect(&config.etcd_endpoints, &config.root_prefix).await?,
    );
    let provider = Arc::new(DirProvider::new(config.data_dir.clone()));

    let node = Node::new(&config.name, backend, provider.clone(), config.node.clone())?;
    node.start().await?;

    if let Some(addr) = config.provider_bind {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let router = keymesh::provider_router(provider);
        tracing::info!("  provider surface: {}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("provider surface error: {}", e);
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let server = axum::serve(listener, data_router(config.data_dir.clone())).into_future();
    tracing::info!("✓ node ready");

    tokio::select! {
        res = server => {
            if let Err(e) = res {
                tracing::error!("data server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }

    node.stop().await;
    Ok(())
}

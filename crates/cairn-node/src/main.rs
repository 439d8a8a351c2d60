use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use cairn_consensus::LocalGroup;
use cairn_kv::{GcTask, Store, StoreConfig};
use cairn_security::FsSource;
use cairn_storage::MemEngine;

#[derive(clap::Parser, Debug)]
#[command(name = "cairn-node", about = "Cairn transactional KV node")]
struct Cli {
    /// Overrides `node.node_id`.
    #[arg(long)]
    node_id: Option<u64>,
    /// Overrides `node.store_id`.
    #[arg(long)]
    store_id: Option<u64>,
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Certificate directory; overrides `security.certs_dir`. An `embedded=`
    /// prefix is accepted and ignored.
    #[arg(long)]
    certs: Option<String>,
    /// Run without TLS.
    #[arg(long)]
    insecure: bool,
}

#[derive(Debug, Deserialize)]
struct NodeConfig {
    node_id: u64,
    store_id: u64,
}

#[derive(Debug, Deserialize)]
struct ClockConfig {
    max_offset_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ReplayConfig {
    window_secs: u64,
    gc_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
struct ConsistencyConfig {
    consensus_reads: bool,
}

#[derive(Debug, Deserialize)]
struct SecurityConfig {
    certs_dir: String,
    insecure: bool,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    node: NodeConfig,
    clock: ClockConfig,
    replay: ReplayConfig,
    consistency: ConsistencyConfig,
    security: SecurityConfig,
    observability: ObservabilityConfig,
}

fn init_tracing(config: &ObservabilityConfig) {
    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.log_level)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.log_level)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new().merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("CAIRN_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    init_tracing(&config.observability);

    let node_id = cli.node_id.unwrap_or(config.node.node_id);
    let store_id = cli.store_id.unwrap_or(config.node.store_id);
    let certs = cli.certs.unwrap_or(config.security.certs_dir);
    let insecure = cli.insecure || config.security.insecure;

    tracing::info!(node_id, store_id, insecure, "node starting");

    let (server_tls, client_tls) = if insecure {
        (cairn_security::insecure_server(), cairn_security::insecure_client())
    } else {
        let server = cairn_security::load_server_config(&FsSource, &certs)
            .with_context(|| format!("failed to load server certificates from {certs}"))?;
        let client = cairn_security::load_client_config(&FsSource, &certs)
            .with_context(|| format!("failed to load client certificates from {certs}"))?;
        (server, client)
    };
    tracing::info!(
        server_tls = !server_tls.is_insecure(),
        client_verify = client_tls.snapshot().is_some_and(|c| !c.skip_verify),
        "security configured"
    );

    let mut store_config = StoreConfig::new(node_id, store_id, Duration::from_millis(config.clock.max_offset_ms));
    store_config.replay_window = Duration::from_secs(config.replay.window_secs);
    let group = LocalGroup::new(node_id, config.consistency.consensus_reads);
    let store = Arc::new(
        Store::new(store_config, MemEngine::new(), group).context("failed to bootstrap store")?,
    );

    let gc = tokio::spawn(GcTask::new(store.clone(), Duration::from_secs(config.replay.gc_interval_secs)).run());

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!(ranges = store.ranges().len(), "shutting down");
    gc.abort();

    Ok(())
}

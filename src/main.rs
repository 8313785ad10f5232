use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use testgrid::config::OrchestratorConfig;
use testgrid::orchestrator::Orchestrator;
use testgrid::shutdown::install_shutdown_handler;
use testgrid::store::{MemoryStore, RedisStore, StateStore};

#[derive(Parser, Debug)]
#[command(name = "testgrid")]
#[command(about = "A distributed test-job orchestrator with build-affinity scheduling")]
struct Args {
    /// Store endpoint; redis://host:port for Redis, anything else in-memory
    #[arg(long, default_value = "memory://")]
    store_url: String,

    /// Port for the JSON dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Scheduler tick cadence in milliseconds
    #[arg(long, default_value = "5000")]
    tick_interval_ms: u64,

    /// Total executions allowed per job, counting the first attempt
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Tenant fairness weights (comma-separated, format: "tenant=weight")
    /// Example: "premium=100,standard=50"
    #[arg(long, default_value = "")]
    tenant_weights: String,
}

fn parse_tenant_weights(weights_str: &str) -> HashMap<String, i64> {
    if weights_str.is_empty() {
        return HashMap::new();
    }

    weights_str
        .split(',')
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.trim().split('=').collect();
            if parts.len() == 2 {
                let weight: i64 = parts[1].parse().ok()?;
                Some((parts[0].to_string(), weight))
            } else {
                tracing::warn!(entry, "Invalid tenant weight, expected tenant=weight");
                None
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };

    let config = OrchestratorConfig {
        store_endpoint: args.store_url.clone(),
        dashboard_addr,
        tick_interval: Duration::from_millis(args.tick_interval_ms),
        max_attempts: args.max_attempts,
        tenant_weights: parse_tenant_weights(&args.tenant_weights),
        ..Default::default()
    };

    tracing::info!(
        store = %config.store_endpoint,
        dashboard = ?config.dashboard_addr,
        tick_interval = ?config.tick_interval,
        max_attempts = config.max_attempts,
        "Starting testgrid orchestrator"
    );

    let store: Arc<dyn StateStore> = if args.store_url.starts_with("redis://") {
        Arc::new(RedisStore::connect(&args.store_url).await?)
    } else {
        Arc::new(MemoryStore::new())
    };
    store.ping().await?;

    let orchestrator = Arc::new(Orchestrator::new(config, store));
    let shutdown = install_shutdown_handler();
    orchestrator.run(shutdown).await;

    Ok(())
}

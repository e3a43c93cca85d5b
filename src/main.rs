//! Service load balancer daemon.
//!
//! ```text
//!   config.toml ──▶ loader ──▶ Balancer ◀── store (memory | json file)
//!       │                        │   ▲
//!       │ watcher                │   │ state / latency
//!       ▼                        ▼   │
//!   reload task ───────────▶ Registry ◀── HealthMonitor (periodic probes)
//!                                │
//!                                ▼
//!                         Prometheus exporter (optional)
//! ```
//!
//! Runs until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use service_balancer::config::watcher::ConfigWatcher;
use service_balancer::config::{load_config, BalancerServiceConfig};
use service_balancer::health::HealthMonitor;
use service_balancer::lifecycle::{apply_reload, wait_for_shutdown_signal, Shutdown};
use service_balancer::load_balancer::Balancer;
use service_balancer::observability::{logging, metrics};
use service_balancer::store::{EndpointStore, JsonFileStore, MemoryStore};

#[derive(Parser, Debug)]
#[command(name = "service-balancer", version, about = "Service endpoint load balancer")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override observability.log_level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => BalancerServiceConfig::default(),
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    logging::init(&log_level);

    tracing::info!("service-balancer v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                metrics::init_metrics(addr)?;
                tracing::info!(address = %addr, "Prometheus exporter listening");
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let store: Arc<dyn EndpointStore> = match &config.store.path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };

    let balancer = Arc::new(Balancer::from_config(&config.balancer, store)?);
    let restored = balancer.restore()?;
    let registered = balancer.register_static(&config.endpoints);

    tracing::info!(
        default_algorithm = %balancer.default_algorithm(),
        services = balancer.registry().groups().len(),
        configured = registered,
        restored,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();

    let monitor = Arc::new(HealthMonitor::new(
        balancer.registry().clone(),
        config.health_check.clone(),
    )?);
    let monitor_handle = tokio::spawn(monitor.clone().run(shutdown.subscribe()));

    // The notify handle must outlive the reload task.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let balancer = balancer.clone();
            let monitor = monitor.clone();
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(new_config) = updates.recv() => {
                            apply_reload(&balancer, &monitor, &new_config);
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
            Some(handle)
        }
        None => None,
    };

    wait_for_shutdown_signal().await;
    tracing::info!("Shutting down");
    shutdown.trigger();

    if let Err(e) = monitor_handle.await {
        tracing::error!(error = %e, "Health monitor task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

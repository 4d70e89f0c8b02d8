//! Process entry point: load config, init tracing, connect to Postgres, run
//! migrations, bring derived state up to date via the bootstrapper if
//! needed, serve the metrics/health surface, and drive the chain tracker
//! loop until a fatal error or cooperative shutdown. Grounded on the
//! teacher's `main.rs` wiring shape (config -> telemetry -> metrics ->
//! server -> long-running loop), re-pointed from a RocksDB-backed HTTP API
//! server to this crate's Postgres-backed chain tracker.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tracing::{error, info};

use ergo_watcher::config::{self, WatcherConfig};
use ergo_watcher::db;
use ergo_watcher::error::WatcherError;
use ergo_watcher::metrics;
use ergo_watcher::node::NodeClient;
use ergo_watcher::telemetry::{self, TelemetryConfig};
use ergo_watcher::tracker::ChainTracker;

#[derive(Parser, Debug)]
#[command(name = "ergo-watcher", about = "Ergo chain indexer core")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = config::init_global_config(&cli.config) {
        eprintln!("FATAL: {e}");
        std::process::exit(e.exit_code());
    }
    let cfg = config::get_global_config();

    let telemetry_cfg = TelemetryConfig {
        log_level: cfg.log.level.clone(),
        log_format: cfg.log.format.clone(),
        log_file: cfg.log.file.clone(),
        rotation: "daily".to_string(),
    };
    if let Err(e) = telemetry::init_tracing(telemetry_cfg) {
        eprintln!("FATAL: failed to initialize tracing: {e}");
        std::process::exit(2);
    }

    if let Err(e) = metrics::init_metrics() {
        error!(error = %e, "failed to register metrics");
        std::process::exit(1);
    }

    match run(cfg).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(error = %e, "fatal error, exiting");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cfg: &'static WatcherConfig) -> Result<(), WatcherError> {
    info!(node_url = %cfg.node.url, "starting ergo-watcher");

    let pool = db::connect(&cfg.db).await?;
    db::run_migrations(&pool).await?;

    let bootstrap_enabled = cfg.bootstrap.enabled.unwrap_or(!db::bootstrap::is_bootstrapped(&pool).await?);
    if bootstrap_enabled {
        info!("running one-shot derived-state bootstrap");
        db::bootstrap::run(&pool, &cfg.metrics).await?;
    }

    let metrics_server = tokio::spawn(serve_metrics(cfg.metrics.listen_addr.clone()));

    let node = NodeClient::new(cfg.node.url.clone(), std::time::Duration::from_millis(cfg.node.timeout_ms))?;
    let mut tracker = ChainTracker::new(pool, node, &cfg.node, &cfg.tracker, cfg.metrics.clone()).await?;
    info!(tip_height = tracker.tip_height(), "chain tracker starting");

    let result = tracker.run().await;
    metrics_server.abort();
    result
}

async fn serve_metrics(listen_addr: String) {
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(|| async { metrics::gather_metrics() }));

    let addr: SocketAddr = match listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, listen_addr, "invalid metrics listen address, metrics server disabled");
            return;
        }
    };

    info!(%addr, "serving metrics/health endpoint");
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "metrics server exited");
            }
        }
        Err(e) => error!(error = %e, %addr, "failed to bind metrics listener"),
    }
}

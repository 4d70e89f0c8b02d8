//! Standalone one-shot bootstrapper binary (C6), for operators who want to
//! rebuild `bal.*`/`usp.*`/`mtr.*` without starting the full tracker loop —
//! e.g. right after a bulk `COPY`-loaded `core.*` from another process.

use clap::Parser;
use tracing::{error, info};

use ergo_watcher::config::{self};
use ergo_watcher::db;
use ergo_watcher::telemetry::{self, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "bootstrap", about = "One-shot derived-state rebuild from core.*")]
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

    if telemetry::init_tracing(TelemetryConfig::default()).is_err() {
        eprintln!("WARN: failed to initialize tracing, continuing without it");
    }

    let pool = match db::connect(&cfg.db).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "failed to connect to database");
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = db::run_migrations(&pool).await {
        error!(error = %e, "failed to run migrations");
        std::process::exit(e.exit_code());
    }

    if db::bootstrap::is_bootstrapped(&pool).await.unwrap_or(false) {
        info!("already bootstrapped, nothing to do");
        return;
    }

    match db::bootstrap::run(&pool, &cfg.metrics).await {
        Ok(()) => info!("bootstrap complete"),
        Err(e) => {
            error!(error = %e, "bootstrap failed");
            std::process::exit(e.exit_code());
        }
    }
}

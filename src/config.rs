//! Global configuration, loaded once at startup from `config.toml` (overridable
//! with `WATCHER_*` environment variables) into a typed [`WatcherConfig`], then
//! stashed behind a `OnceCell` so every component reaches it the same way the
//! teacher's components reach `get_global_config()` instead of threading a
//! config value through every call.

use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::error::WatcherError;

static GLOBAL_CONFIG: OnceCell<WatcherConfig> = OnceCell::new();

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub conn_str: String,
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_max_rollback_depth")]
    pub max_rollback_depth: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BootstrapConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SigmaUsdMetrics {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OraclePoolsMetrics {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub sigmausd: SigmaUsdMetrics,
    #[serde(default)]
    pub oracle_pools: OraclePoolsMetrics,
    #[serde(default = "default_metrics_listen_addr")]
    pub listen_addr: String,
    /// How often (in blocks) address-count/distribution snapshots are taken.
    #[serde(default = "default_snapshot_interval_blocks")]
    pub snapshot_interval_blocks: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    pub node: NodeConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_statement_timeout_ms() -> u64 {
    30_000
}
fn default_pool_size() -> u32 {
    8
}
fn default_max_rollback_depth() -> u32 {
    48
}
fn default_metrics_listen_addr() -> String {
    "0.0.0.0:9105".to_string()
}
fn default_snapshot_interval_blocks() -> i64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_rollback_depth: default_max_rollback_depth(),
        }
    }
}

/// Load configuration from `path`, layering `WATCHER_*` env vars on top
/// (e.g. `WATCHER_DB__CONN_STR` overrides `db.conn_str`).
pub fn load_config(path: &str) -> Result<WatcherConfig, WatcherError> {
    let raw = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("WATCHER").separator("__"))
        .build()
        .map_err(|e| WatcherError::Config(e.to_string()))?;

    raw.try_deserialize::<WatcherConfig>()
        .map_err(|e| WatcherError::Config(e.to_string()))
}

/// Initialize the process-global config. Must be called exactly once, before
/// any component calls [`get_global_config`].
pub fn init_global_config(path: &str) -> Result<(), WatcherError> {
    let cfg = load_config(path)?;
    GLOBAL_CONFIG
        .set(cfg)
        .map_err(|_| WatcherError::Config("global config already initialized".to_string()))
}

pub fn get_global_config() -> &'static WatcherConfig {
    GLOBAL_CONFIG.get().unwrap_or_else(|| {
        eprintln!("FATAL: config not initialized - call init_global_config() first");
        std::process::exit(2);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_optional_sections() {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                [node]
                url = "http://localhost:9053"
                [db]
                conn_str = "postgres://localhost/ergo"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let cfg: WatcherConfig = raw.try_deserialize().unwrap();
        assert_eq!(cfg.node.poll_interval_ms, 5000);
        assert_eq!(cfg.tracker.max_rollback_depth, 48);
        assert_eq!(cfg.metrics.listen_addr, "0.0.0.0:9105");
        assert_eq!(cfg.metrics.snapshot_interval_blocks, 1000);
        assert!(!cfg.metrics.sigmausd.enabled);
    }
}

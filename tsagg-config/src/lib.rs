//! Layered configuration for the `tsaggd` scheduler daemon.
//!
//! Precedence, lowest to highest: built-in defaults, an optional TOML
//! file (`TSAGG_CONFIG` env var or `--config`), environment variables
//! prefixed `TSAGG_` (double-underscore nesting, e.g.
//! `TSAGG_STORE__URI`), then the handful of CLI flags worth overriding
//! ad hoc.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub uri: String,
    /// Explicit database allow-list; when empty, `Store::list_databases`
    /// enumerates every non-system database.
    #[serde(default)]
    pub databases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub queue: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_lock_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_lock_ttl_secs() -> u64 {
    60
}
fn default_retry_attempts() -> u32 {
    10
}
fn default_retry_backoff_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_idle_sleep_secs")]
    pub idle_sleep_secs: u64,
    #[serde(default = "default_meta_chunk_size")]
    pub meta_chunk_size: usize,
}

fn default_idle_sleep_secs() -> u64 {
    60
}
fn default_meta_chunk_size() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub broker: BrokerConfig,
    pub lock: LockConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Present for parity with daemonising deployment wrappers; this
    /// build never forks or writes a PID file itself.
    #[serde(default)]
    pub pid_file: Option<String>,
    #[serde(default = "default_foreground")]
    pub foreground: bool,
}

fn default_log_filter() -> String {
    "tsagg=info".to_string()
}
fn default_foreground() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { idle_sleep_secs: default_idle_sleep_secs(), meta_chunk_size: default_meta_chunk_size() }
    }
}

impl AppConfig {
    fn validate(&self) -> Result<()> {
        if self.store.uri.is_empty() {
            return Err(ConfigError::Missing("store.uri"));
        }
        if self.broker.uri.is_empty() {
            return Err(ConfigError::Missing("broker.uri"));
        }
        if self.broker.queue.is_empty() {
            return Err(ConfigError::Missing("broker.queue"));
        }
        if self.lock.uri.is_empty() {
            return Err(ConfigError::Missing("lock.uri"));
        }
        Ok(())
    }
}

/// CLI surface for `tsaggd`. Only the knobs worth overriding ad hoc are
/// exposed here; everything else goes through the config file or
/// environment.
#[derive(Debug, Parser)]
#[command(name = "tsaggd", about = "Time-series aggregation scheduling daemon")]
pub struct CliArgs {
    /// Path to a TOML config file (defaults to $TSAGG_CONFIG if set).
    #[arg(long, env = "TSAGG_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub store_uri: Option<String>,

    #[arg(long)]
    pub broker_uri: Option<String>,

    #[arg(long)]
    pub lock_uri: Option<String>,

    #[arg(long)]
    pub log_filter: Option<String>,

    /// Overrides `scheduler.idle_sleep_secs`, parsed as a humantime
    /// duration (e.g. `30s`, `2m`).
    #[arg(long)]
    pub idle_sleep: Option<humantime::Duration>,
}

/// Loads configuration from defaults, an optional file, the environment,
/// and CLI overrides, in that precedence order, then validates it.
pub fn load(cli: &CliArgs) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config_path = cli.config.clone();

    let mut builder = config::Config::builder()
        .set_default("lock.ttl_secs", default_lock_ttl_secs() as i64)
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .set_default("lock.retry_attempts", default_retry_attempts() as i64)
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .set_default("lock.retry_backoff_ms", default_retry_backoff_ms() as i64)
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .set_default("scheduler.idle_sleep_secs", default_idle_sleep_secs() as i64)
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .set_default("scheduler.meta_chunk_size", default_meta_chunk_size() as i64)
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .set_default("log_filter", default_log_filter())
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .set_default("foreground", true)
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    if let Some(path) = &config_path {
        builder = builder.add_source(config::File::from(path.as_path()).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TSAGG")
            .separator("__")
            .try_parsing(true),
    );

    let raw = builder.build().map_err(|e| ConfigError::Load(e.to_string()))?;
    let mut app: AppConfig = raw.try_deserialize().map_err(|e| ConfigError::Load(e.to_string()))?;

    if let Some(uri) = &cli.store_uri {
        app.store.uri = uri.clone();
    }
    if let Some(uri) = &cli.broker_uri {
        app.broker.uri = uri.clone();
    }
    if let Some(uri) = &cli.lock_uri {
        app.lock.uri = uri.clone();
    }
    if let Some(filter) = &cli.log_filter {
        app.log_filter = filter.clone();
    }
    if let Some(idle_sleep) = cli.idle_sleep {
        app.scheduler.idle_sleep_secs = idle_sleep.as_secs();
    }

    app.validate()?;
    Ok(app)
}

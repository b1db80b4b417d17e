//! Application configuration.
//!
//! Loaded via the `config` crate layered over YAML, following the
//! precedence: file in cwd (`kartograph.yaml`) -> explicit path
//! (`KARTOGRAPH_CONFIG` env var) -> environment variables with a
//! `KARTOGRAPH__` separator-prefixed override (e.g.
//! `KARTOGRAPH__OUTBOX__POLL_INTERVAL_SECS=5`).

use serde::Deserialize;

/// Environment variable naming an explicit config file path.
pub const CONFIG_ENV_VAR: &str = "KARTOGRAPH_CONFIG";
/// Default configuration file name, looked up relative to the cwd.
pub const DEFAULT_CONFIG_FILE: &str = "kartograph.yaml";
/// Prefix (and `__` separator) for environment variable overrides.
pub const CONFIG_ENV_PREFIX: &str = "KARTOGRAPH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
}

/// Top-level configuration for both the outbox worker and the bulk-load
/// pipeline.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub outbox: OutboxConfig,
    pub graph: GraphConfig,
    pub policy_engine: PolicyEngineConfig,
}

impl Config {
    /// Load configuration from file and environment, highest precedence last.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit_path = std::env::var(CONFIG_ENV_VAR).ok();

        let mut builder = config::Config::builder();

        if let Some(path) = explicit_path {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        } else {
            builder = builder.add_source(
                config::File::with_name(DEFAULT_CONFIG_FILE.trim_end_matches(".yaml"))
                    .required(false),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let built = builder.build()?;
        let config: Config = built.try_deserialize()?;
        Ok(config)
    }
}

/// Database connection settings shared by both cores.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection string.
    pub url: String,
    /// Maximum pool connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/kartograph".to_string(),
            max_connections: 10,
        }
    }
}

/// Outbox worker settings (Core A, C6).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Fallback poll interval when NOTIFY delivery is unavailable or slow.
    pub poll_interval_secs: u64,
    /// Maximum rows claimed per batch (`SKIP LOCKED`).
    pub batch_size: u32,
    /// Maximum policy-engine RPC retries per batch before the batch is left
    /// unprocessed for a later pass.
    pub max_retries: u32,
    /// LISTEN/NOTIFY channel name.
    pub notify_channel: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            batch_size: 100,
            max_retries: 10,
            notify_channel: "outbox_events".to_string(),
        }
    }
}

/// Graph bulk-loader settings (Core B, C7-C10).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Name of the AGE graph to load into.
    pub graph_name: String,
    /// Default number of rows per COPY batch when the caller doesn't
    /// specify one.
    pub default_batch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            graph_name: "kartograph".to_string(),
            default_batch_size: 10_000,
        }
    }
}

/// Policy-engine (gRPC) client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyEngineConfig {
    /// gRPC endpoint, e.g. `http://localhost:50051`.
    pub endpoint: String,
    /// RPC deadline in milliseconds.
    pub timeout_ms: u64,
}

impl Default for PolicyEngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:50051".to_string(),
            timeout_ms: 5_000,
        }
    }
}

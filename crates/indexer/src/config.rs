//! Configuration management for the Dopel indexer.
//!
//! This module handles loading configuration from:
//! - TOML files (optional)
//! - Environment variables (override TOML)
//! - Default values (fallbacks)

use anyhow::{Context, Result};
use dopel_core::ProgramId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "indexer.toml";

/// Main configuration for the indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chain RPC configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Durable backend configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// In-memory buffer capacities
    #[serde(default)]
    pub memory: MemoryConfig,

    /// HTTP query surface configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Ingestion pipeline configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Health probe configuration
    #[serde(default)]
    pub health: HealthConfig,

    /// Aggregate stats configuration
    #[serde(default)]
    pub stats: StatsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Subscription commitment level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    /// Processed by the connected node.
    Processed,
    /// Voted on by a supermajority.
    #[default]
    Confirmed,
    /// Rooted.
    Finalized,
}

impl Commitment {
    /// JSON-RPC representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// HTTP JSON-RPC URL (connectivity probe)
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Websocket URL for subscriptions; derived from `rpc_url` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    /// Program whose logs are indexed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<ProgramId>,

    /// Subscription commitment
    #[serde(default)]
    pub commitment: Commitment,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL (e.g., "sqlite://dopel.db"); unset runs in memory mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Ring buffer capacities for memory mode and the recent-block cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Blocks kept in memory
    #[serde(default = "default_max_blocks")]
    pub max_blocks: usize,

    /// Transaction records kept in memory
    #[serde(default = "default_max_records")]
    pub max_transactions: usize,

    /// Reward records kept in memory
    #[serde(default = "default_max_records")]
    pub max_rewards: usize,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Page size when `limit` is not given
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound for `limit`
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Upper bound on the duplicate lookup; on expiry ingestion proceeds
    #[serde(default = "default_dedup_timeout_ms")]
    pub dedup_timeout_ms: u64,
}

/// Health probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between RPC and database probes.
    ///
    /// **Must be > 0** - Zero will cause a panic in tokio::time::interval.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

/// Aggregate stats configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Supply before any indexed rewards
    #[serde(default = "default_base_supply")]
    pub base_supply: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_rpc_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_max_blocks() -> usize {
    1000
}

fn default_max_records() -> usize {
    5000
}

fn default_port() -> u16 {
    8080
}

fn default_limit() -> usize {
    dopel_core::DEFAULT_QUERY_LIMIT
}

fn default_max_limit() -> usize {
    100
}

fn default_dedup_timeout_ms() -> u64 {
    2000
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_base_supply() -> u64 {
    7_000_000_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            ws_url: None,
            program_id: None,
            commitment: Commitment::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_blocks: default_max_blocks(),
            max_transactions: default_max_records(),
            max_rewards: default_max_records(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_timeout_ms: default_dedup_timeout_ms(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            base_supply: default_base_supply(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration for the binary.
    ///
    /// An explicit `path` must exist. Without one, `indexer.toml` is read if
    /// present and defaults are used otherwise. Environment overrides are
    /// applied last, then the result is validated.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`] but without validation, for commands that only
    /// need the database settings.
    pub fn read(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::parse_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::parse_file(DEFAULT_CONFIG_PATH)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|name| std::env::var(name).ok())?;

        Ok(config)
    }

    /// Load configuration from a TOML file, with environment overrides.
    ///
    /// # Example
    /// ```no_run
    /// # use dopel_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Recognised: `PROGRAM_ID`, `SOLANA_RPC`, `SOLANA_WS`, `DATABASE_URL`,
    /// `PORT`, `LOG_LEVEL`, `LOG_FORMAT`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = lookup("PROGRAM_ID") {
            let program_id = raw
                .parse::<ProgramId>()
                .context("Invalid PROGRAM_ID")?;
            self.network.program_id = Some(program_id);
        }
        if let Some(url) = lookup("SOLANA_RPC") {
            self.network.rpc_url = url.trim().to_string();
        }
        if let Some(url) = lookup("SOLANA_WS") {
            self.network.ws_url = Some(url.trim().to_string());
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url.trim().to_string());
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT: {}", port))?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level.trim().to_lowercase();
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format.trim().to_lowercase();
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        // Validate RPC URLs
        let rpc_url = self.network.rpc_url.trim();
        if rpc_url.is_empty() {
            anyhow::bail!("Network RPC URL cannot be empty");
        }
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            anyhow::bail!("Network RPC URL must start with http:// or https://");
        }
        if let Some(ws_url) = &self.network.ws_url {
            if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
                anyhow::bail!("Network websocket URL must start with ws:// or wss://");
            }
        }

        if self.network.program_id.is_none() {
            anyhow::bail!("Network program_id is required (set it in the config or PROGRAM_ID)");
        }

        // Validate database settings (only meaningful when a URL is configured)
        if let Some(url) = &self.database.url {
            if !url.starts_with("sqlite:") {
                anyhow::bail!("Database URL must be a sqlite: URL (got '{}')", url);
            }
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        // Validate buffer capacities
        if self.memory.max_blocks == 0
            || self.memory.max_transactions == 0
            || self.memory.max_rewards == 0
        {
            anyhow::bail!("Memory buffer capacities must be > 0");
        }

        // Validate paging
        if self.server.max_limit == 0 {
            anyhow::bail!("Server max_limit must be > 0");
        }
        if self.server.default_limit == 0 || self.server.default_limit > self.server.max_limit {
            anyhow::bail!(
                "Server default_limit must be between 1 and max_limit ({})",
                self.server.max_limit
            );
        }

        if self.ingest.dedup_timeout_ms == 0 {
            anyhow::bail!("Ingest dedup_timeout_ms must be > 0");
        }

        if self.health.probe_interval_secs == 0 {
            anyhow::bail!(
                "Health probe_interval_secs must be > 0 (tokio interval cannot be zero)"
            );
        }

        // Validate logging level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        // Validate logging format
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// The configured program id.
    pub fn program_id(&self) -> Result<&ProgramId> {
        self.network
            .program_id
            .as_ref()
            .context("Network program_id is not configured")
    }

    /// Websocket URL, derived from the HTTP URL when not configured.
    pub fn ws_url(&self) -> String {
        if let Some(ws_url) = &self.network.ws_url {
            return ws_url.clone();
        }

        let rpc_url = self.network.rpc_url.trim();
        if let Some(rest) = rpc_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = rpc_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            rpc_url.to_string()
        }
    }
}

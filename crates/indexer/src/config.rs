//! Configuration management for the agentdex indexer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables (`${VAR}` placeholders, `AGENTDEX_SEEDS`)
//! - Default values (fallbacks)

use agentdex_core::{Address, DEFAULT_SEED_CHAIN};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::listener::registry::RegistryLayout;
use crate::metadata::DEFAULT_GATEWAYS;

/// Environment variable overriding `indexer.seeds`.
pub const SEEDS_ENV: &str = "AGENTDEX_SEEDS";

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Scheduling and discovery settings
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Metadata fetch settings
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Watched networks, keyed by chain name
    #[serde(default)]
    pub chains: BTreeMap<String, ChainConfig>,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://agentdex.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Indexer scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Seed crawl + reconcile interval in seconds.
    ///
    /// **Must be > 0** - tokio::time::interval panics on zero.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Polling fallback interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// First retry delay after a broken subscription
    #[serde(default = "default_subscription_retry_secs")]
    pub subscription_retry_secs: u64,

    /// Upper bound for the watcher restart delay
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Maximum block span per `eth_getLogs` request
    #[serde(default = "default_log_range_limit")]
    pub log_range_limit: u64,

    /// Placeholders examined per chain and reconcile pass
    #[serde(default = "default_reconcile_batch_size")]
    pub reconcile_batch_size: u32,

    /// Chain label stored on seed-crawled placeholders
    #[serde(default = "default_seed_chain")]
    pub seed_chain: String,

    /// Comma-separated agent locators crawled every tick
    #[serde(default)]
    pub seeds: String,

    /// Shutdown grace period in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            subscription_retry_secs: default_subscription_retry_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            log_range_limit: default_log_range_limit(),
            reconcile_batch_size: default_reconcile_batch_size(),
            seed_chain: default_seed_chain(),
            seeds: String::new(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl IndexerConfig {
    /// Seed locators: comma-separated, trimmed, empties dropped.
    pub fn seed_list(&self) -> Vec<String> {
        parse_seed_list(&self.seeds)
    }

    /// Replace the configured seeds when an override is present.
    pub fn apply_seed_override(&mut self, value: Option<String>) {
        if let Some(seeds) = value {
            self.seeds = seeds;
        }
    }

    /// Seed crawl + reconcile interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Metadata fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Content-addressed gateway base URLs, tried in order
    #[serde(default = "default_gateways")]
    pub gateways: Vec<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Largest accepted document body in bytes
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            gateways: default_gateways(),
            timeout_secs: default_fetch_timeout_secs(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
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

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One watched network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// RPC endpoint (http, https, ws, wss or ipc path)
    pub rpc_url: String,

    /// ERC-8004 identity registry address
    pub identity_registry: Address,

    /// ERC-8004 reputation registry address (not read by the indexer yet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputation_registry: Option<Address>,

    /// ERC-8004 validation registry address (not read by the indexer yet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_registry: Option<Address>,

    /// Wire layout of the identity registry's read methods
    #[serde(default)]
    pub registry_layout: RegistryLayout,

    /// Per-chain polling interval override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,

    /// Per-chain log range override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_range_limit: Option<u64>,
}

impl ChainConfig {
    /// Polling interval for this chain.
    pub fn poll_interval(&self, defaults: &IndexerConfig) -> Duration {
        Duration::from_secs(self.poll_interval_secs.unwrap_or(defaults.poll_interval_secs))
    }

    /// Block span limit for log queries on this chain.
    pub fn log_range_limit(&self, defaults: &IndexerConfig) -> u64 {
        self.log_range_limit.unwrap_or(defaults.log_range_limit)
    }
}

// Default value functions
fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_subscription_retry_secs() -> u64 {
    3
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_log_range_limit() -> u64 {
    1000
}

fn default_reconcile_batch_size() -> u32 {
    200
}

fn default_seed_chain() -> String {
    DEFAULT_SEED_CHAIN.to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_gateways() -> Vec<String> {
    DEFAULT_GATEWAYS.iter().map(|g| g.to_string()).collect()
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_max_document_bytes() -> usize {
    1_000_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax,
    /// with an optional fallback: `${VAR_NAME:-fallback}`.
    /// For example: `rpc_url = "wss://sepolia.example/${RPC_API_KEY}"`
    ///
    /// `AGENTDEX_SEEDS`, when set, replaces `indexer.seeds`.
    ///
    /// # Example
    /// ```no_run
    /// # use agentdex_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)
            .with_context(|| format!("Failed to expand config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .indexer
            .apply_seed_override(std::env::var(SEEDS_ENV).ok());

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        // Database
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
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

        // Scheduling
        let intervals = [
            ("tick_interval_secs", self.indexer.tick_interval_secs),
            ("poll_interval_secs", self.indexer.poll_interval_secs),
            ("subscription_retry_secs", self.indexer.subscription_retry_secs),
            ("max_backoff_secs", self.indexer.max_backoff_secs),
            ("log_range_limit", self.indexer.log_range_limit),
        ];
        for (name, value) in intervals {
            if value == 0 {
                anyhow::bail!("Indexer {} must be > 0", name);
            }
        }
        if self.indexer.max_backoff_secs < self.indexer.subscription_retry_secs {
            anyhow::bail!(
                "Indexer max_backoff_secs ({}) cannot be below subscription_retry_secs ({})",
                self.indexer.max_backoff_secs,
                self.indexer.subscription_retry_secs
            );
        }
        if self.indexer.reconcile_batch_size == 0 {
            anyhow::bail!("Indexer reconcile_batch_size must be > 0");
        }
        if self.indexer.seed_chain.trim().is_empty() {
            anyhow::bail!("Indexer seed_chain cannot be empty");
        }

        // Metadata
        if self.metadata.timeout_secs == 0 {
            anyhow::bail!("Metadata timeout_secs must be > 0");
        }
        if self.metadata.max_document_bytes == 0 {
            anyhow::bail!("Metadata max_document_bytes must be > 0");
        }
        for gateway in &self.metadata.gateways {
            let url = url::Url::parse(gateway)
                .with_context(|| format!("Metadata gateway '{}' is not a valid URL", gateway))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("Metadata gateway '{}' must be an http(s) URL", gateway);
            }
        }

        // Chains
        for (name, chain) in &self.chains {
            if name.trim().is_empty() {
                anyhow::bail!("Chain names cannot be empty");
            }
            if chain.rpc_url.trim().is_empty() {
                anyhow::bail!("Chain '{}' RPC URL cannot be empty", name);
            }
            if chain.identity_registry.is_zero() {
                anyhow::bail!(
                    "Chain '{}' identity_registry must be a non-zero address",
                    name
                );
            }
            let optional = [
                ("reputation_registry", chain.reputation_registry),
                ("validation_registry", chain.validation_registry),
            ];
            for (field, address) in optional {
                if address.is_some_and(|a| a.is_zero()) {
                    anyhow::bail!(
                        "Chain '{}' {} must be a non-zero address when provided",
                        name,
                        field
                    );
                }
            }
            if chain.poll_interval_secs == Some(0) {
                anyhow::bail!("Chain '{}' poll_interval_secs must be > 0", name);
            }
            if chain.log_range_limit == Some(0) {
                anyhow::bail!("Chain '{}' log_range_limit must be > 0", name);
            }
        }

        // Logging
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

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
}

/// Split a comma-separated seed list, trimming entries and dropping empties.
pub fn parse_seed_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expand `${VAR}` and `${VAR:-fallback}` placeholders from the process
/// environment.
///
/// Placeholders inside TOML comments are left alone. Placeholders inside any
/// string form are expanded. A referenced variable that is unset (and has no
/// fallback) is an error.
pub fn expand_env_vars(input: &str) -> Result<String> {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Lexical position while scanning TOML text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Bare,
    Comment,
    Basic,
    Literal,
    MultiBasic,
    MultiLiteral,
}

fn expand_with<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut state = Scan::Bare;
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];

        if state != Scan::Comment && rest.starts_with("${") {
            let body = &rest[2..];
            let close = match body.find(['}', '\n']) {
                Some(idx) if body[idx..].starts_with('}') => idx,
                _ => anyhow::bail!(
                    "Unclosed environment variable placeholder at byte {}",
                    pos
                ),
            };

            let placeholder = &body[..close];
            let (name, fallback) = match placeholder.split_once(":-") {
                Some((name, fallback)) => (name, Some(fallback)),
                None => (placeholder, None),
            };
            if name.is_empty() {
                anyhow::bail!("Empty environment variable name at byte {}", pos);
            }

            match lookup(name).or_else(|| fallback.map(str::to_string)) {
                Some(value) => out.push_str(&value),
                None => anyhow::bail!(
                    "Environment variable '{}' is not set (referenced at byte {})",
                    name,
                    pos
                ),
            }

            pos += 2 + close + 1;
            continue;
        }

        let (len, next) = scan_token(state, rest);
        out.push_str(&rest[..len]);
        state = next;
        pos += len;
    }

    Ok(out)
}

/// Length of the next token and the state after it.
fn scan_token(state: Scan, rest: &str) -> (usize, Scan) {
    let mut chars = rest.chars();
    let Some(ch) = chars.next() else {
        return (0, state);
    };
    let one = ch.len_utf8();
    // Backslash plus the escaped character, so `\"` never closes a string.
    let escaped = one + chars.next().map_or(0, char::len_utf8);

    match state {
        Scan::Bare => {
            if rest.starts_with(r#"""""#) {
                (3, Scan::MultiBasic)
            } else if rest.starts_with("'''") {
                (3, Scan::MultiLiteral)
            } else {
                match ch {
                    '"' => (one, Scan::Basic),
                    '\'' => (one, Scan::Literal),
                    '#' => (one, Scan::Comment),
                    _ => (one, Scan::Bare),
                }
            }
        }
        Scan::Comment => match ch {
            '\n' => (one, Scan::Bare),
            _ => (one, Scan::Comment),
        },
        Scan::Basic => match ch {
            '\\' => (escaped, Scan::Basic),
            '"' | '\n' => (one, Scan::Bare),
            _ => (one, Scan::Basic),
        },
        Scan::Literal => match ch {
            '\'' | '\n' => (one, Scan::Bare),
            _ => (one, Scan::Literal),
        },
        Scan::MultiBasic => {
            if rest.starts_with(r#"""""#) {
                (3, Scan::Bare)
            } else if ch == '\\' {
                (escaped, Scan::MultiBasic)
            } else {
                (one, Scan::MultiBasic)
            }
        }
        Scan::MultiLiteral => {
            if rest.starts_with("'''") {
                (3, Scan::Bare)
            } else {
                (one, Scan::MultiLiteral)
            }
        }
    }
}

//! Configuration surface (spec §6): endpoints, timeouts, pool/rate-limiter/
//! cache/fee-estimator/selection tuning, loaded from TOML with
//! `TXCORE_`-prefixed environment overrides.
//!
//! Precedence, highest first: runtime builder setters > environment
//! variables > config file > [`Config::default`].

use std::time::Duration;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::electrum::pool::LoadBalanceStrategy;
use crate::types::FilterStrategy;

fn deserialize_network<'de, D>(deserializer: D) -> Result<Network, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn serialize_network<S: serde::Serializer>(network: &Network, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&network.to_string())
}

/// Wire transport for one [`EndpointConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Ssl,
    Ws,
    Wss,
}

/// One entry in the server endpoints list.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_weight() -> f64 {
    1.0
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    3
}

/// Connection pool options (spec §6 "Pool").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolOptions {
    #[serde(default = "default_max_conn_per_server")]
    pub max_conn_per_server: usize,
    #[serde(default = "default_min_conn_per_server")]
    pub min_conn_per_server: usize,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_timeout_ms")]
    pub breaker_timeout_ms: u64,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    #[serde(default)]
    pub load_balance: LoadBalance,
    #[serde(default = "default_true")]
    pub enable_dynamic_scaling: bool,
}

fn default_max_conn_per_server() -> usize {
    4
}
fn default_min_conn_per_server() -> usize {
    1
}
fn default_max_pool_size() -> usize {
    32
}
fn default_health_check_interval_ms() -> u64 {
    15_000
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_timeout_ms() -> u64 {
    60_000
}
fn default_recovery_timeout_ms() -> u64 {
    60_000
}
fn default_true() -> bool {
    true
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_conn_per_server: default_max_conn_per_server(),
            min_conn_per_server: default_min_conn_per_server(),
            max_pool_size: default_max_pool_size(),
            health_check_interval_ms: default_health_check_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            breaker_threshold: default_breaker_threshold(),
            breaker_timeout_ms: default_breaker_timeout_ms(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            load_balance: LoadBalance::default(),
            enable_dynamic_scaling: true,
        }
    }
}

/// TOML-friendly mirror of [`LoadBalanceStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalance {
    RoundRobin,
    Weighted,
    LeastConnections,
    #[default]
    HealthBased,
}

impl From<LoadBalance> for LoadBalanceStrategy {
    fn from(value: LoadBalance) -> Self {
        match value {
            LoadBalance::RoundRobin => LoadBalanceStrategy::RoundRobin,
            LoadBalance::Weighted => LoadBalanceStrategy::Weighted,
            LoadBalance::LeastConnections => LoadBalanceStrategy::LeastConnections,
            LoadBalance::HealthBased => LoadBalanceStrategy::HealthBased,
        }
    }
}

/// Rate limiter options (spec §6 "Rate limiter").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimiterOptions {
    #[serde(default = "default_max_rps")]
    pub max_rps: u32,
    #[serde(default = "default_max_rpm")]
    pub max_rpm: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_rps() -> u32 {
    10
}
fn default_max_rpm() -> u32 {
    200
}
fn default_max_concurrent() -> u32 {
    8
}
fn default_base_backoff_ms() -> u64 {
    100
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RateLimiterOptions {
    fn default() -> Self {
        Self {
            max_rps: default_max_rps(),
            max_rpm: default_max_rpm(),
            max_concurrent: default_max_concurrent(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Response cache options (spec §6 "Cache").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheOptions {
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_default_ttl_s")]
    pub default_ttl_s: u64,
    #[serde(default)]
    pub category_ttls_s: std::collections::HashMap<String, u64>,
    #[serde(default = "default_cleanup_interval_s")]
    pub cleanup_interval_s: u64,
}

fn default_max_memory_mb() -> u64 {
    64
}
fn default_default_ttl_s() -> u64 {
    60
}
fn default_cleanup_interval_s() -> u64 {
    300
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            default_ttl_s: default_default_ttl_s(),
            category_ttls_s: std::collections::HashMap::new(),
            cleanup_interval_s: default_cleanup_interval_s(),
        }
    }
}

/// Fee estimator options (spec §6 "Fee estimator").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeeEstimatorOptions {
    #[serde(default = "default_cache_timeout_s")]
    pub cache_timeout_s: u64,
    #[serde(default = "default_validation_threshold")]
    pub validation_threshold: u64,
    #[serde(default = "default_min_fee_rate")]
    pub min_fee_rate: u64,
    #[serde(default = "default_true")]
    pub include_fallback: bool,
}

fn default_cache_timeout_s() -> u64 {
    60
}
fn default_validation_threshold() -> u64 {
    1000
}
fn default_min_fee_rate() -> u64 {
    1
}

impl Default for FeeEstimatorOptions {
    fn default() -> Self {
        Self {
            cache_timeout_s: default_cache_timeout_s(),
            validation_threshold: default_validation_threshold(),
            min_fee_rate: default_min_fee_rate(),
            include_fallback: true,
        }
    }
}

/// Parallel-selector sub-options, nested under [`SelectionOptions`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParallelSelectionOptions {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_selection_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub return_first: bool,
    #[serde(default)]
    pub quality_threshold: Option<f64>,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
}

fn default_max_concurrency() -> usize {
    4
}
fn default_selection_timeout_ms() -> u64 {
    2_000
}

impl Default for ParallelSelectionOptions {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            timeout_ms: default_selection_timeout_ms(),
            return_first: false,
            quality_threshold: None,
            enable_fallback: true,
        }
    }
}

/// UTXO selection options (spec §6 "Selection").
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectionOptions {
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: u64,
    #[serde(default = "default_max_inputs")]
    pub max_inputs: usize,
    #[serde(default)]
    pub min_confirmations: u32,
    #[serde(default)]
    pub filter_strategy: FilterStrategy,
    #[serde(default)]
    pub parallel: ParallelSelectionOptions,
}

fn default_dust_threshold() -> u64 {
    546
}
fn default_max_inputs() -> usize {
    32
}

impl Default for SelectionOptions {
    fn default() -> Self {
        Self {
            dust_threshold: default_dust_threshold(),
            max_inputs: default_max_inputs(),
            min_confirmations: 0,
            filter_strategy: FilterStrategy::default(),
            parallel: ParallelSelectionOptions::default(),
        }
    }
}

/// Top-level configuration assembled from defaults, an optional TOML file,
/// and `TXCORE_`-prefixed environment overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(
        deserialize_with = "deserialize_network",
        serialize_with = "serialize_network"
    )]
    pub network: Network,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub pool: PoolOptions,
    #[serde(default)]
    pub rate_limiter: RateLimiterOptions,
    #[serde(default)]
    pub cache: CacheOptions,
    #[serde(default)]
    pub fee_estimator: FeeEstimatorOptions,
    #[serde(default)]
    pub selection: SelectionOptions,
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            endpoints: Vec::new(),
            connection_timeout_ms: default_connection_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool: PoolOptions::default(),
            rate_limiter: RateLimiterOptions::default(),
            cache: CacheOptions::default(),
            fee_estimator: FeeEstimatorOptions::default(),
            selection: SelectionOptions::default(),
        }
    }
}

/// Error loading or parsing a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid environment override {key}: {message}")]
    InvalidEnvOverride { key: String, message: String },
}

impl Config {
    /// Parse a `Config` from a TOML document, falling back to defaults for
    /// every omitted field.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load and parse a `Config` from a file on disk.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Apply `TXCORE_`-prefixed environment variable overrides in place.
    /// Recognises `TXCORE_NETWORK`, `TXCORE_CONNECTION_TIMEOUT_MS`,
    /// `TXCORE_REQUEST_TIMEOUT_MS`, `TXCORE_MAX_POOL_SIZE`,
    /// `TXCORE_MAX_RPS`, `TXCORE_MAX_RPM`, `TXCORE_CACHE_MAX_MEMORY_MB`,
    /// `TXCORE_FEE_MIN_RATE`, `TXCORE_DUST_THRESHOLD`, and
    /// `TXCORE_MAX_INPUTS`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("TXCORE_NETWORK") {
            self.network = v
                .parse()
                .map_err(|e| env_error("TXCORE_NETWORK", e))?;
        }
        if let Ok(v) = std::env::var("TXCORE_CONNECTION_TIMEOUT_MS") {
            self.connection_timeout_ms = parse_env("TXCORE_CONNECTION_TIMEOUT_MS", &v)?;
        }
        if let Ok(v) = std::env::var("TXCORE_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_env("TXCORE_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Ok(v) = std::env::var("TXCORE_MAX_POOL_SIZE") {
            self.pool.max_pool_size = parse_env("TXCORE_MAX_POOL_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("TXCORE_MAX_RPS") {
            self.rate_limiter.max_rps = parse_env("TXCORE_MAX_RPS", &v)?;
        }
        if let Ok(v) = std::env::var("TXCORE_MAX_RPM") {
            self.rate_limiter.max_rpm = parse_env("TXCORE_MAX_RPM", &v)?;
        }
        if let Ok(v) = std::env::var("TXCORE_CACHE_MAX_MEMORY_MB") {
            self.cache.max_memory_mb = parse_env("TXCORE_CACHE_MAX_MEMORY_MB", &v)?;
        }
        if let Ok(v) = std::env::var("TXCORE_FEE_MIN_RATE") {
            self.fee_estimator.min_fee_rate = parse_env("TXCORE_FEE_MIN_RATE", &v)?;
        }
        if let Ok(v) = std::env::var("TXCORE_DUST_THRESHOLD") {
            self.selection.dust_threshold = parse_env("TXCORE_DUST_THRESHOLD", &v)?;
        }
        if let Ok(v) = std::env::var("TXCORE_MAX_INPUTS") {
            self.selection.max_inputs = parse_env("TXCORE_MAX_INPUTS", &v)?;
        }
        Ok(())
    }

    /// `request_timeout_ms` as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `connection_timeout_ms` as a [`Duration`].
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn env_error(key: &str, message: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).expect("serializes");
        let parsed = Config::from_toml_str(&text).expect("parses back");
        assert_eq!(parsed.network, config.network);
        assert_eq!(parsed.selection.dust_threshold, config.selection.dust_threshold);
    }

    #[test]
    fn minimal_toml_fills_in_defaults() {
        let config = Config::from_toml_str("network = \"testnet\"\n").unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.pool.max_pool_size, default_max_pool_size());
        assert_eq!(config.rate_limiter.max_rps, default_max_rps());
    }

    #[test]
    fn env_override_wins_over_file_value() {
        let mut config = Config::from_toml_str("network = \"testnet\"\n").unwrap();
        std::env::set_var("TXCORE_MAX_POOL_SIZE", "99");
        config.apply_env_overrides().unwrap();
        std::env::remove_var("TXCORE_MAX_POOL_SIZE");
        assert_eq!(config.pool.max_pool_size, 99);
    }
}

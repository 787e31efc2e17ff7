//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the file named by `YIELDGUARD_CONFIG`) and
//! deserializes into strongly-typed structs. Secrets (API keys) are
//! referenced by env-var name in the config and resolved at runtime.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::adapters::defillama::{
    AdapterSettings, ADAPTER_NAME, DEFAULT_BASE_URL, DEFAULT_MIN_TVL_USD,
    DEFAULT_REQUESTS_PER_MINUTE,
};
use crate::adapters::retry::{
    RetryPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_RETRIES, DEFAULT_TIMEOUT_MS,
};
use crate::engine::scheduler::{SyncConfig, DEFAULT_INTERVAL, DEFAULT_STARTUP_DELAY};
use crate::types::{Chain, YieldError};

/// Env var that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "YIELDGUARD_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub sync: SyncSection,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_pools_path")]
    pub pools_path: String,
    /// Protocol metadata API for logos. Unset uses the built-in logos.
    #[serde(default)]
    pub logo_base_url: Option<String>,
    /// Name of the env var holding an optional API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_pools_path() -> String {
    "/pools".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            pools_path: default_pools_path(),
            logo_base_url: None,
            api_key_env: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AdapterConfig {
    pub name: String,
    pub chain: Chain,
    pub min_tvl_usd: f64,
    pub requests_per_minute: u32,
    pub retry_attempts: u32,
    pub base_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: ADAPTER_NAME.to_string(),
            chain: Chain::Stellar,
            min_tvl_usd: DEFAULT_MIN_TVL_USD,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            retry_attempts: DEFAULT_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub startup_delay_secs: u64,
    pub protocols: Vec<String>,
    pub enable_aggregated_metrics: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_INTERVAL.as_secs(),
            startup_delay_secs: DEFAULT_STARTUP_DELAY.as_secs(),
            protocols: Vec::new(),
            enable_aggregated_metrics: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Config file path: `YIELDGUARD_CONFIG` if set, else `config.toml`.
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), YieldError> {
        let invalid = |msg: &str| Err(YieldError::Configuration(msg.to_string()));

        if self.upstream.base_url.trim().is_empty() {
            return invalid("upstream.base_url must not be empty");
        }
        if self.adapter.retry_attempts == 0 {
            return invalid("adapter.retry_attempts must be at least 1");
        }
        if self.adapter.timeout_ms == 0 {
            return invalid("adapter.timeout_ms must be greater than 0");
        }
        if !self.adapter.min_tvl_usd.is_finite() || self.adapter.min_tvl_usd < 0.0 {
            return invalid("adapter.min_tvl_usd must be a non-negative number");
        }
        if self.sync.interval_secs == 0 {
            return invalid("sync.interval_secs must be greater than 0");
        }
        Ok(())
    }

    /// The upstream API key, if one is configured and present.
    pub fn api_key(&self) -> Option<SecretString> {
        let env_name = self.upstream.api_key_env.as_deref()?;
        match Self::resolve_env(env_name) {
            Ok(key) if !key.is_empty() => Some(SecretString::new(key)),
            _ => None,
        }
    }

    /// Adapter settings with the sync protocols as the allow-list.
    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            name: self.adapter.name.clone(),
            chain: self.adapter.chain,
            base_url: self.upstream.base_url.clone(),
            protocols: self.sync.protocols.clone(),
            min_tvl_usd: self.adapter.min_tvl_usd,
            requests_per_minute: self.adapter.requests_per_minute,
            retry: RetryPolicy::new(
                self.adapter.retry_attempts,
                self.adapter.base_delay_ms,
                self.adapter.timeout_ms,
            ),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            enabled: self.sync.enabled,
            interval: Duration::from_secs(self.sync.interval_secs),
            startup_delay: Duration::from_secs(self.sync.startup_delay_secs),
            protocols: self.sync.protocols.clone(),
            enable_aggregated_metrics: self.sync.enable_aggregated_metrics,
        }
    }
}

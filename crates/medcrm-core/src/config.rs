//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9001
}

fn default_workers() -> usize {
    num_cpus::get()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
        }
    }
}

/// Cache layer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Global kill switch. When false no domain is cached.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    /// Backing store connection settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Per-domain policy overrides keyed by domain name
    #[serde(default)]
    pub policies: HashMap<String, PolicyOverride>,
}

fn default_cache_enabled() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            redis: RedisConfig::default(),
            policies: HashMap::new(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (`redis://` or `rediss://` for TLS)
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Database index, overrides the one in the URL when set
    #[serde(default)]
    pub database: Option<i64>,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Interval between health probes in seconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// COUNT hint used when scanning keys for pattern deletes
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    3000
}

fn default_probe_interval() -> u64 {
    5
}

fn default_scan_count() -> usize {
    500
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            database: None,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
            probe_interval_secs: default_probe_interval(),
            scan_count: default_scan_count(),
        }
    }
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }
}

/// Partial cache policy loaded from configuration
///
/// Every field is optional; unset fields keep the compiled-in default
/// for the domain. Strategy and priority use their kebab-case names
/// (`cache-aside`, `high`, ...).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PolicyOverride {
    pub ttl_secs: Option<u64>,
    pub enabled: Option<bool>,
    pub invalidate_on: Option<Vec<String>>,
    pub evict_tenant_on: Option<Vec<String>>,
    pub strategy: Option<String>,
    pub priority: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 9001)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("cache.enabled", true)?
            .set_default("cache.redis.url", default_redis_url())?
            .set_default("cache.redis.connect_timeout_secs", 10)?
            .set_default("cache.redis.command_timeout_ms", 3000)?
            .set_default("cache.redis.probe_interval_secs", 5)?
            .set_default("cache.redis.scan_count", 500)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with MEDCRM_ prefix
            .add_source(
                Environment::with_prefix("MEDCRM")
                    .separator("__")
                    .try_parsing(true),
            )
            // Support legacy environment variables
            .set_override_option("cache.redis.url", env::var("REDIS_URL").ok())?
            .set_override_option("cache.enabled", legacy_flag("CACHE_ENABLED"))?
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Read a boolean-ish legacy environment variable
fn legacy_flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

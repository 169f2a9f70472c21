//! Configuration for etcdscout
//!
//! TOML-backed configuration with environment-variable overrides. Dots in
//! setting names map to underscores in the environment (`etcd.endpoints` →
//! `ETCD_ENDPOINTS`), and environment values take priority over the file.

mod logging;

pub use logging::{init as init_logging, LogConfig, LogLevel};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::EtcdVersion;

/// Main configuration for the etcdscout service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// etcd cluster configuration
    pub etcd: EtcdConfig,
    /// Secondary index configuration
    pub datastore: DatastoreConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// etcd cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    /// Wire protocol the cluster speaks
    pub version: EtcdVersion,
    /// Comma-separated endpoint list
    pub endpoints: String,
    /// Prefix under which keys are observed and seeded
    #[serde(default = "default_root_prefix")]
    pub root_etcd_prefix: String,
    /// Bound on the internal watch event channel
    #[serde(default = "default_channel_size")]
    pub watch_event_channel_size: usize,
    /// Keys returned per pagination call; must be strictly positive
    #[serde(default = "default_pagination_limit")]
    pub pagination_limit: i64,
    /// Seconds between connection liveness probes
    #[serde(default = "default_audit_period")]
    pub etcd_audit_period: u64,
    /// Ceiling on consecutive gap recoveries before the watch fails fast
    #[serde(default = "default_max_watch_retries")]
    pub max_watch_retries: u64,
}

impl EtcdConfig {
    /// Endpoints split out of the comma-separated config value.
    pub fn endpoint_list(&self) -> Vec<String> {
        self.endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// Secondary index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Backend tag; only `meilisearch` is supported
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub meilisearch: MeilisearchConfig,
}

/// Meilisearch backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeilisearchConfig {
    #[serde(default = "default_meilisearch_host")]
    pub host: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    /// One of `all`, `last`, `frequency`
    #[serde(default = "default_matching_strategy")]
    pub matching_strategy: String,
    /// Optional API key for protected instances
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for MeilisearchConfig {
    fn default() -> Self {
        Self {
            host: default_meilisearch_host(),
            index_name: default_index_name(),
            matching_strategy: default_matching_strategy(),
            api_key: None,
        }
    }
}

fn default_port() -> String {
    "8080".to_string()
}

fn default_root_prefix() -> String {
    "/".to_string()
}

fn default_channel_size() -> usize {
    1000
}

fn default_pagination_limit() -> i64 {
    100
}

fn default_audit_period() -> u64 {
    60
}

fn default_max_watch_retries() -> u64 {
    5
}

fn default_meilisearch_host() -> String {
    "http://127.0.0.1:7700".to_string()
}

fn default_index_name() -> String {
    "etcd-keys".to_string()
}

fn default_matching_strategy() -> String {
    "last".to_string()
}

impl Config {
    /// Load configuration from a TOML file, apply environment overrides,
    /// then validate.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take priority over file settings.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SERVER_PORT") {
            self.server.port = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            match v.as_str() {
                "debug" => self.log.level = LogLevel::Debug,
                "info" => self.log.level = LogLevel::Info,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("ETCD_VERSION") {
            match v.as_str() {
                "v2" => self.etcd.version = EtcdVersion::V2,
                "v3" => self.etcd.version = EtcdVersion::V3,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("ETCD_ENDPOINTS") {
            self.etcd.endpoints = v;
        }
        if let Ok(v) = std::env::var("ETCD_ROOT_ETCD_PREFIX") {
            self.etcd.root_etcd_prefix = v;
        }
        if let Ok(v) = std::env::var("ETCD_WATCH_EVENT_CHANNEL_SIZE") {
            if let Ok(n) = v.parse() {
                self.etcd.watch_event_channel_size = n;
            }
        }
        if let Ok(v) = std::env::var("ETCD_PAGINATION_LIMIT") {
            if let Ok(n) = v.parse() {
                self.etcd.pagination_limit = n;
            }
        }
        if let Ok(v) = std::env::var("ETCD_ETCD_AUDIT_PERIOD") {
            if let Ok(n) = v.parse() {
                self.etcd.etcd_audit_period = n;
            }
        }
        if let Ok(v) = std::env::var("ETCD_MAX_WATCH_RETRIES") {
            if let Ok(n) = v.parse() {
                self.etcd.max_watch_retries = n;
            }
        }
        if let Ok(v) = std::env::var("DATASTORE_TYPE") {
            self.datastore.kind = v;
        }
        if let Ok(v) = std::env::var("DATASTORE_MEILISEARCH_HOST") {
            self.datastore.meilisearch.host = v;
        }
        if let Ok(v) = std::env::var("DATASTORE_MEILISEARCH_INDEX_NAME") {
            self.datastore.meilisearch.index_name = v;
        }
        if let Ok(v) = std::env::var("DATASTORE_MEILISEARCH_MATCHING_STRATEGY") {
            self.datastore.meilisearch.matching_strategy = v;
        }
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together so the user
    /// can fix everything in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.port.is_empty() {
            errors.push("server port must not be empty".to_string());
        }

        if self.etcd.endpoint_list().is_empty() {
            errors.push("at least one etcd endpoint is required".to_string());
        }
        if self.etcd.pagination_limit <= 0 {
            errors.push("pagination_limit must be strictly positive".to_string());
        }
        if self.etcd.watch_event_channel_size == 0 {
            errors.push("watch_event_channel_size must be positive".to_string());
        }
        if self.etcd.etcd_audit_period == 0 {
            errors.push("etcd_audit_period must be positive".to_string());
        }
        if self.etcd.max_watch_retries == 0 {
            errors.push("max_watch_retries must be positive".to_string());
        }
        if self.etcd.root_etcd_prefix.is_empty() {
            errors.push("root_etcd_prefix must not be empty".to_string());
        }

        if self.datastore.kind != "meilisearch" {
            errors.push(format!("unsupported datastore type: {}", self.datastore.kind));
        }
        if self.datastore.meilisearch.host.is_empty() {
            errors.push("meilisearch host must not be empty".to_string());
        }
        if self.datastore.meilisearch.index_name.is_empty() {
            errors.push("meilisearch index_name must not be empty".to_string());
        }
        if !matches!(
            self.datastore.meilisearch.matching_strategy.as_str(),
            "all" | "last" | "frequency"
        ) {
            errors.push(format!(
                "unsupported matching strategy: {}",
                self.datastore.meilisearch.matching_strategy
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

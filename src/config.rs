//! Configuration management for the dispatcher
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
///
/// Holds the queue/store connection settings, dispatch policy, the remote
/// tag-check endpoint and logging options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Redis connection and key settings
    #[serde(default)]
    pub redis: RedisConfig,

    /// Dispatch policy
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Remote tag-check endpoint
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Redis connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis host
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Database holding the work queue and diagnostic side store
    #[serde(default = "default_list_db")]
    pub list_db: u32,

    /// Database holding the sink store
    #[serde(default)]
    pub store_db: u32,

    /// Key of the work queue list
    #[serde(default = "default_list_name")]
    pub list_name: String,

    /// Channel live-feed records are published on
    #[serde(default = "default_live_channel")]
    pub live_channel: String,
}

impl RedisConfig {
    /// Connection URL for database `db`.
    pub fn url(&self, db: u32) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, db)
    }
}

/// Dispatch policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// File listing allowlisted networks, one per line
    #[serde(default = "default_allowlist_path")]
    pub allowlist_path: PathBuf,

    /// Tag that forces every attribute of an event through the filter
    #[serde(default = "default_import_all_tag")]
    pub import_all_tag: String,

    /// Seconds to sleep when the queue is empty
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Side-store key for diagnostic round-trip measurements
    #[serde(default = "default_diagnostic_key")]
    pub diagnostic_key: String,
}

/// Remote tag-check endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the platform
    #[serde(default = "default_remote_url")]
    pub base_url: String,

    /// Authorization key (prefer env var MISP_DISPATCHER_AUTH_KEY)
    #[serde(default)]
    pub auth_key: String,

    /// Verify the server certificate
    #[serde(default)]
    pub verify_tls: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Enable JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,

    /// Log file path (if None, STDOUT only)
    pub file_path: Option<PathBuf>,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_list_db() -> u32 {
    3
}

fn default_list_name() -> String {
    "bufferList".to_string()
}

fn default_live_channel() -> String {
    "live".to_string()
}

fn default_allowlist_path() -> PathBuf {
    PathBuf::from("config/client_info.txt")
}

fn default_import_all_tag() -> String {
    "import-all-attributes".to_string()
}

fn default_poll_interval() -> u64 {
    1
}

fn default_diagnostic_key() -> String {
    "diagnostic_tool_response".to_string()
}

fn default_remote_url() -> String {
    "https://misp-zeromq:8443".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            list_db: default_list_db(),
            store_db: 0,
            list_name: default_list_name(),
            live_channel: default_live_channel(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            allowlist_path: default_allowlist_path(),
            import_all_tag: default_import_all_tag(),
            poll_interval_secs: default_poll_interval(),
            diagnostic_key: default_diagnostic_key(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            auth_key: String::new(),
            verify_tls: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file, environment variables, and CLI
    ///
    /// Warnings raised while loading are logged through `tracing`.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let (config, warnings) = Self::load_with_warnings(path, cli)?;
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }
        Ok(config)
    }

    /// Same as [`Config::load`], but hands the warnings back instead of
    /// logging them, for callers that load before logging is initialized.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load_with_warnings(path: &str, cli: &crate::cli::Cli) -> Result<(Self, Vec<String>)> {
        let mut warnings = Vec::new();
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            warnings.push(format!("Config file not found at {}, using defaults", path));
            Self::default()
        };

        config.apply_env_vars(&mut warnings);
        config.apply_cli_overrides(cli);

        Ok((config, warnings))
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DispatchError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| DispatchError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self, warnings: &mut Vec<String>) {
        if let Ok(host) = std::env::var("MISP_DISPATCHER_REDIS_HOST") {
            self.redis.host = host;
        }

        if let Ok(port) = std::env::var("MISP_DISPATCHER_REDIS_PORT") {
            match port.parse::<u16>() {
                Ok(v) => self.redis.port = v,
                Err(_) => warnings.push(format!("Invalid MISP_DISPATCHER_REDIS_PORT: {}", port)),
            }
        }

        if let Ok(list_name) = std::env::var("MISP_DISPATCHER_LIST_NAME") {
            self.redis.list_name = list_name;
        }

        if let Ok(path) = std::env::var("MISP_DISPATCHER_ALLOWLIST") {
            self.dispatcher.allowlist_path = PathBuf::from(path);
        }

        if let Ok(tag) = std::env::var("MISP_DISPATCHER_IMPORT_ALL_TAG") {
            self.dispatcher.import_all_tag = tag;
        }

        if let Ok(interval) = std::env::var("MISP_DISPATCHER_POLL_INTERVAL") {
            match interval.parse::<u64>() {
                Ok(v) => {
                    self.dispatcher.poll_interval_secs = v;
                    tracing::debug!(
                        poll_interval_secs = v,
                        "Env override: MISP_DISPATCHER_POLL_INTERVAL"
                    );
                }
                Err(_) => {
                    warnings.push(format!("Invalid MISP_DISPATCHER_POLL_INTERVAL: {}", interval))
                }
            }
        }

        if let Ok(url) = std::env::var("MISP_DISPATCHER_REMOTE_URL") {
            self.remote.base_url = url;
        }

        if let Ok(key) = std::env::var("MISP_DISPATCHER_AUTH_KEY") {
            self.remote.auth_key = key;
        }

        if let Ok(level) = std::env::var("MISP_DISPATCHER_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json_logs) = std::env::var("MISP_DISPATCHER_JSON_LOGS") {
            match json_logs.parse::<bool>() {
                Ok(v) => self.logging.json_format = v,
                Err(_) => warnings.push(format!("Invalid MISP_DISPATCHER_JSON_LOGS: {}", json_logs)),
            }
        }

        if let Ok(log_file) = std::env::var("MISP_DISPATCHER_LOG_FILE") {
            self.logging.file_path = Some(PathBuf::from(log_file));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(sleep) = cli.sleep {
            self.dispatcher.poll_interval_secs = sleep;
        }

        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.redis.list_name.is_empty() {
            return Err(DispatchError::Config("redis.list_name cannot be empty".to_string()).into());
        }

        if self.dispatcher.import_all_tag.is_empty() {
            return Err(DispatchError::Config(
                "dispatcher.import_all_tag cannot be empty".to_string(),
            )
            .into());
        }

        if self.dispatcher.poll_interval_secs == 0 {
            return Err(DispatchError::Config(
                "dispatcher.poll_interval_secs must be greater than 0".to_string(),
            )
            .into());
        }

        match url::Url::parse(&self.remote.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(DispatchError::Config(format!(
                    "remote.base_url must be http(s), got scheme {}",
                    url.scheme()
                ))
                .into())
            }
            Err(e) => {
                return Err(
                    DispatchError::Config(format!("Invalid remote.base_url: {}", e)).into(),
                )
            }
        }

        if self.remote.auth_key.is_empty() {
            tracing::warn!("remote.auth_key is empty; remote tag checks will be unauthenticated");
        }

        Ok(())
    }
}

use config::{Environment, File, FileFormat};
use log::{debug, warn};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MetricsError, Result};
use crate::retry::{RetryConfig, parse_delays};
use crate::storage::SnapshotConfig;

/// Logging level
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(try_from = "String")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(MetricsError::Config(format!("Invalid log level: {}", other))),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = MetricsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Source of configuration, applied in insertion order
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// File path; format follows the extension
    File(PathBuf),
    /// Process environment, keys lowercased (`REPORT_INTERVAL` → `report_interval`)
    Environment,
    /// Fixed variables in place of the process environment
    EnvironmentMap(HashMap<String, String>),
    /// Inline TOML
    Toml(String),
}

/// Configuration builder
pub struct ConfigBuilder<T: DeserializeOwned> {
    sources: Vec<ConfigSource>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned + Debug> Default for ConfigBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Debug> ConfigBuilder<T> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.sources.push(ConfigSource::File(path.as_ref().to_path_buf()));
        self
    }

    pub fn add_env(mut self) -> Self {
        self.sources.push(ConfigSource::Environment);
        self
    }

    pub fn add_env_map(mut self, vars: HashMap<String, String>) -> Self {
        self.sources.push(ConfigSource::EnvironmentMap(vars));
        self
    }

    pub fn add_toml(mut self, toml: impl Into<String>) -> Self {
        self.sources.push(ConfigSource::Toml(toml.into()));
        self
    }

    pub fn build(self) -> Result<T> {
        load_config(self.sources)
    }
}

fn file_format(path: &Path) -> Result<FileFormat> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .ok_or_else(|| {
            MetricsError::Config(format!("Configuration file has no extension: {}", path.display()))
        })?;

    match extension.as_str() {
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        other => Err(MetricsError::Config(format!("Unsupported config format: {}", other))),
    }
}

/// Merge the sources in order and deserialize the result
///
/// Fields missing from every source keep their serde defaults.
pub fn load_config<T>(sources: Vec<ConfigSource>) -> Result<T>
where
    T: DeserializeOwned + Debug,
{
    let mut builder = config::Config::builder();

    for source in sources {
        match source {
            ConfigSource::File(path) => {
                if !path.exists() {
                    return Err(MetricsError::Config(format!(
                        "Configuration file not found: {}",
                        path.display()
                    )));
                }
                debug!("Loading configuration from file: {}", path.display());
                let format = file_format(&path)?;
                builder = builder.add_source(File::from(path).format(format));
            }
            ConfigSource::Environment => {
                debug!("Loading configuration from environment");
                builder = builder.add_source(Environment::default().try_parsing(true));
            }
            ConfigSource::EnvironmentMap(vars) => {
                builder = builder.add_source(
                    Environment::default().source(Some(vars)).try_parsing(true),
                );
            }
            ConfigSource::Toml(toml) => {
                builder = builder.add_source(File::from_str(&toml, FileFormat::Toml));
            }
        }
    }

    let config = builder
        .build()
        .map_err(|e| MetricsError::Config(format!("Failed to build configuration: {}", e)))?;

    let result = config
        .try_deserialize()
        .map_err(|e| MetricsError::Config(format!("Failed to deserialize configuration: {}", e)))?;

    debug!("Configuration loaded: {:?}", result);
    Ok(result)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn backoff(intervals: &str, enabled: bool) -> Result<RetryConfig> {
    if !enabled {
        return Ok(RetryConfig::disabled());
    }
    parse_delays(intervals)
}

/// Agent configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Collector `host:port`
    pub address: String,
    /// Seconds between samples
    pub poll_interval: u64,
    /// Seconds between sends, per sender
    pub report_interval: u64,
    /// Number of concurrent senders; values below 1 mean 1
    pub rate_limit: i64,
    /// Shared key for the `HashSHA256` header
    pub key: Option<String>,
    /// PEM public key file; enables body encryption
    pub crypto_key: Option<PathBuf>,
    pub compress_request: bool,
    /// Comma-separated backoff delays in seconds
    pub backoff_intervals: String,
    pub backoff_retries: bool,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
    pub log_level: LogLevel,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            poll_interval: 2,
            report_interval: 10,
            rate_limit: 1,
            key: None,
            crypto_key: None,
            compress_request: true,
            backoff_intervals: "1,3,5".to_string(),
            backoff_retries: true,
            request_timeout: 30,
            log_level: LogLevel::Info,
        }
    }
}

impl AgentConfig {
    /// Defaults, then the optional file, then the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::<Self>::new();
        if let Some(path) = file {
            builder = builder.add_file(path);
        }
        builder.add_env().build()
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(MetricsError::Config("address must not be empty".to_string()));
        }
        if self.poll_interval == 0 || self.report_interval == 0 {
            return Err(MetricsError::Config(
                "poll and report intervals must be at least one second".to_string(),
            ));
        }
        self.retry()?;
        Ok(())
    }

    pub fn workers(&self) -> usize {
        if self.rate_limit < 1 {
            warn!("rate_limit {} is below 1, using 1", self.rate_limit);
            1
        } else {
            self.rate_limit as usize
        }
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn hash_key(&self) -> Option<String> {
        non_empty(&self.key).map(str::to_string)
    }

    pub fn retry(&self) -> Result<RetryConfig> {
        backoff(&self.backoff_intervals, self.backoff_retries)
    }
}

/// Server configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen `host:port`
    pub address: String,
    /// Seconds between snapshot saves; 0 saves on every write
    pub store_interval: u64,
    /// Snapshot file; empty disables snapshots
    pub file_storage_path: String,
    /// Load the snapshot file on startup
    pub restore: bool,
    /// PostgreSQL DSN; selects the database backend when set
    pub database_dsn: Option<String>,
    /// Shared key for verifying the `HashSHA256` header
    pub key: Option<String>,
    /// PEM private key file; enables body decryption
    pub crypto_key: Option<PathBuf>,
    pub backoff_intervals: String,
    pub backoff_retries: bool,
    pub log_level: LogLevel,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:8080".to_string(),
            store_interval: 300,
            file_storage_path: "/tmp/metrics-db.json".to_string(),
            restore: true,
            database_dsn: None,
            key: None,
            crypto_key: None,
            backoff_intervals: "1,3,5".to_string(),
            backoff_retries: true,
            log_level: LogLevel::Info,
        }
    }
}

impl ServerConfig {
    /// Defaults, then the optional file, then the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = ConfigBuilder::<Self>::new();
        if let Some(path) = file {
            builder = builder.add_file(path);
        }
        builder.add_env().build()
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(MetricsError::Config("address must not be empty".to_string()));
        }
        self.retry()?;
        Ok(())
    }

    pub fn dsn(&self) -> Option<&str> {
        non_empty(&self.database_dsn)
    }

    pub fn hash_key(&self) -> Option<String> {
        non_empty(&self.key).map(str::to_string)
    }

    pub fn snapshot(&self) -> SnapshotConfig {
        SnapshotConfig {
            path: PathBuf::from(self.file_storage_path.trim()),
            interval: Duration::from_secs(self.store_interval),
            restore: self.restore,
        }
    }

    pub fn retry(&self) -> Result<RetryConfig> {
        backoff(&self.backoff_intervals, self.backoff_retries)
    }
}

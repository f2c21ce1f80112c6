//! Engine configuration
//!
//! Every section carries serde defaults so partial JSON/TOML files load.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AUTO_SYNC_INTERVAL_SECS, DEFAULT_BASE_DELAY_MS, DEFAULT_CALL_TIMEOUT_SECS,
    DEFAULT_HEALTH_PATH, DEFAULT_JITTER_FACTOR, DEFAULT_JOIN_TIMEOUT_SECS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_MS, DEFAULT_POOL_SIZE, DEFAULT_PROBE_INTERVAL_SECS, DEFAULT_REMOTE_BASE_URL,
    DEFAULT_REMOTE_TIMEOUT_SECS, DEFAULT_STORE_PATH, MAX_MAX_ATTEMPTS, MIN_MAX_ATTEMPTS,
};
use crate::errors::{OffsyncError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub retry: RetryConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.sync.validate()?;
        self.retry.validate()?;
        self.remote.validate()?;
        Ok(())
    }
}

/// Which persisted store backs the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    JsonFile,
    /// Non-durable; tests and demos only.
    Memory,
}

crate::impl_domain_state_conversions!(StorageBackend {
    Sqlite => "sqlite",
    JsonFile => "json_file",
    Memory => "memory",
});

/// Queue store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub path: PathBuf,
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: PathBuf::from(DEFAULT_STORE_PATH),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.backend != StorageBackend::Memory && self.path.as_os_str().is_empty() {
            return Err(OffsyncError::Config("storage.path must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(OffsyncError::Config("storage.pool_size must be greater than 0".into()));
        }
        Ok(())
    }
}

/// How a transiently failing head action affects the rest of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Failed actions are set aside with their retry timer; later actions
    /// keep draining.
    #[default]
    SkipAhead,
    /// Nothing behind the head is dispatched until the head leaves the queue.
    StrictFifo,
}

crate::impl_domain_state_conversions!(OrderingPolicy {
    SkipAhead => "skip_ahead",
    StrictFifo => "strict_fifo",
});

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub ordering: OrderingPolicy,
    pub call_timeout_secs: u64,
    /// Periodic drain while online; 0 disables the tick.
    pub auto_sync_interval_secs: u64,
    pub join_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingPolicy::default(),
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            auto_sync_interval_secs: DEFAULT_AUTO_SYNC_INTERVAL_SECS,
            join_timeout_secs: DEFAULT_JOIN_TIMEOUT_SECS,
        }
    }
}

impl SyncConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        (self.auto_sync_interval_secs > 0).then(|| Duration::from_secs(self.auto_sync_interval_secs))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.call_timeout_secs == 0 {
            return Err(OffsyncError::Config(
                "sync.call_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(OffsyncError::Config(format!(
                "retry.max_attempts must be between {} and {}, got {}",
                MIN_MAX_ATTEMPTS, MAX_MAX_ATTEMPTS, self.max_attempts
            )));
        }
        if self.base_delay_ms == 0 {
            return Err(OffsyncError::Config("retry.base_delay_ms must be greater than 0".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(OffsyncError::Config(format!(
                "retry.base_delay_ms ({}) cannot be greater than retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(OffsyncError::Config(format!(
                "retry.jitter_factor must be between 0.0 and 1.0, got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Remote mutation API configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub health_path: String,
    /// Liveness probe period; 0 disables the probe.
    pub probe_interval_secs: u64,
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            probe_interval_secs: DEFAULT_PROBE_INTERVAL_SECS,
            api_token: None,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_secs > 0).then(|| Duration::from_secs(self.probe_interval_secs))
    }

    fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(OffsyncError::Config(format!(
                "remote.base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(OffsyncError::Config("remote.timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing-subscriber` env-filter directive; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: false }
    }
}

//! Configuration loader
//!
//! Loads engine configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Every loaded configuration is validated before it is returned.
//!
//! ## Environment Variables
//! Required for environment loading:
//! - `OFFSYNC_STORE_PATH`: Queue store file path
//! - `OFFSYNC_REMOTE_URL`: Base URL of the remote mutation API
//!
//! Optional (defaults apply when unset):
//! - `OFFSYNC_STORE_BACKEND`: `sqlite`, `json_file` or `memory`
//! - `OFFSYNC_STORE_POOL_SIZE`: SQLite connection pool size
//! - `OFFSYNC_SYNC_ORDERING`: `skip_ahead` or `strict_fifo`
//! - `OFFSYNC_SYNC_CALL_TIMEOUT_SECS`: Per-action executor timeout
//! - `OFFSYNC_SYNC_INTERVAL_SECS`: Periodic drain interval (0 disables)
//! - `OFFSYNC_RETRY_MAX_ATTEMPTS`, `OFFSYNC_RETRY_BASE_DELAY_MS`,
//!   `OFFSYNC_RETRY_MAX_DELAY_MS`, `OFFSYNC_RETRY_JITTER`
//! - `OFFSYNC_REMOTE_TIMEOUT_SECS`, `OFFSYNC_REMOTE_HEALTH_PATH`,
//!   `OFFSYNC_PROBE_INTERVAL_SECS` (0 disables the probe)
//! - `OFFSYNC_API_TOKEN`: Bearer token; also applied on top of file configs
//! - `OFFSYNC_LOG_FILTER`, `OFFSYNC_LOG_JSON`
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./offsync.json` or `./offsync.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. `../config.json` or `../config.toml` (parent directory)
//! 4. Relative to executable location

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use offsync_domain::{Config, OffsyncError, Result};

const API_TOKEN_VAR: &str = "OFFSYNC_API_TOKEN";

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `OffsyncError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - A value fails validation
pub fn load() -> Result<Config> {
    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// `OFFSYNC_STORE_PATH` and `OFFSYNC_REMOTE_URL` must be present; every
/// other variable overrides its default when set.
///
/// # Errors
/// Returns `OffsyncError::Config` if required variables are missing
/// or have invalid values.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();

    config.storage.path = PathBuf::from(env_var("OFFSYNC_STORE_PATH")?);
    config.remote.base_url = env_var("OFFSYNC_REMOTE_URL")?;

    if let Some(backend) = env_parse("OFFSYNC_STORE_BACKEND")? {
        config.storage.backend = backend;
    }
    if let Some(pool_size) = env_parse("OFFSYNC_STORE_POOL_SIZE")? {
        config.storage.pool_size = pool_size;
    }

    if let Some(ordering) = env_parse("OFFSYNC_SYNC_ORDERING")? {
        config.sync.ordering = ordering;
    }
    if let Some(timeout) = env_parse("OFFSYNC_SYNC_CALL_TIMEOUT_SECS")? {
        config.sync.call_timeout_secs = timeout;
    }
    if let Some(interval) = env_parse("OFFSYNC_SYNC_INTERVAL_SECS")? {
        config.sync.auto_sync_interval_secs = interval;
    }

    if let Some(max_attempts) = env_parse("OFFSYNC_RETRY_MAX_ATTEMPTS")? {
        config.retry.max_attempts = max_attempts;
    }
    if let Some(base_delay) = env_parse("OFFSYNC_RETRY_BASE_DELAY_MS")? {
        config.retry.base_delay_ms = base_delay;
    }
    if let Some(max_delay) = env_parse("OFFSYNC_RETRY_MAX_DELAY_MS")? {
        config.retry.max_delay_ms = max_delay;
    }
    if let Some(jitter) = env_parse("OFFSYNC_RETRY_JITTER")? {
        config.retry.jitter_factor = jitter;
    }

    if let Some(timeout) = env_parse("OFFSYNC_REMOTE_TIMEOUT_SECS")? {
        config.remote.timeout_secs = timeout;
    }
    if let Ok(health_path) = std::env::var("OFFSYNC_REMOTE_HEALTH_PATH") {
        config.remote.health_path = health_path;
    }
    if let Some(interval) = env_parse("OFFSYNC_PROBE_INTERVAL_SECS")? {
        config.remote.probe_interval_secs = interval;
    }
    config.remote.api_token = std::env::var(API_TOKEN_VAR).ok();

    if let Ok(filter) = std::env::var("OFFSYNC_LOG_FILTER") {
        config.logging.filter = filter;
    }
    config.logging.json = env_bool("OFFSYNC_LOG_JSON", config.logging.json);

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
/// `OFFSYNC_API_TOKEN` fills in the token when the file has none, so the
/// secret can stay out of the file.
///
/// # Errors
/// Returns `OffsyncError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - A value fails validation
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(OffsyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            OffsyncError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| OffsyncError::Config(format!("Failed to read config file: {}", e)))?;

    let mut config = parse_config(&contents, &config_path)?;
    if config.remote.api_token.is_none() {
        config.remote.api_token = std::env::var(API_TOKEN_VAR).ok();
    }

    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| OffsyncError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| OffsyncError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(OffsyncError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(candidate_files(&cwd));
        candidates.push(cwd.join("../config.json"));
        candidates.push(cwd.join("../config.toml"));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(candidate_files(exe_dir));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn candidate_files(dir: &Path) -> [PathBuf; 4] {
    [
        dir.join("offsync.json"),
        dir.join("offsync.toml"),
        dir.join("config.json"),
        dir.join("config.toml"),
    ]
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        OffsyncError::Config(format!("Missing required environment variable: {}", key))
    })
}

/// Parse an optional environment variable; unset is `Ok(None)`.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| OffsyncError::Config(format!("Invalid value for {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

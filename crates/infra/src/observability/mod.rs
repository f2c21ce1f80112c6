//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured filter so operators can raise
//! verbosity without touching config files.

use offsync_domain::{LoggingConfig, OffsyncError, Result};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// Returns `Ok(false)` when a global subscriber was already installed, so
/// hosts and tests can call this more than once.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool> {
    let env_directive = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(env_directive.as_deref(), &config.filter)?;

    let installed = if config.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).with_target(true).try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init()
    };

    match installed {
        Ok(()) => {
            tracing::debug!(json = config.json, "Tracing subscriber installed");
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}

/// Environment directive if set and non-empty, otherwise the configured one.
fn build_filter(env_directive: Option<&str>, configured: &str) -> Result<EnvFilter> {
    let directive =
        env_directive.map(str::trim).filter(|value| !value.is_empty()).unwrap_or(configured);
    EnvFilter::try_new(directive)
        .map_err(|e| OffsyncError::Config(format!("Invalid log filter '{directive}': {e}")))
}

//! Remote liveness probing.
//!
//! [`ProbeLoop`] periodically asks a [`LivenessProbe`] whether the remote
//! answers and feeds the result into the connectivity monitor's service
//! input. It follows the same lifecycle as the coordinator: join handles
//! are tracked, cancellation is explicit and stopping is bounded by a
//! join timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offsync_core::{ConnectivityMonitor, LivenessProbe};
use offsync_domain::constants::{DEFAULT_JOIN_TIMEOUT_SECS, DEFAULT_PROBE_INTERVAL_SECS};
use offsync_domain::{OffsyncError, RemoteConfig, Result};
use reqwest::Method;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::http::HttpClient;

/// GETs `{base_url}{health_path}`; any 2xx counts as alive.
pub struct HttpLivenessProbe {
    http: HttpClient,
    url: String,
}

impl HttpLivenessProbe {
    pub fn new(http: HttpClient, base_url: &str, health_path: &str) -> Self {
        let url = format!("{}{}", base_url.trim_end_matches('/'), health_path);
        Self { http, url }
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let http = HttpClient::builder().timeout(config.timeout()).build()?;
        Ok(Self::new(http, &config.base_url, &config.health_path))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn probe(&self) -> bool {
        match self.http.send(self.http.request(Method::GET, &self.url)).await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(status = %response.status(), "Liveness probe returned non-success status");
                false
            }
            Err(err) => {
                debug!(error = %err, "Liveness probe failed");
                false
            }
        }
    }
}

/// Configuration for the probe loop.
#[derive(Debug, Clone)]
pub struct ProbeLoopConfig {
    pub interval: Duration,
    pub join_timeout: Duration,
}

impl Default for ProbeLoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
        }
    }
}

/// Periodic liveness probe with explicit lifecycle management.
pub struct ProbeLoop {
    probe: Arc<dyn LivenessProbe>,
    monitor: Arc<ConnectivityMonitor>,
    config: ProbeLoopConfig,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ProbeLoop {
    pub fn new(
        probe: Arc<dyn LivenessProbe>,
        monitor: Arc<ConnectivityMonitor>,
        config: ProbeLoopConfig,
    ) -> Self {
        Self { probe, monitor, config, cancellation: CancellationToken::new(), task_handle: None }
    }

    /// Probe once and report the result to the monitor.
    ///
    /// Skipped while the platform reports no network; the service input is
    /// left as it was.
    pub async fn probe_once(&self) -> Option<bool> {
        Self::run_probe(&self.probe, &self.monitor).await
    }

    /// Start the probe loop, spawning the background task. Starting a running
    /// loop is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("Liveness probe loop already running");
            return Ok(());
        }
        if self.config.interval.is_zero() {
            return Err(OffsyncError::Config("probe interval must be greater than 0".to_string()));
        }

        info!(interval_secs = self.config.interval.as_secs(), "Starting liveness probe loop");

        // Create fresh cancellation token
        self.cancellation = CancellationToken::new();

        let probe = Arc::clone(&self.probe);
        let monitor = Arc::clone(&self.monitor);
        let interval = self.config.interval;
        let cancel = self.cancellation.clone();

        let handle = tokio::spawn(async move {
            Self::probe_loop(probe, monitor, interval, cancel).await;
        });

        self.task_handle = Some(handle);
        Ok(())
    }

    /// Stop the probe loop and wait for the task to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.task_handle.take() else {
            return Err(OffsyncError::InvalidState("probe loop not running".to_string()));
        };

        info!("Stopping liveness probe loop");
        self.cancellation.cancel();

        match tokio::time::timeout(self.config.join_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Probe task panicked: {}", e);
                return Err(OffsyncError::Internal("probe task panicked".to_string()));
            }
            Err(_) => {
                warn!("Probe task did not complete within timeout");
                return Err(OffsyncError::Internal("probe task timeout".to_string()));
            }
        }

        self.cancellation = CancellationToken::new();
        info!("Liveness probe loop stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    async fn probe_loop(
        probe: Arc<dyn LivenessProbe>,
        monitor: Arc<ConnectivityMonitor>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Probe loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = Self::run_probe(&probe, &monitor) => {}
                    }
                }
            }
        }
    }

    async fn run_probe(
        probe: &Arc<dyn LivenessProbe>,
        monitor: &ConnectivityMonitor,
    ) -> Option<bool> {
        if !monitor.is_network_reachable() {
            debug!("Network unreachable; skipping liveness probe");
            return None;
        }

        let alive = probe.probe().await;
        if monitor.set_service_reachable(alive) {
            info!(alive, "Liveness probe changed service reachability");
        }
        Some(alive)
    }
}

impl Drop for ProbeLoop {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("ProbeLoop dropped while running; cancelling task");
            self.cancellation.cancel();
        }
    }
}

//! Engine bootstrap
//!
//! Wires the configured store, queue, connectivity monitor, retry policy,
//! executor, coordinator and liveness probe into one handle a host
//! application owns.
//!
//! # Example
//!
//! ```no_run
//! use offsync_domain::ActionType;
//! use offsync_infra::engine::Engine;
//! use serde_json::json;
//!
//! # async fn example() -> offsync_domain::Result<()> {
//! let config = offsync_infra::config::load()?;
//! let mut engine = Engine::build(&config).await?;
//! engine.start().await?;
//!
//! engine.enqueue(ActionType::new("create_record"), json!({ "title": "Inspection" })).await?;
//! engine.set_network_reachable(true);
//!
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use offsync_core::{
    ActionExecutor, ActionHandler, ActionQueue, ActionStore, Clock, ConnectivityMonitor,
    CoordinatorConfig, LivenessProbe, MemoryActionStore, RemoteMutationApi, RemoteMutationHandler,
    RetryPolicy, SyncCoordinator, SystemClock,
};
use offsync_domain::constants::{ACTION_CREATE_RECORD, ACTION_UPDATE_RECORD, ACTION_UPLOAD_BLOB};
use offsync_domain::{ActionType, Config, QueueSummary, Result, StorageBackend, SyncSession};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::database::SqliteActionStore;
use crate::errors::map_join_error;
use crate::file_store::JsonFileActionStore;
use crate::remote::{HttpLivenessProbe, HttpMutationClient, ProbeLoop, ProbeLoopConfig};

/// Builder for [`Engine`]; every override is optional.
pub struct EngineBuilder {
    config: Config,
    store: Option<Arc<dyn ActionStore>>,
    executor: Option<ActionExecutor>,
    remote: Option<Arc<dyn RemoteMutationApi>>,
    action_types: Vec<ActionType>,
    probe: Option<Arc<dyn LivenessProbe>>,
    clock: Option<Arc<dyn Clock>>,
    initially_online: bool,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            executor: None,
            remote: None,
            action_types: vec![
                ActionType::new(ACTION_CREATE_RECORD),
                ActionType::new(ACTION_UPDATE_RECORD),
                ActionType::new(ACTION_UPLOAD_BLOB),
            ],
            probe: None,
            clock: None,
            initially_online: false,
        }
    }

    /// Use `store` instead of the one `storage.backend` selects.
    pub fn store(mut self, store: Arc<dyn ActionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a fully configured executor; `remote` and `action_types` are
    /// then ignored.
    pub fn executor(mut self, executor: ActionExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replace the HTTP mutation client.
    pub fn remote(mut self, remote: Arc<dyn RemoteMutationApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Action types routed to the remote mutation API.
    pub fn action_types<I, T>(mut self, action_types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ActionType>,
    {
        self.action_types = action_types.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the HTTP liveness probe. Only used when
    /// `remote.probe_interval_secs` is non-zero.
    pub fn probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Initial platform network signal. Defaults to offline until the host
    /// reports otherwise.
    pub fn initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    #[instrument(skip(self), fields(backend = %self.config.storage.backend))]
    pub async fn build(self) -> Result<Engine> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => open_store(&config).await?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let queue = Arc::new(ActionQueue::open_with_clock(store, Arc::clone(&clock)).await?);
        let monitor = Arc::new(ConnectivityMonitor::with_clock(self.initially_online, clock));
        let retry = RetryPolicy::from_config(&config.retry)?;

        let executor = match self.executor {
            Some(executor) => executor,
            None => {
                let remote: Arc<dyn RemoteMutationApi> = match self.remote {
                    Some(remote) => remote,
                    None => Arc::new(HttpMutationClient::from_config(&config.remote)?),
                };
                let handler: Arc<dyn ActionHandler> = Arc::new(RemoteMutationHandler::new(remote));
                let mut executor = ActionExecutor::new();
                for action_type in self.action_types {
                    executor.register(action_type, Arc::clone(&handler));
                }
                executor
            }
        };

        let coordinator = SyncCoordinator::new(
            Arc::clone(&queue),
            Arc::new(executor),
            retry,
            Arc::clone(&monitor),
            CoordinatorConfig::from(&config.sync),
        );

        let probe_loop = match config.remote.probe_interval() {
            Some(interval) => {
                let probe: Arc<dyn LivenessProbe> = match self.probe {
                    Some(probe) => probe,
                    None => Arc::new(HttpLivenessProbe::from_config(&config.remote)?),
                };
                Some(ProbeLoop::new(
                    probe,
                    Arc::clone(&monitor),
                    ProbeLoopConfig { interval, join_timeout: config.sync.join_timeout() },
                ))
            }
            None => None,
        };

        info!(
            ordering = %config.sync.ordering,
            probe = probe_loop.is_some(),
            "Offsync engine built"
        );

        Ok(Engine { config, queue, monitor, coordinator, probe_loop })
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn ActionStore>> {
    let storage = &config.storage;
    match storage.backend {
        StorageBackend::Sqlite => {
            let path = storage.path.clone();
            let pool_size = storage.pool_size;
            let store = tokio::task::spawn_blocking(move || SqliteActionStore::open(path, pool_size))
                .await
                .map_err(map_join_error)??;
            Ok(Arc::new(store))
        }
        StorageBackend::JsonFile => Ok(Arc::new(JsonFileActionStore::open(&storage.path).await?)),
        StorageBackend::Memory => {
            warn!("Using the in-memory action store; queued actions will not survive a restart");
            Ok(Arc::new(MemoryActionStore::new()))
        }
    }
}

/// A running offline queue: capture, connectivity tracking and replay.
pub struct Engine {
    config: Config,
    queue: Arc<ActionQueue>,
    monitor: Arc<ConnectivityMonitor>,
    coordinator: SyncCoordinator,
    probe_loop: Option<ProbeLoop>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Build with every default for `config`.
    pub async fn build(config: &Config) -> Result<Self> {
        EngineBuilder::new(config.clone()).build().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    /// Capture a mutation; see [`ActionQueue::enqueue`].
    pub async fn enqueue(&self, action_type: ActionType, payload: Value) -> Result<String> {
        self.queue.enqueue(action_type, payload).await
    }

    /// Forward the platform reachability signal.
    pub fn set_network_reachable(&self, reachable: bool) {
        self.monitor.set_network_reachable(reachable);
    }

    pub fn sync_now(&self) {
        self.coordinator.sync_now();
    }

    /// Drain on the caller's task and wait for the session to end.
    pub async fn drain(&self) -> SyncSession {
        self.coordinator.drain().await
    }

    pub async fn summary(&self) -> QueueSummary {
        self.queue.summary().await
    }

    pub fn is_running(&self) -> bool {
        self.coordinator.is_running()
    }

    /// Start the coordinator and, when configured, the liveness probe.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        self.coordinator.start().await?;
        if let Some(probe_loop) = self.probe_loop.as_mut() {
            if let Err(err) = probe_loop.start().await {
                warn!(error = %err, "Liveness probe failed to start; stopping coordinator");
                self.coordinator.stop().await?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop the probe, then the coordinator. Both are attempted even if the
    /// first fails; the first error is returned.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        let probe_result = match self.probe_loop.as_mut() {
            Some(probe_loop) if probe_loop.is_running() => probe_loop.stop().await,
            _ => Ok(()),
        };
        let coordinator_result = self.coordinator.stop().await;
        probe_result.and(coordinator_result)
    }
}

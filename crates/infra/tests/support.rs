//! Shared fixtures for the infrastructure integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use offsync_core::testing::FakeRemote;
use offsync_core::{
    ActionExecutor, ActionQueue, ActionStore, ConnectivityMonitor, CoordinatorConfig,
    MemoryActionStore, RemoteMutationHandler, RetryPolicy, SyncCoordinator, TokioClock,
};
use offsync_domain::{ActionType, OrderingPolicy};
use offsync_infra::{JsonFileActionStore, SqliteActionStore};
use serde_json::json;
use tempfile::TempDir;

/// Action type every harness routes to the fake remote.
pub const ACTION: &str = "update_job";

/// Temporary directory that outlives the stores opened inside it.
pub struct StoreDir {
    dir: TempDir,
}

impl StoreDir {
    pub fn new() -> Self {
        Self { dir: TempDir::new().expect("temp dir should be created") }
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.dir.path().join("queue.db")
    }

    pub fn json_path(&self) -> PathBuf {
        self.dir.path().join("queue.json")
    }

    pub fn open_sqlite(&self) -> Arc<SqliteActionStore> {
        Arc::new(SqliteActionStore::open(self.sqlite_path(), 2).expect("sqlite store should open"))
    }

    pub async fn open_json(&self) -> Arc<JsonFileActionStore> {
        Arc::new(JsonFileActionStore::open(self.json_path()).await.expect("json store should open"))
    }
}

impl Default for StoreDir {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue, monitor, fake remote and coordinator wired the way the engine
/// wires them, with a deterministic retry policy (100ms base, no jitter).
pub struct SyncHarness {
    pub queue: Arc<ActionQueue>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub remote: Arc<FakeRemote>,
    pub coordinator: SyncCoordinator,
}

impl SyncHarness {
    pub async fn new(
        store: Arc<dyn ActionStore>,
        online: bool,
        ordering: OrderingPolicy,
        max_attempts: u32,
    ) -> Self {
        let clock = Arc::new(TokioClock::new());
        let queue = Arc::new(
            ActionQueue::open_with_clock(store, clock.clone()).await.expect("queue should open"),
        );
        let monitor = Arc::new(ConnectivityMonitor::with_clock(online, clock));
        let remote = Arc::new(FakeRemote::new());
        let executor = ActionExecutor::new()
            .with_handler(ACTION, Arc::new(RemoteMutationHandler::new(remote.clone())));
        let retry = RetryPolicy::custom(max_attempts, Duration::from_millis(100), Duration::from_secs(2))
            .expect("retry policy should be valid")
            .without_jitter();
        let config = CoordinatorConfig {
            ordering,
            call_timeout: Duration::from_secs(5),
            auto_sync_interval: None,
            ..CoordinatorConfig::default()
        };
        let coordinator =
            SyncCoordinator::new(Arc::clone(&queue), Arc::new(executor), retry, Arc::clone(&monitor), config);

        Self { queue, monitor, remote, coordinator }
    }

    pub async fn in_memory(online: bool, ordering: OrderingPolicy) -> Self {
        Self::new(Arc::new(MemoryActionStore::new()), online, ordering, 5).await
    }

    /// Enqueue job `n` and return its id.
    pub async fn enqueue(&self, n: u64) -> String {
        self.queue.enqueue(ActionType::new(ACTION), json!({ "job": n })).await.expect("enqueue should succeed")
    }

    /// Idempotency keys in call order.
    pub fn called_keys(&self) -> Vec<String> {
        self.remote.calls().into_iter().map(|call| call.idempotency_key).collect()
    }

    /// Wait (up to five seconds) until the queue is empty.
    pub async fn wait_until_empty(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.queue.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue should drain");
    }
}

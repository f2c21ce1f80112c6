//! Single-flight drain worker with explicit lifecycle management.
//!
//! The coordinator owns the decision of *when* to replay queued actions:
//! on reconnect, on an explicit "sync now", after new work is enqueued, and
//! on an optional periodic tick. Only one drain runs at a time; a drain
//! dispatches one action at a time and records every outcome in the queue
//! before moving on.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use offsync_core::{
//!     ActionExecutor, ActionQueue, ConnectivityMonitor, CoordinatorConfig, MemoryActionStore,
//!     RetryPolicy, SyncCoordinator,
//! };
//!
//! # async fn example() -> offsync_domain::Result<()> {
//! let queue = Arc::new(ActionQueue::open(Arc::new(MemoryActionStore::new())).await?);
//! let monitor = Arc::new(ConnectivityMonitor::new(false));
//! let mut coordinator = SyncCoordinator::new(
//!     queue,
//!     Arc::new(ActionExecutor::new()),
//!     RetryPolicy::default(),
//!     Arc::clone(&monitor),
//!     CoordinatorConfig::default(),
//! );
//!
//! coordinator.start().await?;
//! monitor.set_network_reachable(true); // triggers a drain
//! coordinator.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use offsync_domain::{
    ConnectivityState, ErrorClass, OffsyncError, OrderingPolicy, PendingAction, Result,
    SessionEnd, SyncConfig, SyncSession,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connectivity::{ConnectivityMonitor, ListenerId};
use crate::executor::{ActionExecutor, ExecutionOutcome};
use crate::queue::{ActionQueue, DrainPermit, NextState};
use crate::retry::RetryPolicy;

/// Observable coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Draining,
    PausedOffline,
}

offsync_domain::impl_domain_state_conversions!(CoordinatorState {
    Idle => "idle",
    Draining => "draining",
    PausedOffline => "paused_offline",
});

/// Configuration for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub ordering: OrderingPolicy,
    /// Upper bound on a single executor call; expiry counts as transient.
    pub call_timeout: Duration,
    /// Periodic drain while online; `None` disables it.
    pub auto_sync_interval: Option<Duration>,
    /// Join timeout when stopping
    pub join_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for CoordinatorConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            ordering: config.ordering,
            call_timeout: config.call_timeout(),
            auto_sync_interval: config.auto_sync_interval(),
            join_timeout: config.join_timeout(),
        }
    }
}

/// State shared between the handle and the background task.
struct Shared {
    queue: Arc<ActionQueue>,
    executor: Arc<ActionExecutor>,
    retry: RetryPolicy,
    monitor: Arc<ConnectivityMonitor>,
    config: CoordinatorConfig,
    state_tx: watch::Sender<CoordinatorState>,
    /// Signalled on every connectivity edge; interrupts backoff waits.
    wake: Arc<Notify>,
    trigger: Notify,
    last_session: Mutex<Option<SyncSession>>,
    cancellation: Mutex<CancellationToken>,
}

/// Drives the action queue towards empty whenever the remote is reachable.
pub struct SyncCoordinator {
    shared: Arc<Shared>,
    wake_listener: ListenerId,
    task_handle: Option<JoinHandle<()>>,
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<ActionQueue>,
        executor: Arc<ActionExecutor>,
        retry: RetryPolicy,
        monitor: Arc<ConnectivityMonitor>,
        config: CoordinatorConfig,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let listener_wake = Arc::clone(&wake);
        let wake_listener = monitor.on_change(move |_| listener_wake.notify_one());

        let initial =
            if monitor.is_online() { CoordinatorState::Idle } else { CoordinatorState::PausedOffline };
        let (state_tx, _) = watch::channel(initial);

        Self {
            shared: Arc::new(Shared {
                queue,
                executor,
                retry,
                monitor,
                config,
                state_tx,
                wake,
                trigger: Notify::new(),
                last_session: Mutex::new(None),
                cancellation: Mutex::new(CancellationToken::new()),
            }),
            wake_listener,
            task_handle: None,
        }
    }

    /// Start the background loop. Starting a running coordinator is a no-op.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("Sync coordinator already running");
            return Ok(());
        }

        info!(ordering = %self.shared.config.ordering, "Starting sync coordinator");

        // Create fresh cancellation token
        let cancel = CancellationToken::new();
        *self.shared.cancellation.lock() = cancel.clone();

        let connectivity = self.shared.monitor.subscribe();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            Shared::run_loop(shared, cancel, connectivity).await;
        });

        self.task_handle = Some(handle);
        info!("Sync coordinator started");
        Ok(())
    }

    /// Stop the background loop and wait for it to finish.
    ///
    /// An executor call in progress is abandoned; its action stays
    /// `in_flight` and is replayed by the next drain.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.task_handle.take() else {
            return Err(OffsyncError::InvalidState("coordinator not running".to_string()));
        };

        info!("Stopping sync coordinator");
        self.shared.cancellation.lock().cancel();

        let join_timeout = self.shared.config.join_timeout;
        let joined = tokio::time::timeout(join_timeout, handle).await;

        // Direct `drain()` calls after a stop must not inherit the cancellation.
        *self.shared.cancellation.lock() = CancellationToken::new();

        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Coordinator task panicked: {}", e);
                return Err(OffsyncError::Internal("coordinator task panicked".to_string()));
            }
            Err(_) => {
                warn!("Coordinator task did not complete within timeout");
                return Err(OffsyncError::Internal("coordinator task timeout".to_string()));
            }
        }

        info!("Sync coordinator stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.is_some()
    }

    /// Run one drain session now and wait for it.
    ///
    /// Returns immediately with `SessionEnd::AlreadyRunning` if another drain
    /// holds the queue.
    pub async fn drain(&self) -> SyncSession {
        self.shared.drain().await
    }

    /// Ask the background loop to drain. Does not wait.
    pub fn sync_now(&self) {
        debug!("Sync requested");
        self.shared.trigger.notify_one();
    }

    pub fn state(&self) -> CoordinatorState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.shared.state_tx.subscribe()
    }

    /// The most recent session that actually ran.
    pub fn last_session(&self) -> Option<SyncSession> {
        self.shared.last_session.lock().clone()
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.shared.monitor.remove_listener(self.wake_listener);
        if self.is_running() {
            warn!("SyncCoordinator dropped while running; cancelling tasks");
            self.shared.cancellation.lock().cancel();
        }
    }
}

impl Shared {
    async fn run_loop(
        shared: Arc<Self>,
        cancel: CancellationToken,
        mut connectivity: UnboundedReceiver<ConnectivityState>,
    ) {
        let changed = shared.queue.changed();
        let mut ticker = shared.config.auto_sync_interval.map(|period| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        if shared.monitor.is_online() {
            shared.drain().await;
        } else {
            shared.set_state(CoordinatorState::PausedOffline);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Coordinator loop cancelled");
                    break;
                }
                Some(edge) = connectivity.recv() => {
                    if edge.online {
                        info!("Connectivity restored; draining queue");
                        shared.drain().await;
                    } else {
                        shared.set_state(CoordinatorState::PausedOffline);
                    }
                }
                _ = shared.trigger.notified() => {
                    shared.drain().await;
                }
                _ = changed.notified() => {
                    if shared.monitor.is_online() {
                        shared.drain().await;
                    }
                }
                _ = next_tick(&mut ticker) => {
                    if shared.monitor.is_online() {
                        shared.drain().await;
                    }
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn drain(&self) -> SyncSession {
        let clock = self.queue.clock();
        let Some(permit) = self.queue.try_begin_drain() else {
            debug!("Drain already in progress");
            return SyncSession::rejected(clock.now());
        };
        let cancel = self.cancellation.lock().clone();

        let mut session = SyncSession::begin(clock.now());
        let end = self.run_session(&permit, &mut session, &cancel).await;
        session.finish(end, clock.now());

        let next = if end == SessionEnd::WentOffline || !self.monitor.is_online() {
            CoordinatorState::PausedOffline
        } else {
            CoordinatorState::Idle
        };
        self.set_state(next);

        info!(
            session_id = %session.id,
            end = %end,
            dispatched = session.processed(),
            succeeded = session.succeeded.len(),
            failed_transient = session.failed_transient.len(),
            failed_permanent = session.failed_permanent.len(),
            "Drain session finished"
        );
        *self.last_session.lock() = Some(session.clone());
        session
    }

    async fn run_session(
        &self,
        permit: &DrainPermit<'_>,
        session: &mut SyncSession,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        if !self.monitor.is_online() {
            return SessionEnd::WentOffline;
        }
        self.set_state(CoordinatorState::Draining);

        // The permit excludes every other drain, so anything in flight was abandoned.
        if let Err(err) = self.queue.requeue_in_flight(permit).await {
            error!(error = %err, "Failed to requeue abandoned action");
            return SessionEnd::StorageFailed;
        }

        let clock = self.queue.clock();
        let changed = self.queue.changed();

        loop {
            if cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }
            if !self.monitor.is_online() {
                return SessionEnd::WentOffline;
            }

            if let Err(err) = self.queue.release_due(clock.now()).await {
                error!(error = %err, "Failed to release due retries");
                return SessionEnd::StorageFailed;
            }

            if let Some(action) = self.queue.peek_next(self.config.ordering).await {
                match self.dispatch(action, session, cancel).await {
                    Ok(true) => continue,
                    Ok(false) => return SessionEnd::Cancelled,
                    Err(err) => {
                        error!(error = %err, "Queue write failed during drain");
                        return SessionEnd::StorageFailed;
                    }
                }
            }

            let Some(retry_at) = self.queue.next_retry_at().await else {
                return SessionEnd::Drained;
            };

            let wait = (retry_at - clock.now()).to_std().unwrap_or(Duration::ZERO);
            debug!(wait_ms = wait.as_millis() as u64, "Waiting for retry backoff");
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = tokio::time::sleep(wait) => {}
                _ = self.wake.notified() => {}
                _ = changed.notified() => {}
            }
        }
    }

    /// Execute one action and record its outcome.
    ///
    /// Returns `Ok(false)` when cancelled mid-call.
    async fn dispatch(
        &self,
        candidate: PendingAction,
        session: &mut SyncSession,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let action = self.queue.mark_in_flight(&candidate.id).await?;
        session.record_dispatch(&action.id);
        debug!(action_id = %action.id, attempt = action.attempt_count, "Dispatching action");

        let call = tokio::time::timeout(self.config.call_timeout, self.executor.execute(&action));
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(action_id = %action.id, "Coordinator stopped mid-call; action will be replayed");
                return Ok(false);
            }
            result = call => result.unwrap_or_else(|_| {
                ExecutionOutcome::TransientError(format!(
                    "call timed out after {}ms",
                    self.config.call_timeout.as_millis()
                ))
            }),
        };

        let (reason, class) = match outcome {
            ExecutionOutcome::Success(ack) => {
                self.queue.mark_succeeded(&action.id).await?;
                session.record_success(&action.id);
                debug!(
                    action_id = %action.id,
                    remote_id = ?ack.remote_id,
                    replayed = ack.replayed,
                    "Action applied"
                );
                return Ok(true);
            }
            ExecutionOutcome::TransientError(reason) => (reason, ErrorClass::Transient),
            ExecutionOutcome::PermanentError(reason) => (reason, ErrorClass::Permanent),
        };

        self.record_failure(&action, &reason, class, session).await?;
        Ok(true)
    }

    async fn record_failure(
        &self,
        action: &PendingAction,
        reason: &str,
        class: ErrorClass,
        session: &mut SyncSession,
    ) -> Result<()> {
        let decision = self.retry.decide(action.attempts_since_retry(), class);

        if decision.should_give_up {
            self.queue.mark_failed(&action.id, reason, NextState::Permanent).await?;
            session.record_permanent(&action.id);
            warn!(
                action_id = %action.id,
                attempt = action.attempt_count,
                class = %class,
                error = reason,
                "Action moved to dead-letter"
            );
            return Ok(());
        }

        let delay = chrono::Duration::from_std(decision.delay)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let retry_at = self.queue.clock().now() + delay;
        self.queue.mark_failed(&action.id, reason, NextState::RetryAt(retry_at)).await?;
        session.record_transient(&action.id);
        info!(
            action_id = %action.id,
            attempt = action.attempt_count,
            delay_ms = decision.delay.as_millis() as u64,
            error = reason,
            "Action failed transiently; retry scheduled"
        );
        Ok(())
    }

    fn set_state(&self, state: CoordinatorState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Coordinator state changed");
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

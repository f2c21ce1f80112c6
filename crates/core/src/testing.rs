//! Test doubles for the queue store and the remote mutation API
//!
//! Available to this crate's tests and, with the `test-utils` feature, to
//! downstream crates.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use offsync_domain::{ActionType, OffsyncError, PendingAction, RemoteError, Result};
use parking_lot::Mutex;
use serde_json::Value;

use crate::executor::ports::{RemoteAck, RemoteMutationApi};
use crate::queue::memory::MemoryActionStore;
use crate::queue::ports::ActionStore;

/// One call observed by [`FakeRemote`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub idempotency_key: String,
    pub action_type: ActionType,
    pub payload: Value,
}

type CallHook = Arc<dyn Fn(&RemoteCall) + Send + Sync>;

#[derive(Default)]
struct FakeRemoteState {
    calls: Vec<RemoteCall>,
    /// Keys in the order their side effect was applied.
    applied: Vec<String>,
    applied_set: HashSet<String>,
    per_key: HashMap<String, VecDeque<std::result::Result<(), RemoteError>>>,
    global: VecDeque<std::result::Result<(), RemoteError>>,
    default_failure: Option<RemoteError>,
    lost_acks: HashSet<String>,
    delay: Option<Duration>,
    hook: Option<CallHook>,
}

/// Idempotent in-memory remote.
///
/// Side effects are keyed by idempotency key: a repeated key after a
/// successful application is acknowledged as `replayed` and changes nothing.
/// Scripted outcomes are consumed per key first, then from the global queue,
/// then `default_failure` applies; with nothing scripted a call succeeds.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<FakeRemoteState>,
    in_flight: AtomicUsize,
    max_concurrency: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for calls carrying `key`. `Ok(())` means "apply normally".
    pub fn script(
        &self,
        key: &str,
        outcomes: impl IntoIterator<Item = std::result::Result<(), RemoteError>>,
    ) {
        self.state.lock().per_key.entry(key.to_string()).or_default().extend(outcomes);
    }

    /// Queue outcomes for the next calls regardless of key.
    pub fn script_next(&self, outcomes: impl IntoIterator<Item = std::result::Result<(), RemoteError>>) {
        self.state.lock().global.extend(outcomes);
    }

    /// Failure returned once scripts are exhausted; `None` restores success.
    pub fn set_default_failure(&self, failure: Option<RemoteError>) {
        self.state.lock().default_failure = failure;
    }

    /// Apply the next call for `key` but report a transient failure, as if
    /// the acknowledgement was lost in transit.
    pub fn lose_next_ack(&self, key: &str) {
        self.state.lock().lost_acks.insert(key.to_string());
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Run `hook` at the start of every call, after the configured delay.
    pub fn on_call(&self, hook: impl Fn(&RemoteCall) + Send + Sync + 'static) {
        self.state.lock().hook = Some(Arc::new(hook));
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Keys whose side effect was applied, in application order.
    pub fn applied_keys(&self) -> Vec<String> {
        self.state.lock().applied.clone()
    }

    pub fn applied_count(&self) -> usize {
        self.state.lock().applied.len()
    }

    /// Highest number of overlapping `apply` calls observed.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, key: &str) -> std::result::Result<(), RemoteError> {
        let mut state = self.state.lock();
        if let Some(outcome) = state.per_key.get_mut(key).and_then(VecDeque::pop_front) {
            return outcome;
        }
        if let Some(outcome) = state.global.pop_front() {
            return outcome;
        }
        match &state.default_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteMutationApi for FakeRemote {
    async fn apply(
        &self,
        idempotency_key: &str,
        action_type: &ActionType,
        payload: &Value,
    ) -> std::result::Result<RemoteAck, RemoteError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrency.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let call = RemoteCall {
            idempotency_key: idempotency_key.to_string(),
            action_type: action_type.clone(),
            payload: payload.clone(),
        };
        let (delay, hook) = {
            let mut state = self.state.lock();
            state.calls.push(call.clone());
            (state.delay, state.hook.clone())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(hook) = hook {
            hook(&call);
        }

        self.next_outcome(idempotency_key)?;

        let mut state = self.state.lock();
        let replayed = !state.applied_set.insert(idempotency_key.to_string());
        if !replayed {
            state.applied.push(idempotency_key.to_string());
        }
        if state.lost_acks.remove(idempotency_key) {
            return Err(RemoteError::transient("connection reset before acknowledgement"));
        }

        Ok(RemoteAck { remote_id: Some(format!("remote-{idempotency_key}")), replayed })
    }
}

/// Store wrapper whose writes can be made to fail on demand.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryActionStore,
    failing: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PendingAction>) -> Self {
        Self { inner: MemoryActionStore::with_records(records), failing: AtomicBool::new(false) }
    }

    /// While set, `upsert` and `remove` return `OffsyncError::Persistence`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryActionStore {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OffsyncError::Persistence("disk I/O error".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ActionStore for FailingStore {
    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        self.inner.load_all().await
    }

    async fn upsert(&self, action: &PendingAction) -> Result<()> {
        self.check()?;
        self.inner.upsert(action).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.check()?;
        self.inner.remove(id).await
    }
}

//! Durable, ordered queue of pending actions
//!
//! `ActionQueue` is the sole writer of the backing [`ActionStore`]. Every
//! mutation is applied to a cloned record, written to the store, and only
//! then mirrored in memory, so a failed write leaves both sides untouched.
//!
//! Mutations run on a detached task: once a write has started it finishes
//! together with its mirror update even if the caller's future is dropped.

pub mod memory;
pub mod ports;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use offsync_domain::{
    ActionFilter, ActionState, ActionType, OffsyncError, OrderingPolicy, PendingAction,
    QueueSummary, Result,
};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, instrument, warn, Instrument};

pub use self::memory::MemoryActionStore;
use self::ports::ActionStore;
use crate::clock::{Clock, SystemClock};

/// Where a failed in-flight action goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    /// Immediately dispatchable again.
    Pending,
    /// Wait in `failed_transient` until the given time.
    RetryAt(DateTime<Utc>),
    /// Dead-letter.
    Permanent,
}

struct QueueState {
    /// Ordered by `sequence`.
    actions: Vec<PendingAction>,
    next_sequence: u64,
}

impl QueueState {
    fn position(&self, id: &str) -> Result<usize> {
        self.actions
            .iter()
            .position(|action| action.id == id)
            .ok_or_else(|| OffsyncError::NotFound(format!("action {id}")))
    }

    fn in_flight(&self) -> Option<&PendingAction> {
        self.actions.iter().find(|action| action.state == ActionState::InFlight)
    }
}

/// Exclusive right to drain one queue.
///
/// Obtained from [`ActionQueue::try_begin_drain`]; released on drop.
#[must_use = "the drain right is released as soon as the permit is dropped"]
pub struct DrainPermit<'a> {
    queue: &'a ActionQueue,
}

impl DrainPermit<'_> {
    fn is_for(&self, queue: &ActionQueue) -> bool {
        std::ptr::eq(self.queue, queue)
    }
}

impl Drop for DrainPermit<'_> {
    fn drop(&mut self) {
        self.queue.draining.store(false, Ordering::Release);
    }
}

/// The offline action queue.
pub struct ActionQueue {
    core: Arc<QueueCore>,
    draining: AtomicBool,
}

impl ActionQueue {
    /// Load the queue from `store` using the system clock.
    pub async fn open(store: Arc<dyn ActionStore>) -> Result<Self> {
        Self::open_with_clock(store, Arc::new(SystemClock)).await
    }

    /// Load the queue from `store`.
    ///
    /// Records left `in_flight` by a crash are put back to `pending`; their
    /// outcome is unknown, so they are replayed under the same idempotency key.
    #[instrument(skip_all)]
    pub async fn open_with_clock(
        store: Arc<dyn ActionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut actions = store.load_all().await?;
        actions.sort_by_key(|action| action.sequence);
        let next_sequence = actions.last().map_or(1, |action| action.sequence + 1);

        let queue = Self {
            core: Arc::new(QueueCore {
                store,
                clock,
                state: Mutex::new(QueueState { actions, next_sequence }),
                changed: Arc::new(Notify::new()),
            }),
            draining: AtomicBool::new(false),
        };

        let recovered = queue.detached(|core| async move { core.requeue_in_flight().await }).await?;
        let len = queue.len().await;
        info!(len, recovered, "Action queue opened");
        Ok(queue)
    }

    /// Claim the single drain slot of this queue.
    ///
    /// Returns `None` while another drain, from any coordinator, holds it.
    pub fn try_begin_drain(&self) -> Option<DrainPermit<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainPermit { queue: self })
    }

    /// Capture a mutation. Returns once the record is durable.
    ///
    /// The sequence is reserved before the write, so it is never handed out
    /// twice even when the write fails or the caller goes away.
    #[instrument(skip(self, action_type, payload), fields(action_type = %action_type))]
    pub async fn enqueue(
        &self,
        action_type: ActionType,
        payload: serde_json::Value,
    ) -> Result<String> {
        self.detached(move |core| async move { core.enqueue(action_type, payload).await }).await
    }

    /// Next dispatchable action under `ordering`, without mutating anything.
    ///
    /// Returns `None` while any action is in flight.
    pub async fn peek_next(&self, ordering: OrderingPolicy) -> Option<PendingAction> {
        let state = self.core.state.lock().await;
        if state.in_flight().is_some() {
            return None;
        }

        match ordering {
            OrderingPolicy::StrictFifo => state
                .actions
                .first()
                .filter(|head| head.state == ActionState::Pending)
                .cloned(),
            OrderingPolicy::SkipAhead => {
                state.actions.iter().find(|action| action.state == ActionState::Pending).cloned()
            }
        }
    }

    /// `pending -> in_flight`, counting one attempt. Returns the updated record.
    #[instrument(skip(self))]
    pub async fn mark_in_flight(&self, id: &str) -> Result<PendingAction> {
        let id = id.to_string();
        self.detached(move |core| async move { core.mark_in_flight(&id).await }).await
    }

    /// Remove an in-flight action whose remote application was confirmed.
    #[instrument(skip(self))]
    pub async fn mark_succeeded(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.detached(move |core| async move { core.mark_succeeded(&id).await }).await
    }

    /// Record a failed attempt and move the action to `next`.
    #[instrument(skip(self, error))]
    pub async fn mark_failed(&self, id: &str, error: &str, next: NextState) -> Result<()> {
        let id = id.to_string();
        let error = error.to_string();
        self.detached(move |core| async move { core.mark_failed(&id, &error, next).await }).await
    }

    /// Return every transient failure whose backoff has elapsed to `pending`.
    pub async fn release_due(&self, now: DateTime<Utc>) -> Result<usize> {
        self.detached(move |core| async move { core.release_due(now).await }).await
    }

    /// Earliest `next_attempt_at` among actions waiting to retry.
    pub async fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        let state = self.core.state.lock().await;
        state
            .actions
            .iter()
            .filter(|action| action.state == ActionState::FailedTransient)
            .map(|action| action.next_attempt_at.unwrap_or(DateTime::<Utc>::MIN_UTC))
            .min()
    }

    /// Put any `in_flight` record back to `pending`.
    ///
    /// Requires this queue's drain permit: only the holder can be sure that
    /// nothing else is dispatching.
    pub async fn requeue_in_flight(&self, permit: &DrainPermit<'_>) -> Result<usize> {
        if !permit.is_for(self) {
            return Err(OffsyncError::InvalidState(
                "drain permit belongs to a different queue".to_string(),
            ));
        }
        self.detached(|core| async move { core.requeue_in_flight().await }).await
    }

    /// Ordered snapshot of the actions selected by `filter`.
    pub async fn list(&self, filter: ActionFilter) -> Vec<PendingAction> {
        let state = self.core.state.lock().await;
        state.actions.iter().filter(|action| filter.matches(action)).cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<PendingAction> {
        let state = self.core.state.lock().await;
        state.actions.iter().find(|action| action.id == id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.core.state.lock().await.actions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.core.state.lock().await.actions.is_empty()
    }

    pub async fn summary(&self) -> QueueSummary {
        let state = self.core.state.lock().await;
        QueueSummary::from_actions(&state.actions)
    }

    /// Drop a dead-lettered action.
    #[instrument(skip(self))]
    pub async fn discard(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.detached(move |core| async move { core.discard(&id).await }).await
    }

    /// Give a dead-lettered action a fresh attempt budget.
    ///
    /// `attempt_count` is kept; the retry policy counts from the new baseline.
    #[instrument(skip(self))]
    pub async fn retry(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.detached(move |core| async move { core.retry(&id).await }).await
    }

    /// Signalled after every successful enqueue or manual retry.
    pub fn changed(&self) -> Arc<Notify> {
        Arc::clone(&self.core.changed)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.core.clock)
    }

    async fn detached<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Arc<QueueCore>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(op(Arc::clone(&self.core)).in_current_span());
        task.await
            .map_err(|err| OffsyncError::Internal(format!("queue write task failed: {err}")))?
    }
}

/// Queue state plus its store, shared with detached write tasks.
struct QueueCore {
    store: Arc<dyn ActionStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    changed: Arc<Notify>,
}

impl QueueCore {
    async fn enqueue(&self, action_type: ActionType, payload: serde_json::Value) -> Result<String> {
        let mut state = self.state.lock().await;
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        let action = PendingAction::new(action_type, payload, sequence, self.clock.now());

        self.store.upsert(&action).await.map_err(|err| {
            warn!(error = %err, sequence, "Failed to persist enqueued action");
            err
        })?;

        let id = action.id.clone();
        state.actions.push(action);
        drop(state);

        debug!(action_id = %id, sequence, "Action enqueued");
        self.changed.notify_one();
        Ok(id)
    }

    async fn mark_in_flight(&self, id: &str) -> Result<PendingAction> {
        let mut state = self.state.lock().await;
        if let Some(other) = state.in_flight() {
            return Err(OffsyncError::InvalidState(format!(
                "action {} is already in flight",
                other.id
            )));
        }

        let index = state.position(id)?;
        let mut updated = state.actions[index].clone();
        if updated.state != ActionState::Pending {
            return Err(OffsyncError::InvalidState(format!(
                "action {id} is {}, expected pending",
                updated.state
            )));
        }

        updated.state = ActionState::InFlight;
        updated.attempt_count = updated.attempt_count.saturating_add(1);
        updated.next_attempt_at = None;

        self.store.upsert(&updated).await?;
        state.actions[index] = updated.clone();
        Ok(updated)
    }

    async fn mark_succeeded(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state.position(id)?;
        expect_in_flight(&state.actions[index])?;

        self.store.remove(id).await?;
        state.actions.remove(index);
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str, next: NextState) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state.position(id)?;
        expect_in_flight(&state.actions[index])?;

        let mut updated = state.actions[index].clone();
        updated.record_error(error);
        match next {
            NextState::Pending => {
                updated.state = ActionState::Pending;
                updated.next_attempt_at = None;
            }
            NextState::RetryAt(at) => {
                updated.state = ActionState::FailedTransient;
                updated.next_attempt_at = Some(at);
            }
            NextState::Permanent => {
                updated.state = ActionState::FailedPermanent;
                updated.next_attempt_at = None;
            }
        }

        self.store.upsert(&updated).await?;
        state.actions[index] = updated;
        Ok(())
    }

    async fn release_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut released = 0;

        for index in 0..state.actions.len() {
            if !state.actions[index].is_retry_due(now) {
                continue;
            }
            let mut updated = state.actions[index].clone();
            updated.state = ActionState::Pending;
            updated.next_attempt_at = None;

            self.store.upsert(&updated).await?;
            state.actions[index] = updated;
            released += 1;
        }

        if released > 0 {
            debug!(released, "Released actions whose backoff elapsed");
        }
        Ok(released)
    }

    async fn requeue_in_flight(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut requeued = 0;

        for index in 0..state.actions.len() {
            if state.actions[index].state != ActionState::InFlight {
                continue;
            }
            let mut updated = state.actions[index].clone();
            updated.state = ActionState::Pending;

            self.store.upsert(&updated).await?;
            warn!(action_id = %updated.id, attempt = updated.attempt_count, "Requeued interrupted action");
            state.actions[index] = updated;
            requeued += 1;
        }
        Ok(requeued)
    }

    async fn discard(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state.position(id)?;
        expect_dead_letter(&state.actions[index])?;

        self.store.remove(id).await?;
        state.actions.remove(index);
        info!(action_id = %id, "Discarded dead-lettered action");
        Ok(())
    }

    async fn retry(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let index = state.position(id)?;
        expect_dead_letter(&state.actions[index])?;

        let mut updated = state.actions[index].clone();
        updated.state = ActionState::Pending;
        updated.retry_baseline = updated.attempt_count;
        updated.last_error = None;
        updated.next_attempt_at = None;

        self.store.upsert(&updated).await?;
        state.actions[index] = updated;
        drop(state);

        info!(action_id = %id, "Dead-lettered action returned to pending");
        self.changed.notify_one();
        Ok(())
    }
}

fn expect_in_flight(action: &PendingAction) -> Result<()> {
    if action.state != ActionState::InFlight {
        return Err(OffsyncError::InvalidState(format!(
            "action {} is {}, expected in_flight",
            action.id, action.state
        )));
    }
    Ok(())
}

fn expect_dead_letter(action: &PendingAction) -> Result<()> {
    if !action.is_dead_letter() {
        return Err(OffsyncError::InvalidState(format!(
            "action {} is {}, only failed_permanent actions can be discarded or retried",
            action.id, action.state
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::clock::MockClock;
    use crate::testing::FailingStore;

    async fn queue_with(store: Arc<dyn ActionStore>) -> (ActionQueue, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        let queue = ActionQueue::open_with_clock(store, clock.clone()).await.unwrap();
        (queue, clock)
    }

    async fn empty_queue() -> (ActionQueue, Arc<MemoryActionStore>, Arc<MockClock>) {
        let store = Arc::new(MemoryActionStore::new());
        let (queue, clock) = queue_with(store.clone()).await;
        (queue, store, clock)
    }

    fn update_job(n: u32) -> serde_json::Value {
        json!({ "job": n, "status": "completed" })
    }

    #[tokio::test]
    async fn enqueue_persists_before_returning() {
        let (queue, store, _) = empty_queue().await;
        let id = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();

        let stored = store.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].state, ActionState::Pending);
        assert_eq!(stored[0].attempt_count, 0);
        assert_eq!(stored[0].payload, update_job(1));
    }

    #[tokio::test]
    async fn enqueue_assigns_increasing_sequences() {
        let (queue, _, _) = empty_queue().await;
        for n in 0..5 {
            queue.enqueue(ActionType::from("update_job"), update_job(n)).await.unwrap();
        }
        let sequences: Vec<u64> =
            queue.list(ActionFilter::All).await.iter().map(|action| action.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn enqueue_failure_captures_nothing() {
        let store = Arc::new(FailingStore::new());
        let (queue, _) = queue_with(store.clone()).await;
        store.set_failing(true);

        let err = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap_err();
        assert!(err.is_persistence());
        assert!(queue.is_empty().await);
        assert!(store.inner().snapshot().is_empty());
    }

    #[tokio::test]
    async fn open_recovers_interrupted_in_flight_action() {
        let mut interrupted =
            PendingAction::new(ActionType::from("update_job"), update_job(1), 1, Utc::now());
        interrupted.state = ActionState::InFlight;
        interrupted.attempt_count = 1;
        let store = Arc::new(MemoryActionStore::with_records([interrupted.clone()]));

        let (queue, _) = queue_with(store.clone()).await;
        let recovered = queue.get(&interrupted.id).await.unwrap();
        assert_eq!(recovered.state, ActionState::Pending);
        assert_eq!(recovered.attempt_count, 1);
        assert_eq!(store.snapshot()[0].state, ActionState::Pending);

        let next = queue.enqueue(ActionType::from("update_job"), update_job(2)).await.unwrap();
        assert_eq!(queue.get(&next).await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn single_action_in_flight() {
        let (queue, _, _) = empty_queue().await;
        let a = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();
        let b = queue.enqueue(ActionType::from("update_job"), update_job(2)).await.unwrap();

        let flying = queue.mark_in_flight(&a).await.unwrap();
        assert_eq!(flying.attempt_count, 1);
        assert_eq!(queue.peek_next(OrderingPolicy::SkipAhead).await, None);

        let err = queue.mark_in_flight(&b).await.unwrap_err();
        assert!(matches!(err, OffsyncError::InvalidState(_)));
    }

    #[tokio::test]
    async fn success_removes_action() {
        let (queue, store, _) = empty_queue().await;
        let a = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();

        assert!(queue.mark_succeeded(&a).await.is_err());
        queue.mark_in_flight(&a).await.unwrap();
        queue.mark_succeeded(&a).await.unwrap();
        assert!(queue.is_empty().await);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn skip_ahead_passes_failed_actions() {
        let (queue, _, clock) = empty_queue().await;
        let a = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();
        let b = queue.enqueue(ActionType::from("update_job"), update_job(2)).await.unwrap();
        let c = queue.enqueue(ActionType::from("update_job"), update_job(3)).await.unwrap();

        queue.mark_in_flight(&a).await.unwrap();
        queue.mark_failed(&a, "rejected", NextState::Permanent).await.unwrap();
        queue.mark_in_flight(&b).await.unwrap();
        let retry_at = clock.now() + Duration::seconds(10);
        queue.mark_failed(&b, "timeout", NextState::RetryAt(retry_at)).await.unwrap();

        assert_eq!(queue.peek_next(OrderingPolicy::SkipAhead).await.unwrap().id, c);
        assert_eq!(queue.peek_next(OrderingPolicy::StrictFifo).await, None);
        assert_eq!(queue.next_retry_at().await, Some(retry_at));
    }

    #[tokio::test]
    async fn strict_fifo_waits_for_transient_head() {
        let (queue, _, clock) = empty_queue().await;
        let a = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();
        queue.enqueue(ActionType::from("update_job"), update_job(2)).await.unwrap();

        queue.mark_in_flight(&a).await.unwrap();
        let retry_at = clock.now() + Duration::seconds(4);
        queue.mark_failed(&a, "503", NextState::RetryAt(retry_at)).await.unwrap();
        assert_eq!(queue.peek_next(OrderingPolicy::StrictFifo).await, None);

        assert_eq!(queue.release_due(clock.now()).await.unwrap(), 0);
        clock.advance(Duration::seconds(4));
        assert_eq!(queue.release_due(clock.now()).await.unwrap(), 1);

        let head = queue.peek_next(OrderingPolicy::StrictFifo).await.unwrap();
        assert_eq!(head.id, a);
        assert_eq!(head.last_error.as_deref(), Some("503"));
        assert_eq!(queue.next_retry_at().await, None);
    }

    #[tokio::test]
    async fn failed_write_leaves_mirror_untouched() {
        let store = Arc::new(FailingStore::new());
        let (queue, _) = queue_with(store.clone()).await;
        let a = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();

        store.set_failing(true);
        assert!(queue.mark_in_flight(&a).await.unwrap_err().is_persistence());
        let action = queue.get(&a).await.unwrap();
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.attempt_count, 0);
    }

    #[tokio::test]
    async fn discard_and_retry_only_apply_to_dead_letters() {
        let (queue, _, _) = empty_queue().await;
        let a = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();

        assert!(matches!(queue.discard(&a).await, Err(OffsyncError::InvalidState(_))));
        assert!(matches!(queue.retry(&a).await, Err(OffsyncError::InvalidState(_))));
        assert!(matches!(queue.discard("missing").await, Err(OffsyncError::NotFound(_))));

        queue.mark_in_flight(&a).await.unwrap();
        queue.mark_failed(&a, "validation failed", NextState::Permanent).await.unwrap();
        assert_eq!(queue.list(ActionFilter::DeadLetter).await.len(), 1);
        assert!(queue.summary().await.needs_attention());

        queue.discard(&a).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn manual_retry_restores_budget_without_lowering_attempts() {
        let (queue, _, _) = empty_queue().await;
        let a = queue.enqueue(ActionType::from("upload_blob"), json!({"size": 3})).await.unwrap();
        queue.mark_in_flight(&a).await.unwrap();
        queue.mark_failed(&a, "quota", NextState::Permanent).await.unwrap();

        queue.retry(&a).await.unwrap();
        let action = queue.get(&a).await.unwrap();
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.attempt_count, 1);
        assert_eq!(action.attempts_since_retry(), 0);
        assert!(action.last_error.is_none());

        let action = queue.mark_in_flight(&a).await.unwrap();
        assert_eq!(action.attempt_count, 2);
        assert_eq!(action.attempts_since_retry(), 1);
    }

    /// Completes the write, then stalls before acknowledging it.
    struct StallingStore {
        inner: MemoryActionStore,
        stall: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl ActionStore for StallingStore {
        async fn load_all(&self) -> Result<Vec<PendingAction>> {
            self.inner.load_all().await
        }

        async fn upsert(&self, action: &PendingAction) -> Result<()> {
            self.inner.upsert(action).await?;
            tokio::time::sleep(self.stall).await;
            Ok(())
        }

        async fn remove(&self, id: &str) -> Result<()> {
            self.inner.remove(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_enqueue_still_lands_in_memory_and_keeps_sequences_unique() {
        let store = Arc::new(StallingStore {
            inner: MemoryActionStore::new(),
            stall: std::time::Duration::from_millis(100),
        });
        let (queue, _) = queue_with(store.clone()).await;

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            queue.enqueue(ActionType::from("update_job"), update_job(1)),
        )
        .await;
        assert!(abandoned.is_err());

        let second = queue.enqueue(ActionType::from("update_job"), update_job(2)).await.unwrap();

        let mirrored: Vec<u64> =
            queue.list(ActionFilter::All).await.iter().map(|action| action.sequence).collect();
        assert_eq!(mirrored, vec![1, 2]);
        let mut stored: Vec<u64> =
            store.inner.snapshot().iter().map(|action| action.sequence).collect();
        stored.sort_unstable();
        assert_eq!(stored, vec![1, 2]);
        assert_eq!(queue.get(&second).await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn failed_enqueue_does_not_reuse_its_sequence() {
        let store = Arc::new(FailingStore::new());
        let (queue, _) = queue_with(store.clone()).await;

        store.set_failing(true);
        assert!(queue.enqueue(ActionType::from("update_job"), update_job(1)).await.is_err());
        store.set_failing(false);

        let id = queue.enqueue(ActionType::from("update_job"), update_job(2)).await.unwrap();
        assert_eq!(queue.get(&id).await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn drain_permit_is_exclusive_per_queue() {
        let (queue, _, _) = empty_queue().await;
        let (other, _, _) = empty_queue().await;

        let permit = queue.try_begin_drain().expect("first drain claims the queue");
        assert!(queue.try_begin_drain().is_none());
        assert!(other.try_begin_drain().is_some());

        drop(permit);
        assert!(queue.try_begin_drain().is_some());
    }

    #[tokio::test]
    async fn requeue_rejects_a_permit_from_another_queue() {
        let (queue, _, _) = empty_queue().await;
        let (other, _, _) = empty_queue().await;
        let a = queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();
        queue.mark_in_flight(&a).await.unwrap();

        let foreign = other.try_begin_drain().unwrap();
        assert!(matches!(
            queue.requeue_in_flight(&foreign).await,
            Err(OffsyncError::InvalidState(_))
        ));
        assert_eq!(queue.get(&a).await.unwrap().state, ActionState::InFlight);

        let permit = queue.try_begin_drain().unwrap();
        assert_eq!(queue.requeue_in_flight(&permit).await.unwrap(), 1);
        assert_eq!(queue.get(&a).await.unwrap().state, ActionState::Pending);
    }

    #[tokio::test]
    async fn enqueue_signals_change() {
        let (queue, _, _) = empty_queue().await;
        let changed = queue.changed();
        queue.enqueue(ActionType::from("update_job"), update_job(1)).await.unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), changed.notified())
            .await
            .expect("stored permit should complete immediately");
    }
}

//! Queued mutation records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{ERROR_TRUNCATE_SUFFIX, MAX_ERROR_LENGTH};

/// Tag selecting the executor handler that replays an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(String);

impl ActionType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ActionType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a queued action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    /// Eligible for dispatch.
    Pending,
    /// Handed to the executor; at most one action holds this state.
    InFlight,
    /// Failed transiently; becomes `Pending` once `next_attempt_at` passes.
    FailedTransient,
    /// Terminal dead-letter state; kept until discarded or manually retried.
    FailedPermanent,
}

crate::impl_domain_state_conversions!(ActionState {
    Pending => "pending",
    InFlight => "in_flight",
    FailedTransient => "failed_transient",
    FailedPermanent => "failed_permanent",
});

impl ActionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::FailedPermanent)
    }
}

/// A user mutation captured while (possibly) offline.
///
/// `id` doubles as the idempotency key presented to the remote system.
/// `sequence` fixes the global FIFO position and is never reassigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub sequence: u64,
    pub attempt_count: u32,
    /// `attempt_count` at the time of the last manual retry.
    #[serde(default)]
    pub retry_baseline: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub state: ActionState,
}

impl PendingAction {
    /// Create a fresh pending action with a new time-ordered id.
    pub fn new(
        action_type: ActionType,
        payload: serde_json::Value,
        sequence: u64,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            action_type,
            payload,
            enqueued_at,
            sequence,
            attempt_count: 0,
            retry_baseline: 0,
            last_error: None,
            next_attempt_at: None,
            state: ActionState::Pending,
        }
    }

    pub fn idempotency_key(&self) -> &str {
        &self.id
    }

    /// Attempts counted against the retry budget.
    pub fn attempts_since_retry(&self) -> u32 {
        self.attempt_count.saturating_sub(self.retry_baseline)
    }

    pub fn is_dead_letter(&self) -> bool {
        self.state.is_terminal()
    }

    /// A transiently failed action whose backoff has elapsed.
    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        self.state == ActionState::FailedTransient
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Store a failure reason, truncated to a bounded length.
    pub fn record_error(&mut self, reason: &str) {
        self.last_error = Some(truncate_reason(reason));
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_ERROR_LENGTH {
        return reason.to_string();
    }

    let keep = MAX_ERROR_LENGTH.saturating_sub(ERROR_TRUNCATE_SUFFIX.len());
    let mut truncated = reason.chars().take(keep).collect::<String>();
    truncated.push_str(ERROR_TRUNCATE_SUFFIX);
    truncated
}

/// Selection applied by `ActionQueue::list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionFilter {
    #[default]
    All,
    State(ActionState),
    /// Shorthand for `State(FailedPermanent)`.
    DeadLetter,
}

impl ActionFilter {
    pub fn matches(self, action: &PendingAction) -> bool {
        match self {
            Self::All => true,
            Self::State(state) => action.state == state,
            Self::DeadLetter => action.is_dead_letter(),
        }
    }
}

/// Counts backing the pending badge and the "needs attention" indicator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub waiting_retry: usize,
    pub failed_permanent: usize,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
}

impl QueueSummary {
    pub fn from_actions<'a>(actions: impl IntoIterator<Item = &'a PendingAction>) -> Self {
        let mut summary = Self::default();
        for action in actions {
            summary.total += 1;
            match action.state {
                ActionState::Pending => summary.pending += 1,
                ActionState::InFlight => summary.in_flight += 1,
                ActionState::FailedTransient => summary.waiting_retry += 1,
                ActionState::FailedPermanent => summary.failed_permanent += 1,
            }
            summary.oldest_enqueued_at = Some(match summary.oldest_enqueued_at {
                Some(oldest) => oldest.min(action.enqueued_at),
                None => action.enqueued_at,
            });
        }
        summary
    }

    /// Actions still expected to reach the remote without user help.
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_flight + self.waiting_retry
    }

    pub fn needs_attention(&self) -> bool {
        self.failed_permanent > 0
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::Duration;
    use serde_json::json;

    use super::*;

    fn sample(sequence: u64) -> PendingAction {
        PendingAction::new(
            ActionType::from("update_job"),
            json!({"status": "completed"}),
            sequence,
            Utc::now(),
        )
    }

    #[test]
    fn new_action_starts_pending_with_zero_attempts() {
        let action = sample(1);
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.attempt_count, 0);
        assert!(action.last_error.is_none());
        assert_eq!(action.idempotency_key(), action.id);
    }

    #[test]
    fn ids_are_unique() {
        let a = sample(1);
        let b = sample(2);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn state_round_trips_through_text() {
        for state in [
            ActionState::Pending,
            ActionState::InFlight,
            ActionState::FailedTransient,
            ActionState::FailedPermanent,
        ] {
            assert_eq!(ActionState::from_str(&state.to_string()).unwrap(), state);
        }
        assert_eq!(ActionState::InFlight.to_string(), "in_flight");
    }

    #[test]
    fn serialized_record_uses_type_field() {
        let action = sample(7);
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "update_job");
        assert_eq!(value["state"], "pending");
        let back: PendingAction = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn attempts_since_retry_respects_baseline() {
        let mut action = sample(1);
        action.attempt_count = 8;
        action.retry_baseline = 8;
        assert_eq!(action.attempts_since_retry(), 0);
        action.attempt_count = 9;
        assert_eq!(action.attempts_since_retry(), 1);
    }

    #[test]
    fn retry_due_only_after_next_attempt_at() {
        let now = Utc::now();
        let mut action = sample(1);
        action.state = ActionState::FailedTransient;
        action.next_attempt_at = Some(now + Duration::seconds(5));
        assert!(!action.is_retry_due(now));
        assert!(action.is_retry_due(now + Duration::seconds(5)));

        action.state = ActionState::Pending;
        assert!(!action.is_retry_due(now + Duration::seconds(10)));
    }

    #[test]
    fn long_errors_are_truncated() {
        let mut action = sample(1);
        action.record_error(&"x".repeat(1_000));
        let stored = action.last_error.unwrap();
        assert_eq!(stored.chars().count(), MAX_ERROR_LENGTH);
        assert!(stored.ends_with(ERROR_TRUNCATE_SUFFIX));
    }

    #[test]
    fn summary_counts_states_and_oldest() {
        let mut a = sample(1);
        a.enqueued_at = Utc::now() - Duration::minutes(10);
        let mut b = sample(2);
        b.state = ActionState::FailedPermanent;
        let mut c = sample(3);
        c.state = ActionState::FailedTransient;

        let summary = QueueSummary::from_actions([&a, &b, &c]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.failed_permanent, 1);
        assert_eq!(summary.waiting_retry, 1);
        assert_eq!(summary.outstanding(), 2);
        assert!(summary.needs_attention());
        assert_eq!(summary.oldest_enqueued_at, Some(a.enqueued_at));
    }

    #[test]
    fn dead_letter_filter_selects_terminal_actions() {
        let mut failed = sample(1);
        failed.state = ActionState::FailedPermanent;
        let pending = sample(2);
        assert!(ActionFilter::DeadLetter.matches(&failed));
        assert!(!ActionFilter::DeadLetter.matches(&pending));
        assert!(ActionFilter::State(ActionState::Pending).matches(&pending));
        assert!(ActionFilter::All.matches(&failed));
    }
}

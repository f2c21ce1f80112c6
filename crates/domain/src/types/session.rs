//! Drain session bookkeeping (observability only, never persisted)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a drain session stopped dispatching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// No dispatchable work remained.
    Drained,
    /// Connectivity dropped; the in-flight outcome (if any) was recorded.
    WentOffline,
    /// The coordinator was stopped.
    Cancelled,
    /// Another drain already held the queue; nothing was dispatched.
    AlreadyRunning,
    /// The queue store rejected a state transition.
    StorageFailed,
}

crate::impl_domain_state_conversions!(SessionEnd {
    Drained => "drained",
    WentOffline => "went_offline",
    Cancelled => "cancelled",
    AlreadyRunning => "already_running",
    StorageFailed => "storage_failed",
});

/// One drain attempt over the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Action ids in dispatch order (an id repeats when it is retried
    /// within the same session).
    pub dispatched: Vec<String>,
    pub succeeded: Vec<String>,
    pub failed_transient: Vec<String>,
    pub failed_permanent: Vec<String>,
    pub end: Option<SessionEnd>,
}

impl SyncSession {
    pub fn begin(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: None,
            dispatched: Vec::new(),
            succeeded: Vec::new(),
            failed_transient: Vec::new(),
            failed_permanent: Vec::new(),
            end: None,
        }
    }

    /// A session that never ran because another drain was active.
    pub fn rejected(now: DateTime<Utc>) -> Self {
        let mut session = Self::begin(now);
        session.finish(SessionEnd::AlreadyRunning, now);
        session
    }

    pub fn record_dispatch(&mut self, id: &str) {
        self.dispatched.push(id.to_string());
    }

    pub fn record_success(&mut self, id: &str) {
        self.succeeded.push(id.to_string());
    }

    pub fn record_transient(&mut self, id: &str) {
        self.failed_transient.push(id.to_string());
    }

    pub fn record_permanent(&mut self, id: &str) {
        self.failed_permanent.push(id.to_string());
    }

    pub fn finish(&mut self, end: SessionEnd, now: DateTime<Utc>) {
        self.end = Some(end);
        self.finished_at = Some(now);
    }

    /// Number of executor calls made during the session.
    pub fn processed(&self) -> usize {
        self.dispatched.len()
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }
}

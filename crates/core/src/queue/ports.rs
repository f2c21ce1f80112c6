//! Port interface for the persisted action store

use async_trait::async_trait;
use offsync_domain::{PendingAction, Result};

/// Durable backing store for queued actions.
///
/// Every call must be atomic and durable before it returns. `ActionQueue` is
/// the only writer; adapters never reorder or rewrite records on their own.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Load every stored record (any order).
    async fn load_all(&self) -> Result<Vec<PendingAction>>;

    /// Insert or replace a record keyed by `action.id`.
    async fn upsert(&self, action: &PendingAction) -> Result<()>;

    /// Delete a record. Removing an absent id is not an error.
    async fn remove(&self, id: &str) -> Result<()>;
}

//! Port interfaces for replaying actions against the remote system

use async_trait::async_trait;
use offsync_domain::{ActionType, PendingAction, RemoteError};
use serde_json::Value;

/// Acknowledgement from the remote mutation API.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteAck {
    /// Identifier the remote assigned to the applied mutation, if any.
    pub remote_id: Option<String>,
    /// The remote had already applied this idempotency key.
    pub replayed: bool,
}

/// Remote endpoint that applies mutations idempotently.
///
/// A repeated `idempotency_key` must return success without reapplying side
/// effects.
#[async_trait]
pub trait RemoteMutationApi: Send + Sync {
    async fn apply(
        &self,
        idempotency_key: &str,
        action_type: &ActionType,
        payload: &Value,
    ) -> Result<RemoteAck, RemoteError>;
}

/// Replays one kind of action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, action: &PendingAction) -> Result<RemoteAck, RemoteError>;
}

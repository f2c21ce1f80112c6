//! Action executor: routes queued actions to their handlers

pub mod ports;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use offsync_domain::{ActionType, ErrorClass, PendingAction, RemoteError};
use tracing::{debug, instrument, warn};

use self::ports::{ActionHandler, RemoteAck, RemoteMutationApi};

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success(RemoteAck),
    TransientError(String),
    PermanentError(String),
}

impl ExecutionOutcome {
    /// Failure class, or `None` on success.
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            Self::Success(_) => None,
            Self::TransientError(_) => Some(ErrorClass::Transient),
            Self::PermanentError(_) => Some(ErrorClass::Permanent),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<Result<RemoteAck, RemoteError>> for ExecutionOutcome {
    fn from(result: Result<RemoteAck, RemoteError>) -> Self {
        match result {
            Ok(ack) => Self::Success(ack),
            Err(RemoteError::Transient(message)) => Self::TransientError(message),
            Err(RemoteError::Permanent(message)) => Self::PermanentError(message),
        }
    }
}

/// Handler registry keyed by action type.
#[derive(Default)]
pub struct ActionExecutor {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl ActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action_type`, replacing any previous one.
    pub fn register(&mut self, action_type: impl Into<ActionType>, handler: Arc<dyn ActionHandler>) {
        let action_type = action_type.into();
        if self.handlers.insert(action_type.clone(), handler).is_some() {
            warn!(action_type = %action_type, "Replaced existing action handler");
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_handler(
        mut self,
        action_type: impl Into<ActionType>,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        self.register(action_type, handler);
        self
    }

    pub fn has_handler(&self, action_type: &ActionType) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Run one attempt of `action`. An unknown type is a permanent error.
    #[instrument(skip_all, fields(action_id = %action.id, action_type = %action.action_type))]
    pub async fn execute(&self, action: &PendingAction) -> ExecutionOutcome {
        let Some(handler) = self.handlers.get(&action.action_type) else {
            warn!("No handler registered for action type");
            return ExecutionOutcome::PermanentError(format!(
                "no handler registered for action type {}",
                action.action_type
            ));
        };

        let outcome = ExecutionOutcome::from(handler.handle(action).await);
        debug!(success = outcome.is_success(), "Action executed");
        outcome
    }
}

/// Adapts a [`RemoteMutationApi`] into a handler that presents the action id
/// as the idempotency key. One instance may serve many action types.
pub struct RemoteMutationHandler {
    api: Arc<dyn RemoteMutationApi>,
}

impl RemoteMutationHandler {
    pub fn new(api: Arc<dyn RemoteMutationApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ActionHandler for RemoteMutationHandler {
    async fn handle(&self, action: &PendingAction) -> Result<RemoteAck, RemoteError> {
        self.api.apply(action.idempotency_key(), &action.action_type, &action.payload).await
    }
}

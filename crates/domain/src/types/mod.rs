//! Domain types and models

pub mod action;
pub mod connectivity;
pub mod session;

pub use action::{ActionFilter, ActionState, ActionType, PendingAction, QueueSummary};
pub use connectivity::ConnectivityState;
pub use session::{SessionEnd, SyncSession};

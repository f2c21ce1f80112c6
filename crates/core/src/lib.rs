//! # Offsync Core
//!
//! Queue, retry and synchronization logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for the persisted store, the remote
//!   mutation API and the liveness probe
//! - `ActionQueue`: the sole owner of queue state
//! - `RetryPolicy`, `ActionExecutor`, `ConnectivityMonitor`
//! - `SyncCoordinator`: single-flight drain worker
//!
//! ## Architecture Principles
//! - Only depends on `offsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod clock;
pub mod connectivity;
pub mod executor;
pub mod queue;
pub mod retry;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export specific items to avoid ambiguity
pub use clock::{Clock, MockClock, SystemClock, TokioClock};
pub use connectivity::ports::LivenessProbe;
pub use connectivity::{ConnectivityListener, ConnectivityMonitor, ListenerId};
pub use executor::ports::{ActionHandler, RemoteAck, RemoteMutationApi};
pub use executor::{ActionExecutor, ExecutionOutcome, RemoteMutationHandler};
pub use queue::ports::ActionStore;
pub use queue::{ActionQueue, DrainPermit, MemoryActionStore, NextState};
pub use retry::{RetryDecision, RetryPolicy};
pub use sync::{CoordinatorConfig, CoordinatorState, SyncCoordinator};

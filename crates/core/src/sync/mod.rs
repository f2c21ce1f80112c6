//! Synchronization coordinator
//!
//! Drains the action queue one action at a time whenever connectivity is
//! available.

mod coordinator;

pub use coordinator::{CoordinatorConfig, CoordinatorState, SyncCoordinator};

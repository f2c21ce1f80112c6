//! # Offsync Domain
//!
//! Business domain types for the offline action queue.
//!
//! This crate contains:
//! - Queue records (`PendingAction`, `ActionState`, `ActionType`)
//! - Connectivity and drain-session value types
//! - Domain error types and Result definitions
//! - Configuration structures and defaults
//!
//! ## Architecture
//! - No dependencies on other Offsync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;

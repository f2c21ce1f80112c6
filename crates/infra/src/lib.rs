//! # Offsync Infrastructure
//!
//! Infrastructure implementations of core ports.
//!
//! This crate contains:
//! - Action stores (SQLite via r2d2, JSON snapshot file)
//! - HTTP remote mutation client and liveness probe
//! - Configuration loading and tracing setup
//! - `Engine`: the bootstrap that wires everything together
//!
//! ## Architecture
//! - Implements traits defined in `offsync-core`
//! - Contains all "impure" code (I/O, network)

pub mod config;
pub mod database;
pub mod engine;
pub mod errors;
pub mod file_store;
pub mod http;
pub mod observability;
pub mod remote;

// Re-export commonly used items
pub use database::{DbManager, SqliteActionStore};
pub use engine::{Engine, EngineBuilder};
pub use errors::InfraError;
pub use file_store::JsonFileActionStore;
pub use http::HttpClient;
pub use observability::init_tracing;
pub use remote::{HttpLivenessProbe, HttpMutationClient, ProbeLoop, ProbeLoopConfig};

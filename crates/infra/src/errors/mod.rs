//! Error plumbing between infrastructure crates and `OffsyncError`.

mod conversions;

pub use conversions::{map_join_error, InfraError};

//! Remote system adapters: mutation API client and liveness probing

pub mod mutation_client;
pub mod probe;

pub use mutation_client::{classify_status, HttpMutationClient};
pub use probe::{HttpLivenessProbe, ProbeLoop, ProbeLoopConfig};

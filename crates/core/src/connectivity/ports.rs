//! Port interface for remote liveness checks

use async_trait::async_trait;

/// Lightweight check that the remote service answers.
///
/// Implementations swallow their own errors: any failure reads as "not
/// reachable".
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

//! Reachability of the remote service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current reachability plus the time of the last transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub online: bool,
    pub changed_at: DateTime<Utc>,
}

impl ConnectivityState {
    pub fn online(changed_at: DateTime<Utc>) -> Self {
        Self { online: true, changed_at }
    }

    pub fn offline(changed_at: DateTime<Utc>) -> Self {
        Self { online: false, changed_at }
    }

    pub fn label(&self) -> &'static str {
        if self.online {
            "online"
        } else {
            "offline"
        }
    }
}

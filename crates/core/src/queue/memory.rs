//! Non-durable store for tests and demos

use std::collections::HashMap;

use async_trait::async_trait;
use offsync_domain::{PendingAction, Result};
use parking_lot::Mutex;

use super::ports::ActionStore;

/// `ActionStore` held in process memory. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryActionStore {
    records: Mutex<HashMap<String, PendingAction>>,
}

impl MemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, e.g. to simulate records left by a previous run.
    pub fn with_records(records: impl IntoIterator<Item = PendingAction>) -> Self {
        let records = records.into_iter().map(|action| (action.id.clone(), action)).collect();
        Self { records: Mutex::new(records) }
    }

    pub fn snapshot(&self) -> Vec<PendingAction> {
        let mut records: Vec<_> = self.records.lock().values().cloned().collect();
        records.sort_by_key(|action| action.sequence);
        records
    }
}

#[async_trait]
impl ActionStore for MemoryActionStore {
    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn upsert(&self, action: &PendingAction) -> Result<()> {
        self.records.lock().insert(action.id.clone(), action.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.records.lock().remove(id);
        Ok(())
    }
}

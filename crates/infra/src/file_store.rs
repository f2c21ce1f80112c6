//! Whole-file JSON snapshot store.
//!
//! Every write serialises the full queue to a temporary sibling file,
//! fsyncs it, renames it over the snapshot and fsyncs the directory so the
//! rename itself is durable. The in-memory copy is only replaced once the
//! rename succeeded, so a failed write leaves both the file and the store
//! unchanged.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use offsync_core::ActionStore;
use offsync_domain::{OffsyncError, PendingAction, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// Snapshot format version
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    actions: Vec<PendingAction>,
}

pub struct JsonFileActionStore {
    path: PathBuf,
    records: Mutex<HashMap<String, PendingAction>>,
}

impl JsonFileActionStore {
    /// Open the snapshot at `path`; a missing file is an empty queue.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let actions = read_snapshot(&path).await?;
        info!(count = actions.len(), "Opened JSON action snapshot");

        let records = actions.into_iter().map(|action| (action.id.clone(), action)).collect();
        Ok(Self { path, records: Mutex::new(records) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn commit(&self, records: &HashMap<String, PendingAction>) -> Result<()> {
        let mut actions: Vec<PendingAction> = records.values().cloned().collect();
        actions.sort_by_key(|action| action.sequence);
        let snapshot = Snapshot { version: SNAPSHOT_VERSION, saved_at: Utc::now(), actions };
        let data = serde_json::to_vec_pretty(&snapshot)?;

        let temp_path = self.path.with_extension("tmp");
        if let Some(parent) = temp_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|err| write_error(&temp_path, &err))?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await
            .map_err(|err| write_error(&temp_path, &err))?;
        file.write_all(&data).await.map_err(|err| write_error(&temp_path, &err))?;
        file.sync_all().await.map_err(|err| write_error(&temp_path, &err))?;
        drop(file);

        fs::rename(&temp_path, &self.path).await.map_err(|err| write_error(&self.path, &err))?;
        sync_parent_dir(&self.path).await?;

        debug!(count = snapshot.actions.len(), bytes = data.len(), "Persisted action snapshot");
        Ok(())
    }
}

#[async_trait]
impl ActionStore for JsonFileActionStore {
    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        let records = self.records.lock().await;
        let mut actions: Vec<PendingAction> = records.values().cloned().collect();
        actions.sort_by_key(|action| action.sequence);
        Ok(actions)
    }

    async fn upsert(&self, action: &PendingAction) -> Result<()> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(action.id.clone(), action.clone());
        self.commit(&next).await?;
        *records = next;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        if !records.contains_key(id) {
            return Ok(());
        }
        let mut next = records.clone();
        next.remove(id);
        self.commit(&next).await?;
        *records = next;
        Ok(())
    }
}

async fn read_snapshot(path: &Path) -> Result<Vec<PendingAction>> {
    if !path.exists() {
        debug!(path = %path.display(), "Snapshot file does not exist");
        return Ok(Vec::new());
    }

    let data = fs::read(path).await.map_err(|err| {
        OffsyncError::Persistence(format!("failed to read {}: {err}", path.display()))
    })?;
    let snapshot: Snapshot = serde_json::from_slice(&data)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(OffsyncError::Serialization(format!(
            "unsupported snapshot version {} in {}",
            snapshot.version,
            path.display()
        )));
    }
    Ok(snapshot.actions)
}

/// Flush the directory entry of `path` to disk.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> Result<()> {
    let dir = match path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    let handle = fs::File::open(&dir).await.map_err(|err| write_error(&dir, &err))?;
    handle.sync_all().await.map_err(|err| write_error(&dir, &err))
}

// Directory handles cannot be fsynced on this platform; the rename is as
// durable as the filesystem makes it.
#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

fn write_error(path: &Path, err: &std::io::Error) -> OffsyncError {
    OffsyncError::Persistence(format!("failed to write {}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use offsync_domain::{ActionState, ActionType};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn action(sequence: u64) -> PendingAction {
        PendingAction::new(
            ActionType::new("update_record"),
            json!({ "id": sequence, "status": "done" }),
            sequence,
            Utc::now(),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn parent_directory_is_synced_after_rename() {
        let temp_dir = TempDir::new().unwrap();
        sync_parent_dir(&temp_dir.path().join("queue.json")).await.unwrap();
        sync_parent_dir(Path::new("queue.json")).await.unwrap();

        let err = sync_parent_dir(&temp_dir.path().join("gone").join("queue.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, OffsyncError::Persistence(msg) if msg.contains("gone")));
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_queue() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileActionStore::open(temp_dir.path().join("queue.json")).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_leave_no_temp_file_behind() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        let store = JsonFileActionStore::open(&path).await.unwrap();

        store.upsert(&action(1)).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
        let snapshot: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(snapshot["version"], SNAPSHOT_VERSION);
        assert_eq!(snapshot["actions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_write_leaves_store_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = JsonFileActionStore::open(blocker.join("queue.json")).await.unwrap();
        let err = store.upsert(&action(1)).await.unwrap_err();

        assert!(err.is_persistence(), "got {err:?}");
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updates_replace_records_in_place() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        let store = JsonFileActionStore::open(&path).await.unwrap();

        let mut record = action(1);
        store.upsert(&record).await.unwrap();
        record.state = ActionState::FailedPermanent;
        record.record_error("HTTP 422 Unprocessable Entity");
        store.upsert(&record).await.unwrap();

        let reopened = JsonFileActionStore::open(&path).await.unwrap();
        assert_eq!(reopened.load_all().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn unknown_snapshot_version_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        std::fs::write(&path, r#"{"version": 99, "saved_at": "2026-01-01T00:00:00Z", "actions": []}"#)
            .unwrap();

        let result = JsonFileActionStore::open(&path).await;
        assert!(matches!(result, Err(OffsyncError::Serialization(_))));
    }
}

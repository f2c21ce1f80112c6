//! SQLite-backed implementation of the action store port.
//!
//! Each call runs one statement on a pooled connection inside
//! `spawn_blocking`; SQLite's own transaction makes it atomic and the
//! connection pragmas make it durable before the call returns.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use offsync_core::ActionStore;
use offsync_domain::{ActionState, ActionType, OffsyncError, PendingAction, Result};
use rusqlite::{params, Row, ToSql};
use tokio::task;
use tracing::{debug, instrument};

use super::manager::{map_sql_error, DbManager, SqliteConnection};
use crate::errors::map_join_error;

/// Durable queue store in a single SQLite file.
pub struct SqliteActionStore {
    db: Arc<DbManager>,
}

impl SqliteActionStore {
    /// Construct a store over an already migrated manager.
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Open the database at `path`, run migrations and return the store.
    pub fn open(path: impl AsRef<std::path::Path>, pool_size: u32) -> Result<Self> {
        let db = DbManager::new(path, pool_size)?;
        db.run_migrations()?;
        Ok(Self::new(Arc::new(db)))
    }

    pub fn manager(&self) -> &Arc<DbManager> {
        &self.db
    }

    fn upsert_row(conn: &SqliteConnection, action: &PendingAction) -> Result<()> {
        let payload = serde_json::to_string(&action.payload)?;
        let enqueued_at = format_timestamp(action.enqueued_at);
        let next_attempt_at = action.next_attempt_at.map(format_timestamp);
        let sequence = u64_to_i64(action.sequence)?;
        let state = action.state.to_string();

        let params: [&dyn ToSql; 10] = [
            &action.id,
            &action.action_type.as_str(),
            &payload,
            &enqueued_at,
            &sequence,
            &action.attempt_count,
            &action.retry_baseline,
            &action.last_error,
            &next_attempt_at,
            &state,
        ];

        conn.execute(ACTION_UPSERT_SQL, params.as_slice()).map_err(map_sql_error)?;
        Ok(())
    }

    fn fetch_all(conn: &SqliteConnection) -> Result<Vec<PendingAction>> {
        let mut stmt = conn.prepare(ACTION_SELECT_SQL).map_err(map_sql_error)?;
        let actions = stmt
            .query_map(params![], map_action_row)
            .map_err(map_sql_error)?
            .map(|row| row.map_err(map_sql_error))
            .collect::<Result<Vec<_>>>()?;
        Ok(actions)
    }
}

#[async_trait]
impl ActionStore for SqliteActionStore {
    #[instrument(skip(self))]
    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        let db = Arc::clone(&self.db);

        let actions = task::spawn_blocking(move || -> Result<Vec<PendingAction>> {
            let conn = db.get_connection()?;
            Self::fetch_all(&conn)
        })
        .await
        .map_err(map_join_error)??;

        debug!(count = actions.len(), "Loaded queued actions from sqlite");
        Ok(actions)
    }

    async fn upsert(&self, action: &PendingAction) -> Result<()> {
        let db = Arc::clone(&self.db);
        let to_write = action.clone();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            Self::upsert_row(&conn, &to_write)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();

        task::spawn_blocking(move || -> Result<()> {
            let conn = db.get_connection()?;
            conn.execute(ACTION_DELETE_SQL, params![id]).map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

// Keyed on `id` only: a clash on the unique `sequence` must fail rather
// than replace another action's row.
const ACTION_UPSERT_SQL: &str = "INSERT INTO pending_actions (
        id, action_type, payload_json, enqueued_at, sequence, attempt_count, retry_baseline,
        last_error, next_attempt_at, state
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(id) DO UPDATE SET
        action_type = excluded.action_type,
        payload_json = excluded.payload_json,
        enqueued_at = excluded.enqueued_at,
        sequence = excluded.sequence,
        attempt_count = excluded.attempt_count,
        retry_baseline = excluded.retry_baseline,
        last_error = excluded.last_error,
        next_attempt_at = excluded.next_attempt_at,
        state = excluded.state";

const ACTION_SELECT_SQL: &str = "SELECT
        id, action_type, payload_json, enqueued_at, sequence, attempt_count, retry_baseline,
        last_error, next_attempt_at, state
    FROM pending_actions
    ORDER BY sequence ASC";

const ACTION_DELETE_SQL: &str = "DELETE FROM pending_actions WHERE id = ?1";

fn map_action_row(row: &Row<'_>) -> rusqlite::Result<PendingAction> {
    let payload_json: String = row.get(2)?;
    let enqueued_at: String = row.get(3)?;
    let sequence: i64 = row.get(4)?;
    let next_attempt_at: Option<String> = row.get(8)?;
    let state: String = row.get(9)?;

    Ok(PendingAction {
        id: row.get(0)?,
        action_type: ActionType::new(row.get::<_, String>(1)?),
        payload: serde_json::from_str(&payload_json).map_err(|err| conversion_error(2, err))?,
        enqueued_at: parse_timestamp(3, &enqueued_at)?,
        sequence: u64::try_from(sequence).map_err(|err| conversion_error(4, err))?,
        attempt_count: row.get(5)?,
        retry_baseline: row.get(6)?,
        last_error: row.get(7)?,
        next_attempt_at: next_attempt_at.map(|value| parse_timestamp(8, &value)).transpose()?,
        state: state.parse::<ActionState>().map_err(|err| conversion_error(9, StateParseError(err)))?,
    })
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| conversion_error(column, err))
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn u64_to_i64(value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| OffsyncError::Persistence(format!("sequence {value} exceeds sqlite range")))
}

#[derive(Debug)]
struct StateParseError(String);

impl std::fmt::Display for StateParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StateParseError {}

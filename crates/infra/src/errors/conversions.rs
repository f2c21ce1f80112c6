//! Conversions from external infrastructure errors into domain errors.

use offsync_domain::OffsyncError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;
use tokio::task::JoinError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub OffsyncError);

impl From<InfraError> for OffsyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<OffsyncError> for InfraError {
    fn from(value: OffsyncError) -> Self {
        Self(value)
    }
}

trait IntoOffsyncError {
    fn into_offsync(self) -> OffsyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → OffsyncError */
/* -------------------------------------------------------------------------- */

impl IntoOffsyncError for SqlError {
    fn into_offsync(self) -> OffsyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match err.code {
                    ErrorCode::DatabaseBusy => OffsyncError::Persistence("database is busy".into()),
                    ErrorCode::DatabaseLocked => {
                        OffsyncError::Persistence("database is locked".into())
                    }
                    ErrorCode::DiskFull => OffsyncError::Persistence("disk is full".into()),
                    ErrorCode::ReadOnly => {
                        OffsyncError::Persistence("database is read-only".into())
                    }
                    _ => OffsyncError::Persistence(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => OffsyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                OffsyncError::Serialization(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                OffsyncError::Serialization(format!("invalid column type for {name}: {ty}"))
            }
            RE::InvalidPath(path) => OffsyncError::Persistence(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            other => OffsyncError::Persistence(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        Self(value.into_offsync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → OffsyncError */
/* -------------------------------------------------------------------------- */

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        Self(OffsyncError::Persistence(format!("connection pool: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* std::io::Error → OffsyncError */
/* -------------------------------------------------------------------------- */

impl IntoOffsyncError for std::io::Error {
    fn into_offsync(self) -> OffsyncError {
        use std::io::ErrorKind;

        match self.kind() {
            ErrorKind::NotFound => OffsyncError::NotFound(self.to_string()),
            ErrorKind::PermissionDenied => {
                OffsyncError::Persistence(format!("permission denied: {self}"))
            }
            _ => OffsyncError::Persistence(self.to_string()),
        }
    }
}

impl From<std::io::Error> for InfraError {
    fn from(value: std::io::Error) -> Self {
        Self(value.into_offsync())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → OffsyncError */
/* -------------------------------------------------------------------------- */

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        Self(OffsyncError::Serialization(value.to_string()))
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → OffsyncError */
/* -------------------------------------------------------------------------- */

impl IntoOffsyncError for HttpError {
    fn into_offsync(self) -> OffsyncError {
        if self.is_builder() {
            return OffsyncError::Config(format!("invalid HTTP client setup: {self}"));
        }
        if self.is_timeout() {
            return OffsyncError::Remote("HTTP request timed out".into());
        }
        if self.is_connect() {
            return OffsyncError::Remote("HTTP connection failure".into());
        }
        if let Some(status) = self.status() {
            return OffsyncError::Remote(format!(
                "HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown status")
            ));
        }

        OffsyncError::Remote(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        Self(value.into_offsync())
    }
}

/* -------------------------------------------------------------------------- */
/* Blocking task failures */
/* -------------------------------------------------------------------------- */

/// Map a failed `spawn_blocking` join into a domain error.
pub fn map_join_error(err: JoinError) -> OffsyncError {
    if err.is_cancelled() {
        OffsyncError::Internal("blocking task cancelled".into())
    } else {
        OffsyncError::Internal(format!("blocking task failed: {err}"))
    }
}

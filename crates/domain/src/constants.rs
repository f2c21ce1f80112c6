//! Engine constants
//!
//! Centralized location for the defaults and limits shared by the queue,
//! the retry policy and the coordinator.

// Retry policy defaults
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 300_000;
pub const DEFAULT_JITTER_FACTOR: f64 = 0.3;

/// Maximum exponent for exponential backoff calculation to prevent overflow
pub const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Minimum allowed max_attempts value
pub const MIN_MAX_ATTEMPTS: u32 = 1;

/// Maximum allowed max_attempts value
pub const MAX_MAX_ATTEMPTS: u32 = 100;

// Coordinator defaults
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AUTO_SYNC_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 5;

// Remote defaults
pub const DEFAULT_REMOTE_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

// Storage defaults
pub const DEFAULT_STORE_PATH: &str = "offsync-queue.db";
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Longest failure reason kept on a queued action
pub const MAX_ERROR_LENGTH: usize = 256;
pub const ERROR_TRUNCATE_SUFFIX: &str = "...";

// Well-known action types emitted by the host application
pub const ACTION_CREATE_RECORD: &str = "create_record";
pub const ACTION_UPDATE_RECORD: &str = "update_record";
pub const ACTION_UPLOAD_BLOB: &str = "upload_blob";

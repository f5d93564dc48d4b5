// src/checkpoint/mod.rs
//
// Durable per-object progress records. A row per (bucket, key) survives
// process restarts so interrupted migrations resume where they stopped.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Lifecycle state of one object's migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// One checkpoint row, unique by (bucket, key).
///
/// A row in `Completed` whose size and etag match the source is authoritative
/// for "already migrated". `last_error` is set only for failed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh record with `updated_at` stamped now; `save_task` re-stamps
    /// on every write.
    pub fn new(bucket: &str, key: &str, size: i64, etag: &str, status: TaskStatus) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            etag: etag.to_string(),
            status,
            attempts: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Persistence seam for checkpoint rows.
///
/// Implementations serialize writers (at most one save in flight) while
/// letting readers proceed concurrently. After `close()` every operation
/// fails with a message containing "store is closed".
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Look up one record; `Ok(None)` for unknown keys.
    async fn get_task(&self, bucket: &str, key: &str) -> Result<Option<TaskRecord>>;

    /// Insert or update by (bucket, key); stamps `updated_at` with now.
    async fn save_task(&self, record: TaskRecord) -> Result<()>;

    /// All pending rows, oldest update first.
    async fn list_pending(&self) -> Result<Vec<TaskRecord>>;

    /// All failed rows, oldest update first.
    async fn list_failed(&self) -> Result<Vec<TaskRecord>>;

    /// Release resources; subsequent operations fail.
    async fn close(&self) -> Result<()>;
}

/// Sentinel used in store errors after close; the processor downgrades
/// checkpoint failures carrying it to a warning during shutdown.
pub const CLOSED_SENTINEL: &str = "store is closed";

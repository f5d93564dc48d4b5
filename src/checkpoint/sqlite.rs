// src/checkpoint/sqlite.rs
//
// SQLite-backed checkpoint store. Uses rusqlite with the `bundled` feature so
// no system SQLite is required. WAL journaling with synchronous=NORMAL: a
// bounded window of loss on crash is acceptable because anything not yet
// `completed` is simply re-attempted on restart.
//
// Concurrency: one dedicated write connection behind an async mutex (held
// across a save's busy retries, so at most one writer is ever in flight) and
// one read connection behind a plain mutex. Under WAL, readers do not block
// the writer and vice versa.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::checkpoint::{CheckpointStore, TaskRecord, TaskStatus, CLOSED_SENTINEL};
use crate::constants::{CHECKPOINT_BUSY_BASE_DELAY, CHECKPOINT_BUSY_RETRIES};

pub struct SqliteStore {
    write_conn: tokio::sync::Mutex<Connection>,
    read_conn: Mutex<Connection>,
    closed: AtomicBool,
}

impl SqliteStore {
    /// Open (or create) the checkpoint database at `path` and bootstrap the
    /// schema. Idempotent, safe to call on every startup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let write_conn = Self::connect(path)?;
        let read_conn = Self::connect(path)?;

        write_conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tasks (
                    bucket     TEXT NOT NULL,
                    key        TEXT NOT NULL,
                    size       INTEGER NOT NULL,
                    etag       TEXT NOT NULL,
                    status     TEXT NOT NULL,
                    attempts   INTEGER DEFAULT 0,
                    last_error TEXT,
                    updated_at DATETIME NOT NULL,
                    PRIMARY KEY (bucket, key)
                );

                CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
                CREATE INDEX IF NOT EXISTS idx_tasks_updated_at ON tasks(updated_at);
                ",
            )
            .with_context(|| format!("failed to create tasks table in {}", path.display()))?;

        debug!(path = %path.display(), "checkpoint store opened");
        Ok(Self {
            write_conn: tokio::sync::Mutex::new(write_conn),
            read_conn: Mutex::new(read_conn),
            closed: AtomicBool::new(false),
        })
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open checkpoint database {}", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 2000;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 60000;
            ",
        )
        .context("failed to apply checkpoint pragmas")?;
        Ok(conn)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("checkpoint {CLOSED_SENTINEL}");
        }
        Ok(())
    }

    fn save_inner(conn: &Connection, record: &TaskRecord) -> rusqlite::Result<()> {
        // Upsert rather than REPLACE: REPLACE is DELETE+INSERT and increases
        // lock contention.
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "
            INSERT INTO tasks
            (bucket, key, size, etag, status, attempts, last_error, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(bucket, key) DO UPDATE SET
                size = excluded.size,
                etag = excluded.etag,
                status = excluded.status,
                attempts = excluded.attempts,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            ",
            params![
                record.bucket,
                record.key,
                record.size,
                record.etag,
                record.status.as_str(),
                record.attempts,
                record.last_error,
                record.updated_at,
            ],
        )?;
        tx.commit()
    }

    fn get_inner(conn: &Connection, bucket: &str, key: &str) -> rusqlite::Result<Option<TaskRecord>> {
        conn.query_row(
            "
            SELECT bucket, key, size, etag, status, attempts, last_error, updated_at
            FROM tasks WHERE bucket = ?1 AND key = ?2
            ",
            params![bucket, key],
            map_row,
        )
        .optional()
    }

    fn list_by_status(&self, status: TaskStatus) -> Result<Vec<TaskRecord>> {
        let conn = self.read_conn.lock().expect("checkpoint read lock poisoned");
        let mut stmt = conn.prepare(
            "
            SELECT bucket, key, size, etag, status, attempts, last_error, updated_at
            FROM tasks WHERE status = ?1
            ORDER BY updated_at ASC
            ",
        )?;
        let rows = stmt.query_map(params![status.as_str()], map_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status: String = row.get(4)?;
    Ok(TaskRecord {
        bucket: row.get(0)?,
        key: row.get(1)?,
        size: row.get(2)?,
        etag: row.get(3)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// File-level contention shows up as a busy/locked error message; those are
/// the only errors worth retrying.
fn is_busy_error(err: &rusqlite::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("database is locked")
        || msg.contains("database is busy")
        || msg.contains("database table is locked")
}

/// Exponential backoff with a small random jitter to de-synchronize
/// contending writers.
async fn busy_backoff(attempt: u32) {
    let base = CHECKPOINT_BUSY_BASE_DELAY * 2u32.saturating_pow(attempt);
    let jitter_ms = rand::thread_rng().gen_range(0..=10 * (attempt as u64 + 1));
    tokio::time::sleep(base + std::time::Duration::from_millis(jitter_ms)).await;
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get_task(&self, bucket: &str, key: &str) -> Result<Option<TaskRecord>> {
        self.ensure_open()?;
        let mut attempt = 0;
        loop {
            let result = {
                let conn = self.read_conn.lock().expect("checkpoint read lock poisoned");
                Self::get_inner(&conn, bucket, key)
            };
            match result {
                Ok(record) => return Ok(record),
                Err(e) if is_busy_error(&e) && attempt + 1 < CHECKPOINT_BUSY_RETRIES => {
                    busy_backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(anyhow!(e)).context(format!("failed to load task {bucket}/{key}"))
                }
            }
        }
    }

    async fn save_task(&self, mut record: TaskRecord) -> Result<()> {
        self.ensure_open()?;
        record.updated_at = Utc::now();

        // The async mutex is held across busy retries: one save in flight at
        // a time, process-wide.
        let conn = self.write_conn.lock().await;
        let mut attempt = 0;
        loop {
            match Self::save_inner(&conn, &record) {
                Ok(()) => return Ok(()),
                Err(e) if is_busy_error(&e) && attempt + 1 < CHECKPOINT_BUSY_RETRIES => {
                    debug!(
                        bucket = %record.bucket,
                        key = %record.key,
                        attempt,
                        "checkpoint database busy, retrying"
                    );
                    busy_backoff(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(anyhow!(e)).context(format!(
                        "failed to save task {}/{}",
                        record.bucket, record.key
                    ))
                }
            }
        }
    }

    async fn list_pending(&self) -> Result<Vec<TaskRecord>> {
        self.ensure_open()?;
        self.list_by_status(TaskStatus::Pending)
    }

    async fn list_failed(&self) -> Result<Vec<TaskRecord>> {
        self.ensure_open()?;
        self.list_by_status(TaskStatus::Failed)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        debug!("checkpoint store closed");
        Ok(())
    }
}

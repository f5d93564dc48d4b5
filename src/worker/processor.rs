// src/worker/processor.rs
//
// Per-object state machine: skip decision, transfer (single-shot or
// multipart), retry with error classification, terminal checkpoint write.
// One worker owns a given key at a time (each task is enqueued once), so
// checkpoint writes per key are naturally serialized.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointStore, TaskRecord, TaskStatus, CLOSED_SENTINEL};
use crate::constants::DEFAULT_CONTENT_TYPE;
use crate::metrics::MetricsCollector;
use crate::storage::{CompletedPart, PutOptions, StorageClient};
use crate::worker::Task;

/// Transfer tuning shared by all workers.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub multipart_threshold: i64,
    pub part_size: i64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub skip_existing: bool,
}

pub struct TaskProcessor {
    config: ProcessorConfig,
    src: Arc<dyn StorageClient>,
    dst: Arc<dyn StorageClient>,
    checkpoint: Arc<dyn CheckpointStore>,
    metrics: Arc<MetricsCollector>,
    cancel: CancellationToken,
}

impl TaskProcessor {
    pub fn new(
        config: ProcessorConfig,
        src: Arc<dyn StorageClient>,
        dst: Arc<dyn StorageClient>,
        checkpoint: Arc<dyn CheckpointStore>,
        metrics: Arc<MetricsCollector>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            src,
            dst,
            checkpoint,
            metrics,
            cancel,
        }
    }

    /// Drive one task to a terminal outcome. Never returns an error: per-task
    /// failures are recorded and counted, cancellation leaves the task
    /// unmarked so a later run picks it up again.
    pub async fn process(&self, task: &Task) {
        let started = Instant::now();

        // Already recorded as done in a previous run?
        if let Ok(Some(record)) = self.checkpoint.get_task(&task.bucket, &task.key).await {
            if record.status == TaskStatus::Completed && self.config.skip_existing {
                debug!(key = %task.key, "skipping, checkpoint says completed");
                self.metrics.inc_skipped(task.size.max(0) as u64);
                return;
            }
        }

        // Already present in the destination with identical size and etag?
        if self.config.skip_existing && self.destination_matches(task).await {
            debug!(key = %task.key, "skipping, destination object matches");
            self.mark_completed(task, 0).await;
            self.metrics.inc_skipped(task.size.max(0) as u64);
            return;
        }

        let mut last_err = None;
        let mut attempts_used = 0;
        for attempt in 1..=self.config.retries {
            attempts_used = attempt;
            if self.cancel.is_cancelled() {
                debug!(key = %task.key, "task abandoned, run cancelled");
                return;
            }

            match self.transfer(task).await {
                Ok(()) => {
                    self.mark_completed(task, attempt).await;
                    self.metrics.inc_success(task.size.max(0) as u64);
                    self.metrics.observe_duration(started.elapsed());
                    info!(
                        key = %task.key,
                        size = task.size,
                        attempts = attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "object migrated"
                    );
                    return;
                }
                Err(err) => {
                    if self.cancel.is_cancelled() {
                        debug!(key = %task.key, "task abandoned mid-transfer, run cancelled");
                        return;
                    }
                    warn!(key = %task.key, attempt, error = %format!("{err:#}"), "transfer attempt failed");
                    let retriable = is_retriable_error(&err);
                    last_err = Some(err);
                    if !retriable {
                        break;
                    }
                    if attempt < self.config.retries {
                        let delay = backoff_delay(attempt, self.config.retry_backoff_ms);
                        tokio::select! {
                            _ = self.cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        let reason = last_err
            .map(|e| format!("{e:#}"))
            .unwrap_or_else(|| "unknown error".to_string());
        self.mark_failed(task, attempts_used, &reason).await;
        self.metrics.inc_failed();
        error!(key = %task.key, error = %reason, "object failed after all attempts");
    }

    async fn transfer(&self, task: &Task) -> Result<()> {
        let source = self
            .with_cancel(self.src.get_object(&task.bucket, &task.key))
            .await
            .context("failed to open source object")?;

        if task.size < self.config.multipart_threshold {
            self.upload_single(task, source.body).await
        } else {
            self.upload_multipart(task, source.body).await
        }
    }

    async fn upload_single(
        &self,
        task: &Task,
        body: crate::storage::ByteStream,
    ) -> Result<()> {
        let opts = self.put_options(task);
        self.with_cancel(
            self.dst
                .put_object(&task.bucket, &task.key, body, task.size, &opts),
        )
        .await
        .context("failed to upload object")
    }

    async fn upload_multipart(
        &self,
        task: &Task,
        body: crate::storage::ByteStream,
    ) -> Result<()> {
        let opts = self.put_options(task);
        let upload_id = self
            .with_cancel(self.dst.new_multipart(&task.bucket, &task.key, &opts))
            .await
            .context("failed to initiate multipart upload")?;

        match self.upload_parts(task, body, &upload_id).await {
            Ok(parts) => self
                .with_cancel(self.dst.complete_multipart(
                    &task.bucket,
                    &task.key,
                    &upload_id,
                    parts,
                ))
                .await
                .context("failed to complete multipart upload"),
            Err(err) => {
                // Never leave a dangling upload behind: abort discards any
                // parts already written. Best effort.
                if let Err(abort_err) = self
                    .dst
                    .abort_multipart(&task.bucket, &task.key, &upload_id)
                    .await
                {
                    warn!(
                        key = %task.key,
                        upload_id = %upload_id,
                        error = %format!("{abort_err:#}"),
                        "failed to abort multipart upload"
                    );
                }
                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        task: &Task,
        body: crate::storage::ByteStream,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>> {
        let mut reader = body.into_async_read();
        let part_count = part_count(task.size, self.config.part_size);
        let mut parts = Vec::with_capacity(part_count as usize);

        for part_number in 1..=part_count {
            if self.cancel.is_cancelled() {
                bail!("multipart upload cancelled");
            }

            let want = part_len(part_number, task.size, self.config.part_size);
            let data = self
                .with_cancel(read_part(&mut reader, want as usize))
                .await
                .with_context(|| format!("failed to read part {part_number}"))?;

            // a short read is only legal on the final part
            if (data.len() as i64) < want && part_number < part_count {
                bail!(
                    "short read on part {part_number}: got {} of {want} bytes",
                    data.len()
                );
            }

            let part_size = data.len();
            let etag = self
                .with_cancel(self.dst.upload_part(
                    &task.bucket,
                    &task.key,
                    upload_id,
                    part_number,
                    data,
                ))
                .await
                .with_context(|| format!("failed to upload part {part_number}"))?;
            debug!(key = %task.key, part_number, size = part_size, "part uploaded");

            parts.push(CompletedPart { part_number, etag });
        }

        Ok(parts)
    }

    async fn destination_matches(&self, task: &Task) -> bool {
        match self.dst.head_object(&task.bucket, &task.key).await {
            Ok(info) => info.size == task.size && info.etag == task.etag,
            // missing object or any head failure both read as "no match"
            Err(_) => false,
        }
    }

    fn put_options(&self, task: &Task) -> PutOptions {
        let content_type = if task.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE.to_string()
        } else {
            task.content_type.clone()
        };
        PutOptions {
            content_type,
            metadata: task.metadata.clone(),
        }
    }

    async fn mark_completed(&self, task: &Task, attempts: u32) {
        let mut record = TaskRecord::new(
            &task.bucket,
            &task.key,
            task.size,
            &task.etag,
            TaskStatus::Completed,
        );
        record.attempts = attempts;
        self.save_terminal(record).await;
    }

    async fn mark_failed(&self, task: &Task, attempts: u32, reason: &str) {
        let mut record = TaskRecord::new(
            &task.bucket,
            &task.key,
            task.size,
            &task.etag,
            TaskStatus::Failed,
        );
        record.attempts = attempts;
        record.last_error = Some(reason.to_string());
        self.save_terminal(record).await;
    }

    /// Terminal checkpoint writes never abort the run: a store that is
    /// already closing down during shutdown only warrants a warning.
    async fn save_terminal(&self, record: TaskRecord) {
        let bucket = record.bucket.clone();
        let key = record.key.clone();
        let status = record.status;
        if let Err(err) = self.checkpoint.save_task(record).await {
            if err.to_string().contains(CLOSED_SENTINEL) {
                warn!(
                    bucket = %bucket,
                    key = %key,
                    status = status.as_str(),
                    "cannot record task outcome, checkpoint store is closing"
                );
            } else {
                error!(
                    bucket = %bucket,
                    key = %key,
                    status = status.as_str(),
                    error = %format!("{err:#}"),
                    "failed to record task outcome"
                );
            }
        }
    }

    /// Race a client call against cancellation so in-flight I/O is abandoned
    /// promptly instead of running to completion.
    async fn with_cancel<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            _ = self.cancel.cancelled() => bail!("operation cancelled"),
            result = fut => result,
        }
    }
}

/// Read up to `want` bytes from the source stream. Returns fewer only at
/// end of stream; the caller decides whether that is legal.
async fn read_part(
    reader: &mut (impl tokio::io::AsyncRead + Unpin + Send),
    want: usize,
) -> Result<Bytes> {
    let mut buf = Vec::with_capacity(want);
    reader
        .take(want as u64)
        .read_to_end(&mut buf)
        .await
        .context("source stream read failed")?;
    Ok(Bytes::from(buf))
}

/// Number of parts needed to cover `size` bytes.
pub(crate) fn part_count(size: i64, part_size: i64) -> i32 {
    ((size + part_size - 1) / part_size) as i32
}

/// Length of part `n` (1-based); only the final part may be shorter.
pub(crate) fn part_len(n: i32, size: i64, part_size: i64) -> i64 {
    part_size.min(size - (n as i64 - 1) * part_size)
}

/// Textual error classification, tolerant to wrapped errors: the whole cause
/// chain is searched. Matches network-class failures and HTTP 5xx responses;
/// everything else is fatal for the task.
pub fn is_retriable_error(err: &anyhow::Error) -> bool {
    const RETRIABLE_PATTERNS: &[&str] = &[
        "timeout",
        "connection",
        "temporary",
        "network",
        "dns",
        "500",
        "502",
        "503",
        "504",
        "internal server error",
        "bad gateway",
        "service unavailable",
        "gateway timeout",
    ];

    let message = err
        .chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
        .to_lowercase();
    RETRIABLE_PATTERNS.iter().any(|p| message.contains(p))
}

/// Exponential backoff: `base * 2^(attempt-1)`.
pub fn backoff_delay(attempt: u32, base_ms: u64) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(63)))
}

// src/migrator.rs
//
// Orchestrator: wires clients, checkpoint store, metrics, workers, and the
// lister together and owns the run lifecycle. A fatal listing error closes
// the queue early so workers drain and exit.

use std::io::IsTerminal;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointStore, SqliteStore};
use crate::config::Config;
use crate::constants::QUEUE_DEPTH_PER_WORKER;
use crate::lister::ObjectLister;
use crate::metrics::MetricsCollector;
use crate::progress::ProgressDisplay;
use crate::storage::{S3Client, StorageClient};
use crate::worker::{ProcessorConfig, TaskProcessor, WorkerPool};

/// Final tallies of a run, used for the process exit code.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub bytes: u64,
}

pub struct Migrator {
    cfg: Config,
    src: Arc<dyn StorageClient>,
    dst: Arc<dyn StorageClient>,
    checkpoint: Arc<dyn CheckpointStore>,
    metrics: Arc<MetricsCollector>,
}

impl Migrator {
    /// Build the production wiring: two S3 clients, the SQLite checkpoint
    /// store, and a fresh metrics collector.
    pub async fn new(cfg: Config) -> Result<Self> {
        let src = S3Client::connect(&cfg.source)
            .await
            .context("failed to create source client")?;
        let dst = S3Client::connect(&cfg.target)
            .await
            .context("failed to create destination client")?;
        let checkpoint = SqliteStore::open(&cfg.migration.checkpoint)
            .context("failed to open checkpoint store")?;

        Ok(Self::with_components(
            cfg,
            Arc::new(src),
            Arc::new(dst),
            Arc::new(checkpoint),
            Arc::new(MetricsCollector::new()),
        ))
    }

    /// Assemble a migrator from pre-built components. Tests inject in-memory
    /// fakes through this constructor.
    pub fn with_components(
        cfg: Config,
        src: Arc<dyn StorageClient>,
        dst: Arc<dyn StorageClient>,
        checkpoint: Arc<dyn CheckpointStore>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            cfg,
            src,
            dst,
            checkpoint,
            metrics,
        }
    }

    /// Run the migration to completion or cancellation and return the final
    /// tallies. The checkpoint store stays open; call `close()` afterwards.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let m = &self.cfg.migration;
        info!(
            bucket = %m.bucket,
            prefix = %m.prefix,
            object = %m.object,
            concurrency = m.concurrency,
            dry_run = m.dry_run,
            "starting migration"
        );

        self.spawn_metrics_listener(cancel.clone());

        if m.resume {
            self.log_resume_state().await;
        }

        let processor = Arc::new(TaskProcessor::new(
            ProcessorConfig {
                multipart_threshold: m.multipart_threshold,
                part_size: m.part_size,
                retries: m.retries,
                retry_backoff_ms: m.retry_backoff_ms,
                skip_existing: m.skip_existing,
            },
            self.src.clone(),
            self.dst.clone(),
            self.checkpoint.clone(),
            self.metrics.clone(),
            cancel.clone(),
        ));
        let pool = WorkerPool::new(m.concurrency, processor, self.metrics.clone());
        let lister = ObjectLister::new(self.src.clone());

        let display = if self.display_enabled() {
            // Totals first so the bar starts with a meaningful length; a
            // failed counting pass is non-fatal and leaves totals unknown.
            match lister
                .count_objects(&m.bucket, &m.prefix, &m.object, &cancel)
                .await
            {
                Ok((objects, bytes)) => {
                    info!(total_objects = objects, total_bytes = bytes, "counted objects");
                    self.metrics.set_total(objects, bytes);
                }
                Err(err) => {
                    warn!(
                        error = %format!("{err:#}"),
                        "failed to count objects, progress totals unknown"
                    );
                }
            }
            Some(ProgressDisplay::start(self.metrics.tracker()))
        } else {
            None
        };

        let (task_tx, task_rx) = async_channel::bounded(m.concurrency * QUEUE_DEPTH_PER_WORKER);
        let workers = pool.start(task_rx, cancel.clone());

        let list_result = lister
            .list_and_enqueue(&m.bucket, &m.prefix, &m.object, &task_tx, m.dry_run, &cancel)
            .await;

        // Closing the queue (on success and on failure alike) lets workers
        // drain whatever was enqueued and exit.
        task_tx.close();
        for worker in workers {
            if let Err(err) = worker.await {
                error!(error = %err, "worker task panicked");
            }
        }

        if let Some(display) = display {
            display.stop().await;
        }

        list_result.context("failed to list objects")?;

        let status = self.metrics.tracker().status();
        let summary = RunSummary {
            processed: status.processed_objects,
            success: status.success_objects,
            failed: status.failed_objects,
            skipped: status.skipped_objects,
            bytes: status.processed_bytes,
        };
        info!(
            processed = summary.processed,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            bytes = summary.bytes,
            "migration completed"
        );
        Ok(summary)
    }

    /// Release held resources. Safe to call after a failed run.
    pub async fn close(&self) {
        if let Err(err) = self.checkpoint.close().await {
            error!(error = %format!("{err:#}"), "error closing checkpoint store");
        }
    }

    fn display_enabled(&self) -> bool {
        let m = &self.cfg.migration;
        if m.dry_run {
            info!("progress display disabled (dry-run mode)");
            return false;
        }
        if !m.show_progress {
            info!("progress display disabled (disabled in config)");
            return false;
        }
        if !std::io::stderr().is_terminal() {
            info!("progress display disabled (not a terminal)");
            return false;
        }
        true
    }

    fn spawn_metrics_listener(&self, cancel: CancellationToken) {
        let addr: SocketAddr = match self.cfg.migration.metrics_addr.parse() {
            Ok(addr) => addr,
            Err(err) => {
                error!(
                    addr = %self.cfg.migration.metrics_addr,
                    error = %err,
                    "invalid metrics address, metrics endpoint disabled"
                );
                return;
            }
        };
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            if let Err(err) = metrics.serve(addr, cancel).await {
                error!(error = %format!("{err:#}"), "metrics listener failed");
            }
        });
    }

    async fn log_resume_state(&self) {
        match (
            self.checkpoint.list_pending().await,
            self.checkpoint.list_failed().await,
        ) {
            (Ok(pending), Ok(failed)) => {
                info!(
                    pending = pending.len(),
                    failed = failed.len(),
                    "resuming from checkpoint; completed objects will be skipped, \
                     everything else is re-attempted"
                );
            }
            (pending, failed) => {
                if let Err(err) = pending.and(failed) {
                    warn!(error = %format!("{err:#}"), "failed to read checkpoint resume state");
                }
            }
        }
    }
}

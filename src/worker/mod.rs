// src/worker/mod.rs
//
// The worker pool: N consumers draining the shared bounded task queue.
// Each task is processed to a terminal outcome by the TaskProcessor; the
// pool only handles scheduling, cancellation, and lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics::MetricsCollector;

pub mod processor;

pub use processor::{ProcessorConfig, TaskProcessor};

/// In-memory descriptor of one object to migrate. Immutable once enqueued;
/// consumed by exactly one worker.
#[derive(Debug, Clone)]
pub struct Task {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub etag: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

pub struct WorkerPool {
    size: usize,
    processor: Arc<TaskProcessor>,
    metrics: Arc<MetricsCollector>,
}

impl WorkerPool {
    pub fn new(size: usize, processor: Arc<TaskProcessor>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            size,
            processor,
            metrics,
        }
    }

    /// Spawn the workers. The returned handles are the pool's "all workers
    /// exited" signal: awaiting them all means the queue drained (or the run
    /// was cancelled).
    pub fn start(
        &self,
        tasks: Receiver<Task>,
        cancel: CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..self.size)
            .map(|id| {
                let tasks = tasks.clone();
                let processor = self.processor.clone();
                let metrics = self.metrics.clone();
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(id, tasks, processor, metrics, cancel))
            })
            .collect()
    }
}

async fn worker_loop(
    id: usize,
    tasks: Receiver<Task>,
    processor: Arc<TaskProcessor>,
    metrics: Arc<MetricsCollector>,
    cancel: CancellationToken,
) {
    debug!(worker_id = id, "worker started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(worker_id = id, "worker stopped, run cancelled");
                return;
            }
            received = tasks.recv() => {
                let Ok(task) = received else {
                    debug!(worker_id = id, "worker finished, queue closed");
                    return;
                };
                metrics.worker_busy();
                processor.process(&task).await;
                metrics.worker_idle();
            }
        }
    }
}

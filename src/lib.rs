// src/lib.rs
//
// Crate root: module declarations plus public re-exports.

pub mod checkpoint;
pub mod config;
pub mod constants;
pub mod lister;
pub mod metrics;
pub mod migrator;
pub mod progress;
pub mod storage;
pub mod worker;

// ===== Common re-exports =====
// The types most callers (the CLI and the integration tests) need.
pub use checkpoint::{CheckpointStore, SqliteStore, TaskRecord, TaskStatus};
pub use config::{Config, Overrides};
pub use metrics::MetricsCollector;
pub use migrator::{Migrator, RunSummary};
pub use progress::{ProgressStatus, ProgressTracker};
pub use storage::{
    normalize_endpoint, ByteStream, CompletedPart, ObjectInfo, PutOptions, S3Client, SourceObject,
    StorageClient,
};
pub use worker::{ProcessorConfig, Task, TaskProcessor, WorkerPool};

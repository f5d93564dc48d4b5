// src/constants.rs
//
// Centralized constants for s3migrate to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Default number of concurrent transfer workers
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Default threshold above which objects are copied with multipart upload (100 MB)
pub const DEFAULT_MULTIPART_THRESHOLD: i64 = 100 * 1024 * 1024;

/// Default multipart part size (64 MB)
pub const DEFAULT_PART_SIZE: i64 = 64 * 1024 * 1024;

/// Minimum S3 multipart part size (5 MiB - S3 requirement, last part excepted)
pub const MIN_PART_SIZE: i64 = 5 * 1024 * 1024;

/// Default number of attempts per object before it is marked failed
pub const DEFAULT_RETRIES: u32 = 5;

/// Default initial backoff between attempts (doubles per attempt)
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Default checkpoint database path
pub const DEFAULT_CHECKPOINT_PATH: &str = "./checkpoint.db";

/// Default listen address for the Prometheus metrics endpoint
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Region reported to the SDK when none is configured; S3-compatible
/// endpoints generally ignore it but v4 signing requires one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Task queue capacity per worker; the queue holds `2 * concurrency` tasks
/// so the lister stays ahead of the pool without unbounded buffering.
pub const QUEUE_DEPTH_PER_WORKER: usize = 2;

/// Fallback content type when the source object carries none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Maximum attempts against a busy/locked checkpoint database
pub const CHECKPOINT_BUSY_RETRIES: u32 = 10;

/// Base delay for checkpoint busy retries (grows exponentially, with jitter)
pub const CHECKPOINT_BUSY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Number of throughput samples retained by the progress tracker
pub const MAX_SPEED_SAMPLES: usize = 60;

/// Window over which the "current" transfer speed is computed
pub const CURRENT_SPEED_WINDOW: Duration = Duration::from_secs(5);

/// Refresh interval of the live progress display
pub const PROGRESS_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Prometheus default histogram buckets, used for the per-object duration histogram
pub const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

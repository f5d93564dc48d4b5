// src/bin/cli.rs
//
//! Migrate objects between two S3-compatible stores.
//!
//! Examples:
//! ```bash
//! s3migrate --src-endpoint minio:9000 --src-access-key AK --src-secret-key SK \
//!           --dst-endpoint rustfs:9000 --dst-access-key AK --dst-secret-key SK \
//!           --bucket data --prefix photos/
//! s3migrate --config config.yaml --object one/key.bin --dry-run
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use s3migrate::{Config, Migrator, Overrides};

#[derive(Parser)]
#[command(
    name = "s3migrate",
    version,
    about = "Concurrent, resumable object migration between S3-compatible stores",
    long_about = "Migrates objects from one S3-compatible store to another with \
                  checkpointed resume, retry with backoff, multipart transfer for \
                  large objects, and live progress/metrics."
)]
struct Cli {
    /// Config file (YAML); flags override file values when given
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source endpoint, host[:port] or http[s]://host[:port]
    #[arg(long)]
    src_endpoint: Option<String>,
    /// Source access key
    #[arg(long)]
    src_access_key: Option<String>,
    /// Source secret key
    #[arg(long)]
    src_secret_key: Option<String>,
    /// Use HTTPS for the source (default false)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    src_secure: Option<bool>,

    /// Destination endpoint, host[:port] or http[s]://host[:port]
    #[arg(long)]
    dst_endpoint: Option<String>,
    /// Destination access key
    #[arg(long)]
    dst_access_key: Option<String>,
    /// Destination secret key
    #[arg(long)]
    dst_secret_key: Option<String>,
    /// Use HTTPS for the destination (default true)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    dst_secure: Option<bool>,

    /// Bucket name (required)
    #[arg(long)]
    bucket: Option<String>,
    /// Object prefix filter
    #[arg(long)]
    prefix: Option<String>,
    /// Single object key
    #[arg(long)]
    object: Option<String>,

    /// Number of concurrent workers (default 16)
    #[arg(long)]
    concurrency: Option<usize>,
    /// Multipart upload threshold in bytes (default 104857600)
    #[arg(long)]
    multipart_threshold: Option<i64>,
    /// Multipart part size in bytes (default 67108864, minimum 5 MiB)
    #[arg(long)]
    part_size: Option<i64>,
    /// Maximum attempts per object (default 5)
    #[arg(long)]
    retries: Option<u32>,
    /// Initial retry backoff in milliseconds (default 500)
    #[arg(long)]
    retry_backoff_ms: Option<u64>,

    /// List objects without migrating
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    dry_run: Option<bool>,
    /// Resume from checkpoint
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    resume: Option<bool>,
    /// Skip objects already present with same size/etag (default true)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    skip_existing: Option<bool>,
    /// Show live progress (default true, auto-disabled for dry-run)
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    show_progress: Option<bool>,

    /// Checkpoint database file (default ./checkpoint.db)
    #[arg(long)]
    checkpoint: Option<String>,
    /// Log level: debug/info/warn/error (default info)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_overrides(self) -> (Option<PathBuf>, Overrides) {
        let config = self.config;
        let overrides = Overrides {
            src_endpoint: self.src_endpoint,
            src_access_key: self.src_access_key,
            src_secret_key: self.src_secret_key,
            src_secure: self.src_secure,
            dst_endpoint: self.dst_endpoint,
            dst_access_key: self.dst_access_key,
            dst_secret_key: self.dst_secret_key,
            dst_secure: self.dst_secure,
            bucket: self.bucket,
            prefix: self.prefix,
            object: self.object,
            concurrency: self.concurrency,
            multipart_threshold: self.multipart_threshold,
            part_size: self.part_size,
            retries: self.retries,
            retry_backoff_ms: self.retry_backoff_ms,
            dry_run: self.dry_run,
            checkpoint: self.checkpoint,
            skip_existing: self.skip_existing,
            resume: self.resume,
            show_progress: self.show_progress,
            log_level: self.log_level,
        };
        (config, overrides)
    }
}

fn init_tracing(level: &str) {
    // RUST_LOG still wins for per-module tuning; the flag sets the default.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel the token on the first SIGINT/SIGTERM so everything in flight
/// winds down cooperatively.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(term) => term,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    info!("received shutdown signal, stopping gracefully");
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("received shutdown signal, stopping gracefully");
        cancel.cancel();
    });
}

async fn run() -> Result<u64> {
    // Loads any variables from a .env file that are not already set
    dotenvy::dotenv().ok();

    let (config_file, overrides) = Cli::parse().into_overrides();
    let cfg = Config::load(config_file.as_deref(), overrides).context("failed to load config")?;

    init_tracing(&cfg.log_level);

    let migrator = Migrator::new(cfg)
        .await
        .context("failed to create migrator")?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let result = migrator.run(cancel).await;
    migrator.close().await;

    let summary = result?;
    Ok(summary.failed)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("Error: {failed} object(s) failed to migrate");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

// src/progress/display.rs
//
// Live terminal progress rendering. Purely derived: the tracker is the
// source of truth and this loop only reads snapshots, so it can never block
// the transfer hot path.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::constants::PROGRESS_REFRESH_INTERVAL;
use crate::progress::{ProgressStatus, ProgressTracker};

pub struct ProgressDisplay {
    tracker: Arc<ProgressTracker>,
    bar: ProgressBar,
    stop: CancellationToken,
    render_task: JoinHandle<()>,
}

impl ProgressDisplay {
    /// Start rendering snapshots of `tracker` until `stop()` is called.
    pub fn start(tracker: Arc<ProgressTracker>) -> Self {
        let bar = ProgressBar::new(tracker.status().total_bytes.max(1));
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "migrating {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                     {bytes}/{total_bytes} ({bytes_per_sec}, ETA: {eta}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        let stop = CancellationToken::new();
        let render_task = tokio::spawn(render_loop(
            tracker.clone(),
            bar.clone(),
            stop.clone(),
        ));

        Self {
            tracker,
            bar,
            stop,
            render_task,
        }
    }

    /// Stop the render loop and print the final summary.
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.render_task.await;

        let status = self.tracker.status();
        let elapsed = status.start_time.elapsed();
        self.bar.finish_and_clear();

        info!(
            processed = status.processed_objects,
            success = status.success_objects,
            failed = status.failed_objects,
            skipped = status.skipped_objects,
            bytes = %HumanBytes(status.processed_bytes),
            elapsed_secs = elapsed.as_secs(),
            avg_speed = %format_speed(status.average_speed),
            "migration finished"
        );
    }
}

async fn render_loop(tracker: Arc<ProgressTracker>, bar: ProgressBar, stop: CancellationToken) {
    let mut interval = tokio::time::interval(PROGRESS_REFRESH_INTERVAL);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = interval.tick() => {
                let status = tracker.status();
                render(&bar, &status);
            }
        }
    }
}

fn render(bar: &ProgressBar, status: &ProgressStatus) {
    if status.total_bytes > 0 {
        bar.set_length(status.total_bytes);
    }
    bar.set_position(status.processed_bytes);
    bar.set_message(format!(
        "{}/{} objects ({} ok, {} failed, {} skipped)",
        status.processed_objects,
        if status.total_objects > 0 {
            status.total_objects.to_string()
        } else {
            "?".to_string()
        },
        status.success_objects,
        status.failed_objects,
        status.skipped_objects,
    ));
}

fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", HumanBytes(bytes_per_sec as u64))
}

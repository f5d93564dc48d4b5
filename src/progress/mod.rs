// src/progress/mod.rs
//
// Shared migration progress state. Workers push per-object outcomes from
// arbitrary tasks; the display and the metrics endpoint read cheap
// by-value snapshots.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::constants::{CURRENT_SPEED_WINDOW, MAX_SPEED_SAMPLES};

pub mod display;

pub use display::ProgressDisplay;

/// A by-value snapshot of the migration state.
#[derive(Debug, Clone)]
pub struct ProgressStatus {
    pub total_objects: u64,
    pub processed_objects: u64,
    pub success_objects: u64,
    pub failed_objects: u64,
    pub skipped_objects: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub start_time: Instant,
    pub last_update_time: Instant,
    /// Bytes/second over the recent sample window
    pub current_speed: f64,
    /// Bytes/second since start
    pub average_speed: f64,
    /// Estimated remaining time; zero when totals are unknown
    pub eta: Duration,
}

struct SpeedSample {
    timestamp: Instant,
    bytes: u64,
}

struct TrackerState {
    status: ProgressStatus,
    samples: VecDeque<SpeedSample>,
}

/// Aggregated counters with sliding-window throughput and ETA.
///
/// All updates take the write lock; `status()` takes the read lock and
/// copies out, so readers never block the transfer hot path for long.
pub struct ProgressTracker {
    inner: RwLock<TrackerState>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            inner: RwLock::new(TrackerState {
                status: ProgressStatus {
                    total_objects: 0,
                    processed_objects: 0,
                    success_objects: 0,
                    failed_objects: 0,
                    skipped_objects: 0,
                    total_bytes: 0,
                    processed_bytes: 0,
                    start_time: now,
                    last_update_time: now,
                    current_speed: 0.0,
                    average_speed: 0.0,
                    eta: Duration::ZERO,
                },
                samples: VecDeque::with_capacity(MAX_SPEED_SAMPLES),
            }),
        }
    }

    /// Record totals discovered by the counting pre-pass.
    pub fn set_total(&self, objects: u64, bytes: u64) {
        let mut state = self.inner.write().expect("progress lock poisoned");
        state.status.total_objects = objects;
        state.status.total_bytes = bytes;
    }

    pub fn add_success(&self, bytes: u64) {
        let mut state = self.inner.write().expect("progress lock poisoned");
        state.status.success_objects += 1;
        state.status.processed_objects += 1;
        state.status.processed_bytes += bytes;
        update_speed(&mut state, bytes);
    }

    /// Failures carry no byte count.
    pub fn add_failed(&self) {
        let mut state = self.inner.write().expect("progress lock poisoned");
        state.status.failed_objects += 1;
        state.status.processed_objects += 1;
    }

    /// Skips count their bytes as processed: the data is already in place.
    pub fn add_skipped(&self, bytes: u64) {
        let mut state = self.inner.write().expect("progress lock poisoned");
        state.status.skipped_objects += 1;
        state.status.processed_objects += 1;
        state.status.processed_bytes += bytes;
        update_speed(&mut state, bytes);
    }

    pub fn status(&self) -> ProgressStatus {
        self.inner
            .read()
            .expect("progress lock poisoned")
            .status
            .clone()
    }

    /// Object progress in percent; zero while totals are unknown.
    pub fn percent_objects(&self) -> f64 {
        let status = self.status();
        if status.total_objects == 0 {
            return 0.0;
        }
        status.processed_objects as f64 / status.total_objects as f64 * 100.0
    }
}

fn update_speed(state: &mut TrackerState, bytes: u64) {
    let now = Instant::now();

    state.samples.push_back(SpeedSample {
        timestamp: now,
        bytes,
    });
    while state.samples.len() > MAX_SPEED_SAMPLES {
        state.samples.pop_front();
    }

    // Current speed: bytes within the recent window over the age of the
    // oldest sample in it.
    let cutoff = now.checked_sub(CURRENT_SPEED_WINDOW).unwrap_or(now);
    let mut recent_bytes = 0u64;
    let mut oldest: Option<Instant> = None;
    for sample in state.samples.iter().rev() {
        if sample.timestamp < cutoff {
            break;
        }
        recent_bytes += sample.bytes;
        oldest = Some(sample.timestamp);
    }
    state.status.current_speed = match oldest {
        Some(first) if state.samples.len() >= 2 => {
            let window = now.duration_since(first).as_secs_f64();
            if window > 0.0 {
                recent_bytes as f64 / window
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let elapsed = now.duration_since(state.status.start_time).as_secs_f64();
    if elapsed > 0.0 {
        state.status.average_speed = state.status.processed_bytes as f64 / elapsed;
    }

    state.status.eta = compute_eta(&state.status);
    state.status.last_update_time = now;
}

fn compute_eta(status: &ProgressStatus) -> Duration {
    if status.total_bytes == 0 || status.average_speed == 0.0 {
        return Duration::ZERO;
    }
    let remaining = status.total_bytes.saturating_sub(status.processed_bytes);
    if remaining == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(remaining as f64 / status.average_speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_conserve_processed() {
        let tracker = ProgressTracker::new();
        tracker.add_success(100);
        tracker.add_success(50);
        tracker.add_failed();
        tracker.add_skipped(25);

        let status = tracker.status();
        assert_eq!(status.processed_objects, 4);
        assert_eq!(
            status.processed_objects,
            status.success_objects + status.failed_objects + status.skipped_objects
        );
        assert_eq!(status.processed_bytes, 175);
    }

    #[test]
    fn failures_add_no_bytes() {
        let tracker = ProgressTracker::new();
        tracker.add_failed();
        tracker.add_failed();
        let status = tracker.status();
        assert_eq!(status.processed_bytes, 0);
        assert_eq!(status.failed_objects, 2);
    }

    #[test]
    fn eta_zero_without_totals() {
        let tracker = ProgressTracker::new();
        tracker.add_success(1024);
        assert_eq!(tracker.status().eta, Duration::ZERO);
    }

    #[test]
    fn eta_zero_when_done() {
        let tracker = ProgressTracker::new();
        tracker.set_total(1, 1024);
        tracker.add_success(1024);
        assert_eq!(tracker.status().eta, Duration::ZERO);
    }

    #[test]
    fn eta_positive_with_remaining_bytes() {
        let tracker = ProgressTracker::new();
        tracker.set_total(2, 2048);
        std::thread::sleep(Duration::from_millis(10));
        tracker.add_success(1024);
        let status = tracker.status();
        assert!(status.average_speed > 0.0);
        assert!(status.eta > Duration::ZERO);
    }

    #[test]
    fn percent_objects_tracks_totals() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.percent_objects(), 0.0);
        tracker.set_total(4, 0);
        tracker.add_success(1);
        tracker.add_skipped(1);
        assert!((tracker.percent_objects() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sample_ring_stays_bounded() {
        let tracker = ProgressTracker::new();
        for _ in 0..(MAX_SPEED_SAMPLES + 20) {
            tracker.add_success(1);
        }
        let state = tracker.inner.read().unwrap();
        assert!(state.samples.len() <= MAX_SPEED_SAMPLES);
    }
}

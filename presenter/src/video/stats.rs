//! Presentation statistics tracking
//!
//! Counters for the scheduler's timing decisions and the controller's
//! frame flow, with periodic log output and a serializable snapshot for
//! diagnostic dumps.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Serializable view of the counters at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub frames_presented: u64,
    pub frames_late: u64,
    pub frames_deferred: u64,
    pub frames_flushed: u64,
    pub steps_completed: u64,
}

/// Tracks presentation statistics.
///
/// All counters are atomics so the scheduler worker, the controller, and
/// the host's free callbacks can bump them without sharing a lock.
pub struct PresentStats {
    /// Frames handed to the render backend.
    frames_presented: AtomicU64,

    /// Frames that were already late (past a quarter-frame) at decision
    /// time and were fast-tracked.
    frames_late: AtomicU64,

    /// Defer decisions (a frame can defer more than once).
    frames_deferred: AtomicU64,

    /// Frames discarded by a scheduler flush.
    frames_flushed: AtomicU64,

    /// Completed frame-step operations.
    steps_completed: AtomicU64,

    /// Last time stats were logged.
    last_log: Mutex<Instant>,
}

impl PresentStats {
    pub fn new() -> Self {
        Self {
            frames_presented: AtomicU64::new(0),
            frames_late: AtomicU64::new(0),
            frames_deferred: AtomicU64::new(0),
            frames_flushed: AtomicU64::new(0),
            steps_completed: AtomicU64::new(0),
            last_log: Mutex::new(Instant::now()),
        }
    }

    pub fn record_presented(&self) {
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late(&self) {
        self.frames_late.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deferred(&self) {
        self.frames_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self, count: u64) {
        self.frames_flushed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_step_completed(&self) {
        self.steps_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            frames_late: self.frames_late.load(Ordering::Relaxed),
            frames_deferred: self.frames_deferred.load(Ordering::Relaxed),
            frames_flushed: self.frames_flushed.load(Ordering::Relaxed),
            steps_completed: self.steps_completed.load(Ordering::Relaxed),
        }
    }

    /// Log statistics if `interval` has elapsed since the last line.
    pub fn maybe_log_stats(&self, interval: Duration) {
        let mut last = self.last_log.lock().unwrap();
        if last.elapsed() < interval {
            return;
        }
        *last = Instant::now();
        drop(last);

        let snap = self.snapshot();
        let late_rate = if snap.frames_presented > 0 {
            (snap.frames_late as f64 / snap.frames_presented as f64) * 100.0
        } else {
            0.0
        };

        log::info!(
            "Presentation stats: {} presented, {} late ({:.1}%), {} deferrals, {} flushed",
            snap.frames_presented,
            snap.frames_late,
            late_rate,
            snap.frames_deferred,
            snap.frames_flushed,
        );
    }
}

impl Default for PresentStats {
    fn default() -> Self {
        Self::new()
    }
}

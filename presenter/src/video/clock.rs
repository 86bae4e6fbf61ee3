use common::MediaTime;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// The presentation clock the scheduler paces frames against.
///
/// State-change callbacks (start/stop/pause/rate) do not arrive through
/// this trait; the clock owner delivers them to the controller's
/// `on_clock_*` methods from whatever thread it runs on.
pub trait PresentationClock: Send + Sync {
    /// Returns the current presentation time together with the system
    /// instant it was sampled at.
    fn correlated_time(&self) -> (MediaTime, Instant);

    /// Convenience accessor for just the presentation time.
    fn time(&self) -> MediaTime {
        self.correlated_time().0
    }
}

/// A monotonic wall clock: presentation time is the elapsed time since
/// construction (or the last `reset`).
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationClock for SystemClock {
    fn correlated_time(&self) -> (MediaTime, Instant) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.epoch);
        (
            MediaTime((elapsed.as_nanos() / 100) as i64),
            now,
        )
    }
}

/// A manually-advanced clock for tests and deterministic drivers.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: MediaTime) -> Self {
        Self {
            now: AtomicI64::new(start.0),
        }
    }

    pub fn set(&self, time: MediaTime) {
        self.now.store(time.0, Ordering::Release);
    }

    pub fn advance(&self, delta: MediaTime) {
        self.now.fetch_add(delta.0, Ordering::AcqRel);
    }
}

impl PresentationClock for ManualClock {
    fn correlated_time(&self) -> (MediaTime, Instant) {
        (MediaTime(self.now.load(Ordering::Acquire)), Instant::now())
    }
}

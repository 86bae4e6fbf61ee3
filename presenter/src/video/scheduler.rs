use crate::config::PresenterOptions;
use crate::gpu::{RenderBackend, RenderError};
use crate::video::clock::PresentationClock;
use crate::video::sample::VideoSample;
use crate::video::stats::PresentStats;
use common::{MediaTime, Ratio};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Frame rate assumed until negotiation supplies the real one (the same
/// default the rest of the pipeline assumes for unknown streams).
const DEFAULT_FRAME_RATE: Ratio = Ratio { num: 30, den: 1 };

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("scheduler worker is not running")]
    NotStarted,

    #[error("scheduler worker is already running")]
    AlreadyStarted,

    #[error("scheduler worker did not signal readiness in time")]
    StartupTimeout,

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Wake signals for the worker thread.
enum Command {
    /// A sample was enqueued; re-examine the queue.
    Wake,
    /// Drop everything queued and acknowledge.
    Flush { done: mpsc::SyncSender<usize> },
    /// Exit the worker loop.
    Terminate,
}

/// State shared between the scheduler handle and its worker.
struct Shared {
    queue: Mutex<VecDeque<VideoSample>>,
    /// Nominal inter-frame interval, 100ns units.
    per_frame: AtomicI64,
    /// One quarter of the inter-frame interval: the on-time tolerance.
    quarter_frame: AtomicI64,
    /// Playback rate as f32 bits (1.0 = normal, negative = reverse,
    /// 0.0 = scrubbing).
    rate_bits: AtomicU32,
    /// First fatal present error, parked for the controller to collect.
    fatal: Mutex<Option<RenderError>>,
}

impl Shared {
    fn rate(&self) -> f32 {
        f32::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    fn quarter(&self) -> MediaTime {
        MediaTime(self.quarter_frame.load(Ordering::Acquire))
    }
}

struct Worker {
    tx: Sender<Command>,
    join: thread::JoinHandle<()>,
}

/// Presents frames at their target times on a dedicated worker thread.
///
/// Frames scheduled with a future target are deferred with a computed
/// sleep; frames already more than a quarter-frame late are presented
/// immediately. Presentation order is FIFO except that late frames are
/// fast-tracked — a frame is never shown before its timing window.
pub struct FrameScheduler {
    backend: Arc<dyn RenderBackend>,
    stats: Arc<PresentStats>,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    clock: Mutex<Option<Arc<dyn PresentationClock>>>,
    startup_timeout: Duration,
    flush_timeout: Duration,
}

impl FrameScheduler {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        stats: Arc<PresentStats>,
        options: &PresenterOptions,
    ) -> Self {
        let per_frame = DEFAULT_FRAME_RATE.average_frame_duration();
        Self {
            backend,
            stats,
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                per_frame: AtomicI64::new(per_frame.0),
                quarter_frame: AtomicI64::new(per_frame.0 / 4),
                rate_bits: AtomicU32::new(1.0f32.to_bits()),
                fatal: Mutex::new(None),
            }),
            worker: Mutex::new(None),
            clock: Mutex::new(None),
            startup_timeout: options.startup_timeout,
            flush_timeout: options.flush_timeout,
        }
    }

    /// Derives the per-frame interval and quarter-frame tolerance from
    /// the negotiated frame rate.
    pub fn set_frame_rate(&self, rate: Ratio) {
        let per_frame = rate.average_frame_duration();
        self.shared.per_frame.store(per_frame.0, Ordering::Release);
        self.shared
            .quarter_frame
            .store(per_frame.0 / 4, Ordering::Release);
        log::debug!(
            "Scheduler frame rate {} ({}ms per frame)",
            rate,
            per_frame.as_millis()
        );
    }

    /// Sets the playback rate. Negative rates invert lateness
    /// comparisons; rate 0.0 means scrubbing.
    pub fn set_clock_rate(&self, rate: f32) {
        self.shared.rate_bits.store(rate.to_bits(), Ordering::Release);
    }

    /// The nominal inter-frame interval currently in effect.
    pub fn frame_interval(&self) -> MediaTime {
        MediaTime(self.shared.per_frame.load(Ordering::Acquire))
    }

    /// Spawns the worker thread and blocks until it signals readiness.
    ///
    /// `schedule_sample` must not be called with a clock attached before
    /// this returns successfully.
    pub fn start(&self, clock: Arc<dyn PresentationClock>) -> Result<(), SchedulerError> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        *self.clock.lock().unwrap() = Some(Arc::clone(&clock));

        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let shared = Arc::clone(&self.shared);
        let backend = Arc::clone(&self.backend);
        let stats = Arc::clone(&self.stats);

        let join = thread::Builder::new()
            .name("frame-scheduler".into())
            .spawn(move || worker_loop(shared, backend, stats, clock, ready_tx, rx))
            .map_err(|e| SchedulerError::Render(RenderError::Other(e.to_string())))?;

        // Startup rendezvous: the worker owns all timing decisions, so
        // nothing may be scheduled until it is actually listening.
        match ready_rx.recv_timeout(self.startup_timeout) {
            Ok(()) => {
                *worker = Some(Worker { tx, join });
                log::debug!("Scheduler worker started");
                Ok(())
            }
            Err(_) => {
                log::error!("Scheduler worker failed to signal readiness");
                let _ = tx.send(Command::Terminate);
                let _ = join.join();
                *self.clock.lock().unwrap() = None;
                Err(SchedulerError::StartupTimeout)
            }
        }
    }

    /// Terminates and joins the worker, then clears the queue. Safe to
    /// call even if `start` never succeeded.
    pub fn stop(&self) {
        let taken = self.worker.lock().unwrap().take();
        if let Some(worker) = taken {
            let _ = worker.tx.send(Command::Terminate);
            if worker.join.join().is_err() {
                log::error!("Scheduler worker panicked during shutdown");
            }
        }

        *self.clock.lock().unwrap() = None;

        let drained = {
            let mut queue = self.shared.queue.lock().unwrap();
            let n = queue.len();
            queue.clear();
            n
        };
        if drained > 0 {
            self.stats.record_flushed(drained as u64);
            log::debug!("Scheduler stop discarded {} queued frames", drained);
        }
    }

    /// True while the worker thread is running.
    pub fn is_started(&self) -> bool {
        self.worker.lock().unwrap().is_some()
    }

    /// Schedules one sample for presentation.
    ///
    /// With `present_now` set, or with no clock attached, the sample is
    /// presented immediately on the caller's thread. Otherwise it joins
    /// the tail of the pending queue and the worker is woken.
    pub fn schedule_sample(
        &self,
        sample: VideoSample,
        present_now: bool,
    ) -> Result<(), SchedulerError> {
        let clock = self.clock.lock().unwrap().clone();

        if present_now || clock.is_none() {
            return present_sample(
                self.backend.as_ref(),
                &self.stats,
                &self.shared,
                sample,
                false,
            )
            .map_err(SchedulerError::Render);
        }

        let worker = self.worker.lock().unwrap();
        let Some(worker) = worker.as_ref() else {
            debug_assert!(false, "schedule_sample with a clock but no worker");
            return Err(SchedulerError::NotStarted);
        };

        self.shared.queue.lock().unwrap().push_back(sample);
        worker
            .tx
            .send(Command::Wake)
            .map_err(|_| SchedulerError::NotStarted)?;
        Ok(())
    }

    /// Discards every queued frame, waiting (bounded) for the worker to
    /// acknowledge. A timeout is best-effort, not fatal.
    pub fn flush(&self) {
        let worker = self.worker.lock().unwrap();
        match worker.as_ref() {
            Some(worker) => {
                let (done_tx, done_rx) = mpsc::sync_channel(1);
                if worker.tx.send(Command::Flush { done: done_tx }).is_ok() {
                    match done_rx.recv_timeout(self.flush_timeout) {
                        Ok(flushed) => {
                            if flushed > 0 {
                                log::debug!("Scheduler flushed {} frames", flushed);
                            }
                        }
                        Err(_) => log::warn!("Scheduler flush acknowledgment timed out"),
                    }
                }
            }
            None => {
                // No worker; drop queued entries directly.
                let mut queue = self.shared.queue.lock().unwrap();
                let n = queue.len();
                queue.clear();
                if n > 0 {
                    self.stats.record_flushed(n as u64);
                }
            }
        }
    }

    /// Collects the first fatal error the worker hit, if any.
    pub fn take_fatal(&self) -> Option<RenderError> {
        self.shared.fatal.lock().unwrap().take()
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outcome of examining the queue head.
enum Disposition {
    /// Head was presented (or dropped); keep draining.
    Continue,
    /// Head is early; it went back to the front, sleep this long.
    Sleep(Duration),
}

fn worker_loop(
    shared: Arc<Shared>,
    backend: Arc<dyn RenderBackend>,
    stats: Arc<PresentStats>,
    clock: Arc<dyn PresentationClock>,
    ready_tx: mpsc::SyncSender<()>,
    rx: Receiver<Command>,
) {
    let _ = ready_tx.send(());
    log::trace!("Scheduler worker running");

    // The only intentional blocking sleep in the pipeline: the computed
    // defer wait, interruptible by any incoming command.
    let mut wait: Option<Duration> = None;

    loop {
        let command = match wait {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(Command::Terminate) => break,
            Some(Command::Flush { done }) => {
                let flushed = {
                    let mut queue = shared.queue.lock().unwrap();
                    let n = queue.len();
                    queue.clear();
                    n
                };
                stats.record_flushed(flushed as u64);
                let _ = done.send(flushed);
                wait = None;
            }
            Some(Command::Wake) | None => {
                wait = drain_queue(&shared, backend.as_ref(), &stats, clock.as_ref());
            }
        }
    }

    log::trace!("Scheduler worker exiting");
}

/// Drains presentable frames off the queue head; returns the sleep until
/// the earliest deferred frame becomes presentable, if any.
fn drain_queue(
    shared: &Shared,
    backend: &dyn RenderBackend,
    stats: &PresentStats,
    clock: &dyn PresentationClock,
) -> Option<Duration> {
    loop {
        let sample = shared.queue.lock().unwrap().pop_front();
        let Some(sample) = sample else {
            return None;
        };

        match process_sample(shared, backend, stats, clock, sample) {
            Disposition::Continue => {}
            Disposition::Sleep(duration) => return Some(duration),
        }
    }
}

/// Decides late / on-time / early for one frame and acts on it.
fn process_sample(
    shared: &Shared,
    backend: &dyn RenderBackend,
    stats: &PresentStats,
    clock: &dyn PresentationClock,
    sample: VideoSample,
) -> Disposition {
    let rate = shared.rate();

    // Scrubbing presents immediately regardless of the timing window:
    // at rate zero responsiveness beats timing accuracy. Distinct policy
    // from the window logic below, kept as an early return on purpose.
    if rate == 0.0 {
        let _ = present_sample(backend, stats, shared, sample, false);
        return Disposition::Continue;
    }

    let Some(target) = sample.pts else {
        // No timestamp: nothing to pace against.
        let _ = present_sample(backend, stats, shared, sample, false);
        return Disposition::Continue;
    };

    let (now, _system) = clock.correlated_time();
    let mut delta = target - now;
    if rate < 0.0 {
        delta = -delta;
    }

    let quarter = shared.quarter();
    let three_quarters = MediaTime(quarter.0 * 3);

    if delta < -quarter {
        // Already late: fast-track.
        let _ = present_sample(backend, stats, shared, sample, true);
        Disposition::Continue
    } else if delta > three_quarters {
        // Early: requeue at the front and sleep until the window opens.
        let excess = delta - three_quarters;
        let millis = (excess.as_millis() as f64 / rate.abs() as f64).max(1.0);
        let sleep = Duration::from_millis(millis as u64);

        stats.record_deferred();
        log::trace!(
            "Deferring frame (target {}, delta {}ms, sleep {}ms)",
            target,
            delta.as_millis(),
            sleep.as_millis()
        );

        shared.queue.lock().unwrap().push_front(sample);
        Disposition::Sleep(sleep)
    } else {
        // Within a quarter-frame of target: on time.
        let _ = present_sample(backend, stats, shared, sample, false);
        Disposition::Continue
    }
}

/// Presents one sample, recording stats and parking fatal errors.
fn present_sample(
    backend: &dyn RenderBackend,
    stats: &PresentStats,
    shared: &Shared,
    sample: VideoSample,
    late: bool,
) -> Result<(), RenderError> {
    let target = sample.pts;
    match backend.present(sample, target) {
        Ok(()) => {
            stats.record_presented();
            if late {
                stats.record_late();
            }
            Ok(())
        }
        Err(e) => {
            log::error!("Present failed: {}", e);
            shared.fatal.lock().unwrap().get_or_insert(e.clone());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::clock::ManualClock;
    use common::{Rect, Size, VideoFormat};
    use std::time::Instant;

    /// Backend that records presents instead of touching a device.
    struct RecordingBackend {
        presented: Mutex<Vec<VideoSample>>,
    }

    impl RecordingBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                presented: Mutex::new(Vec::new()),
            })
        }

        fn presented_count(&self) -> usize {
            self.presented.lock().unwrap().len()
        }
    }

    impl RenderBackend for RecordingBackend {
        fn create_frame_buffers(
            &self,
            _format: &VideoFormat,
            token: u64,
            count: usize,
        ) -> Result<Vec<VideoSample>, RenderError> {
            Ok((0..count).map(|slot| VideoSample::new(slot, token)).collect())
        }
        fn destroy_buffers(&self) {}
        fn check_device_state(&self) -> crate::gpu::DeviceState {
            crate::gpu::DeviceState::Ok
        }
        fn present(
            &self,
            sample: VideoSample,
            _target_time: Option<MediaTime>,
        ) -> Result<(), RenderError> {
            self.presented.lock().unwrap().push(sample);
            Ok(())
        }
        fn upload(&self, _sample: &VideoSample, _data: &[u8]) -> Result<(), RenderError> {
            Ok(())
        }
        fn supports_format(&self, _format: &VideoFormat) -> bool {
            true
        }
        fn set_destination_rect(&self, _rect: Rect) {}
        fn destination_rect(&self) -> Rect {
            Rect::default()
        }
        fn set_display_size(&self, _size: Size) {}
        fn display_size(&self) -> Size {
            Size::default()
        }
    }

    fn scheduler_with(
        backend: Arc<RecordingBackend>,
    ) -> (FrameScheduler, Arc<PresentStats>) {
        let stats = Arc::new(PresentStats::new());
        let scheduler = FrameScheduler::new(backend, Arc::clone(&stats), &PresenterOptions::default());
        scheduler.set_frame_rate(Ratio::new(30, 1).unwrap());
        (scheduler, stats)
    }

    fn sample_at(pts: MediaTime) -> VideoSample {
        let mut sample = VideoSample::new(0, 1);
        sample.pts = Some(pts);
        sample
    }

    /// Polls until `predicate` holds or the deadline passes.
    fn wait_until(predicate: impl Fn() -> bool, deadline: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        predicate()
    }

    // Quarter-frame for 30fps in 100ns units: 333,333 / 4.
    const Q: i64 = 83_333;

    #[test]
    fn test_stop_without_start_is_safe() {
        let backend = RecordingBackend::new();
        let (scheduler, _stats) = scheduler_with(backend);
        scheduler.stop();
        scheduler.stop();
    }

    #[test]
    fn test_no_clock_presents_on_caller_thread() {
        let backend = RecordingBackend::new();
        let (scheduler, _stats) = scheduler_with(Arc::clone(&backend));

        scheduler
            .schedule_sample(sample_at(MediaTime::from_secs(10)), false)
            .unwrap();
        // Presented synchronously despite the far-future timestamp.
        assert_eq!(backend.presented_count(), 1);
    }

    #[test]
    fn test_late_frame_presents_on_first_poll() {
        let backend = RecordingBackend::new();
        let (scheduler, stats) = scheduler_with(Arc::clone(&backend));

        let clock = Arc::new(ManualClock::new(MediaTime(10 * Q)));
        scheduler.start(clock).unwrap();

        // delta = -2Q: late.
        scheduler
            .schedule_sample(sample_at(MediaTime(8 * Q)), false)
            .unwrap();

        assert!(wait_until(
            || backend.presented_count() == 1,
            Duration::from_secs(1)
        ));
        assert_eq!(stats.snapshot().frames_late, 1);
        assert_eq!(stats.snapshot().frames_deferred, 0);
        scheduler.stop();
    }

    #[test]
    fn test_on_time_frames_present_without_deferral() {
        let backend = RecordingBackend::new();
        let (scheduler, stats) = scheduler_with(Arc::clone(&backend));

        let clock = Arc::new(ManualClock::new(MediaTime(10 * Q)));
        scheduler.start(clock).unwrap();

        // delta = -Q/2 and delta = 2Q are both inside the on-time window.
        scheduler
            .schedule_sample(sample_at(MediaTime(10 * Q - Q / 2)), false)
            .unwrap();
        scheduler
            .schedule_sample(sample_at(MediaTime(12 * Q)), false)
            .unwrap();

        assert!(wait_until(
            || backend.presented_count() == 2,
            Duration::from_secs(1)
        ));
        assert_eq!(stats.snapshot().frames_deferred, 0);
        assert_eq!(stats.snapshot().frames_late, 0);
        scheduler.stop();
    }

    #[test]
    fn test_early_frame_defers_then_presents() {
        let backend = RecordingBackend::new();
        let (scheduler, stats) = scheduler_with(Arc::clone(&backend));

        let clock = Arc::new(ManualClock::new(MediaTime::ZERO));
        scheduler.start(Arc::clone(&clock) as Arc<dyn PresentationClock>).unwrap();

        // delta = 5Q: early, must defer with a positive sleep.
        scheduler
            .schedule_sample(sample_at(MediaTime(5 * Q)), false)
            .unwrap();

        assert!(wait_until(
            || stats.snapshot().frames_deferred >= 1,
            Duration::from_secs(1)
        ));
        assert_eq!(backend.presented_count(), 0);

        // Advance the clock to the target; the worker re-polls after its
        // computed sleep and finds the frame inside the window.
        clock.set(MediaTime(5 * Q));
        assert!(wait_until(
            || backend.presented_count() == 1,
            Duration::from_secs(2)
        ));
        scheduler.stop();
    }

    #[test]
    fn test_thirty_fps_deferral_scenario() {
        // 1920x1080 @ 30fps, target = now + 50ms: first poll defers
        // (50ms > 3Q = 25ms), second poll (clock at target) presents.
        let backend = RecordingBackend::new();
        let (scheduler, stats) = scheduler_with(Arc::clone(&backend));

        let clock = Arc::new(ManualClock::new(MediaTime::ZERO));
        scheduler.start(Arc::clone(&clock) as Arc<dyn PresentationClock>).unwrap();

        scheduler
            .schedule_sample(sample_at(MediaTime::from_millis(50)), false)
            .unwrap();

        assert!(wait_until(
            || stats.snapshot().frames_deferred >= 1,
            Duration::from_secs(1)
        ));
        assert_eq!(backend.presented_count(), 0);

        clock.set(MediaTime::from_millis(50));
        assert!(wait_until(
            || backend.presented_count() == 1,
            Duration::from_secs(2)
        ));
        scheduler.stop();
    }

    #[test]
    fn test_scrubbing_presents_immediately() {
        let backend = RecordingBackend::new();
        let (scheduler, stats) = scheduler_with(Arc::clone(&backend));
        scheduler.set_clock_rate(0.0);

        let clock = Arc::new(ManualClock::new(MediaTime::ZERO));
        scheduler.start(clock).unwrap();

        // Far in the future, but scrubbing ignores the window.
        scheduler
            .schedule_sample(sample_at(MediaTime::from_secs(100)), false)
            .unwrap();

        assert!(wait_until(
            || backend.presented_count() == 1,
            Duration::from_secs(1)
        ));
        assert_eq!(stats.snapshot().frames_deferred, 0);
        scheduler.stop();
    }

    #[test]
    fn test_flush_discards_queued_frames() {
        let backend = RecordingBackend::new();
        let (scheduler, stats) = scheduler_with(Arc::clone(&backend));

        let clock = Arc::new(ManualClock::new(MediaTime::ZERO));
        scheduler.start(clock).unwrap();

        scheduler
            .schedule_sample(sample_at(MediaTime::from_secs(100)), false)
            .unwrap();
        assert!(wait_until(
            || stats.snapshot().frames_deferred >= 1,
            Duration::from_secs(1)
        ));

        scheduler.flush();
        assert_eq!(backend.presented_count(), 0);
        assert_eq!(stats.snapshot().frames_flushed, 1);
        scheduler.stop();
    }

    #[test]
    fn test_double_start_rejected() {
        let backend = RecordingBackend::new();
        let (scheduler, _stats) = scheduler_with(backend);

        let clock = Arc::new(ManualClock::new(MediaTime::ZERO));
        scheduler.start(Arc::clone(&clock) as Arc<dyn PresentationClock>).unwrap();
        assert!(matches!(
            scheduler.start(clock),
            Err(SchedulerError::AlreadyStarted)
        ));
        scheduler.stop();
    }

    #[test]
    fn test_negative_rate_inverts_lateness() {
        let backend = RecordingBackend::new();
        let (scheduler, stats) = scheduler_with(Arc::clone(&backend));
        scheduler.set_clock_rate(-1.0);

        let clock = Arc::new(ManualClock::new(MediaTime(10 * Q)));
        scheduler.start(clock).unwrap();

        // In reverse playback a frame with a *future* timestamp is the
        // late one: delta = +2Q flips to -2Q.
        scheduler
            .schedule_sample(sample_at(MediaTime(12 * Q)), false)
            .unwrap();

        assert!(wait_until(
            || backend.presented_count() == 1,
            Duration::from_secs(1)
        ));
        assert_eq!(stats.snapshot().frames_late, 1);
        scheduler.stop();
    }
}

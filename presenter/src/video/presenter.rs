use crate::config::PresenterOptions;
use crate::gpu::{DeviceState, RenderBackend, RenderError};
use crate::video::clock::PresentationClock;
use crate::video::host::HostSink;
use crate::video::negotiate;
use crate::video::sample::{SampleId, VideoSample};
use crate::video::sample_pool::{PoolError, SamplePool};
use crate::video::scheduler::{FrameScheduler, SchedulerError};
use crate::video::source::{FrameSource, ProduceStatus, SetFormatMode, SourceError};
use crate::video::stats::PresentStats;

use common::{MediaTime, Rect, Size, VideoFormat};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Overall delivery state, driven by the presentation clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Started,
    Stopped,
    Paused,
    /// Initial state until a source is bound, and the terminal state
    /// after `shutdown`. No frame delivery happens here.
    Shutdown,
}

/// Progress of a frame-step (scrub) operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStepState {
    /// No step requested.
    None,
    /// Step requested but the clock has not started yet.
    Waiting,
    /// Counting down produced frames.
    Pending,
    /// The stepped frame was submitted; waiting for it to come back.
    Scheduled,
    /// The stepped frame was displayed and reclaimed.
    Complete,
}

#[derive(Error, Debug)]
pub enum PresenterError {
    #[error("presenter is shut down")]
    Shutdown,

    #[error("no frame source bound")]
    NotBound,

    #[error("no media type could be negotiated")]
    MediaTypeNotSet,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Frame-step bookkeeping. At most one step sample is in flight
/// (`expected`); frames arriving while one is outstanding queue here.
struct FrameStep {
    state: FrameStepState,
    steps: u32,
    pending: VecDeque<VideoSample>,
    expected: Option<SampleId>,
}

impl FrameStep {
    fn new() -> Self {
        Self {
            state: FrameStepState::None,
            steps: 0,
            pending: VecDeque::new(),
            expected: None,
        }
    }
}

/// Everything behind the controller's single coarse lock.
struct Inner {
    render_state: RenderState,
    step: FrameStep,
    source: Option<Arc<dyn FrameSource>>,
    media_type: Option<VideoFormat>,
    /// Generation counter; bumped on every batch teardown.
    token: u64,
    /// The source has frames for us (cleared on needs-more-input).
    input_available: bool,
    /// The next produced frame repeats the last presentation time and is
    /// shown immediately.
    repaint: bool,
    /// At least one frame has been delivered since the last teardown.
    prerolled: bool,
    last_pts: Option<MediaTime>,
    last_duration: Option<MediaTime>,
    /// End-of-stream signaled upstream; consumed when the host is told.
    end_streaming: bool,
    rate: f32,
    /// A fatal device error was already reported; delivery is disabled.
    device_fatal: bool,
}

/// Side effects gathered under the lock and executed after it is
/// released, so collaborator callbacks can re-enter the controller
/// without deadlocking.
#[derive(Default)]
struct Effects {
    flush: bool,
    recycle: Vec<VideoSample>,
    deliver: Vec<(VideoSample, bool)>,
    step_cancelled: bool,
    scrub: Option<MediaTime>,
    display_changed: bool,
    fatal: Option<RenderError>,
    end_of_stream: bool,
}

impl Effects {
    fn is_empty(&self) -> bool {
        !self.flush
            && self.recycle.is_empty()
            && self.deliver.is_empty()
            && !self.step_cancelled
            && self.scrub.is_none()
            && !self.display_changed
            && self.fatal.is_none()
            && !self.end_of_stream
    }
}

/// Whether the output loop should keep pulling frames.
enum Cycle {
    Continue,
    Break,
}

/// The presentation controller.
///
/// Owns the scheduler, the sample pool, and the render state machine;
/// consumes clock callbacks and source notifications; reports to the host
/// through [`HostSink`].
///
/// Locking: one coarse mutex guards all control state. Source calls
/// happen off-lock but are serialized by the output loop; scheduler,
/// backend-lifecycle, and host calls always happen with the lock
/// released (see [`Effects`]), so a host that synchronously returns
/// samples from `on_frame_rendered` cannot deadlock.
pub struct VideoPresenter {
    inner: Mutex<Inner>,
    backend: Arc<dyn RenderBackend>,
    scheduler: FrameScheduler,
    pool: SamplePool,
    host: Arc<dyn HostSink>,
    stats: Arc<PresentStats>,
    options: PresenterOptions,
}

impl VideoPresenter {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        host: Arc<dyn HostSink>,
        options: PresenterOptions,
    ) -> Self {
        let stats = Arc::new(PresentStats::new());
        let scheduler = FrameScheduler::new(Arc::clone(&backend), Arc::clone(&stats), &options);

        Self {
            inner: Mutex::new(Inner {
                render_state: RenderState::Shutdown,
                step: FrameStep::new(),
                source: None,
                media_type: None,
                token: 0,
                input_available: false,
                repaint: false,
                prerolled: false,
                last_pts: None,
                last_duration: None,
                end_streaming: false,
                rate: 1.0,
                device_fatal: false,
            }),
            backend,
            scheduler,
            pool: SamplePool::new(),
            host,
            stats: Arc::clone(&stats),
            options,
        }
    }

    /// Wires the upstream source; the controller leaves `Shutdown` and
    /// becomes `Stopped`, ready for streaming.
    pub fn bind(&self, source: Arc<dyn FrameSource>) -> Result<(), PresenterError> {
        let mut inner = self.inner.lock().unwrap();
        inner.source = Some(source);
        if inner.render_state == RenderState::Shutdown {
            inner.render_state = RenderState::Stopped;
        }
        log::info!("Frame source bound");
        Ok(())
    }

    /// Tears everything down. Terminal: a new presenter is needed to
    /// stream again.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.render_state = RenderState::Shutdown;
            inner.step = FrameStep::new();
            inner.source = None;
            inner.media_type = None;
            inner.input_available = false;
        }
        self.scheduler.stop();
        self.pool.clear();
        self.backend.destroy_buffers();
        log::info!("Presenter shut down");
    }

    // ---- clock callbacks -------------------------------------------------

    /// The clock started (or restarted from a seek). `None` means
    /// "continue from the current position"; `Some(_)` is a fresh start
    /// position and flushes anything queued for the old position.
    pub fn on_clock_start(&self, offset: Option<MediaTime>) -> Result<(), PresenterError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;

            let was_active = matches!(
                inner.render_state,
                RenderState::Started | RenderState::Paused
            );
            inner.render_state = RenderState::Started;

            if was_active {
                if offset.is_some() {
                    log::debug!("Clock start with new position {:?}: flushing", offset);
                    effects.flush = true;
                }
            } else {
                start_frame_step(&mut inner, &mut effects);
            }
        }
        self.run_effects(effects);
        self.poll_device();
        self.process_output_loop()
    }

    pub fn on_clock_stop(&self) -> Result<(), PresenterError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;

            if inner.render_state != RenderState::Stopped {
                inner.render_state = RenderState::Stopped;
                effects.flush = true;
                if inner.step.state != FrameStepState::None {
                    cancel_step(&mut inner, &mut effects);
                }
            }
        }
        self.run_effects(effects);
        Ok(())
    }

    pub fn on_clock_pause(&self) -> Result<(), PresenterError> {
        let mut inner = self.inner.lock().unwrap();
        check_shutdown(&inner)?;
        inner.render_state = RenderState::Paused;
        Ok(())
    }

    /// Resume from pause.
    pub fn on_clock_restart(&self) -> Result<(), PresenterError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            inner.render_state = RenderState::Started;
            start_frame_step(&mut inner, &mut effects);
        }
        self.run_effects(effects);
        self.poll_device();
        self.process_output_loop()
    }

    pub fn on_clock_rate_change(&self, rate: f32) -> Result<(), PresenterError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;

            // Leaving scrubbing abandons any step in flight along with
            // the frames queued for it.
            if inner.rate == 0.0 && rate != 0.0 && inner.step.state != FrameStepState::None {
                cancel_step(&mut inner, &mut effects);
            }
            inner.rate = rate;
        }
        self.scheduler.set_clock_rate(rate);
        self.run_effects(effects);
        Ok(())
    }

    // ---- streaming messages ---------------------------------------------

    /// Starts the scheduler worker against `clock`.
    pub fn begin_streaming(
        &self,
        clock: Arc<dyn PresentationClock>,
    ) -> Result<(), PresenterError> {
        check_shutdown(&self.inner.lock().unwrap())?;
        self.scheduler.start(clock)?;
        log::info!("Streaming began");
        Ok(())
    }

    /// Stops the scheduler worker.
    pub fn end_streaming(&self) -> Result<(), PresenterError> {
        self.scheduler.stop();
        log::info!("Streaming ended");
        Ok(())
    }

    /// The source has output ready; drives the output loop.
    pub fn process_input_available(&self) -> Result<(), PresenterError> {
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            inner.input_available = true;
        }
        self.poll_device();
        self.process_output_loop()
    }

    /// Drops everything queued for presentation (seek/stop path).
    pub fn flush(&self) -> Result<(), PresenterError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            inner.repaint = false;
            recycle_step_queue(&mut inner, &mut effects);
            effects.flush = true;
        }
        self.run_effects(effects);
        Ok(())
    }

    /// Upstream has no more frames. End-of-stream is reported to the
    /// host only once every outstanding frame has been displayed and
    /// reclaimed.
    pub fn end_of_stream(&self) -> Result<(), PresenterError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            inner.end_streaming = true;
            check_end_of_stream(&mut inner, &self.pool, &mut effects);
        }
        self.run_effects(effects);
        Ok(())
    }

    /// Requests `steps` frame steps: decode that many frames and present
    /// exactly the last one.
    pub fn step(&self, steps: u32) -> Result<(), PresenterError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            inner.step.steps += steps;
            inner.step.state = FrameStepState::Waiting;
            if inner.render_state == RenderState::Started {
                start_frame_step(&mut inner, &mut effects);
            }
        }
        self.run_effects(effects);
        self.process_output_loop()
    }

    /// Abandons any step in flight. Idempotent.
    pub fn cancel_step(&self) -> Result<(), PresenterError> {
        let mut effects = Effects::default();
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            cancel_step(&mut inner, &mut effects);
        }
        self.run_effects(effects);
        Ok(())
    }

    /// Re-presents the last frame (after a resize, expose, or device
    /// restore). No-op until at least one frame has been delivered.
    pub fn repaint(&self) -> Result<(), PresenterError> {
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            if !inner.prerolled {
                return Ok(());
            }
            inner.repaint = true;
        }
        self.process_output_loop()
    }

    /// Forces format renegotiation on the next output cycle.
    pub fn invalidate_media_type(&self) -> Result<(), PresenterError> {
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            inner.media_type = None;
        }
        self.process_output_loop()
    }

    // ---- geometry --------------------------------------------------------

    /// Moves/resizes the video within the display surface. Invalidates
    /// the negotiated type and repaints.
    pub fn set_destination_rect(&self, rect: Rect) -> Result<(), PresenterError> {
        if self.backend.destination_rect() == rect {
            return Ok(());
        }
        self.backend.set_destination_rect(rect);
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            inner.media_type = None;
            if inner.prerolled {
                inner.repaint = true;
            }
        }
        self.process_output_loop()
    }

    pub fn destination_rect(&self) -> Rect {
        self.backend.destination_rect()
    }

    pub fn set_display_size(&self, size: Size) -> Result<(), PresenterError> {
        if self.backend.display_size() == size {
            return Ok(());
        }
        self.backend.set_display_size(size);
        {
            let mut inner = self.inner.lock().unwrap();
            check_shutdown(&inner)?;
            inner.media_type = None;
            if inner.prerolled {
                inner.repaint = true;
            }
        }
        self.process_output_loop()
    }

    // ---- sample return path ---------------------------------------------

    /// The host is done compositing `sample`. Samples from an old
    /// generation are dropped; live ones complete a pending frame step
    /// and return to the pool.
    pub fn on_sample_freed(&self, sample: VideoSample) {
        let mut effects = Effects::default();
        let resume = {
            let mut inner = self.inner.lock().unwrap();

            if sample.token != inner.token {
                log::debug!(
                    "Dropping stale sample (slot {}, token {} != {})",
                    sample.slot,
                    sample.token,
                    inner.token
                );
                false
            } else {
                if inner.step.state == FrameStepState::Scheduled
                    && inner.step.expected == Some(sample.id())
                {
                    inner.step.state = FrameStepState::Complete;
                    inner.step.expected = None;
                    self.stats.record_step_completed();
                    log::debug!("Frame step complete at {:?}", sample.pts);
                    if inner.rate == 0.0 {
                        effects.scrub = sample.pts;
                    }
                }

                self.pool.recycle(sample);
                check_end_of_stream(&mut inner, &self.pool, &mut effects);
                inner.input_available && inner.render_state != RenderState::Shutdown
            }
        };
        self.run_effects(effects);

        if resume {
            if let Err(e) = self.process_output_loop() {
                log::error!("Output loop failed after sample return: {}", e);
            }
        }
    }

    // ---- introspection ---------------------------------------------------

    pub fn render_state(&self) -> RenderState {
        self.inner.lock().unwrap().render_state
    }

    pub fn frame_step_state(&self) -> FrameStepState {
        self.inner.lock().unwrap().step.state
    }

    pub fn media_type(&self) -> Option<VideoFormat> {
        self.inner.lock().unwrap().media_type.clone()
    }

    pub fn current_token(&self) -> u64 {
        self.inner.lock().unwrap().token
    }

    pub fn stats(&self) -> &Arc<PresentStats> {
        &self.stats
    }

    // ---- internals -------------------------------------------------------

    /// Polls device health, reporting recoveries and fatal loss.
    fn poll_device(&self) {
        let mut effects = Effects::default();
        match self.backend.check_device_state() {
            DeviceState::Ok => return,
            DeviceState::Reset => {
                log::warn!("Device reset; forcing renegotiation");
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.media_type = None;
                    inner.prerolled = false;
                }
                self.pool.clear();
                effects.display_changed = true;
            }
            DeviceState::Removed => {
                let mut inner = self.inner.lock().unwrap();
                if !inner.device_fatal {
                    inner.device_fatal = true;
                    effects.fatal = Some(RenderError::Removed);
                }
            }
        }
        self.run_effects(effects);
    }

    /// Walks the source's candidate formats and commits the first one
    /// that validates, test-sets, allocates, and commits.
    fn renegotiate_media_type(&self) -> Result<(), PresenterError> {
        let source = self
            .inner
            .lock()
            .unwrap()
            .source
            .clone()
            .ok_or(PresenterError::NotBound)?;
        let dest_rect = self.backend.destination_rect();

        let mut index = 0;
        loop {
            let Some(candidate) = source.output_format(index) else {
                log::debug!("No acceptable output format among {} candidates", index);
                return Err(PresenterError::MediaTypeNotSet);
            };
            index += 1;

            if let Err(e) = negotiate::validate_candidate(self.backend.as_ref(), &candidate) {
                log::debug!("Candidate {} rejected: {}", index - 1, e);
                continue;
            }

            let optimal = negotiate::optimal_format(&candidate, dest_rect);

            if let Err(e) = source.set_output_format(&optimal, SetFormatMode::TestOnly) {
                log::debug!("Source declined optimal type: {}", e);
                continue;
            }

            // Tear down the previous generation before allocating. From
            // here on a failure leaves us with no buffers: fail closed
            // rather than risk presenting from a mismatched batch.
            self.scheduler.flush();
            self.pool.clear();
            let token = {
                let mut inner = self.inner.lock().unwrap();
                inner.media_type = None;
                inner.prerolled = false;
                inner.token += 1;
                inner.token
            };
            self.backend.destroy_buffers();

            let samples = self
                .backend
                .create_frame_buffers(&optimal, token, self.options.buffer_count)
                .map_err(|e| {
                    log::error!("Frame buffer allocation failed, failing closed: {}", e);
                    PresenterError::Render(e)
                })?;

            if let Err(e) = source.set_output_format(&optimal, SetFormatMode::Commit) {
                log::warn!("Source rejected committed type after test-set: {}", e);
                self.backend.destroy_buffers();
                self.pool.clear();
                continue;
            }

            self.scheduler.set_frame_rate(optimal.frame_rate);
            self.pool.initialize(samples);
            {
                let mut inner = self.inner.lock().unwrap();
                inner.media_type = Some(optimal.clone());
            }

            log::info!(
                "Negotiated media type: {}x{} {:?} @ {} (token {})",
                optimal.width,
                optimal.height,
                optimal.pixel,
                optimal.frame_rate,
                token
            );
            return Ok(());
        }
    }

    /// Pulls frames from the source while input is flagged, respecting
    /// pool back-pressure.
    fn process_output_loop(&self) -> Result<(), PresenterError> {
        loop {
            match self.process_output_once()? {
                Cycle::Continue => {}
                Cycle::Break => {
                    self.stats.maybe_log_stats(self.options.stats_interval);
                    return Ok(());
                }
            }
        }
    }

    /// One output-loop iteration: pull a recycled buffer, ask the source
    /// to fill it, route the result.
    fn process_output_once(&self) -> Result<Cycle, PresenterError> {
        let mut effects = Effects::default();

        let outcome = {
            let mut inner = self.inner.lock().unwrap();

            if inner.render_state == RenderState::Shutdown {
                return Err(PresenterError::Shutdown);
            }
            if inner.device_fatal {
                return Ok(Cycle::Break);
            }
            if !inner.input_available && !inner.repaint {
                return Ok(Cycle::Break);
            }

            if inner.media_type.is_none() {
                drop(inner);
                return match self.renegotiate_media_type() {
                    Ok(()) => Ok(Cycle::Continue),
                    Err(PresenterError::MediaTypeNotSet) => {
                        // Common during startup; retried next cycle.
                        log::debug!("Media type not set yet; will retry");
                        Ok(Cycle::Break)
                    }
                    Err(e) => Err(e),
                };
            }

            let Some(mut sample) = self.pool.reuse()? else {
                log::trace!("Sample pool exhausted; waiting for a free buffer");
                return Ok(Cycle::Break);
            };

            let source = inner.source.clone().ok_or(PresenterError::NotBound)?;
            // The source fills the buffer synchronously; it never calls
            // back into the controller, so holding the lock here keeps
            // produce/route atomic with respect to state changes.
            match source.produce(&mut sample) {
                Ok(ProduceStatus::Produced(timing)) => {
                    let repaint = inner.repaint;
                    if repaint {
                        // Repaint re-presents the previous position.
                        sample.pts = inner.last_pts;
                        sample.duration = inner.last_duration;
                        inner.repaint = false;
                    } else {
                        sample.pts = timing.pts;
                        sample.duration = timing.duration;
                        inner.last_pts = timing.pts;
                        inner.last_duration = timing.duration;
                    }
                    inner.prerolled = true;
                    route_sample(&mut inner, sample, repaint, &mut effects);
                    Ok(Cycle::Continue)
                }
                Ok(ProduceStatus::NeedsMoreInput) => {
                    self.pool.recycle(sample);
                    inner.input_available = false;
                    inner.repaint = false;
                    check_end_of_stream(&mut inner, &self.pool, &mut effects);
                    Ok(Cycle::Break)
                }
                Ok(ProduceStatus::FormatChanged) => {
                    log::info!("Source format changed; renegotiating");
                    self.pool.recycle(sample);
                    inner.media_type = None;
                    Ok(Cycle::Continue)
                }
                Err(e) => {
                    self.pool.recycle(sample);
                    Err(PresenterError::Source(e))
                }
            }
        };

        self.run_effects(effects);
        outcome
    }

    /// Executes the side effects gathered under the lock. Order matters:
    /// recycles free pool space before deliveries may need it, and
    /// end-of-stream goes out last.
    fn run_effects(&self, effects: Effects) {
        if effects.is_empty() {
            return;
        }

        if effects.flush {
            self.scheduler.flush();
        }

        for sample in effects.recycle {
            self.pool.recycle(sample);
        }

        for (sample, present_now) in effects.deliver {
            match self.scheduler.schedule_sample(sample, present_now) {
                Ok(()) => {}
                Err(SchedulerError::Render(RenderError::Removed)) => {
                    let report = {
                        let mut inner = self.inner.lock().unwrap();
                        let first = !inner.device_fatal;
                        inner.device_fatal = true;
                        first
                    };
                    if report {
                        self.host.on_fatal_error(RenderError::Removed);
                    }
                }
                Err(e) => log::error!("Failed to deliver frame: {}", e),
            }
        }

        // The scheduler worker parks fatal errors; surface them here.
        if let Some(e) = self.scheduler.take_fatal() {
            let report = {
                let mut inner = self.inner.lock().unwrap();
                let first = !inner.device_fatal;
                inner.device_fatal = true;
                first
            };
            if report {
                self.host.on_fatal_error(e);
            }
        }

        if effects.step_cancelled {
            self.host.on_frame_step_cancelled();
        }
        if let Some(pts) = effects.scrub {
            self.host.on_scrub_time(pts);
        }
        if effects.display_changed {
            self.host.on_display_changed();
        }
        if let Some(e) = effects.fatal {
            self.host.on_fatal_error(e);
        }
        if effects.end_of_stream {
            self.host.on_end_of_stream();
        }
    }
}

impl Drop for VideoPresenter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_shutdown(inner: &Inner) -> Result<(), PresenterError> {
    if inner.render_state == RenderState::Shutdown {
        return Err(PresenterError::Shutdown);
    }
    Ok(())
}

/// Routes one produced frame: normal delivery or the frame-step protocol.
fn route_sample(inner: &mut Inner, sample: VideoSample, repaint: bool, effects: &mut Effects) {
    if inner.step.state == FrameStepState::None {
        // Outside Started (preroll, pause) and while scrubbing the frame
        // goes up immediately; otherwise the scheduler paces it.
        let present_now = inner.render_state != RenderState::Started
            || inner.rate == 0.0
            || repaint;
        effects.deliver.push((sample, present_now));
    } else {
        deliver_frame_step_sample(inner, sample, effects);
    }
}

/// One produced frame enters the step countdown.
fn deliver_frame_step_sample(inner: &mut Inner, sample: VideoSample, effects: &mut Effects) {
    match inner.step.state {
        FrameStepState::Scheduled | FrameStepState::Complete => {
            // A stepped frame is already in flight; queue until it
            // returns (or the step is cancelled).
            inner.step.pending.push_back(sample);
        }
        _ => {
            if inner.step.steps > 0 {
                inner.step.steps -= 1;
            }

            if inner.step.steps > 0 {
                // Countdown continues: consumed, not shown.
                effects.recycle.push(sample);
            } else if inner.step.state == FrameStepState::Waiting {
                // Clock not running yet; hold the frame for start.
                inner.step.pending.push_back(sample);
            } else {
                // This frame completes the countdown.
                inner.step.expected = Some(sample.id());
                inner.step.state = FrameStepState::Scheduled;
                effects.deliver.push((sample, true));
            }
        }
    }
}

/// Begins (or resumes) a pending step when the clock starts; with no step
/// pending, releases frames that queued while waiting.
fn start_frame_step(inner: &mut Inner, effects: &mut Effects) {
    match inner.step.state {
        FrameStepState::Waiting => {
            inner.step.state = FrameStepState::Pending;
            while let Some(sample) = inner.step.pending.pop_front() {
                if sample.token != inner.token {
                    log::debug!("Dropping stale step-queued sample on start");
                    continue;
                }
                deliver_frame_step_sample(inner, sample, effects);
                if inner.step.state != FrameStepState::Pending {
                    break;
                }
            }
        }
        FrameStepState::None => {
            while let Some(sample) = inner.step.pending.pop_front() {
                if sample.token != inner.token {
                    log::debug!("Dropping stale step-queued sample on start");
                    continue;
                }
                let present_now =
                    inner.render_state != RenderState::Started || inner.rate == 0.0;
                effects.deliver.push((sample, present_now));
            }
        }
        _ => {}
    }
}

/// Recycles every frame queued for a step, dropping any that belong to a
/// previous buffer generation (they must not re-enter the active pool).
fn recycle_step_queue(inner: &mut Inner, effects: &mut Effects) {
    while let Some(sample) = inner.step.pending.pop_front() {
        if sample.token == inner.token {
            effects.recycle.push(sample);
        } else {
            log::debug!(
                "Dropping stale step-queued sample (token {} != {})",
                sample.token,
                inner.token
            );
        }
    }
}

/// Resets step state; queued step frames are recycled. Notifies the host
/// only if a step was actually mid-flight.
fn cancel_step(inner: &mut Inner, effects: &mut Effects) {
    let old = inner.step.state;
    inner.step.state = FrameStepState::None;
    inner.step.steps = 0;
    inner.step.expected = None;
    recycle_step_queue(inner, effects);

    if matches!(old, FrameStepState::Pending | FrameStepState::Scheduled) {
        effects.step_cancelled = true;
    }
}

/// End-of-stream gate: upstream done, nothing left to pull, and every
/// in-flight buffer displayed and reclaimed.
fn check_end_of_stream(inner: &mut Inner, pool: &SamplePool, effects: &mut Effects) {
    if !inner.end_streaming {
        return;
    }
    if inner.input_available {
        return;
    }
    if pool.is_pending() {
        return;
    }

    inner.end_streaming = false;
    log::info!("End of stream reached");
    effects.end_of_stream = true;
}

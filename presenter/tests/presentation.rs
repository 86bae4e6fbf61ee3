/// Integration tests for the presentation controller
/// These drive the full controller state machine against scripted mock
/// collaborators: a frame source, a render backend, and a host sink.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use common::{MediaTime, Ratio, Rect, Size, VideoFormat};
use presenter::gpu::{DeviceState, RenderBackend, RenderError, SurfaceHandle};
use presenter::video::{
    FrameSource, FrameStepState, HostSink, ProduceStatus, RenderState, SetFormatMode,
    VideoPresenter, VideoSample,
};
use presenter::video::source::{FormatRejected, FrameTiming, SourceError};
use presenter::PresenterOptions;

/// What the scripted source does on each successive `produce` call.
#[derive(Clone)]
enum Produce {
    Frame(i64),
    NeedsMoreInput,
    FormatChanged,
}

struct MockSource {
    candidate: VideoFormat,
    script: Mutex<VecDeque<Produce>>,
    committed: Mutex<Option<VideoFormat>>,
}

impl MockSource {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            candidate: VideoFormat::new(640, 360, Ratio::new(30, 1).unwrap()),
            script: Mutex::new(VecDeque::new()),
            committed: Mutex::new(None),
        })
    }

    fn push_frames(&self, pts_millis: &[i64]) {
        let mut script = self.script.lock().unwrap();
        for &pts in pts_millis {
            script.push_back(Produce::Frame(pts));
        }
        script.push_back(Produce::NeedsMoreInput);
    }

    fn push(&self, item: Produce) {
        self.script.lock().unwrap().push_back(item);
    }
}

impl FrameSource for MockSource {
    fn output_format(&self, index: usize) -> Option<VideoFormat> {
        (index == 0).then(|| self.candidate.clone())
    }

    fn set_output_format(
        &self,
        format: &VideoFormat,
        mode: SetFormatMode,
    ) -> Result<(), FormatRejected> {
        if mode == SetFormatMode::Commit {
            *self.committed.lock().unwrap() = Some(format.clone());
        }
        Ok(())
    }

    fn produce(&self, _sample: &mut VideoSample) -> Result<ProduceStatus, SourceError> {
        match self.script.lock().unwrap().pop_front() {
            Some(Produce::Frame(pts)) => Ok(ProduceStatus::Produced(FrameTiming {
                pts: Some(MediaTime::from_millis(pts)),
                duration: Some(MediaTime::from_millis(33)),
            })),
            Some(Produce::NeedsMoreInput) | None => Ok(ProduceStatus::NeedsMoreInput),
            Some(Produce::FormatChanged) => Ok(ProduceStatus::FormatChanged),
        }
    }
}

#[derive(Default)]
struct HostEvents {
    surfaces_created: Vec<SurfaceHandle>,
    surfaces_destroyed: usize,
    rendered: Vec<VideoSample>,
    display_changed: usize,
    fatal: Vec<RenderError>,
    scrub_times: Vec<MediaTime>,
    steps_cancelled: usize,
    end_of_stream: usize,
}

struct MockHost {
    events: Mutex<HostEvents>,
}

impl MockHost {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(HostEvents::default()),
        })
    }

    fn rendered_count(&self) -> usize {
        self.events.lock().unwrap().rendered.len()
    }

    /// Takes the oldest rendered sample out of the host's hands.
    fn take_rendered(&self) -> Option<VideoSample> {
        let mut events = self.events.lock().unwrap();
        if events.rendered.is_empty() {
            None
        } else {
            Some(events.rendered.remove(0))
        }
    }
}

impl HostSink for MockHost {
    fn on_surface_created(&self, handle: SurfaceHandle) {
        self.events.lock().unwrap().surfaces_created.push(handle);
    }
    fn on_surface_destroyed(&self) {
        self.events.lock().unwrap().surfaces_destroyed += 1;
    }
    fn on_frame_rendered(&self, sample: VideoSample) {
        self.events.lock().unwrap().rendered.push(sample);
    }
    fn on_display_changed(&self) {
        self.events.lock().unwrap().display_changed += 1;
    }
    fn on_fatal_error(&self, error: RenderError) {
        self.events.lock().unwrap().fatal.push(error);
    }
    fn on_scrub_time(&self, pts: MediaTime) {
        self.events.lock().unwrap().scrub_times.push(pts);
    }
    fn on_frame_step_cancelled(&self) {
        self.events.lock().unwrap().steps_cancelled += 1;
    }
    fn on_end_of_stream(&self) {
        self.events.lock().unwrap().end_of_stream += 1;
    }
}

struct MockBackendState {
    has_batch: bool,
    batch_token: u64,
    dest_rect: Rect,
    display_size: Size,
    device_script: VecDeque<DeviceState>,
    create_calls: usize,
}

struct MockBackend {
    host: Arc<MockHost>,
    state: Mutex<MockBackendState>,
}

impl MockBackend {
    fn new(host: Arc<MockHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            state: Mutex::new(MockBackendState {
                has_batch: false,
                batch_token: 0,
                dest_rect: Rect::default(),
                display_size: Size::default(),
                device_script: VecDeque::new(),
                create_calls: 0,
            }),
        })
    }

    fn script_device(&self, state: DeviceState) {
        self.state.lock().unwrap().device_script.push_back(state);
    }

    fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }
}

impl RenderBackend for MockBackend {
    fn create_frame_buffers(
        &self,
        _format: &VideoFormat,
        token: u64,
        count: usize,
    ) -> Result<Vec<VideoSample>, RenderError> {
        {
            let mut state = self.state.lock().unwrap();
            state.has_batch = true;
            state.batch_token = token;
            state.create_calls += 1;
        }
        self.host.on_surface_created(SurfaceHandle {
            id: token,
            size: Size::new(640, 360),
        });
        Ok((0..count).map(|slot| VideoSample::new(slot, token)).collect())
    }

    fn destroy_buffers(&self) {
        let had_batch = {
            let mut state = self.state.lock().unwrap();
            std::mem::replace(&mut state.has_batch, false)
        };
        if had_batch {
            self.host.on_surface_destroyed();
        }
    }

    fn check_device_state(&self) -> DeviceState {
        self.state
            .lock()
            .unwrap()
            .device_script
            .pop_front()
            .unwrap_or(DeviceState::Ok)
    }

    fn present(
        &self,
        sample: VideoSample,
        _target_time: Option<MediaTime>,
    ) -> Result<(), RenderError> {
        {
            let state = self.state.lock().unwrap();
            assert!(state.has_batch, "present with no batch");
            assert_eq!(sample.token, state.batch_token, "stale sample presented");
        }
        self.host.on_frame_rendered(sample);
        Ok(())
    }

    fn upload(&self, _sample: &VideoSample, _data: &[u8]) -> Result<(), RenderError> {
        Ok(())
    }

    fn supports_format(&self, _format: &VideoFormat) -> bool {
        true
    }

    fn set_destination_rect(&self, rect: Rect) {
        self.state.lock().unwrap().dest_rect = rect;
    }

    fn destination_rect(&self) -> Rect {
        self.state.lock().unwrap().dest_rect
    }

    fn set_display_size(&self, size: Size) {
        self.state.lock().unwrap().display_size = size;
    }

    fn display_size(&self) -> Size {
        self.state.lock().unwrap().display_size
    }
}

struct Rig {
    presenter: VideoPresenter,
    source: Arc<MockSource>,
    backend: Arc<MockBackend>,
    host: Arc<MockHost>,
}

/// Builds a bound presenter with the clock started. No scheduler worker
/// runs: with no clock attached every delivery presents synchronously,
/// which keeps these tests deterministic.
fn started_rig() -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();

    let host = MockHost::new();
    let backend = MockBackend::new(Arc::clone(&host));
    let presenter = VideoPresenter::new(
        Arc::clone(&backend) as Arc<dyn RenderBackend>,
        Arc::clone(&host) as Arc<dyn HostSink>,
        PresenterOptions::default(),
    );
    let source = MockSource::new();
    presenter.bind(Arc::clone(&source) as Arc<dyn FrameSource>).unwrap();
    presenter.on_clock_start(Some(MediaTime::ZERO)).unwrap();

    Rig {
        presenter,
        source,
        backend,
        host,
    }
}

#[test]
fn test_bind_leaves_shutdown() {
    let host = MockHost::new();
    let backend = MockBackend::new(Arc::clone(&host));
    let presenter = VideoPresenter::new(
        Arc::clone(&backend) as Arc<dyn RenderBackend>,
        Arc::clone(&host) as Arc<dyn HostSink>,
        PresenterOptions::default(),
    );

    assert_eq!(presenter.render_state(), RenderState::Shutdown);
    assert!(presenter.on_clock_start(None).is_err());

    presenter
        .bind(MockSource::new() as Arc<dyn FrameSource>)
        .unwrap();
    assert_eq!(presenter.render_state(), RenderState::Stopped);
}

#[test]
fn test_first_input_negotiates_and_presents() {
    let rig = started_rig();
    rig.source.push_frames(&[0]);

    rig.presenter.process_input_available().unwrap();

    assert_eq!(rig.presenter.media_type().unwrap().width, 640);
    assert_eq!(rig.backend.create_calls(), 1);
    assert_eq!(rig.host.rendered_count(), 1);
    assert_eq!(
        rig.host.events.lock().unwrap().surfaces_created.len(),
        1
    );
}

#[test]
fn test_backpressure_stops_output_until_sample_returns() {
    let rig = started_rig();
    // Five frames but only three buffers.
    rig.source.push_frames(&[0, 33, 66, 99, 132]);

    rig.presenter.process_input_available().unwrap();
    assert_eq!(rig.host.rendered_count(), 3);

    // Returning one buffer resumes the loop for exactly one more frame.
    let sample = rig.host.take_rendered().unwrap();
    rig.presenter.on_sample_freed(sample);
    assert_eq!(rig.host.rendered_count(), 3); // 4 total, 1 taken out

    let sample = rig.host.take_rendered().unwrap();
    rig.presenter.on_sample_freed(sample);
    assert_eq!(rig.host.rendered_count(), 3); // 5 total, 2 taken out
}

#[test]
fn test_token_invariant_drops_stale_samples() {
    let rig = started_rig();
    rig.source.push_frames(&[0]);
    rig.presenter.process_input_available().unwrap();
    let first_token = rig.presenter.current_token();
    let stale = rig.host.take_rendered().unwrap();
    assert_eq!(stale.token, first_token);

    // Renegotiate mid-stream: the batch is torn down and recreated.
    rig.presenter.invalidate_media_type().unwrap();
    rig.source.push_frames(&[33]);
    rig.presenter.process_input_available().unwrap();

    let new_token = rig.presenter.current_token();
    assert!(new_token > first_token);
    assert_eq!(rig.backend.create_calls(), 2);

    // End-of-stream is gated on the pool: one live sample outstanding.
    rig.presenter.end_of_stream().unwrap();
    assert_eq!(rig.host.events.lock().unwrap().end_of_stream, 0);

    // Returning the stale sample must NOT satisfy the gate: it belongs
    // to the old generation and is dropped, not recycled.
    rig.presenter.on_sample_freed(stale);
    assert_eq!(rig.host.events.lock().unwrap().end_of_stream, 0);

    // Returning the live sample completes the stream.
    let live = rig.host.take_rendered().unwrap();
    assert_eq!(live.token, new_token);
    rig.presenter.on_sample_freed(live);
    assert_eq!(rig.host.events.lock().unwrap().end_of_stream, 1);
}

#[test]
fn test_end_of_stream_fires_once_after_last_return() {
    let rig = started_rig();
    rig.source.push_frames(&[0, 33]);
    rig.presenter.process_input_available().unwrap();
    assert_eq!(rig.host.rendered_count(), 2);

    rig.presenter.end_of_stream().unwrap();
    assert_eq!(rig.host.events.lock().unwrap().end_of_stream, 0);

    let first = rig.host.take_rendered().unwrap();
    rig.presenter.on_sample_freed(first);
    assert_eq!(rig.host.events.lock().unwrap().end_of_stream, 0);

    let second = rig.host.take_rendered().unwrap();
    rig.presenter.on_sample_freed(second);
    assert_eq!(rig.host.events.lock().unwrap().end_of_stream, 1);

    // The flag was consumed; further returns do not re-fire it.
    rig.source.push_frames(&[66]);
    rig.presenter.process_input_available().unwrap();
    let third = rig.host.take_rendered().unwrap();
    rig.presenter.on_sample_freed(third);
    assert_eq!(rig.host.events.lock().unwrap().end_of_stream, 1);
}

#[test]
fn test_frame_step_presents_exactly_one_frame() {
    let rig = started_rig();

    rig.presenter.step(1).unwrap();
    assert_eq!(rig.presenter.frame_step_state(), FrameStepState::Pending);

    // The source produces three frames; only the first completes the
    // countdown and reaches the backend.
    rig.source.push_frames(&[100, 133, 166]);
    rig.presenter.process_input_available().unwrap();

    assert_eq!(rig.host.rendered_count(), 1);
    assert_eq!(rig.presenter.frame_step_state(), FrameStepState::Scheduled);

    // While scrubbing, the step completes when that specific sample
    // returns, with a scrub-position notification.
    rig.presenter.on_clock_rate_change(0.0).unwrap();
    let stepped = rig.host.take_rendered().unwrap();
    assert_eq!(stepped.pts, Some(MediaTime::from_millis(100)));
    rig.presenter.on_sample_freed(stepped);

    assert_eq!(rig.presenter.frame_step_state(), FrameStepState::Complete);
    assert_eq!(
        rig.host.events.lock().unwrap().scrub_times,
        vec![MediaTime::from_millis(100)]
    );
    // Still exactly one present.
    assert_eq!(rig.host.rendered_count(), 0);
}

#[test]
fn test_frame_step_counts_down_multiple_frames() {
    let rig = started_rig();

    rig.presenter.step(2).unwrap();
    rig.source.push_frames(&[100, 133, 166]);
    rig.presenter.process_input_available().unwrap();

    // Frame 100 is consumed by the countdown; frame 133 is presented.
    assert_eq!(rig.host.rendered_count(), 1);
    let stepped = rig.host.take_rendered().unwrap();
    assert_eq!(stepped.pts, Some(MediaTime::from_millis(133)));
}

#[test]
fn test_cancel_step_notifies_once_and_is_idempotent() {
    let rig = started_rig();

    rig.presenter.step(1).unwrap();
    assert_eq!(rig.presenter.frame_step_state(), FrameStepState::Pending);

    rig.presenter.cancel_step().unwrap();
    assert_eq!(rig.presenter.frame_step_state(), FrameStepState::None);
    assert_eq!(rig.host.events.lock().unwrap().steps_cancelled, 1);

    // Cancelling with nothing in flight does not re-notify.
    rig.presenter.cancel_step().unwrap();
    assert_eq!(rig.host.events.lock().unwrap().steps_cancelled, 1);
}

#[test]
fn test_leaving_scrub_rate_cancels_step() {
    let rig = started_rig();
    rig.presenter.on_clock_rate_change(0.0).unwrap();

    rig.presenter.step(1).unwrap();
    assert_eq!(rig.presenter.frame_step_state(), FrameStepState::Pending);

    rig.presenter.on_clock_rate_change(1.0).unwrap();
    assert_eq!(rig.presenter.frame_step_state(), FrameStepState::None);
    assert_eq!(rig.host.events.lock().unwrap().steps_cancelled, 1);
}

#[test]
fn test_clock_stop_cancels_step() {
    let rig = started_rig();
    rig.presenter.step(1).unwrap();

    rig.presenter.on_clock_stop().unwrap();
    assert_eq!(rig.presenter.render_state(), RenderState::Stopped);
    assert_eq!(rig.presenter.frame_step_state(), FrameStepState::None);
    assert_eq!(rig.host.events.lock().unwrap().steps_cancelled, 1);
}

#[test]
fn test_pause_and_restart() {
    let rig = started_rig();
    rig.presenter.on_clock_pause().unwrap();
    assert_eq!(rig.presenter.render_state(), RenderState::Paused);

    rig.presenter.on_clock_restart().unwrap();
    assert_eq!(rig.presenter.render_state(), RenderState::Started);
}

#[test]
fn test_repaint_reuses_last_presentation_time() {
    let rig = started_rig();
    rig.source.push_frames(&[40]);
    rig.presenter.process_input_available().unwrap();

    let first = rig.host.take_rendered().unwrap();
    assert_eq!(first.pts, Some(MediaTime::from_millis(40)));
    rig.presenter.on_sample_freed(first);

    // The repaint frame carries the previous time, not the source's.
    rig.source.push(Produce::Frame(999));
    rig.presenter.repaint().unwrap();

    let repainted = rig.host.take_rendered().unwrap();
    assert_eq!(repainted.pts, Some(MediaTime::from_millis(40)));
}

#[test]
fn test_device_reset_renegotiates_and_notifies() {
    let rig = started_rig();
    rig.source.push_frames(&[0]);
    rig.presenter.process_input_available().unwrap();
    let first_token = rig.presenter.current_token();

    rig.backend.script_device(DeviceState::Reset);
    rig.source.push_frames(&[33]);
    rig.presenter.process_input_available().unwrap();

    assert_eq!(rig.host.events.lock().unwrap().display_changed, 1);
    assert!(rig.presenter.current_token() > first_token);
    assert_eq!(rig.backend.create_calls(), 2);
}

#[test]
fn test_device_removed_aborts_once() {
    let rig = started_rig();
    rig.source.push_frames(&[0]);
    rig.presenter.process_input_available().unwrap();

    rig.backend.script_device(DeviceState::Removed);
    rig.source.push_frames(&[33]);
    rig.presenter.process_input_available().unwrap();

    // No further frames were delivered and exactly one abort went out.
    assert_eq!(rig.host.rendered_count(), 1);
    assert_eq!(rig.host.events.lock().unwrap().fatal.len(), 1);

    // Repeated polling while the device stays gone does not re-notify.
    rig.presenter.process_input_available().unwrap();
    rig.presenter.process_input_available().unwrap();
    assert_eq!(rig.host.events.lock().unwrap().fatal.len(), 1);
}

#[test]
fn test_format_changed_triggers_renegotiation() {
    let rig = started_rig();
    rig.source.push_frames(&[0]);
    rig.presenter.process_input_available().unwrap();

    rig.source.push(Produce::FormatChanged);
    rig.source.push_frames(&[33]);
    rig.presenter.process_input_available().unwrap();

    assert_eq!(rig.backend.create_calls(), 2);
    assert_eq!(rig.host.rendered_count(), 2);
}

#[test]
fn test_destination_rect_drives_negotiated_geometry() {
    let rig = started_rig();
    rig.presenter
        .set_destination_rect(Rect::new(0, 0, 320, 180))
        .unwrap();

    rig.source.push_frames(&[0]);
    rig.presenter.process_input_available().unwrap();

    let media_type = rig.presenter.media_type().unwrap();
    assert_eq!(media_type.width, 320);
    assert_eq!(media_type.height, 180);
}

#[test]
fn test_shutdown_destroys_surface_once() {
    let rig = started_rig();
    rig.source.push_frames(&[0]);
    rig.presenter.process_input_available().unwrap();

    rig.presenter.shutdown();
    assert_eq!(rig.presenter.render_state(), RenderState::Shutdown);
    assert!(rig.presenter.process_input_available().is_err());

    // A second teardown must not double-notify: the backend only reports
    // a destroy when a batch actually existed.
    rig.presenter.shutdown();
    assert_eq!(rig.host.events.lock().unwrap().surfaces_destroyed, 1);
}

use crate::gpu::{RenderError, SurfaceHandle};
use crate::video::sample::VideoSample;
use common::MediaTime;

/// Notifications delivered to the host window / compositor.
///
/// The host is the final consumer of presented frames: after
/// [`on_frame_rendered`](HostSink::on_frame_rendered) it composites the
/// shared interop surface and must eventually hand the sample back via
/// [`VideoPresenter::on_sample_freed`](crate::video::VideoPresenter::on_sample_freed)
/// once it is done with it — that return is what lets the buffer recycle.
///
/// Callbacks may arrive from the controller's caller threads or from the
/// scheduler worker, but never while the controller holds its internal
/// lock, so an implementation may call straight back into the presenter.
pub trait HostSink: Send + Sync {
    /// A shared interop surface now exists (after format negotiation).
    fn on_surface_created(&self, handle: SurfaceHandle);

    /// The interop surface was torn down (format/device change, shutdown).
    fn on_surface_destroyed(&self);

    /// A frame was presented into the interop surface. The host owns the
    /// sample until it returns it.
    fn on_frame_rendered(&self, sample: VideoSample);

    /// The device was lost and transparently recreated; the host should
    /// refresh anything derived from the old surface and trigger a redraw.
    fn on_display_changed(&self);

    /// Unrecoverable device failure. No further frames will be presented
    /// until the pipeline is externally reinitialized.
    fn on_fatal_error(&self, error: RenderError);

    /// A frame step completed while scrubbing (clock rate 0); `pts` is
    /// the timestamp of the frame that was presented.
    fn on_scrub_time(&self, pts: MediaTime);

    /// A requested frame step was cancelled mid-flight.
    fn on_frame_step_cancelled(&self);

    /// All input was consumed, every in-flight frame was displayed and
    /// reclaimed: the stream is complete.
    fn on_end_of_stream(&self);
}

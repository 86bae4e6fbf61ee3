use crate::video::sample::VideoSample;
use common::{MediaTime, VideoFormat};
use thiserror::Error;

/// Whether a format set is a dry run or a commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetFormatMode {
    /// Validate only; the source must not reconfigure.
    TestOnly,
    /// Adopt the format for subsequent `produce` calls.
    Commit,
}

/// The source declined a proposed output format.
#[derive(Error, Debug, Clone)]
#[error("output format rejected: {0}")]
pub struct FormatRejected(pub String);

/// A fatal upstream failure; the controller aborts delivery.
#[derive(Error, Debug, Clone)]
#[error("frame source error: {0}")]
pub struct SourceError(pub String);

/// Timing the source stamped on a produced frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTiming {
    pub pts: Option<MediaTime>,
    pub duration: Option<MediaTime>,
}

/// Outcome of asking the source to fill one sample.
#[derive(Debug, Clone)]
pub enum ProduceStatus {
    /// The sample was filled and carries the given timing.
    Produced(FrameTiming),
    /// Nothing to produce until more input arrives upstream.
    NeedsMoreInput,
    /// The source's output format changed; renegotiate before producing.
    FormatChanged,
}

/// The upstream mixer contract.
///
/// The controller calls these methods while holding its own lock, so an
/// implementation must never call back into the controller from inside
/// them (deliver notifications from another thread instead).
pub trait FrameSource: Send + Sync {
    /// Returns the candidate output format at `index`, or `None` once the
    /// candidates are exhausted. Candidates are ordered by preference.
    fn output_format(&self, index: usize) -> Option<VideoFormat>;

    /// Proposes (or commits) an output format.
    fn set_output_format(
        &self,
        format: &VideoFormat,
        mode: SetFormatMode,
    ) -> Result<(), FormatRejected>;

    /// Fills `sample`'s buffer with the next composited frame, typically
    /// through [`crate::gpu::RenderBackend::upload`]. Must not block
    /// waiting for upstream input: report `NeedsMoreInput` instead.
    fn produce(&self, sample: &mut VideoSample) -> Result<ProduceStatus, SourceError>;
}

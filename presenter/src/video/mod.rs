//! Clock-synchronized video presentation.
//!
//! This module contains the presentation pipeline proper. It consists of
//! several submodules for maintainability:
//!
//! - `sample`: the frame-buffer handle with its generation token
//! - `sample_pool`: the recycler that hands buffers out and reclaims them
//! - `clock`: the presentation clock contract and stock implementations
//! - `source`: the upstream mixer contract
//! - `host`: the host window / compositor notification contract
//! - `negotiate`: output format validation and optimal-type synthesis
//! - `scheduler`: the worker that presents frames at their target times
//! - `stats`: presentation statistics and periodic logging
//! - `presenter`: the controller state machine tying everything together
//!
//! # Architecture
//!
//! 1. The source signals that output is available; the controller pulls a
//!    recycled sample from the pool and asks the source to fill it.
//! 2. The filled sample goes to the scheduler with its target time.
//! 3. The scheduler presents it through the render backend within a
//!    quarter-frame of the target (late frames immediately).
//! 4. The backend draws into the shared interop surface and notifies the
//!    host, which composites it and eventually returns the sample.
//! 5. The returned sample re-enters the pool; an empty pool is the
//!    back-pressure signal that pauses step 1.

pub mod clock;
pub mod host;
pub mod negotiate;
pub mod presenter;
pub mod sample;
pub mod sample_pool;
pub mod scheduler;
pub mod source;
pub mod stats;

#[cfg(feature = "gst-source")]
pub mod gst_source;

pub use clock::{ManualClock, PresentationClock, SystemClock};
pub use host::HostSink;
pub use presenter::{FrameStepState, PresenterError, RenderState, VideoPresenter};
pub use sample::{SampleId, VideoSample};
pub use sample_pool::SamplePool;
pub use scheduler::{FrameScheduler, SchedulerError};
pub use source::{FrameSource, FrameTiming, ProduceStatus, SetFormatMode};
pub use stats::{PresentStats, StatsSnapshot};

#[cfg(feature = "gst-source")]
pub use gst_source::GstFrameSource;

//! Cadence presentation core.
//!
//! A clock-synchronized video presentation pipeline: decoded frames arrive
//! from an upstream [`FrameSource`], are scheduled against a
//! [`PresentationClock`], and are presented on a GPU interop surface that a
//! host compositor consumes through the [`HostSink`] callbacks.
//!
//! The moving parts, leaves first:
//!
//! - [`video::SamplePool`]: recycles frame buffers without allocating on
//!   the hot path; an empty pool is back-pressure, not an error.
//! - [`gpu::RenderBackend`]: owns the presentable surfaces and the device,
//!   absorbs recoverable device loss, and presents a frame into the shared
//!   interop surface.
//! - [`video::FrameScheduler`]: a worker thread that presents each frame
//!   inside a quarter-frame window of its target time.
//! - [`video::VideoPresenter`]: the controller state machine tying the
//!   above together and negotiating the output format with the source.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use presenter::gpu::WgpuBackend;
//! use presenter::video::{SystemClock, VideoPresenter};
//! use presenter::PresenterOptions;
//! # fn host() -> Arc<dyn presenter::video::HostSink> { unimplemented!() }
//! # fn source() -> Arc<dyn presenter::video::FrameSource> { unimplemented!() }
//!
//! let backend = Arc::new(WgpuBackend::new(host()).unwrap());
//! let presenter = VideoPresenter::new(backend, host(), PresenterOptions::default());
//! presenter.bind(source()).unwrap();
//! presenter.begin_streaming(Arc::new(SystemClock::new())).unwrap();
//! presenter.on_clock_start(Some(common::MediaTime::ZERO)).unwrap();
//! presenter.process_input_available().unwrap();
//! ```

mod config;
pub mod gpu;
pub mod video;

pub use config::PresenterOptions;
pub use video::host::HostSink;
pub use video::source::FrameSource;

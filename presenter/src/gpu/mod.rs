//! GPU presentation backend.
//!
//! This module owns everything that touches the device: surface batches,
//! the shared interop surface handed to the host compositor, and the
//! present pass itself. It is split for maintainability:
//!
//! - `context`: wgpu device/queue acquisition and device-health monitoring
//! - `texture`: presentable frame textures and the interop target
//! - `pipeline_builder`: render pipeline construction helpers
//! - `renderer`: the [`WgpuBackend`] implementation of [`RenderBackend`]
//!
//! The rest of the pipeline reaches the device only through the
//! [`RenderBackend`] trait so the scheduler and controller can be driven
//! against a mock in tests.

pub mod context;
pub mod pipeline_builder;
pub mod renderer;
pub mod texture;

pub use context::{DeviceHandle, GpuContext};
pub use renderer::WgpuBackend;
pub use texture::FrameTexture;

use crate::video::sample::VideoSample;
use common::{Rect, Size, VideoFormat};
use thiserror::Error;

/// Errors surfaced by the render backend.
///
/// Device-loss conditions are split so callers can distinguish the
/// recoverable family (`Lost`, `Hung`) from the one fatal case
/// (`Removed`, the adapter is physically gone).
#[derive(Error, Debug, Clone)]
pub enum RenderError {
    #[error("device lost")]
    Lost,

    #[error("device hung")]
    Hung,

    #[error("device removed")]
    Removed,

    #[error("device initialization failed: {0}")]
    Init(String),

    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("render error: {0}")]
    Other(String),
}

impl RenderError {
    /// True for the conditions the backend absorbs and repairs on the
    /// next device-state poll.
    pub fn is_device_loss(&self) -> bool {
        matches!(self, RenderError::Lost | RenderError::Hung)
    }
}

/// Result of a device-health poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Device is healthy.
    Ok,
    /// The device was lost and has been recreated. Reported exactly once
    /// per recovery so the caller can emit a display-changed notification.
    Reset,
    /// The device is permanently gone. Fatal.
    Removed,
}

/// Identifies the shared interop surface announced to the host.
///
/// The handle is plain data; a host that needs the underlying texture
/// retrieves it from the concrete backend (`WgpuBackend::shared_texture`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceHandle {
    /// Monotonic id, bumped for every surface generation.
    pub id: u64,
    pub size: Size,
}

/// The presentation device seam.
///
/// One implementation drives a real GPU ([`WgpuBackend`]); tests drive the
/// scheduler and controller against mocks. All methods take `&self`:
/// implementations guard their surface state internally because `present`
/// is called from the scheduler worker while geometry and buffer lifecycle
/// calls arrive from controller threads.
pub trait RenderBackend: Send + Sync {
    /// Allocates a batch of `count` presentable frame buffers for
    /// `format`, plus the shared interop surface, and announces the
    /// surface to the host. Every returned sample is stamped with
    /// `token`. On failure all partial allocations are rolled back.
    fn create_frame_buffers(
        &self,
        format: &VideoFormat,
        token: u64,
        count: usize,
    ) -> Result<Vec<VideoSample>, RenderError>;

    /// Releases the current batch and interop surface, notifying the host
    /// that the surface is gone. Idempotent.
    fn destroy_buffers(&self);

    /// Polls device health. `Reset` is emitted once per recovery.
    fn check_device_state(&self) -> DeviceState;

    /// Presents `sample` into the interop surface, honoring the current
    /// destination rectangle, then hands the sample to the host via
    /// `on_frame_rendered`.
    ///
    /// Device-loss-class failures are swallowed (the next
    /// `check_device_state` reports them); only `Removed` propagates.
    fn present(
        &self,
        sample: VideoSample,
        target_time: Option<common::MediaTime>,
    ) -> Result<(), RenderError>;

    /// Writes tightly-packed pixel data into a sample's texture. This is
    /// the upload primitive `FrameSource` implementations use.
    fn upload(&self, sample: &VideoSample, data: &[u8]) -> Result<(), RenderError>;

    /// True if the backend can present frames in `format`'s pixel layout.
    fn supports_format(&self, format: &VideoFormat) -> bool;

    fn set_destination_rect(&self, rect: Rect);

    fn destination_rect(&self) -> Rect;

    fn set_display_size(&self, size: Size);

    fn display_size(&self) -> Size;
}

//! GStreamer-backed frame source.
//!
//! Wraps a decode pipeline delivering BGRA frames through an `AppSink`
//! and adapts it to the [`FrameSource`] contract. The pipeline runs with
//! `sync=false`: pacing is the scheduler's job here, so the sink hands
//! frames over as fast as the presenter pulls them and every buffer
//! keeps its original PTS.

use crate::gpu::RenderBackend;
use crate::video::sample::VideoSample;
use crate::video::source::{
    FormatRejected, FrameSource, FrameTiming, ProduceStatus, SetFormatMode, SourceError,
};

use common::{MediaTime, PixelLayout, Ratio, VideoFormat};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Initialize GStreamer (idempotent, safe to call multiple times)
fn initialize_gstreamer() -> Result<(), SourceError> {
    static GSTREAMER_INITIALIZED: std::sync::Once = std::sync::Once::new();

    let mut result = Ok(());
    GSTREAMER_INITIALIZED.call_once(|| {
        result = gst::init().map_err(|e| SourceError(format!("GStreamer init failed: {e}")));
        if result.is_ok() {
            log::info!("GStreamer initialized");
        }
    });
    result
}

struct GstState {
    committed: Option<VideoFormat>,
    detected_fps: Option<Ratio>,
    eos: bool,
}

/// A [`FrameSource`] decoding a file through GStreamer.
pub struct GstFrameSource {
    pipeline: gst::Pipeline,
    app_sink: gst_app::AppSink,
    backend: Arc<dyn RenderBackend>,
    width: u32,
    height: u32,
    state: Mutex<GstState>,
}

impl GstFrameSource {
    /// Builds a decode pipeline for `path`, scaling to the given output
    /// size.
    pub fn open(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        backend: Arc<dyn RenderBackend>,
    ) -> Result<Self, SourceError> {
        initialize_gstreamer()?;

        let path = path.as_ref();
        log::info!("Creating GStreamer pipeline for: {}", path.display());

        let pipeline_str = format!(
            "filesrc location={} ! decodebin ! videoconvert ! videoscale ! video/x-raw,format=BGRA,width={},height={} ! appsink name=sink",
            path.display(),
            width,
            height
        );
        log::debug!("GStreamer pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| SourceError(format!("failed to create pipeline: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| SourceError("pipeline is not a gst::Pipeline".into()))?;

        let app_sink = pipeline
            .by_name("sink")
            .ok_or_else(|| SourceError("failed to get appsink from pipeline".into()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| SourceError("sink is not an AppSink".into()))?;

        // The presenter paces frames; the sink just queues one and drops
        // the rest under pressure.
        app_sink.set_property("sync", false);
        app_sink.set_property("max-buffers", 1u32);
        app_sink.set_property("drop", false);

        Ok(Self {
            pipeline,
            app_sink,
            backend,
            width,
            height,
            state: Mutex::new(GstState {
                committed: None,
                detected_fps: None,
                eos: false,
            }),
        })
    }

    /// Starts decoding.
    pub fn play(&self) -> Result<(), SourceError> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| SourceError(format!("failed to start pipeline: {e}")))?;
        Ok(())
    }

    /// Pauses decoding (scrubbing keeps the pipeline prerolled).
    pub fn pause(&self) -> Result<(), SourceError> {
        self.pipeline
            .set_state(gst::State::Paused)
            .map_err(|e| SourceError(format!("failed to pause pipeline: {e}")))?;
        Ok(())
    }

    /// Drains bus messages, latching end-of-stream. Returns true once
    /// the stream is done.
    pub fn poll_bus(&self) -> bool {
        if let Some(bus) = self.pipeline.bus() {
            while let Some(msg) = bus.pop() {
                match msg.view() {
                    gst::MessageView::Eos(_) => {
                        log::info!("GStreamer pipeline reached EOS");
                        self.state.lock().unwrap().eos = true;
                    }
                    gst::MessageView::Error(err) => {
                        log::error!(
                            "GStreamer error: {} (debug: {:?})",
                            err.error(),
                            err.debug()
                        );
                        self.state.lock().unwrap().eos = true;
                    }
                    _ => {}
                }
            }
        }
        self.state.lock().unwrap().eos
    }

    /// Frame rate from the sink pad caps, once the pipeline prerolled.
    fn probe_fps(&self) -> Option<Ratio> {
        let pad = self.app_sink.static_pad("sink")?;
        let caps = pad.current_caps()?;
        let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
        let fps = info.fps();
        if fps.numer() <= 0 || fps.denom() <= 0 {
            return None;
        }
        Ratio::new(fps.numer() as u32, fps.denom() as u32).ok()
    }

    fn candidate(&self, fps: Ratio) -> VideoFormat {
        VideoFormat::new(self.width, self.height, fps)
    }
}

impl FrameSource for GstFrameSource {
    fn output_format(&self, index: usize) -> Option<VideoFormat> {
        if index > 0 {
            return None;
        }

        let mut state = self.state.lock().unwrap();
        if state.detected_fps.is_none() {
            state.detected_fps = self.probe_fps();
            if let Some(fps) = state.detected_fps {
                log::info!("Detected video FPS: {:.2}", fps.fps());
            } else {
                log::warn!("Could not detect video FPS, assuming 30fps");
            }
        }

        let fps = state
            .detected_fps
            .unwrap_or(Ratio { num: 30, den: 1 });
        Some(self.candidate(fps))
    }

    fn set_output_format(
        &self,
        format: &VideoFormat,
        mode: SetFormatMode,
    ) -> Result<(), FormatRejected> {
        if format.pixel != PixelLayout::Bgra8 {
            return Err(FormatRejected(format!(
                "only BGRA output is produced, not {:?}",
                format.pixel
            )));
        }
        if format.width != self.width || format.height != self.height {
            return Err(FormatRejected(format!(
                "pipeline is fixed at {}x{}, requested {}x{}",
                self.width, self.height, format.width, format.height
            )));
        }

        if mode == SetFormatMode::Commit {
            self.state.lock().unwrap().committed = Some(format.clone());
            log::debug!("Committed output format {}x{}", format.width, format.height);
        }
        Ok(())
    }

    fn produce(&self, sample: &mut VideoSample) -> Result<ProduceStatus, SourceError> {
        if self.state.lock().unwrap().committed.is_none() {
            return Err(SourceError("produce before format commit".into()));
        }

        let Some(gst_sample) = self.app_sink.try_pull_sample(gst::ClockTime::ZERO) else {
            self.poll_bus();
            return Ok(ProduceStatus::NeedsMoreInput);
        };

        let buffer = gst_sample
            .buffer()
            .ok_or_else(|| SourceError("sample without buffer".into()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| SourceError("failed to map buffer".into()))?;

        let expected = (self.width * self.height * 4) as usize;
        if map.len() != expected {
            // The stream changed under us (e.g. mid-stream resolution
            // switch); let the controller renegotiate.
            log::info!(
                "Frame size changed ({} bytes, expected {})",
                map.len(),
                expected
            );
            return Ok(ProduceStatus::FormatChanged);
        }

        self.backend
            .upload(sample, map.as_slice())
            .map_err(|e| SourceError(format!("frame upload failed: {e}")))?;

        let pts = buffer
            .pts()
            .map(|t| MediaTime(t.nseconds() as i64 / 100));
        let duration = buffer
            .duration()
            .map(|t| MediaTime(t.nseconds() as i64 / 100));

        Ok(ProduceStatus::Produced(FrameTiming { pts, duration }))
    }
}

impl Drop for GstFrameSource {
    fn drop(&mut self) {
        log::info!("Stopping GStreamer pipeline");

        // Clear callbacks-equivalent state first, then stop.
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to set pipeline state to Null: {}", e);
        }

        if let Some(bus) = self.pipeline.bus() {
            while bus.pop().is_some() {}
        }
    }
}

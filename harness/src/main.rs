//! Headless end-to-end driver for the presentation pipeline.
//!
//! Feeds a synthetic moving-gradient source through the real wgpu render
//! backend, paced by the system clock, and dumps presentation statistics
//! as JSON on exit. Useful for eyeballing scheduler behavior on real
//! hardware without wiring up a compositor.

use anyhow::{Context, Result};
use clap::Parser;
use common::{MediaTime, Ratio, VideoFormat};
use presenter::gpu::{RenderBackend, RenderError, SurfaceHandle, WgpuBackend};
use presenter::video::source::{FormatRejected, FrameTiming, SourceError};
use presenter::video::{
    FrameSource, HostSink, ProduceStatus, SetFormatMode, SystemClock, VideoPresenter, VideoSample,
};
use presenter::PresenterOptions;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence presentation pipeline harness", long_about = None)]
#[command(version)]
struct Cli {
    /// Frame width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Frame height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Frames per second
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Number of frames to run
    #[arg(short, long, default_value = "120")]
    frames: u64,

    /// Playback rate (1.0 = realtime)
    #[arg(short, long, default_value = "1.0")]
    rate: f32,
}

/// Host sink that funnels rendered samples back to the main loop over a
/// channel (returning them from the callback thread would recurse into
/// the controller).
struct HarnessHost {
    rendered_tx: Mutex<mpsc::Sender<VideoSample>>,
    rendered: AtomicU64,
    eos: AtomicBool,
    fatal: AtomicBool,
}

impl HarnessHost {
    fn new(rendered_tx: mpsc::Sender<VideoSample>) -> Arc<Self> {
        Arc::new(Self {
            rendered_tx: Mutex::new(rendered_tx),
            rendered: AtomicU64::new(0),
            eos: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
        })
    }
}

impl HostSink for HarnessHost {
    fn on_surface_created(&self, handle: SurfaceHandle) {
        log::info!(
            "Shared surface created: id {} ({}x{})",
            handle.id,
            handle.size.width,
            handle.size.height
        );
    }

    fn on_surface_destroyed(&self) {
        log::info!("Shared surface destroyed");
    }

    fn on_frame_rendered(&self, sample: VideoSample) {
        self.rendered.fetch_add(1, Ordering::Relaxed);
        let _ = self.rendered_tx.lock().unwrap().send(sample);
    }

    fn on_display_changed(&self) {
        log::warn!("Display changed (device was reset)");
    }

    fn on_fatal_error(&self, error: RenderError) {
        log::error!("Fatal presentation error: {}", error);
        self.fatal.store(true, Ordering::Release);
    }

    fn on_scrub_time(&self, pts: MediaTime) {
        log::info!("Scrub position reached: {}", pts);
    }

    fn on_frame_step_cancelled(&self) {
        log::info!("Frame step cancelled");
    }

    fn on_end_of_stream(&self) {
        log::info!("End of stream");
        self.eos.store(true, Ordering::Release);
    }
}

/// Produces `total` frames of a moving gradient, uploading each into the
/// sample's texture through the backend.
struct SyntheticSource {
    format: VideoFormat,
    backend: Arc<dyn RenderBackend>,
    next_frame: AtomicU64,
    total: u64,
}

impl SyntheticSource {
    fn new(format: VideoFormat, backend: Arc<dyn RenderBackend>, total: u64) -> Arc<Self> {
        Arc::new(Self {
            format,
            backend,
            next_frame: AtomicU64::new(0),
            total,
        })
    }

    fn fill_gradient(&self, index: u64) -> Vec<u8> {
        let width = self.format.width as usize;
        let height = self.format.height as usize;
        let phase = (index % 255) as u8;

        let mut data = vec![0u8; width * height * 4];
        for y in 0..height {
            let row = (y * 255 / height.max(1)) as u8;
            for x in 0..width {
                let col = (x * 255 / width.max(1)) as u8;
                let pixel = (y * width + x) * 4;
                data[pixel] = col.wrapping_add(phase); // B
                data[pixel + 1] = row; // G
                data[pixel + 2] = phase; // R
                data[pixel + 3] = 255; // A
            }
        }
        data
    }

    fn exhausted(&self) -> bool {
        self.next_frame.load(Ordering::Relaxed) >= self.total
    }
}

impl FrameSource for SyntheticSource {
    fn output_format(&self, index: usize) -> Option<VideoFormat> {
        (index == 0).then(|| self.format.clone())
    }

    fn set_output_format(
        &self,
        _format: &VideoFormat,
        _mode: SetFormatMode,
    ) -> Result<(), FormatRejected> {
        Ok(())
    }

    fn produce(&self, sample: &mut VideoSample) -> Result<ProduceStatus, SourceError> {
        let index = self.next_frame.load(Ordering::Relaxed);
        if index >= self.total {
            return Ok(ProduceStatus::NeedsMoreInput);
        }

        let data = self.fill_gradient(index);
        self.backend
            .upload(sample, &data)
            .map_err(|e| SourceError(format!("upload failed: {e}")))?;
        self.next_frame.store(index + 1, Ordering::Relaxed);

        let per_frame = self.format.frame_rate.average_frame_duration();
        Ok(ProduceStatus::Produced(FrameTiming {
            pts: Some(MediaTime(per_frame.0 * index as i64)),
            duration: Some(per_frame),
        }))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let rate = Ratio::new(cli.fps, 1).context("invalid fps")?;
    let format = VideoFormat::new(cli.width, cli.height, rate);

    log::info!(
        "Starting Cadence harness v{}: {}x{} @ {} fps, {} frames, rate {}",
        env!("CARGO_PKG_VERSION"),
        cli.width,
        cli.height,
        cli.fps,
        cli.frames,
        cli.rate
    );

    let (rendered_tx, rendered_rx) = mpsc::channel();
    let host = HarnessHost::new(rendered_tx);

    let backend = Arc::new(
        WgpuBackend::new(Arc::clone(&host) as Arc<dyn HostSink>)
            .context("failed to initialize render backend")?,
    );

    let presenter = VideoPresenter::new(
        Arc::clone(&backend) as Arc<dyn RenderBackend>,
        Arc::clone(&host) as Arc<dyn HostSink>,
        PresenterOptions::default(),
    );

    let source = SyntheticSource::new(
        format,
        Arc::clone(&backend) as Arc<dyn RenderBackend>,
        cli.frames,
    );
    presenter.bind(Arc::clone(&source) as Arc<dyn FrameSource>)?;

    let clock = Arc::new(SystemClock::new());
    presenter.begin_streaming(clock)?;
    presenter.on_clock_rate_change(cli.rate)?;
    presenter.on_clock_start(Some(MediaTime::ZERO))?;

    // Main loop: keep the source's input flag raised, and play the
    // compositor's role by returning every rendered sample.
    let expected_runtime = Duration::from_secs_f64(
        cli.frames as f64 / (cli.fps as f64 * cli.rate.abs().max(0.1) as f64),
    );
    let deadline = Instant::now() + expected_runtime + Duration::from_secs(10);
    let mut signaled_eos = false;

    while !host.eos.load(Ordering::Acquire) && !host.fatal.load(Ordering::Acquire) {
        if Instant::now() > deadline {
            anyhow::bail!("harness timed out waiting for end of stream");
        }

        while let Ok(sample) = rendered_rx.try_recv() {
            presenter.on_sample_freed(sample);
        }

        if source.exhausted() {
            if !signaled_eos {
                presenter.end_of_stream()?;
                signaled_eos = true;
            }
        } else {
            presenter.process_input_available()?;
        }

        std::thread::sleep(Duration::from_millis(2));
    }

    presenter.end_streaming()?;

    let snapshot = presenter.stats().snapshot();
    presenter.shutdown();

    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("failed to serialize stats")?
    );

    log::info!(
        "Harness finished: {} frames rendered",
        host.rendered.load(Ordering::Relaxed)
    );

    if host.fatal.load(Ordering::Acquire) {
        anyhow::bail!("pipeline aborted on a fatal device error");
    }
    Ok(())
}

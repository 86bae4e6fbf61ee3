use crate::gpu::pipeline_builder::{bind_group_entries, create_pipeline_layout, PipelineBuilder};
use crate::gpu::texture::{create_interop_target, FrameTexture};
use crate::gpu::{DeviceHandle, DeviceState, GpuContext, RenderBackend, RenderError, SurfaceHandle};
use crate::video::host::HostSink;
use crate::video::sample::VideoSample;

use common::{MediaTime, PixelLayout, Rect, Size, VideoFormat};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use wgpu::util::DeviceExt;

/// Destination-rectangle transform for the present pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct PresentUniform {
    /// (x, y, w, h) of the destination rectangle in 0..1 surface space.
    rect: [f32; 4],
}

/// Everything bound to the lifetime of one device. Rebuilt wholesale when
/// the device is lost and recreated.
struct GpuState {
    context: GpuContext,
    present_pipeline: wgpu::RenderPipeline,
    texture_bind_group_layout: wgpu::BindGroupLayout,
    uniform_bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl GpuState {
    fn build(context: GpuContext) -> Self {
        let device = &context.device;

        let texture_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Frame Texture Bind Group Layout"),
                entries: &[
                    bind_group_entries::texture(0),
                    bind_group_entries::sampler(1),
                ],
            });

        let uniform_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Present Uniform Layout"),
                entries: &[bind_group_entries::uniform_buffer(0)],
            });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Frame Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Nearest,
            ..Default::default()
        });

        let pipeline_layout = create_pipeline_layout(
            device,
            "Present Pipeline Layout",
            &[&texture_bind_group_layout, &uniform_bind_group_layout],
        );

        let present_pipeline =
            PipelineBuilder::new(device, include_str!("shaders/present.wgsl"))
                .with_label("Present Pipeline")
                .with_layout(&pipeline_layout)
                .build();

        Self {
            context,
            present_pipeline,
            texture_bind_group_layout,
            uniform_bind_group_layout,
            sampler,
        }
    }
}

/// The current batch of presentable surfaces plus the interop target.
struct SurfaceBatch {
    frames: Vec<FrameTexture>,
    interop: wgpu::Texture,
    interop_view: wgpu::TextureView,
    interop_size: Size,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    handle: SurfaceHandle,
    token: u64,
}

/// Geometry and batch state, independent of the device lock so geometry
/// setters never contend with an in-flight present encode.
struct BackendState {
    batch: Option<SurfaceBatch>,
    dest_rect: Rect,
    display_size: Size,
}

/// wgpu implementation of [`RenderBackend`].
///
/// Presentation is headless: frames are drawn into an interop texture the
/// host compositor samples, announced through [`HostSink::on_surface_created`].
pub struct WgpuBackend {
    host: Arc<dyn HostSink>,
    gpu: Mutex<GpuState>,
    state: Mutex<BackendState>,
    surface_ids: AtomicU64,
}

impl WgpuBackend {
    /// Create the backend, acquiring a device synchronously.
    pub fn new(host: Arc<dyn HostSink>) -> Result<Self, RenderError> {
        let context = GpuContext::new_blocking()?;
        log::info!("Render backend initialized");

        Ok(Self {
            host,
            gpu: Mutex::new(GpuState::build(context)),
            state: Mutex::new(BackendState {
                batch: None,
                dest_rect: Rect::default(),
                display_size: Size::default(),
            }),
            surface_ids: AtomicU64::new(1),
        })
    }

    /// Device/queue snapshot for upstream sources allocating compatible
    /// resources. Stale after a `Reset`; fetch again.
    pub fn device_handle(&self) -> DeviceHandle {
        self.gpu.lock().unwrap().context.device_handle()
    }

    /// The interop texture for the current surface generation, if any.
    /// Hosts sample or copy this after `on_frame_rendered`.
    pub fn shared_texture(&self) -> Option<wgpu::Texture> {
        self.state
            .lock()
            .unwrap()
            .batch
            .as_ref()
            .map(|batch| batch.interop.clone())
    }

    /// Normalized destination rectangle within the interop surface.
    fn present_uniform(dest: Rect, surface: Size) -> PresentUniform {
        if dest.is_empty() || surface.is_empty() {
            return PresentUniform {
                rect: [0.0, 0.0, 1.0, 1.0],
            };
        }
        let sw = surface.width as f32;
        let sh = surface.height as f32;
        PresentUniform {
            rect: [
                dest.x as f32 / sw,
                dest.y as f32 / sh,
                dest.width as f32 / sw,
                dest.height as f32 / sh,
            ],
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn create_frame_buffers(
        &self,
        format: &VideoFormat,
        token: u64,
        count: usize,
    ) -> Result<Vec<VideoSample>, RenderError> {
        let gpu = self.gpu.lock().unwrap();
        let device = &gpu.context.device;

        // Allocate everything before touching the committed state so a
        // failure rolls back all partial allocations on drop.
        let mut frames = Vec::with_capacity(count);
        for slot in 0..count {
            frames.push(FrameTexture::new_frame(
                device,
                &gpu.texture_bind_group_layout,
                &gpu.sampler,
                format,
                &format!("Video Frame {slot}"),
            )?);
        }

        let mut state = self.state.lock().unwrap();
        let interop_size = if state.display_size.is_empty() {
            format.size()
        } else {
            state.display_size
        };
        let interop = create_interop_target(device, interop_size)?;
        let interop_view = interop.create_view(&wgpu::TextureViewDescriptor::default());

        let uniform = Self::present_uniform(state.dest_rect, interop_size);
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Present Uniform Buffer"),
            contents: bytemuck::cast_slice(&[uniform]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Present Uniform Bind Group"),
            layout: &gpu.uniform_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let handle = SurfaceHandle {
            id: self.surface_ids.fetch_add(1, Ordering::Relaxed),
            size: interop_size,
        };

        let replaced = state.batch.replace(SurfaceBatch {
            frames,
            interop,
            interop_view,
            interop_size,
            uniform_buffer,
            uniform_bind_group,
            handle,
            token,
        });

        let samples: Vec<VideoSample> =
            (0..count).map(|slot| VideoSample::new(slot, token)).collect();

        log::info!(
            "Created {} frame buffers ({}x{} {:?}, token {}) + interop surface {}x{}",
            count,
            format.width,
            format.height,
            format.pixel,
            token,
            interop_size.width,
            interop_size.height
        );

        drop(state);
        drop(gpu);

        if replaced.is_some() {
            log::debug!("Previous surface batch replaced without explicit destroy");
            self.host.on_surface_destroyed();
        }
        self.host.on_surface_created(handle);

        Ok(samples)
    }

    fn destroy_buffers(&self) {
        let taken = self.state.lock().unwrap().batch.take();
        if let Some(batch) = taken {
            log::info!(
                "Destroying frame buffer batch (token {}, {} frames)",
                batch.token,
                batch.frames.len()
            );
            drop(batch);
            self.host.on_surface_destroyed();
        }
    }

    fn check_device_state(&self) -> DeviceState {
        let mut gpu = self.gpu.lock().unwrap();

        if gpu.context.monitor.is_removed() {
            return DeviceState::Removed;
        }

        if gpu.context.monitor.take_lost() {
            log::warn!("Presentation device lost, attempting recreation");
            match GpuContext::new_blocking() {
                Ok(context) => {
                    *gpu = GpuState::build(context);
                    drop(gpu);
                    // The old batch belongs to the dead device.
                    self.destroy_buffers();
                    log::info!("Presentation device recreated");
                    return DeviceState::Reset;
                }
                Err(e) => {
                    log::error!("Device recreation failed: {}", e);
                    gpu.context.monitor.mark_removed();
                    return DeviceState::Removed;
                }
            }
        }

        DeviceState::Ok
    }

    fn present(
        &self,
        sample: VideoSample,
        target_time: Option<MediaTime>,
    ) -> Result<(), RenderError> {
        let gpu = self.gpu.lock().unwrap();

        if gpu.context.monitor.is_removed() {
            return Err(RenderError::Removed);
        }

        {
            let state = self.state.lock().unwrap();
            let Some(batch) = state.batch.as_ref() else {
                debug_assert!(false, "present called with no surface batch");
                return Err(RenderError::InvalidSample(
                    "present with no surface batch".into(),
                ));
            };

            if sample.token != batch.token {
                debug_assert_eq!(sample.token, batch.token, "stale sample presented");
                return Err(RenderError::InvalidSample(format!(
                    "sample token {} does not match batch token {}",
                    sample.token, batch.token
                )));
            }

            let Some(frame) = batch.frames.get(sample.slot) else {
                return Err(RenderError::InvalidSample(format!(
                    "sample slot {} out of range",
                    sample.slot
                )));
            };

            let uniform = Self::present_uniform(state.dest_rect, batch.interop_size);
            gpu.context.queue.write_buffer(
                &batch.uniform_buffer,
                0,
                bytemuck::cast_slice(&[uniform]),
            );

            let mut encoder =
                gpu.context
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("Present Encoder"),
                    });

            {
                let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Present Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &batch.interop_view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });

                pass.set_pipeline(&gpu.present_pipeline);
                pass.set_bind_group(0, &frame.bind_group, &[]);
                pass.set_bind_group(1, &batch.uniform_bind_group, &[]);
                pass.draw(0..6, 0..1);
            }

            gpu.context.queue.submit(std::iter::once(encoder.finish()));
        }

        // Device loss during the submit is absorbed here; the scheduler
        // keeps running and the next device-state poll reports Reset.
        if gpu.context.monitor.is_lost_pending() {
            log::warn!(
                "Present at {:?} hit device loss; frame not shown",
                target_time
            );
        } else {
            log::trace!(
                "Presented slot {} (token {}) at {:?}",
                sample.slot,
                sample.token,
                target_time
            );
        }

        drop(gpu);

        // The sample keeps flowing to the host either way so it can be
        // reclaimed through the free path.
        self.host.on_frame_rendered(sample);
        Ok(())
    }

    fn upload(&self, sample: &VideoSample, data: &[u8]) -> Result<(), RenderError> {
        let gpu = self.gpu.lock().unwrap();
        let state = self.state.lock().unwrap();

        let Some(batch) = state.batch.as_ref() else {
            return Err(RenderError::InvalidSample("upload with no batch".into()));
        };
        if sample.token != batch.token {
            return Err(RenderError::InvalidSample(format!(
                "upload into stale sample (token {} vs {})",
                sample.token, batch.token
            )));
        }
        let Some(frame) = batch.frames.get(sample.slot) else {
            return Err(RenderError::InvalidSample(format!(
                "upload slot {} out of range",
                sample.slot
            )));
        };

        frame.upload(&gpu.context.queue, data)
    }

    fn supports_format(&self, format: &VideoFormat) -> bool {
        let gpu = self.gpu.lock().unwrap();
        let max = gpu.context.limits.max_texture_dimension_2d;
        if format.width == 0 || format.height == 0 || format.width > max || format.height > max {
            return false;
        }
        match format.pixel {
            PixelLayout::Bgra8 | PixelLayout::Rgba8 => true,
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_uniform_normalization() {
        let uniform = WgpuBackend::present_uniform(
            Rect::new(480, 270, 960, 540),
            Size::new(1920, 1080),
        );
        assert_eq!(uniform.rect, [0.25, 0.25, 0.5, 0.5]);
    }

    #[test]
    fn test_present_uniform_empty_rect_fills_surface() {
        let uniform = WgpuBackend::present_uniform(Rect::default(), Size::new(1280, 720));
        assert_eq!(uniform.rect, [0.0, 0.0, 1.0, 1.0]);
    }
}

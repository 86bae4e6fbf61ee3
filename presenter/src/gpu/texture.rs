use crate::gpu::RenderError;
use common::{PixelLayout, Size, VideoFormat};

/// Maps a negotiated pixel layout onto the wgpu texture format used for
/// frame textures.
pub fn texture_format(layout: PixelLayout) -> wgpu::TextureFormat {
    match layout {
        PixelLayout::Bgra8 => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelLayout::Rgba8 => wgpu::TextureFormat::Rgba8UnormSrgb,
    }
}

/// A GPU texture with the bind group the present pass samples it through.
pub struct FrameTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub bind_group: wgpu::BindGroup,
    pub width: u32,
    pub height: u32,
    layout: PixelLayout,
}

impl FrameTexture {
    /// Create an empty presentable frame texture for one video sample.
    ///
    /// The texture is written by `upload` (or directly by a source holding
    /// the device handle) and sampled by the present pass.
    pub fn new_frame(
        device: &wgpu::Device,
        bind_group_layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        format: &VideoFormat,
        label: &str,
    ) -> Result<Self, RenderError> {
        if format.width == 0 || format.height == 0 {
            return Err(RenderError::Other(format!(
                "cannot allocate zero-sized frame texture ({}x{})",
                format.width, format.height
            )));
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: format.width,
                height: format.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format.pixel),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        });

        Ok(Self {
            texture,
            view,
            bind_group,
            width: format.width,
            height: format.height,
            layout: format.pixel,
        })
    }

    /// Write tightly-packed pixel data into this texture.
    ///
    /// `write_texture` tolerates unaligned rows (unlike buffer copies), so
    /// the data can be uploaded exactly as the source produced it.
    pub fn upload(&self, queue: &wgpu::Queue, data: &[u8]) -> Result<(), RenderError> {
        let bytes_per_pixel = self.layout.bytes_per_pixel();
        let expected = (self.width * self.height * bytes_per_pixel) as usize;
        if data.len() != expected {
            return Err(RenderError::InvalidSample(format!(
                "frame data size mismatch: expected {} bytes ({}x{}), got {}",
                expected,
                self.width,
                self.height,
                data.len()
            )));
        }

        queue.write_texture(
            self.texture.as_image_copy(),
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * bytes_per_pixel),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );

        Ok(())
    }
}

/// Create the shared interop surface the host compositor consumes.
///
/// Render attachment for the present pass, texture binding so the host
/// can sample it, copy source so the host can copy it out instead.
pub fn create_interop_target(device: &wgpu::Device, size: Size) -> Result<wgpu::Texture, RenderError> {
    if size.is_empty() {
        return Err(RenderError::Other(format!(
            "cannot allocate zero-sized interop surface ({}x{})",
            size.width, size.height
        )));
    }

    Ok(device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Interop Surface"),
        size: wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Bgra8UnormSrgb,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    }))
}

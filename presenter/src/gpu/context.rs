/// GPU context management - wgpu device/queue acquisition and health monitoring
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::gpu::RenderError;

/// Classified device-health flags, fed by the uncaptured-error callback.
///
/// `take_lost` is consume-on-read so a single loss event produces exactly
/// one `Reset` report; `removed` latches permanently.
#[derive(Debug, Default)]
pub struct DeviceMonitor {
    lost: AtomicBool,
    removed: AtomicBool,
}

impl DeviceMonitor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records an error reported by the device, classifying it into the
    /// recoverable (lost) or fatal (removed) family.
    pub fn record(&self, error: &wgpu::Error) {
        match error {
            wgpu::Error::Internal { description, .. } => {
                log::warn!("Device internal error (treating as lost): {}", description);
                self.lost.store(true, Ordering::Release);
            }
            wgpu::Error::OutOfMemory { .. } => {
                log::error!("Device out of memory, marking removed");
                self.removed.store(true, Ordering::Release);
            }
            wgpu::Error::Validation { description, .. } => {
                // Validation errors are wiring bugs, not device health.
                log::error!("GPU validation error: {}", description);
            }
        }
    }

    /// Marks the device lost (used by the present path when a submit
    /// fails in a recoverable way).
    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::Release);
    }

    pub fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    /// Consumes a pending lost flag. Returns true at most once per loss.
    pub fn take_lost(&self) -> bool {
        self.lost.swap(false, Ordering::AcqRel)
    }

    /// Observes a pending lost flag without consuming it (the present
    /// path peeks; only the device-state poll consumes).
    pub fn is_lost_pending(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

/// A cloneable device/queue pair handed to upstream frame sources so they
/// can allocate resources compatible with the presentation device.
///
/// The handle is a snapshot: after a device reset the holder must fetch a
/// fresh one.
#[derive(Clone)]
pub struct DeviceHandle {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

/// GPU context containing device, queue, and adapter info
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
    pub monitor: Arc<DeviceMonitor>,
}

impl GpuContext {
    /// Create a new GPU context.
    ///
    /// This initializes wgpu with the best available adapter. No surface
    /// is required: presentation happens into an interop texture that the
    /// host compositor consumes.
    pub async fn new() -> Result<Self, RenderError> {
        log::info!("Initializing GPU context...");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| RenderError::Init(format!("no suitable GPU adapter: {e}")))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU adapter: {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Cadence Presentation Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RenderError::Init(format!("failed to create GPU device: {e}")))?;

        let monitor = DeviceMonitor::new();
        {
            let monitor = Arc::clone(&monitor);
            device.on_uncaptured_error(Arc::new(move |error| {
                monitor.record(&error);
            }));
        }

        let limits = device.limits();

        log::info!("GPU context initialized");
        log::info!("  Backend: {:?}", adapter_info.backend);
        log::info!(
            "  Max Texture Size: {}x{}",
            limits.max_texture_dimension_2d,
            limits.max_texture_dimension_2d
        );

        Ok(Self {
            device,
            queue,
            adapter_info,
            limits,
            monitor,
        })
    }

    /// Blocking constructor for callers without an async runtime.
    pub fn new_blocking() -> Result<Self, RenderError> {
        pollster::block_on(Self::new())
    }

    /// A device/queue snapshot for upstream allocators.
    pub fn device_handle(&self) -> DeviceHandle {
        DeviceHandle {
            device: self.device.clone(),
            queue: self.queue.clone(),
        }
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_take_lost_is_single_shot() {
        let monitor = DeviceMonitor::new();
        monitor.mark_lost();
        assert!(monitor.take_lost());
        assert!(!monitor.take_lost());
    }

    #[test]
    fn test_monitor_removed_latches() {
        let monitor = DeviceMonitor::new();
        assert!(!monitor.is_removed());
        monitor.mark_removed();
        assert!(monitor.is_removed());
        assert!(monitor.is_removed());
    }
}

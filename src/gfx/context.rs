use crate::error::Error;
use std::sync::Arc;

/// Requirements for requesting a device, plus the adapter selection policy.
pub struct GpuConfig {
    /// Device requirements for requesting a device.
    pub device_descriptor: wgpu::DeviceDescriptor<'static>,
    /// Backend API to use.
    pub backends: wgpu::Backends,
    /// Power preference for the GPU.
    pub power_preference: wgpu::PowerPreference,
    /// Picks a specific adapter by enumeration index instead of letting the
    /// backend choose.
    pub adapter_index: Option<usize>,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            device_descriptor: wgpu::DeviceDescriptor {
                label: Some("cubevis-device"),
                required_features: wgpu::Features::PUSH_CONSTANTS | wgpu::Features::MULTIVIEW,
                required_limits: wgpu::Limits {
                    max_push_constant_size: 128,
                    ..wgpu::Limits::default()
                },
                memory_hints: wgpu::MemoryHints::Performance,
            },
            backends: wgpu::Backends::PRIMARY,
            power_preference: wgpu::PowerPreference::HighPerformance,
            adapter_index: None,
        }
    }
}

/// Aggregation of necessary resources for using GPU.
///
/// The whole tool renders offscreen, so there is no surface; everything
/// downstream borrows the device and queue from here.
pub struct GpuContext {
    /// Context for wgpu objects.
    #[allow(dead_code)]
    instance: wgpu::Instance,

    /// Adapter for wgpu: the physical device + graphics api.
    pub adapter: wgpu::Adapter,

    /// GPU logical device.
    pub device: Arc<wgpu::Device>,

    /// GPU command queue to execute drawing or computing commands.
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Creates a context for offscreen usage.
    pub async fn offscreen(config: GpuConfig) -> Result<Self, Error> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        let adapter = match config.adapter_index {
            Some(index) => {
                let mut adapters = instance.enumerate_adapters(config.backends);
                if index >= adapters.len() {
                    log::error!(
                        "Adapter index {} out of range, {} adapter(s) available",
                        index,
                        adapters.len()
                    );
                    return Err(Error::NoSuitableAdapter);
                }
                adapters.swap_remove(index)
            }
            None => instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: config.power_preference,
                    force_fallback_adapter: false,
                    compatible_surface: None,
                })
                .await
                .ok_or(Error::NoSuitableAdapter)?,
        };

        let info = adapter.get_info();
        log::info!("Selected adapter: {} ({:?})", info.name, info.backend);
        log::trace!("GPU supported features: {:?}", adapter.features());

        // Logical device and command queue
        let (device, queue) = adapter
            .request_device(&config.device_descriptor, None)
            .await?;

        log::trace!("GPU limits: {:?}", device.limits());

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

use crossbeam_channel::{Receiver, Sender};

use crate::error::RenderError;

/// Adapter preference used when the shared device is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GpuPowerPreference {
    Low,
    #[default]
    High,
}

/// Validation errors raised outside an error scope.
///
/// wgpu reports those through a callback that would otherwise panic; they are
/// queued here and picked up by the backend at the next frame boundary.
#[derive(Debug)]
pub(crate) struct DeviceErrors {
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl DeviceErrors {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub(crate) fn sender(&self) -> Sender<String> {
        self.tx.clone()
    }

    /// The oldest pending error; later ones are logged and discarded.
    pub(crate) fn take(&self) -> Option<String> {
        let mut pending = self.rx.try_iter();
        let first = pending.next()?;
        let discarded = pending.count();
        if discarded > 0 {
            tracing::debug!(discarded, "further GPU errors since the last frame");
        }
        Some(first)
    }
}

/// The wgpu objects every surface shares through the device hub.
///
/// Surfaces are created later by hosts from the same `instance`, so the
/// adapter is picked without a compatible surface.
pub struct GpuDevice {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    errors: DeviceErrors,
}

impl GpuDevice {
    pub fn new(power: GpuPowerPreference) -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let power_preference = match power {
            GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
            GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| RenderError::DeviceUnavailable(format!("no suitable GPU adapter: {err}")))?;

        let info = adapter.get_info();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("fxlive device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| {
            RenderError::DeviceUnavailable(format!("failed to create GPU device: {err}"))
        })?;

        let errors = DeviceErrors::new();
        let report = errors.sender();
        device.on_uncaptured_error(Box::new(move |error| {
            tracing::error!(error = %error, "uncaptured GPU error");
            let _ = report.send(error.to_string());
        }));

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            errors,
        })
    }

    /// Fails with the first GPU error raised outside [`validated`](Self::validated).
    pub(crate) fn check_uncaptured(&self, resource: &str) -> Result<(), RenderError> {
        match self.errors.take() {
            Some(reason) => Err(RenderError::resource(resource.to_string(), reason)),
            None => Ok(()),
        }
    }

    /// Runs `build` and turns wgpu validation errors into a `RenderError`.
    pub(crate) fn validated<T>(
        &self,
        build: impl FnOnce(&wgpu::Device) -> T,
        on_error: impl FnOnce(String) -> RenderError,
    ) -> Result<T, RenderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(on_error(error.to_string())),
            None => Ok(value),
        }
    }
}

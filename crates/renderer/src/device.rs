//! Reference-counted access to the graphics device shared by every surface.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::RenderError;

type DeviceFactory<D> = dyn Fn() -> Result<D, RenderError> + Send + Sync;

struct HubState<D> {
    device: Option<Arc<D>>,
    leases: usize,
}

/// Creates the device on the first [`acquire`](DeviceHub::acquire) and destroys
/// it when the last [`DeviceLease`] is dropped.
pub struct DeviceHub<D> {
    state: Mutex<HubState<D>>,
    factory: Box<DeviceFactory<D>>,
}

impl<D> DeviceHub<D> {
    pub fn new<F>(factory: F) -> Arc<Self>
    where
        F: Fn() -> Result<D, RenderError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            state: Mutex::new(HubState {
                device: None,
                leases: 0,
            }),
            factory: Box::new(factory),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HubState<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands out the shared device, creating it if no lease is outstanding.
    pub fn acquire(self: &Arc<Self>) -> Result<DeviceLease<D>, RenderError> {
        let mut state = self.lock();
        let device = match &state.device {
            Some(device) => Arc::clone(device),
            None => {
                let device = Arc::new((self.factory)()?);
                tracing::info!("graphics device created");
                state.device = Some(Arc::clone(&device));
                device
            }
        };
        state.leases += 1;
        Ok(DeviceLease {
            hub: Arc::clone(self),
            device,
        })
    }

    /// Number of outstanding leases.
    pub fn lease_count(&self) -> usize {
        self.lock().leases
    }

    pub fn is_live(&self) -> bool {
        self.lock().device.is_some()
    }

    fn release(&self) {
        let mut state = self.lock();
        state.leases = state.leases.saturating_sub(1);
        if state.leases == 0 && state.device.take().is_some() {
            tracing::info!("graphics device released");
        }
    }
}

impl<D> fmt::Debug for DeviceHub<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DeviceHub")
            .field("leases", &state.leases)
            .field("live", &state.device.is_some())
            .finish()
    }
}

/// A surface's claim on the shared device.
pub struct DeviceLease<D> {
    hub: Arc<DeviceHub<D>>,
    device: Arc<D>,
}

impl<D> DeviceLease<D> {
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn hub(&self) -> &Arc<DeviceHub<D>> {
        &self.hub
    }
}

impl<D> Deref for DeviceLease<D> {
    type Target = D;

    fn deref(&self) -> &D {
        &self.device
    }
}

impl<D> Drop for DeviceLease<D> {
    fn drop(&mut self) {
        self.hub.release();
    }
}

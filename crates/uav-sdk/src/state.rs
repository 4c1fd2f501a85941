//! Exclusive-access gate around the device state.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use uav_core::DeviceState;

/// Device state shared by the telemetry loop and the command handler.
///
/// Every read and write goes through [`SharedDeviceState::lock`], so a
/// command can never interleave with a half-applied telemetry tick.
#[derive(Debug, Clone)]
pub struct SharedDeviceState {
    inner: Arc<Mutex<DeviceState>>,
}

impl SharedDeviceState {
    pub fn new(state: DeviceState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.inner.lock().await
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> DeviceState {
        self.inner.lock().await.clone()
    }
}

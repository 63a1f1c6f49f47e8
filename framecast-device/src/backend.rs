//! Capture device and factory traits
//!
//! Platform backends (V4L2, AVFoundation, DirectShow) live behind these
//! traits and are external to this workspace; the fake implementations in
//! [`crate::fake`] stand in for them in tests and demos.

use crate::adapter::DeviceClient;
use async_trait::async_trait;
use framecast_core::{CaptureParams, CaptureResult, VideoCaptureFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The capture API a device is reached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceApi {
    /// Video4Linux2
    V4l2,
    /// macOS AVFoundation
    AvFoundation,
    /// Windows DirectShow
    DirectShow,
    /// Synthetic device (tests, demos)
    Virtual,
}

/// Identity of one capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable device identifier; at most one device entry exists per id
    pub device_id: String,
    /// Human-readable name
    pub display_name: String,
    /// Capture API serving the device
    pub api: DeviceApi,
}

impl DeviceDescriptor {
    /// Descriptor for a synthetic device
    pub fn virtual_device(device_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            display_name: display_name.into(),
            api: DeviceApi::Virtual,
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.device_id)
    }
}

/// One capture device instance.
///
/// Runs on its own execution context; all interaction with the rest of the
/// pipeline goes through the [`DeviceClient`] handed to
/// `allocate_and_start`, never through direct controller calls.
#[async_trait]
pub trait VideoCaptureDevice: Send {
    /// Open the device and begin producing frames into `client`
    async fn allocate_and_start(
        &mut self,
        params: &CaptureParams,
        client: DeviceClient,
    ) -> CaptureResult<()>;

    /// Stop producing frames and release device resources
    async fn stop_and_deallocate(&mut self);
}

/// Enumerates devices and creates instances of them
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// List the devices this factory can open
    async fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>>;

    /// Formats a device supports, by id
    async fn supported_formats(&self, device_id: &str) -> CaptureResult<Vec<VideoCaptureFormat>>;

    /// Create an instance of the described device
    async fn create(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> CaptureResult<Box<dyn VideoCaptureDevice>>;
}

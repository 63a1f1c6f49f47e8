//! Synthetic capture device for tests and demos
//!
//! Produces gradient frames at the requested rate on a Tokio interval task.
//! Stands in for the platform backends, which live outside this workspace.

use crate::adapter::DeviceClient;
use crate::backend::{DeviceDescriptor, DeviceFactory, VideoCaptureDevice};
use async_trait::async_trait;
use bytes::BytesMut;
use framecast_core::{
    CaptureError, CaptureParams, CaptureResult, Rotation, VideoCaptureFormat, VideoPixelFormat,
    VideoResolution,
};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Configuration for the fake factory and its devices
#[derive(Debug, Clone)]
pub struct FakeDeviceConfig {
    /// How many synthetic devices to expose
    pub device_count: usize,
    /// Override the frame interval instead of deriving it from the
    /// requested frame rate (tests use a short interval)
    pub frame_interval: Option<Duration>,
    /// Make `allocate_and_start` fail, to exercise error propagation
    pub fail_allocation: bool,
}

impl Default for FakeDeviceConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            frame_interval: None,
            fail_allocation: false,
        }
    }
}

/// Factory exposing a configurable number of synthetic devices
pub struct FakeDeviceFactory {
    config: FakeDeviceConfig,
    descriptors: Vec<DeviceDescriptor>,
}

impl FakeDeviceFactory {
    /// Create a factory from the given configuration
    pub fn new(config: FakeDeviceConfig) -> Self {
        let descriptors = (0..config.device_count)
            .map(|i| {
                DeviceDescriptor::virtual_device(
                    format!("fake-device-{i}"),
                    format!("Fake Camera {i}"),
                )
            })
            .collect();
        Self {
            config,
            descriptors,
        }
    }

    /// Factory with `count` devices and default settings
    pub fn with_device_count(count: usize) -> Self {
        Self::new(FakeDeviceConfig {
            device_count: count,
            ..FakeDeviceConfig::default()
        })
    }
}

impl Default for FakeDeviceFactory {
    fn default() -> Self {
        Self::new(FakeDeviceConfig::default())
    }
}

#[async_trait]
impl DeviceFactory for FakeDeviceFactory {
    async fn enumerate(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        Ok(self.descriptors.clone())
    }

    async fn supported_formats(&self, device_id: &str) -> CaptureResult<Vec<VideoCaptureFormat>> {
        if !self.descriptors.iter().any(|d| d.device_id == device_id) {
            return Err(CaptureError::DeviceNotFound {
                device_id: device_id.to_string(),
            });
        }
        Ok(vec![
            VideoCaptureFormat::new(VideoResolution::VGA, 30.0, VideoPixelFormat::I420),
            VideoCaptureFormat::new(VideoResolution::HD, 30.0, VideoPixelFormat::I420),
        ])
    }

    async fn create(
        &self,
        descriptor: &DeviceDescriptor,
    ) -> CaptureResult<Box<dyn VideoCaptureDevice>> {
        if !self
            .descriptors
            .iter()
            .any(|d| d.device_id == descriptor.device_id)
        {
            return Err(CaptureError::DeviceNotFound {
                device_id: descriptor.device_id.clone(),
            });
        }
        Ok(Box::new(FakeCaptureDevice {
            descriptor: descriptor.clone(),
            frame_interval: self.config.frame_interval,
            fail_allocation: self.config.fail_allocation,
            task: None,
        }))
    }
}

/// Synthetic capture device producing gradient frames on a timer
pub struct FakeCaptureDevice {
    descriptor: DeviceDescriptor,
    frame_interval: Option<Duration>,
    fail_allocation: bool,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl VideoCaptureDevice for FakeCaptureDevice {
    async fn allocate_and_start(
        &mut self,
        params: &CaptureParams,
        client: DeviceClient,
    ) -> CaptureResult<()> {
        if self.fail_allocation {
            return Err(CaptureError::DeviceStartFailed {
                device_id: self.descriptor.device_id.clone(),
                reason: "allocation failure injected".to_string(),
            });
        }
        if self.task.is_some() {
            return Err(CaptureError::DeviceStartFailed {
                device_id: self.descriptor.device_id.clone(),
                reason: "device already started".to_string(),
            });
        }
        params.validate()?;

        let format = params.requested_format;
        let interval = self
            .frame_interval
            .unwrap_or_else(|| Duration::from_secs_f64(1.0 / format.frame_rate));
        debug!(device = %self.descriptor, ?interval, "starting fake capture");

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let size = format.allocation_size();
            let mut sequence: u64 = 0;
            loop {
                ticker.tick().await;
                let mut payload = BytesMut::zeroed(size);
                payload.fill((sequence & 0xff) as u8);
                client.on_incoming_captured_data(
                    &payload,
                    &format,
                    Rotation::Deg0,
                    Instant::now(),
                    started.elapsed(),
                );
                sequence += 1;
            }
        });
        self.task = Some(task);
        Ok(())
    }

    async fn stop_and_deallocate(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(device = %self.descriptor, "fake capture stopped");
        }
    }
}

impl Drop for FakeCaptureDevice {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

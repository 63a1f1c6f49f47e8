//! # framecast-device
//!
//! Device-facing side of the framecast capture pipeline: the capture device
//! and factory traits platform backends implement, the device client
//! adapter that marshals capture-thread callbacks onto the controller's
//! execution context, and a synthetic device for tests and demos.

#![warn(clippy::all)]

pub mod adapter;
pub mod backend;
pub mod fake;

// Re-export main types
pub use adapter::DeviceClient;
pub use backend::{DeviceApi, DeviceDescriptor, DeviceFactory, VideoCaptureDevice};
pub use fake::{FakeCaptureDevice, FakeDeviceConfig, FakeDeviceFactory};

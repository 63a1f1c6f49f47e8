//! # framecast
//!
//! Video capture fan-out for multi-consumer pipelines. One capture device
//! feeds a bounded pool of shared frame buffers; a controller broadcasts
//! every captured frame to any number of registered clients with
//! per-delivery reference counting, dropping frames instead of blocking
//! when the pool is exhausted.
//!
//! ## Key pieces
//!
//! - **[`CaptureManager`]**: session and device lifecycle; pairs each
//!   in-use device with one controller
//! - **[`CaptureController`]**: the fan-out core with its frame buffer pool
//! - **[`CaptureEventHandler`]**: the contract consumers implement to
//!   receive buffer and lifecycle notifications
//! - **[`DeviceClient`]**: the adapter capture backends produce into
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use framecast::{CaptureManager, FakeDeviceFactory, ManagerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = Arc::new(FakeDeviceFactory::default());
//!     let manager = CaptureManager::new(factory, ManagerConfig::default())?;
//!
//!     // Open a session for the first enumerated device.
//!     let device = manager.enumerate_devices().await?.remove(0);
//!     let session = manager.open(device);
//!     let formats = manager.supported_formats(session).await?;
//!     println!("session {session} supports {} formats", formats.len());
//!
//!     manager.close(session);
//!     manager.shutdown().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use framecast_core::{
    BufferHandle, BufferId, BufferMapping, BufferShape, CaptureController, CaptureError,
    CaptureEventHandler, CaptureParams, CaptureResult, CaptureState, ControllerStats, DeviceFeed,
    FrameBufferPool, FrameInfo, FrameMetadata, ProcessHandle, Reservation, Rotation, RouteId,
    SessionId, StorageKind, SyncToken, VideoCaptureFormat, VideoPixelFormat, VideoResolution,
};

pub use framecast_device::{
    DeviceApi, DeviceClient, DeviceDescriptor, DeviceFactory, FakeCaptureDevice, FakeDeviceConfig,
    FakeDeviceFactory, VideoCaptureDevice,
};

// Public API modules
pub mod config;
pub mod event;
pub mod manager;

// Re-export main API types
pub use config::ManagerConfig;
pub use event::{CaptureEvent, EventStream};
pub use manager::CaptureManager;

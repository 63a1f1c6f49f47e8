//! # framecast-core
//!
//! Core of the framecast capture pipeline: the frame buffer pool, the
//! fan-out controller that broadcasts captured frames to registered
//! clients, and the event-handler contract those clients implement.
//!
//! Device-facing code lives in `framecast-device`; session and device
//! lifecycle live in the `framecast` crate.

#![warn(clippy::all)]

pub mod client;
pub mod controller;
pub mod error;
pub mod frame;
pub mod pool;

// Re-export main types
pub use client::CaptureEventHandler;
pub use controller::{CaptureController, CaptureState, ControllerStats, DeviceFeed};
pub use error::{CaptureError, CaptureResult};
pub use frame::{
    BufferId, CaptureParams, FrameInfo, FrameMetadata, ProcessHandle, Rotation, RouteId,
    SessionId, StorageKind, SyncToken, VideoCaptureFormat, VideoPixelFormat, VideoResolution,
};
pub use pool::{BufferHandle, BufferMapping, BufferShape, FrameBufferPool, Reservation};

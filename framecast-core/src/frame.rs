//! Frame, format, and identifier types shared across the capture pipeline

use crate::error::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Identifies one buffer slot within a controller's frame buffer pool.
///
/// Ids are stable while the slot is reserved or known to any client; a
/// retired slot's id is never reused by the same pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-consumer-namespace identifier for a registered client stream.
///
/// Route ids may collide across different consumers; a controller client is
/// keyed by the (route id, handler) pair, not by the route id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(pub u32);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies an opened device-use grant, independent of any particular
/// client registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Sentinel returned by failed lookups ("invalid/not found")
    pub const INVALID: SessionId = SessionId(0);

    /// Whether this id denotes an actual session
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to the consumer process owning a client registration.
/// Recorded for resource accounting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(pub u32);

/// Supported video pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoPixelFormat {
    /// Planar YUV 4:2:0
    I420,
    /// Biplanar YUV 4:2:0
    Nv12,
    /// Packed YUV 4:2:2
    Yuy2,
    /// Packed 24-bit RGB
    Rgb24,
    /// Packed 32-bit ARGB
    Argb,
    /// Motion JPEG, compressed
    Mjpeg,
}

impl VideoPixelFormat {
    /// Bytes per pixel for packed formats; `None` for compressed formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            VideoPixelFormat::I420 | VideoPixelFormat::Nv12 => Some(1),
            VideoPixelFormat::Yuy2 => Some(2),
            VideoPixelFormat::Rgb24 => Some(3),
            VideoPixelFormat::Argb => Some(4),
            VideoPixelFormat::Mjpeg => None,
        }
    }

    /// Whether the format carries compressed payloads
    pub fn is_compressed(&self) -> bool {
        matches!(self, VideoPixelFormat::Mjpeg)
    }

    /// Bytes needed to store one frame at the given resolution.
    ///
    /// Compressed formats use a two-bytes-per-pixel worst case.
    pub fn allocation_size(&self, resolution: VideoResolution) -> usize {
        let pixels = resolution.pixel_count() as usize;
        match self {
            VideoPixelFormat::I420 | VideoPixelFormat::Nv12 => pixels * 3 / 2,
            VideoPixelFormat::Yuy2 => pixels * 2,
            VideoPixelFormat::Rgb24 => pixels * 3,
            VideoPixelFormat::Argb => pixels * 4,
            VideoPixelFormat::Mjpeg => pixels * 2,
        }
    }
}

/// Video resolution information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoResolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl VideoResolution {
    /// Create a new resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 640x480
    pub const VGA: Self = Self::new(640, 480);
    /// 1280x720
    pub const HD: Self = Self::new(1280, 720);
    /// 1920x1080
    pub const FULL_HD: Self = Self::new(1920, 1080);

    /// Total number of pixels
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    /// Width-to-height ratio
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for VideoResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Backing storage kind of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    /// CPU-mappable shared memory
    SharedMemory,
    /// GPU-backed buffer; returns carry a sync token
    GpuMemoryBuffer,
}

/// Frame rotation relative to the sensor's native orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    /// No rotation
    Deg0,
    /// 90 degrees clockwise
    Deg90,
    /// 180 degrees
    Deg180,
    /// 270 degrees clockwise
    Deg270,
}

impl Rotation {
    /// Rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// Opaque GPU fence accompanying buffer returns for GPU-backed storage.
/// Carried through unchanged; fence semantics are a consumer-side concern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncToken(pub u64);

/// Video capture format: resolution, rate, pixel format, and storage kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoCaptureFormat {
    /// Frame resolution
    pub resolution: VideoResolution,
    /// Frames per second
    pub frame_rate: f64,
    /// Pixel format
    pub pixel_format: VideoPixelFormat,
    /// Backing storage kind
    pub storage: StorageKind,
}

impl VideoCaptureFormat {
    /// Create a shared-memory capture format
    pub fn new(resolution: VideoResolution, frame_rate: f64, pixel_format: VideoPixelFormat) -> Self {
        Self {
            resolution,
            frame_rate,
            pixel_format,
            storage: StorageKind::SharedMemory,
        }
    }

    /// Bytes needed to store one frame in this format
    pub fn allocation_size(&self) -> usize {
        self.pixel_format.allocation_size(self.resolution)
    }

    /// Validate the format
    pub fn validate(&self) -> CaptureResult<()> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(CaptureError::InvalidConfiguration {
                message: "Invalid resolution".to_string(),
            });
        }

        if self.frame_rate <= 0.0 || self.frame_rate > 120.0 {
            return Err(CaptureError::InvalidConfiguration {
                message: "Invalid frame rate".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for VideoCaptureFormat {
    fn default() -> Self {
        Self::new(VideoResolution::HD, 30.0, VideoPixelFormat::I420)
    }
}

/// Capture parameters requested by a client at capture start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureParams {
    /// The format the client asks the device for
    pub requested_format: VideoCaptureFormat,
    /// Permit the device to change dimensions mid-capture without restarting
    pub allow_resolution_change: bool,
}

impl CaptureParams {
    /// Validate the parameters
    pub fn validate(&self) -> CaptureResult<()> {
        self.requested_format.validate()
    }
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            requested_format: VideoCaptureFormat::default(),
            allow_resolution_change: false,
        }
    }
}

/// Frame-level metadata delivered alongside every buffer-ready notification
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetadata {
    /// Running maximum of consumer-reported utilization for this frame's
    /// buffer, folded in from prior delivery rounds. `None` until any
    /// consumer has reported.
    pub resource_utilization: Option<f64>,
}

/// Describes one captured frame as delivered to clients
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Format the frame was captured in
    pub format: VideoCaptureFormat,
    /// Rotation to apply at render time
    pub rotation: Rotation,
    /// Capture reference time (system clock at capture)
    pub reference_time: Instant,
    /// Media timestamp relative to capture start
    pub timestamp: Duration,
    /// Frame-level metadata
    pub metadata: FrameMetadata,
}

impl FrameInfo {
    /// Create frame info with empty metadata
    pub fn new(
        format: VideoCaptureFormat,
        rotation: Rotation,
        reference_time: Instant,
        timestamp: Duration,
    ) -> Self {
        Self {
            format,
            rotation,
            reference_time,
            timestamp,
            metadata: FrameMetadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_sizes() {
        let vga = VideoResolution::VGA;
        assert_eq!(
            VideoPixelFormat::I420.allocation_size(vga),
            640 * 480 * 3 / 2
        );
        assert_eq!(VideoPixelFormat::Yuy2.allocation_size(vga), 640 * 480 * 2);
        assert_eq!(VideoPixelFormat::Argb.allocation_size(vga), 640 * 480 * 4);
    }

    #[test]
    fn test_format_validation() {
        let mut format = VideoCaptureFormat::default();
        assert!(format.validate().is_ok());

        format.frame_rate = 0.0;
        assert!(format.validate().is_err());

        format.frame_rate = 30.0;
        format.resolution = VideoResolution::new(0, 720);
        assert!(format.validate().is_err());
    }

    #[test]
    fn test_session_id_sentinel() {
        assert!(!SessionId::INVALID.is_valid());
        assert!(SessionId(1).is_valid());
    }

    #[test]
    fn test_rotation_degrees() {
        assert_eq!(Rotation::Deg0.degrees(), 0);
        assert_eq!(Rotation::Deg270.degrees(), 270);
    }
}

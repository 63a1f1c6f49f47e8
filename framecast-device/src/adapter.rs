//! Device client adapter
//!
//! [`DeviceClient`] implements the capture-device-facing callback contract.
//! It is handed to a device at start and may be called from whatever thread
//! the OS delivers capture callbacks on: every event is posted onto the
//! controller's execution context through its [`DeviceFeed`], never
//! delivered as a direct call.

use framecast_core::{
    BufferHandle, DeviceFeed, FrameBufferPool, FrameInfo, Rotation, StorageKind,
    VideoCaptureFormat, VideoPixelFormat, VideoResolution,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// The producer-side endpoint of the capture pipeline.
///
/// Cheap to clone; clones share the pool, the controller feed, and the
/// dropped-frame counter.
#[derive(Clone, Debug)]
pub struct DeviceClient {
    pool: FrameBufferPool,
    feed: DeviceFeed,
    dropped_frames: Arc<AtomicU64>,
}

impl DeviceClient {
    /// Create an adapter feeding the given controller's pool and event feed
    pub fn new(pool: FrameBufferPool, feed: DeviceFeed) -> Self {
        Self {
            pool,
            feed,
            dropped_frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Copy a raw captured payload into a freshly reserved pool buffer and
    /// forward it as a buffer-backed delivery.
    ///
    /// When the pool is exhausted the frame is dropped silently: no buffer,
    /// no callback. Capture resumes as soon as any client returns a buffer.
    pub fn on_incoming_captured_data(
        &self,
        data: &[u8],
        format: &VideoCaptureFormat,
        rotation: Rotation,
        reference_time: Instant,
        timestamp: Duration,
    ) {
        let reservation =
            self.pool
                .reserve(format.resolution, format.pixel_format, format.storage);
        if let Some(retired) = reservation.retired {
            self.feed.notify_buffer_retired(retired);
        }
        let Some(buffer) = reservation.handle else {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            debug!("buffer pool exhausted; dropping captured frame");
            return;
        };

        {
            let mapping = buffer.mapping();
            let mut dst = mapping.write();
            let n = data.len().min(dst.len());
            dst[..n].copy_from_slice(&data[..n]);
            if data.len() > dst.len() {
                debug!(
                    payload = data.len(),
                    buffer = dst.len(),
                    "captured payload truncated to buffer size"
                );
            }
        }

        self.feed
            .deliver_frame(buffer, FrameInfo::new(*format, rotation, reference_time, timestamp));
    }

    /// Reserve a buffer for the producer to fill directly (zero-copy path).
    /// Returns `None` when the pool is exhausted.
    pub fn reserve_output_buffer(
        &self,
        resolution: VideoResolution,
        pixel_format: VideoPixelFormat,
        storage: StorageKind,
    ) -> Option<BufferHandle> {
        let reservation = self.pool.reserve(resolution, pixel_format, storage);
        if let Some(retired) = reservation.retired {
            self.feed.notify_buffer_retired(retired);
        }
        reservation.handle
    }

    /// Re-reserve the most recently produced buffer to re-deliver or patch
    /// its content without reallocating. See
    /// [`FrameBufferPool::resurrect_last`] for the eligibility rules.
    pub fn resurrect_last_output_buffer(
        &self,
        resolution: VideoResolution,
        pixel_format: VideoPixelFormat,
        storage: StorageKind,
    ) -> Option<BufferHandle> {
        self.pool.resurrect_last(resolution, pixel_format, storage)
    }

    /// Marshal an already-filled buffer to the controller
    pub fn on_incoming_captured_buffer(
        &self,
        buffer: BufferHandle,
        format: VideoCaptureFormat,
        reference_time: Instant,
        timestamp: Duration,
    ) {
        self.feed.deliver_frame(
            buffer,
            FrameInfo::new(format, Rotation::Deg0, reference_time, timestamp),
        );
    }

    /// Marshal an already-filled buffer with full frame info
    pub fn on_incoming_captured_frame(&self, buffer: BufferHandle, info: FrameInfo) {
        self.feed.deliver_frame(buffer, info);
    }

    /// Marshal a fatal device error to the controller
    pub fn on_error(&self, reason: &str) {
        error!("capture device reported error: {reason}");
        self.feed.signal_error(reason.to_string());
    }

    /// Marshal a non-fatal diagnostic string
    pub fn on_log(&self, message: &str) {
        self.feed.log(message.to_string());
    }

    /// Current pool reservation pressure in [0, 1]; producers use this to
    /// throttle capture rate
    pub fn buffer_pool_utilization(&self) -> f64 {
        self.pool.utilization()
    }

    /// Frames dropped so far because the pool was exhausted
    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

//! Client-facing event contract
//!
//! Consumers of a capture controller implement [`CaptureEventHandler`] to
//! receive buffer lifecycle notifications. In a browser-style embedding the
//! implementation forwards these over IPC to a renderer process; in tests it
//! records them.

use crate::frame::{BufferId, FrameInfo, RouteId};
use crate::pool::BufferMapping;

/// Capability interface implemented by frame consumers.
///
/// A controller client registration is keyed by the (route id, handler)
/// pair; handler identity is `Arc` pointer identity, so the same route id
/// may be reused by different handlers and one handler may register several
/// route ids.
///
/// Callbacks are invoked from the controller's execution context, outside
/// its state lock, so an implementation may call back into the controller
/// (the expected response to `on_ended` is requesting removal).
pub trait CaptureEventHandler: Send + Sync {
    /// A buffer this client has not seen before is about to be referenced.
    /// Delivered at most once per (client, buffer id) pair, always before
    /// the first `on_buffer_ready` carrying that id.
    fn on_buffer_created(
        &self,
        route: RouteId,
        buffer_id: BufferId,
        mapping: BufferMapping,
        length: usize,
    );

    /// A previously announced buffer was retired from the pool; the id must
    /// be forgotten.
    fn on_buffer_destroyed(&self, route: RouteId, buffer_id: BufferId);

    /// A captured frame is ready in the given buffer. The client must
    /// eventually return the buffer via the controller or the pool slot is
    /// lost for good.
    fn on_buffer_ready(&self, route: RouteId, buffer_id: BufferId, info: FrameInfo);

    /// The session serving this client was stopped. The handler is expected
    /// to request its own removal in response.
    fn on_ended(&self, route: RouteId);

    /// The capture device failed. Terminal; no further frames will arrive.
    fn on_error(&self, route: RouteId);
}

//! Manager-level capture events

use framecast_core::SessionId;
use tokio::sync::broadcast;
use tracing::warn;

/// Events emitted by a [`crate::CaptureManager`] over its broadcast channel
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// A session was opened for a device
    SessionOpened {
        /// The new session id
        session: SessionId,
    },
    /// A session was closed
    SessionClosed {
        /// The closed session id
        session: SessionId,
    },
    /// A capture device started producing
    DeviceStarted {
        /// Device identifier
        device_id: String,
    },
    /// A capture device stopped
    DeviceStopped {
        /// Device identifier
        device_id: String,
    },
    /// A capture device failed to start or reported a fatal error
    CaptureError {
        /// Device identifier
        device_id: String,
        /// Failure description
        reason: String,
    },
}

impl CaptureEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            CaptureEvent::SessionOpened { .. } => "session_opened",
            CaptureEvent::SessionClosed { .. } => "session_closed",
            CaptureEvent::DeviceStarted { .. } => "device_started",
            CaptureEvent::DeviceStopped { .. } => "device_stopped",
            CaptureEvent::CaptureError { .. } => "capture_error",
        }
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, CaptureEvent::CaptureError { .. })
    }
}

/// Stream of manager events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: broadcast::Receiver<CaptureEvent>,
}

impl EventStream {
    pub(crate) fn new(receiver: broadcast::Receiver<CaptureEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream. Returns `None` once the manager
    /// is gone. A slow reader that lags behind skips the missed events.
    pub async fn next(&mut self) -> Option<CaptureEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged; skipping missed events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Option<CaptureEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged; skipping missed events");
                }
                Err(_) => return None,
            }
        }
    }
}

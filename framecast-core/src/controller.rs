//! Capture fan-out controller
//!
//! The controller sits between one capture device and any number of
//! registered clients. It owns the frame buffer pool and the client list,
//! tracks device state, and fans every captured frame out to all active
//! clients with per-delivery reference counting. Backpressure is handled
//! upstream: a starved pool means the producer drops the frame before it
//! ever reaches the controller.
//!
//! All state mutation is serialized on one logical execution context:
//! device-side events are drained in order by a single pump task, and
//! public methods lock the same state. Handler callbacks run outside the
//! lock so they may re-enter the controller.

use crate::client::CaptureEventHandler;
use crate::frame::{
    BufferId, CaptureParams, FrameInfo, ProcessHandle, RouteId, SessionId, SyncToken,
    VideoCaptureFormat,
};
use crate::pool::{BufferHandle, BufferMapping, FrameBufferPool};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Externally observable controller state. `Error` is absorbing: once
/// entered, no further frames reach any client until the controller is
/// destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Delivering frames (or waiting for the device to produce any)
    Started,
    /// The device failed; the controller must be torn down and recreated
    Error,
}

/// Aggregate delivery counters
#[derive(Debug, Clone, Copy, Default)]
pub struct ControllerStats {
    /// Frames fanned out to at least one client
    pub frames_delivered: u64,
    /// Frames dropped (error state, or no active client)
    pub frames_dropped: u64,
    /// Currently registered clients
    pub client_count: usize,
}

/// One registration of a consumer
struct ControllerClient {
    route: RouteId,
    handler: Arc<dyn CaptureEventHandler>,
    process: ProcessHandle,
    session: SessionId,
    params: CaptureParams,
    /// Buffer ids this client has been told about via `on_buffer_created`
    known_buffers: HashSet<BufferId>,
    /// One pool reference per undelivered `return_buffer`, keyed by id
    leased: HashMap<BufferId, Vec<BufferHandle>>,
    paused: bool,
    session_closed: bool,
}

struct Inner {
    state: CaptureState,
    clients: Vec<ControllerClient>,
    /// Running maximum of consumer-reported utilization per buffer id
    consumer_feedback: HashMap<BufferId, f64>,
    /// Format observed on the most recent delivery
    current_format: Option<VideoCaptureFormat>,
    frames_delivered: u64,
    frames_dropped: u64,
}

/// Events marshaled onto the controller's execution context
enum ControllerEvent {
    Frame {
        buffer: BufferHandle,
        info: FrameInfo,
    },
    BufferRetired(BufferId),
    Error {
        reason: String,
    },
    Log(String),
    NotifyEnded {
        route: RouteId,
        handler: Arc<dyn CaptureEventHandler>,
    },
    NotifyError {
        route: RouteId,
        handler: Arc<dyn CaptureEventHandler>,
    },
}

/// A handler callback prepared under the state lock, run after it drops
enum Dispatch {
    Created {
        handler: Arc<dyn CaptureEventHandler>,
        route: RouteId,
        id: BufferId,
        mapping: BufferMapping,
        length: usize,
    },
    Ready {
        handler: Arc<dyn CaptureEventHandler>,
        route: RouteId,
        id: BufferId,
        info: FrameInfo,
    },
    Destroyed {
        handler: Arc<dyn CaptureEventHandler>,
        route: RouteId,
        id: BufferId,
    },
    Ended {
        handler: Arc<dyn CaptureEventHandler>,
        route: RouteId,
    },
    Error {
        handler: Arc<dyn CaptureEventHandler>,
        route: RouteId,
    },
}

impl Dispatch {
    fn run(self) {
        match self {
            Dispatch::Created {
                handler,
                route,
                id,
                mapping,
                length,
            } => handler.on_buffer_created(route, id, mapping, length),
            Dispatch::Ready {
                handler,
                route,
                id,
                info,
            } => handler.on_buffer_ready(route, id, info),
            Dispatch::Destroyed { handler, route, id } => handler.on_buffer_destroyed(route, id),
            Dispatch::Ended { handler, route } => handler.on_ended(route),
            Dispatch::Error { handler, route } => handler.on_error(route),
        }
    }
}

/// Device-side endpoint for posting events onto the controller's execution
/// context. Cheap to clone; safe to use from any capture thread. The device
/// client adapter holds one of these and never calls the controller
/// directly.
#[derive(Clone)]
pub struct DeviceFeed {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl DeviceFeed {
    /// Marshal a filled buffer to the controller for fan-out
    pub fn deliver_frame(&self, buffer: BufferHandle, info: FrameInfo) {
        if self.tx.send(ControllerEvent::Frame { buffer, info }).is_err() {
            debug!("controller gone; frame dropped");
        }
    }

    /// Tell the controller a pool slot was retired so clients can forget it
    pub fn notify_buffer_retired(&self, id: BufferId) {
        let _ = self.tx.send(ControllerEvent::BufferRetired(id));
    }

    /// Marshal a fatal device error; transitions the controller to `Error`
    pub fn signal_error(&self, reason: String) {
        let _ = self.tx.send(ControllerEvent::Error { reason });
    }

    /// Marshal a non-fatal diagnostic string
    pub fn log(&self, message: String) {
        let _ = self.tx.send(ControllerEvent::Log(message));
    }
}

impl fmt::Debug for DeviceFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceFeed").finish()
    }
}

/// The fan-out core: owns the buffer pool and the client list.
///
/// Must be created within a Tokio runtime; the pump task draining device
/// events is aborted when the controller drops.
pub struct CaptureController {
    inner: Arc<Mutex<Inner>>,
    pool: FrameBufferPool,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
    pump: JoinHandle<()>,
}

impl CaptureController {
    /// Create a controller owning the given pool
    pub fn new(pool: FrameBufferPool) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(Inner {
            state: CaptureState::Started,
            clients: Vec::new(),
            consumer_feedback: HashMap::new(),
            current_format: None,
            frames_delivered: 0,
            frames_dropped: 0,
        }));
        let pump = tokio::spawn(Self::pump(inner.clone(), event_rx));
        Self {
            inner,
            pool,
            event_tx,
            pump,
        }
    }

    /// The pool this controller owns; the device client adapter reserves
    /// from a clone of this
    pub fn pool(&self) -> FrameBufferPool {
        self.pool.clone()
    }

    /// The endpoint the device client adapter posts events through
    pub fn device_feed(&self) -> DeviceFeed {
        DeviceFeed {
            tx: self.event_tx.clone(),
        }
    }

    /// Register a client. Duplicate (route, handler) pairs are ignored.
    ///
    /// When the controller is already in the error state the client is
    /// still registered, and an error notification is queued through the
    /// pump instead of being delivered reentrantly.
    pub fn add_client(
        &self,
        route: RouteId,
        handler: Arc<dyn CaptureEventHandler>,
        process: ProcessHandle,
        session: SessionId,
        params: CaptureParams,
    ) {
        let mut inner = self.inner.lock();
        if Self::position_of(&inner.clients, route, &handler).is_some() {
            warn!(%route, %session, "ignoring duplicate client registration");
            return;
        }
        info!(%route, %session, "adding controller client");
        let errored = inner.state == CaptureState::Error;
        inner.clients.push(ControllerClient {
            route,
            handler: handler.clone(),
            process,
            session,
            params,
            known_buffers: HashSet::new(),
            leased: HashMap::new(),
            paused: false,
            session_closed: false,
        });
        drop(inner);

        if errored {
            let _ = self
                .event_tx
                .send(ControllerEvent::NotifyError { route, handler });
        }
    }

    /// Remove the matching client and return its session id, or
    /// [`SessionId::INVALID`] when no such registration exists.
    ///
    /// Buffers still leased to the client are released back to the pool.
    /// Synchronous: after this returns, no further notifications are queued
    /// for the client.
    pub fn remove_client(
        &self,
        route: RouteId,
        handler: &Arc<dyn CaptureEventHandler>,
    ) -> SessionId {
        let mut inner = self.inner.lock();
        let Some(i) = Self::position_of(&inner.clients, route, handler) else {
            return SessionId::INVALID;
        };
        let client = inner.clients.swap_remove(i);
        info!(%route, session = %client.session, "removing controller client");
        // Leased handles drop here, releasing the client's pool references.
        client.session
    }

    /// Queue an `on_ended` notification for every still-registered client of
    /// the session and stop delivering frames to them. The handlers are
    /// expected to request removal; an unknown session id is a no-op.
    pub fn stop_session(&self, session: SessionId) {
        let mut inner = self.inner.lock();
        let mut to_notify = Vec::new();
        for client in inner.clients.iter_mut() {
            if client.session == session && !client.session_closed {
                client.session_closed = true;
                to_notify.push((client.route, client.handler.clone()));
            }
        }
        drop(inner);

        for (route, handler) in to_notify {
            debug!(%route, %session, "stopping session for client");
            let _ = self
                .event_tx
                .send(ControllerEvent::NotifyEnded { route, handler });
        }
    }

    /// Suspend frame delivery to a client without removing its
    /// registration. Returns false when the client is not found.
    pub fn pause_client(&self, route: RouteId, handler: &Arc<dyn CaptureEventHandler>) -> bool {
        let mut inner = self.inner.lock();
        let Some(i) = Self::position_of(&inner.clients, route, handler) else {
            return false;
        };
        inner.clients[i].paused = true;
        true
    }

    /// Resume frame delivery to a paused client. Returns false when the
    /// client is not found.
    pub fn resume_client(&self, route: RouteId, handler: &Arc<dyn CaptureEventHandler>) -> bool {
        let mut inner = self.inner.lock();
        let Some(i) = Self::position_of(&inner.clients, route, handler) else {
            return false;
        };
        inner.clients[i].paused = false;
        true
    }

    /// The client is done reading a previously delivered buffer.
    ///
    /// Releases one of the client's references on the buffer. A
    /// non-negative `consumer_utilization` is folded into the running
    /// maximum attached to subsequent deliveries of the buffer.
    pub fn return_buffer(
        &self,
        route: RouteId,
        handler: &Arc<dyn CaptureEventHandler>,
        buffer_id: BufferId,
        sync_token: SyncToken,
        consumer_utilization: Option<f64>,
    ) {
        let mut inner = self.inner.lock();
        let Some(i) = Self::position_of(&inner.clients, route, handler) else {
            warn!(%route, %buffer_id, "buffer returned by unknown client");
            return;
        };
        let client = &mut inner.clients[i];
        let released = match client.leased.get_mut(&buffer_id) {
            Some(handles) if !handles.is_empty() => {
                handles.pop();
                if handles.is_empty() {
                    client.leased.remove(&buffer_id);
                }
                true
            }
            _ => {
                warn!(%route, %buffer_id, "client returned a buffer it does not hold");
                false
            }
        };
        if !released {
            return;
        }
        if sync_token != SyncToken::default() {
            debug!(%buffer_id, token = sync_token.0, "buffer returned with sync token");
        }
        if let Some(utilization) = consumer_utilization.filter(|u| *u >= 0.0) {
            let entry = inner
                .consumer_feedback
                .entry(buffer_id)
                .or_insert(utilization);
            if *entry < utilization {
                *entry = utilization;
            }
        }
    }

    /// Number of registered clients, including paused and session-closed
    /// ones
    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    /// Whether any client is currently eligible for deliveries
    pub fn has_active_client(&self) -> bool {
        self.inner
            .lock()
            .clients
            .iter()
            .any(|c| !c.paused && !c.session_closed)
    }

    /// Whether any client is paused
    pub fn has_paused_client(&self) -> bool {
        self.inner.lock().clients.iter().any(|c| c.paused)
    }

    /// Current controller state
    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    /// Format observed on the most recent delivery, if any
    pub fn capture_format(&self) -> Option<VideoCaptureFormat> {
        self.inner.lock().current_format
    }

    /// Worst-case consumer utilization reported for a buffer so far
    pub fn consumer_feedback(&self, buffer_id: BufferId) -> Option<f64> {
        self.inner.lock().consumer_feedback.get(&buffer_id).copied()
    }

    /// Delivery counters
    pub fn stats(&self) -> ControllerStats {
        let inner = self.inner.lock();
        ControllerStats {
            frames_delivered: inner.frames_delivered,
            frames_dropped: inner.frames_dropped,
            client_count: inner.clients.len(),
        }
    }

    /// Capture parameters a client registered with, if it is registered
    pub fn client_params(
        &self,
        route: RouteId,
        handler: &Arc<dyn CaptureEventHandler>,
    ) -> Option<CaptureParams> {
        let inner = self.inner.lock();
        Self::position_of(&inner.clients, route, handler).map(|i| inner.clients[i].params)
    }

    /// Process handle a client registered with, if it is registered
    pub fn client_process(
        &self,
        route: RouteId,
        handler: &Arc<dyn CaptureEventHandler>,
    ) -> Option<ProcessHandle> {
        let inner = self.inner.lock();
        Self::position_of(&inner.clients, route, handler).map(|i| inner.clients[i].process)
    }

    fn position_of(
        clients: &[ControllerClient],
        route: RouteId,
        handler: &Arc<dyn CaptureEventHandler>,
    ) -> Option<usize> {
        clients
            .iter()
            .position(|c| c.route == route && Arc::ptr_eq(&c.handler, handler))
    }

    /// Single consumer of device-side events: the controller's logical
    /// execution context. Events are processed strictly in arrival order,
    /// which gives every client production-order (FIFO) delivery.
    async fn pump(inner: Arc<Mutex<Inner>>, mut rx: mpsc::UnboundedReceiver<ControllerEvent>) {
        while let Some(event) = rx.recv().await {
            let dispatches = match event {
                ControllerEvent::Frame { buffer, info } => {
                    Self::process_frame(&inner, buffer, info)
                }
                ControllerEvent::BufferRetired(id) => Self::process_retired(&inner, id),
                ControllerEvent::Error { reason } => Self::process_error(&inner, &reason),
                ControllerEvent::Log(message) => {
                    info!("capture device: {message}");
                    Vec::new()
                }
                ControllerEvent::NotifyEnded { route, handler } => {
                    Self::process_deferred(&inner, route, handler, false)
                }
                ControllerEvent::NotifyError { route, handler } => {
                    Self::process_deferred(&inner, route, handler, true)
                }
            };
            for dispatch in dispatches {
                dispatch.run();
            }
        }
    }

    /// The fan-out step. The producer's reference drops when `buffer` goes
    /// out of scope; the frame stays alive through the per-client clones
    /// stored in each lease table.
    fn process_frame(inner: &Mutex<Inner>, buffer: BufferHandle, info: FrameInfo) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        let mut guard = inner.lock();
        if guard.state == CaptureState::Error {
            guard.frames_dropped += 1;
            return dispatches;
        }
        guard.current_format = Some(info.format);

        let id = buffer.id();
        let feedback = guard.consumer_feedback.get(&id).copied();
        let mut delivered = false;
        for client in guard.clients.iter_mut() {
            if client.paused || client.session_closed {
                continue;
            }
            if client.known_buffers.insert(id) {
                dispatches.push(Dispatch::Created {
                    handler: client.handler.clone(),
                    route: client.route,
                    id,
                    mapping: buffer.mapping(),
                    length: buffer.byte_size(),
                });
            }
            let mut client_info = info;
            client_info.metadata.resource_utilization = feedback;
            dispatches.push(Dispatch::Ready {
                handler: client.handler.clone(),
                route: client.route,
                id,
                info: client_info,
            });
            client.leased.entry(id).or_default().push(buffer.clone());
            delivered = true;
        }
        if delivered {
            guard.frames_delivered += 1;
        } else {
            guard.frames_dropped += 1;
        }
        dispatches
    }

    fn process_retired(inner: &Mutex<Inner>, id: BufferId) -> Vec<Dispatch> {
        let mut guard = inner.lock();
        guard.consumer_feedback.remove(&id);
        let mut dispatches = Vec::new();
        for client in guard.clients.iter_mut() {
            if client.known_buffers.remove(&id) {
                dispatches.push(Dispatch::Destroyed {
                    handler: client.handler.clone(),
                    route: client.route,
                    id,
                });
            }
        }
        dispatches
    }

    fn process_error(inner: &Mutex<Inner>, reason: &str) -> Vec<Dispatch> {
        let mut guard = inner.lock();
        if guard.state == CaptureState::Error {
            return Vec::new();
        }
        warn!("capture device error: {reason}");
        guard.state = CaptureState::Error;
        guard
            .clients
            .iter()
            .filter(|c| !c.paused)
            .map(|c| Dispatch::Error {
                handler: c.handler.clone(),
                route: c.route,
            })
            .collect()
    }

    /// Deliver a deferred per-client notification, provided the client is
    /// still registered by the time the pump drains it.
    fn process_deferred(
        inner: &Mutex<Inner>,
        route: RouteId,
        handler: Arc<dyn CaptureEventHandler>,
        error: bool,
    ) -> Vec<Dispatch> {
        let guard = inner.lock();
        if Self::position_of(&guard.clients, route, &handler).is_none() {
            return Vec::new();
        }
        let dispatch = if error {
            Dispatch::Error { handler, route }
        } else {
            Dispatch::Ended { handler, route }
        };
        vec![dispatch]
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

impl fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CaptureController")
            .field("state", &inner.state)
            .field("clients", &inner.clients.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{StorageKind, VideoPixelFormat, VideoResolution};

    struct NullHandler;

    impl CaptureEventHandler for NullHandler {
        fn on_buffer_created(&self, _: RouteId, _: BufferId, _: BufferMapping, _: usize) {}
        fn on_buffer_destroyed(&self, _: RouteId, _: BufferId) {}
        fn on_buffer_ready(&self, _: RouteId, _: BufferId, _: FrameInfo) {}
        fn on_ended(&self, _: RouteId) {}
        fn on_error(&self, _: RouteId) {}
    }

    fn handler() -> Arc<dyn CaptureEventHandler> {
        Arc::new(NullHandler)
    }

    #[tokio::test]
    async fn test_client_registration_queries() {
        let controller = CaptureController::new(FrameBufferPool::new(2));
        let a = handler();
        let b = handler();

        controller.add_client(
            RouteId(1),
            a.clone(),
            ProcessHandle(10),
            SessionId(100),
            CaptureParams::default(),
        );
        controller.add_client(
            RouteId(1),
            b.clone(),
            ProcessHandle(10),
            SessionId(300),
            CaptureParams::default(),
        );

        assert_eq!(controller.client_count(), 2);
        assert!(controller.has_active_client());
        assert!(!controller.has_paused_client());

        assert!(controller.pause_client(RouteId(1), &a));
        assert!(controller.has_paused_client());
        assert!(controller.has_active_client()); // b is still active

        assert!(controller.resume_client(RouteId(1), &a));
        assert!(!controller.has_paused_client());
        assert!(!controller.resume_client(RouteId(9), &a));
    }

    #[tokio::test]
    async fn test_duplicate_registration_ignored() {
        let controller = CaptureController::new(FrameBufferPool::new(2));
        let a = handler();

        controller.add_client(
            RouteId(1),
            a.clone(),
            ProcessHandle(1),
            SessionId(5),
            CaptureParams::default(),
        );
        controller.add_client(
            RouteId(1),
            a.clone(),
            ProcessHandle(1),
            SessionId(5),
            CaptureParams::default(),
        );
        assert_eq!(controller.client_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_client_is_idempotent() {
        let controller = CaptureController::new(FrameBufferPool::new(2));
        let a = handler();

        controller.add_client(
            RouteId(1),
            a.clone(),
            ProcessHandle(1),
            SessionId(100),
            CaptureParams::default(),
        );
        assert_eq!(controller.remove_client(RouteId(1), &a), SessionId(100));
        assert_eq!(controller.remove_client(RouteId(1), &a), SessionId::INVALID);
    }

    #[tokio::test]
    async fn test_removal_releases_leases() {
        let controller = CaptureController::new(FrameBufferPool::new(1));
        let pool = controller.pool();
        let a = handler();
        controller.add_client(
            RouteId(1),
            a.clone(),
            ProcessHandle(1),
            SessionId(100),
            CaptureParams::default(),
        );

        let reservation = pool.reserve(
            VideoResolution::VGA,
            VideoPixelFormat::I420,
            StorageKind::SharedMemory,
        );
        let buffer = reservation.handle.expect("reserve");
        let info = FrameInfo::new(
            VideoCaptureFormat::default(),
            crate::frame::Rotation::Deg0,
            std::time::Instant::now(),
            std::time::Duration::ZERO,
        );
        controller.device_feed().deliver_frame(buffer, info);

        // Wait for the pump to lease the buffer to the client.
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                if pool.reserved_count() == 1 && controller.stats().frames_delivered == 1 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("frame delivered");

        controller.remove_client(RouteId(1), &a);
        assert_eq!(pool.reserved_count(), 0);
    }
}

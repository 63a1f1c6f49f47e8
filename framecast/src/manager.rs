//! Capture manager: session and device lifecycle
//!
//! One level above the controller. The manager maps session ids to device
//! descriptors, pairs each in-use device with exactly one controller, and
//! runs device start/stop on a dedicated per-device task so that a
//! stop-then-start pair targeting the same physical device can never
//! overlap. The registry is an owned object with explicit construction and
//! [`CaptureManager::shutdown`]; there are no process-wide singletons.

use crate::config::ManagerConfig;
use crate::event::{CaptureEvent, EventStream};
use framecast_core::{
    CaptureController, CaptureError, CaptureEventHandler, CaptureParams, CaptureResult,
    FrameBufferPool, ProcessHandle, RouteId, SessionId, VideoCaptureFormat,
};
use framecast_device::{DeviceClient, DeviceDescriptor, DeviceFactory, VideoCaptureDevice};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Commands processed sequentially by a device's task
enum DeviceCommand {
    Start {
        params: CaptureParams,
        client: DeviceClient,
        done: Option<oneshot::Sender<CaptureResult<()>>>,
    },
    Stop {
        done: Option<oneshot::Sender<()>>,
    },
}

/// Pairs one capture device instance with one controller
struct DeviceEntry {
    descriptor: DeviceDescriptor,
    controller: Arc<CaptureController>,
    commands: mpsc::UnboundedSender<DeviceCommand>,
}

struct ManagerInner {
    next_session: u32,
    sessions: HashMap<SessionId, DeviceDescriptor>,
    devices: HashMap<String, DeviceEntry>,
    shutting_down: bool,
}

/// Session and device lifecycle manager.
///
/// Must be used within a Tokio runtime: controllers and per-device tasks
/// are spawned on the ambient runtime.
pub struct CaptureManager {
    factory: Arc<dyn DeviceFactory>,
    config: ManagerConfig,
    inner: Mutex<ManagerInner>,
    event_tx: broadcast::Sender<CaptureEvent>,
}

impl CaptureManager {
    /// Create a manager that opens devices through the given factory
    pub fn new(factory: Arc<dyn DeviceFactory>, config: ManagerConfig) -> CaptureResult<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            factory,
            config,
            inner: Mutex::new(ManagerInner {
                next_session: 1,
                sessions: HashMap::new(),
                devices: HashMap::new(),
                shutting_down: false,
            }),
            event_tx,
        })
    }

    /// Subscribe to manager events
    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_tx.subscribe())
    }

    /// List the devices the factory can open
    pub async fn enumerate_devices(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        self.factory.enumerate().await
    }

    /// Open a session for the described device. Records the grant without
    /// starting anything; returns [`SessionId::INVALID`] during shutdown.
    pub fn open(&self, descriptor: DeviceDescriptor) -> SessionId {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return SessionId::INVALID;
        }
        let session = SessionId(inner.next_session);
        inner.next_session += 1;
        inner.sessions.insert(session, descriptor.clone());
        drop(inner);

        info!(%session, device = %descriptor, "opened capture session");
        let _ = self.event_tx.send(CaptureEvent::SessionOpened { session });
        session
    }

    /// Invalidate a session. Clients of the session are asked to end
    /// themselves via their handlers; the device entry is torn down once its
    /// controller reports zero clients. Unknown ids are a no-op.
    pub fn close(&self, session: SessionId) {
        let descriptor = self.inner.lock().sessions.remove(&session);
        let Some(descriptor) = descriptor else {
            debug!(%session, "close of unknown session ignored");
            return;
        };

        let controller = self
            .inner
            .lock()
            .devices
            .get(&descriptor.device_id)
            .map(|entry| entry.controller.clone());
        if let Some(controller) = controller {
            controller.stop_session(session);
            if controller.client_count() == 0 {
                self.release_device(&descriptor.device_id);
            }
        }

        info!(%session, "closed capture session");
        let _ = self.event_tx.send(CaptureEvent::SessionClosed { session });
    }

    /// Begin capture for a client of an open session.
    ///
    /// Resolves the session to its device, creating the device entry (and
    /// asynchronously starting the physical device on its own task) when
    /// this is the first client, then registers the client with the
    /// controller. Start failures surface through the controller's error
    /// path like any runtime device error.
    pub fn start_capture_for_client(
        &self,
        session: SessionId,
        params: CaptureParams,
        process: ProcessHandle,
        route: RouteId,
        handler: Arc<dyn CaptureEventHandler>,
    ) -> CaptureResult<Arc<CaptureController>> {
        params.validate()?;

        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return Err(CaptureError::ShuttingDown);
        }
        let descriptor = inner
            .sessions
            .get(&session)
            .cloned()
            .ok_or(CaptureError::SessionNotFound { session })?;

        if !inner.devices.contains_key(&descriptor.device_id) {
            let pool = FrameBufferPool::new(self.config.max_buffers_per_device);
            let controller = Arc::new(CaptureController::new(pool));
            let client = DeviceClient::new(controller.pool(), controller.device_feed());

            let (commands, command_rx) = mpsc::unbounded_channel();
            tokio::spawn(device_loop(
                descriptor.clone(),
                self.factory.clone(),
                command_rx,
                self.event_tx.clone(),
            ));
            let _ = commands.send(DeviceCommand::Start {
                params,
                client,
                done: None,
            });

            inner.devices.insert(
                descriptor.device_id.clone(),
                DeviceEntry {
                    descriptor: descriptor.clone(),
                    controller,
                    commands,
                },
            );
        }

        let entry = inner
            .devices
            .get(&descriptor.device_id)
            .ok_or(CaptureError::DeviceNotFound {
                device_id: descriptor.device_id.clone(),
            })?;
        entry
            .controller
            .add_client(route, handler, process, session, params);
        Ok(entry.controller.clone())
    }

    /// End capture for a client. Returns the client's session id, or
    /// [`SessionId::INVALID`] when the registration was not found. The
    /// device entry is torn down asynchronously once no clients remain.
    pub fn stop_capture_for_client(
        &self,
        controller: &Arc<CaptureController>,
        route: RouteId,
        handler: &Arc<dyn CaptureEventHandler>,
        aborted_due_to_error: bool,
    ) -> SessionId {
        let session = controller.remove_client(route, handler);
        if !session.is_valid() {
            debug!(%route, "stop for unknown capture client");
        } else if aborted_due_to_error {
            warn!(%route, %session, "capture client stopped due to device error");
        }

        if controller.client_count() == 0 {
            self.release_device_of(controller);
        }
        session
    }

    /// Formats the session's device supports
    pub async fn supported_formats(
        &self,
        session: SessionId,
    ) -> CaptureResult<Vec<VideoCaptureFormat>> {
        let descriptor = self
            .inner
            .lock()
            .sessions
            .get(&session)
            .cloned()
            .ok_or(CaptureError::SessionNotFound { session })?;
        self.factory.supported_formats(&descriptor.device_id).await
    }

    /// Format currently in use by the session's device, observed from its
    /// most recent delivery. Empty when the device is not running or has not
    /// yet delivered.
    pub fn formats_in_use(&self, session: SessionId) -> CaptureResult<Vec<VideoCaptureFormat>> {
        let inner = self.inner.lock();
        let descriptor = inner
            .sessions
            .get(&session)
            .ok_or(CaptureError::SessionNotFound { session })?;
        Ok(inner
            .devices
            .get(&descriptor.device_id)
            .and_then(|entry| entry.controller.capture_format())
            .into_iter()
            .collect())
    }

    /// Number of currently open sessions
    pub fn open_session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Number of devices currently paired with a controller
    pub fn active_device_count(&self) -> usize {
        self.inner.lock().devices.len()
    }

    /// Tear everything down: close all sessions and stop every device,
    /// waiting for the device tasks to finish their stops.
    pub async fn shutdown(&self) {
        let entries: Vec<DeviceEntry> = {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            inner.sessions.clear();
            inner.devices.drain().map(|(_, entry)| entry).collect()
        };

        let mut waits = Vec::new();
        for entry in &entries {
            let (done, wait) = oneshot::channel();
            if entry
                .commands
                .send(DeviceCommand::Stop { done: Some(done) })
                .is_ok()
            {
                waits.push(wait);
            }
        }
        // Dropping the entries closes the command channels so the device
        // tasks exit after processing the stop.
        drop(entries);
        for result in futures::future::join_all(waits).await {
            let _ = result;
        }
        info!("capture manager shut down");
    }

    /// Remove the device entry owning `controller` and queue its stop
    fn release_device_of(&self, controller: &Arc<CaptureController>) {
        let mut inner = self.inner.lock();
        let device_id = inner
            .devices
            .iter()
            .find(|(_, entry)| Arc::ptr_eq(&entry.controller, controller))
            .map(|(id, _)| id.clone());
        drop(inner);
        if let Some(device_id) = device_id {
            self.release_device(&device_id);
        }
    }

    fn release_device(&self, device_id: &str) {
        let entry = self.inner.lock().devices.remove(device_id);
        if let Some(entry) = entry {
            debug!(device = %entry.descriptor, "last client gone; stopping device");
            let _ = entry.commands.send(DeviceCommand::Stop { done: None });
            // Dropping the entry closes the command channel; the device
            // task exits after the stop.
        }
    }
}

impl std::fmt::Debug for CaptureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CaptureManager")
            .field("sessions", &inner.sessions.len())
            .field("devices", &inner.devices.len())
            .finish()
    }
}

/// Per-device execution context. Commands are processed strictly in order,
/// so start and stop targeting the same device never overlap.
async fn device_loop(
    descriptor: DeviceDescriptor,
    factory: Arc<dyn DeviceFactory>,
    mut commands: mpsc::UnboundedReceiver<DeviceCommand>,
    events: broadcast::Sender<CaptureEvent>,
) {
    let mut device: Option<Box<dyn VideoCaptureDevice>> = None;

    while let Some(command) = commands.recv().await {
        match command {
            DeviceCommand::Start {
                params,
                client,
                done,
            } => {
                let result =
                    start_device(&mut device, factory.as_ref(), &descriptor, &params, &client)
                        .await;
                match &result {
                    Ok(()) => {
                        debug!(device = %descriptor, "capture device started");
                        let _ = events.send(CaptureEvent::DeviceStarted {
                            device_id: descriptor.device_id.clone(),
                        });
                    }
                    Err(error) => {
                        warn!(device = %descriptor, %error, "capture device failed to start");
                        client.on_error(&error.to_string());
                        let _ = events.send(CaptureEvent::CaptureError {
                            device_id: descriptor.device_id.clone(),
                            reason: error.to_string(),
                        });
                    }
                }
                if let Some(done) = done {
                    let _ = done.send(result);
                }
            }
            DeviceCommand::Stop { done } => {
                if let Some(mut active) = device.take() {
                    active.stop_and_deallocate().await;
                    let _ = events.send(CaptureEvent::DeviceStopped {
                        device_id: descriptor.device_id.clone(),
                    });
                }
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
        }
    }

    // Command channel closed with the device still running: final stop.
    if let Some(mut active) = device.take() {
        active.stop_and_deallocate().await;
        let _ = events.send(CaptureEvent::DeviceStopped {
            device_id: descriptor.device_id.clone(),
        });
    }
}

async fn start_device(
    slot: &mut Option<Box<dyn VideoCaptureDevice>>,
    factory: &dyn DeviceFactory,
    descriptor: &DeviceDescriptor,
    params: &CaptureParams,
    client: &DeviceClient,
) -> CaptureResult<()> {
    if slot.is_none() {
        *slot = Some(factory.create(descriptor).await?);
    }
    match slot.as_mut() {
        Some(device) => device.allocate_and_start(params, client.clone()).await,
        None => Err(CaptureError::DeviceStartFailed {
            device_id: descriptor.device_id.clone(),
            reason: "device construction failed".to_string(),
        }),
    }
}

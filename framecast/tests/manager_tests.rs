//! End-to-end tests for the capture manager
//!
//! Drives the full pipeline against the fake device factory: session
//! lifecycle, device start/stop sequencing, fan-out to multiple clients,
//! buffer recycling through returns, and error propagation.

use framecast::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
enum Note {
    Created(BufferId),
    Ready(BufferId),
    Ended,
    Error,
}

struct RecordingHandler {
    tx: mpsc::UnboundedSender<Note>,
}

impl RecordingHandler {
    fn create() -> (Arc<dyn CaptureEventHandler>, mpsc::UnboundedReceiver<Note>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl CaptureEventHandler for RecordingHandler {
    fn on_buffer_created(&self, _route: RouteId, id: BufferId, _mapping: BufferMapping, _length: usize) {
        let _ = self.tx.send(Note::Created(id));
    }

    fn on_buffer_destroyed(&self, _route: RouteId, _id: BufferId) {}

    fn on_buffer_ready(&self, _route: RouteId, id: BufferId, _info: FrameInfo) {
        let _ = self.tx.send(Note::Ready(id));
    }

    fn on_ended(&self, _route: RouteId) {
        let _ = self.tx.send(Note::Ended);
    }

    fn on_error(&self, _route: RouteId) {
        let _ = self.tx.send(Note::Error);
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Note>) -> Note {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("notification channel closed")
}

async fn await_event(stream: &mut EventStream, event_type: &str) -> CaptureEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match stream.next().await {
                Some(event) if event.event_type() == event_type => return event,
                Some(_) => continue,
                None => panic!("event stream closed waiting for {event_type}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn fast_factory() -> Arc<FakeDeviceFactory> {
    Arc::new(FakeDeviceFactory::new(FakeDeviceConfig {
        frame_interval: Some(Duration::from_millis(1)),
        ..FakeDeviceConfig::default()
    }))
}

async fn open_first_device(manager: &CaptureManager) -> SessionId {
    let descriptor = manager
        .enumerate_devices()
        .await
        .expect("enumerate")
        .remove(0);
    manager.open(descriptor)
}

#[tokio::test]
async fn test_end_to_end_capture_with_buffer_recycling() {
    let manager = CaptureManager::new(fast_factory(), ManagerConfig::default()).expect("config");
    let mut events = manager.events();
    let session = open_first_device(&manager).await;

    let (handler, mut rx) = RecordingHandler::create();
    let controller = manager
        .start_capture_for_client(
            session,
            CaptureParams::default(),
            ProcessHandle(7),
            RouteId(1),
            handler.clone(),
        )
        .expect("capture starts");

    await_event(&mut events, "device_started").await;
    assert!(controller.has_active_client());

    // Returning each buffer keeps the pool recycling: more frames than the
    // pool has slots must arrive.
    let mut readies = 0;
    while readies < 5 {
        match next(&mut rx).await {
            Note::Ready(id) => {
                readies += 1;
                controller.return_buffer(RouteId(1), &handler, id, SyncToken::default(), Some(0.25));
            }
            Note::Created(_) => {}
            other => panic!("unexpected notification: {other:?}"),
        }
    }
    assert!(controller.stats().frames_delivered >= 5);

    let stopped = manager.stop_capture_for_client(&controller, RouteId(1), &handler, false);
    assert_eq!(stopped, session);
    assert_eq!(manager.active_device_count(), 0);
    await_event(&mut events, "device_stopped").await;
}

#[tokio::test]
async fn test_two_clients_share_one_device() {
    let manager = CaptureManager::new(fast_factory(), ManagerConfig::default()).expect("config");
    let session = open_first_device(&manager).await;

    let (handler_a, mut rx_a) = RecordingHandler::create();
    let (handler_b, mut rx_b) = RecordingHandler::create();

    let controller_a = manager
        .start_capture_for_client(
            session,
            CaptureParams::default(),
            ProcessHandle(1),
            RouteId(1),
            handler_a.clone(),
        )
        .expect("first client");
    let controller_b = manager
        .start_capture_for_client(
            session,
            CaptureParams::default(),
            ProcessHandle(2),
            RouteId(2),
            handler_b.clone(),
        )
        .expect("second client");

    // One controller per device, shared by both clients.
    assert!(Arc::ptr_eq(&controller_a, &controller_b));
    assert_eq!(controller_a.client_count(), 2);
    assert_eq!(manager.active_device_count(), 1);

    assert!(matches!(next(&mut rx_a).await, Note::Created(_)));
    assert!(matches!(next(&mut rx_b).await, Note::Created(_)));

    manager.stop_capture_for_client(&controller_a, RouteId(1), &handler_a, false);
    assert_eq!(manager.active_device_count(), 1);
    manager.stop_capture_for_client(&controller_b, RouteId(2), &handler_b, false);
    assert_eq!(manager.active_device_count(), 0);
}

#[tokio::test]
async fn test_unknown_session_lookups_fail_cleanly() {
    let manager = CaptureManager::new(fast_factory(), ManagerConfig::default()).expect("config");

    let (handler, _rx) = RecordingHandler::create();
    assert!(matches!(
        manager.start_capture_for_client(
            SessionId(99),
            CaptureParams::default(),
            ProcessHandle(1),
            RouteId(1),
            handler,
        ),
        Err(CaptureError::SessionNotFound { .. })
    ));
    assert!(matches!(
        manager.supported_formats(SessionId(99)).await,
        Err(CaptureError::SessionNotFound { .. })
    ));
    assert!(matches!(
        manager.formats_in_use(SessionId(99)),
        Err(CaptureError::SessionNotFound { .. })
    ));
}

#[tokio::test]
async fn test_format_queries() {
    let manager = CaptureManager::new(fast_factory(), ManagerConfig::default()).expect("config");
    let session = open_first_device(&manager).await;

    let supported = manager.supported_formats(session).await.expect("formats");
    assert!(!supported.is_empty());

    // Nothing in use before the device delivers.
    assert!(manager.formats_in_use(session).expect("in use").is_empty());

    let (handler, mut rx) = RecordingHandler::create();
    let _controller = manager
        .start_capture_for_client(
            session,
            CaptureParams::default(),
            ProcessHandle(1),
            RouteId(1),
            handler,
        )
        .expect("capture starts");

    // After the first delivery the requested format shows up as in use.
    loop {
        if let Note::Ready(_) = next(&mut rx).await {
            break;
        }
    }
    let in_use = manager.formats_in_use(session).expect("in use");
    assert_eq!(in_use.len(), 1);
    assert_eq!(
        in_use[0].resolution,
        CaptureParams::default().requested_format.resolution
    );
}

#[tokio::test]
async fn test_device_start_failure_reaches_clients() {
    let factory = Arc::new(FakeDeviceFactory::new(FakeDeviceConfig {
        fail_allocation: true,
        ..FakeDeviceConfig::default()
    }));
    let manager = CaptureManager::new(factory, ManagerConfig::default()).expect("config");
    let mut events = manager.events();
    let session = open_first_device(&manager).await;

    let (handler, mut rx) = RecordingHandler::create();
    let controller = manager
        .start_capture_for_client(
            session,
            CaptureParams::default(),
            ProcessHandle(1),
            RouteId(1),
            handler.clone(),
        )
        .expect("registration succeeds; the start fails asynchronously");

    assert_eq!(next(&mut rx).await, Note::Error);
    assert_eq!(controller.state(), CaptureState::Error);
    let event = await_event(&mut events, "capture_error").await;
    assert!(event.is_error_event());

    let stopped = manager.stop_capture_for_client(&controller, RouteId(1), &handler, true);
    assert_eq!(stopped, session);
    assert_eq!(manager.active_device_count(), 0);
}

#[tokio::test]
async fn test_close_session_asks_clients_to_end() {
    let manager = CaptureManager::new(fast_factory(), ManagerConfig::default()).expect("config");
    let session = open_first_device(&manager).await;

    let (handler, mut rx) = RecordingHandler::create();
    let controller = manager
        .start_capture_for_client(
            session,
            CaptureParams::default(),
            ProcessHandle(1),
            RouteId(1),
            handler.clone(),
        )
        .expect("capture starts");

    manager.close(session);
    assert_eq!(manager.open_session_count(), 0);

    // The ended notification arrives among frame traffic.
    loop {
        if next(&mut rx).await == Note::Ended {
            break;
        }
    }

    // The expected consumer response tears the device down.
    manager.stop_capture_for_client(&controller, RouteId(1), &handler, false);
    assert_eq!(manager.active_device_count(), 0);
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let manager = CaptureManager::new(fast_factory(), ManagerConfig::default()).expect("config");
    let session = open_first_device(&manager).await;

    let (handler, mut rx) = RecordingHandler::create();
    let _controller = manager
        .start_capture_for_client(
            session,
            CaptureParams::default(),
            ProcessHandle(1),
            RouteId(1),
            handler,
        )
        .expect("capture starts");
    assert!(matches!(next(&mut rx).await, Note::Created(_)));

    manager.shutdown().await;
    assert_eq!(manager.active_device_count(), 0);
    assert_eq!(manager.open_session_count(), 0);

    // No new work is accepted after shutdown.
    let descriptor = DeviceDescriptor::virtual_device("fake-device-0", "Fake Camera 0");
    assert_eq!(manager.open(descriptor), SessionId::INVALID);
    let (late_handler, _late_rx) = RecordingHandler::create();
    assert!(matches!(
        manager.start_capture_for_client(
            session,
            CaptureParams::default(),
            ProcessHandle(1),
            RouteId(9),
            late_handler,
        ),
        Err(CaptureError::ShuttingDown)
    ));
}

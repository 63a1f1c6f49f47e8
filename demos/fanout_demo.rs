//! Fan-out demo: one fake capture device feeding two clients.
//!
//! Run with: cargo run --example fanout_demo

use anyhow::Result;
use framecast::{
    BufferId, BufferMapping, CaptureEventHandler, CaptureManager, CaptureParams, FakeDeviceConfig,
    FakeDeviceFactory, FrameInfo, ManagerConfig, ProcessHandle, RouteId, SyncToken,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Prints deliveries and forwards buffer ids so the main task can return
/// them (the stand-in for a renderer's IPC round trip).
struct PrintingSink {
    name: &'static str,
    returns: mpsc::UnboundedSender<(RouteId, BufferId)>,
}

impl CaptureEventHandler for PrintingSink {
    fn on_buffer_created(&self, _route: RouteId, id: BufferId, _mapping: BufferMapping, length: usize) {
        println!("[{}] buffer {id} created ({length} bytes)", self.name);
    }

    fn on_buffer_destroyed(&self, _route: RouteId, id: BufferId) {
        println!("[{}] buffer {id} destroyed", self.name);
    }

    fn on_buffer_ready(&self, route: RouteId, id: BufferId, info: FrameInfo) {
        println!(
            "[{}] frame in buffer {id} at {:?} ({})",
            self.name, info.timestamp, info.format.resolution
        );
        let _ = self.returns.send((route, id));
    }

    fn on_ended(&self, _route: RouteId) {
        println!("[{}] ended", self.name);
    }

    fn on_error(&self, _route: RouteId) {
        println!("[{}] device error", self.name);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let factory = Arc::new(FakeDeviceFactory::new(FakeDeviceConfig {
        frame_interval: Some(Duration::from_millis(100)),
        ..FakeDeviceConfig::default()
    }));
    let manager = CaptureManager::new(factory, ManagerConfig::default())?;

    let descriptor = manager.enumerate_devices().await?.remove(0);
    println!("capturing from {descriptor}");
    let session = manager.open(descriptor);

    let (returns_tx, mut returns_rx) = mpsc::unbounded_channel();
    let alice: Arc<dyn CaptureEventHandler> = Arc::new(PrintingSink {
        name: "alice",
        returns: returns_tx.clone(),
    });
    let bob: Arc<dyn CaptureEventHandler> = Arc::new(PrintingSink {
        name: "bob",
        returns: returns_tx,
    });

    let controller = manager.start_capture_for_client(
        session,
        CaptureParams::default(),
        ProcessHandle(1),
        RouteId(1),
        alice.clone(),
    )?;
    let _shared = manager.start_capture_for_client(
        session,
        CaptureParams::default(),
        ProcessHandle(2),
        RouteId(2),
        bob.clone(),
    )?;

    // Return buffers as the clients finish with them, for one second.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while let Ok(Some((route, id))) =
        tokio::time::timeout_at(deadline, returns_rx.recv()).await
    {
        let handler = if route == RouteId(1) { &alice } else { &bob };
        controller.return_buffer(route, handler, id, SyncToken::default(), Some(0.2));
    }

    manager.stop_capture_for_client(&controller, RouteId(1), &alice, false);
    manager.stop_capture_for_client(&controller, RouteId(2), &bob, false);
    manager.close(session);
    manager.shutdown().await;
    Ok(())
}

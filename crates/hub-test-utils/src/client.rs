//! Fake connected device.
//!
//! Stands in for the transport layer: owns the event receiver a real
//! socket's writer task would drain, so tests can assert on exactly what
//! a device was sent. Hub emits are synchronous `try_send`s, so after an
//! awaited hub call every resulting event is already in the queue and
//! `drain` is deterministic.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use common::types::{ConnectionId, DeviceId};
use realtime_hub::client::ClientHandle;
use realtime_hub::events::ServerEvent;

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// A device connected to the hub without a real socket
pub struct TestClient {
    device_id: DeviceId,
    handle: ClientHandle,
    events: mpsc::Receiver<ServerEvent>,
}

impl TestClient {
    pub fn new(device_id: &str) -> Self {
        let connection_id = ConnectionId::new();
        let (handle, events) = ClientHandle::channel(connection_id, 64);
        Self {
            device_id: DeviceId::new(device_id),
            handle,
            events,
        }
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.connection_id()
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id.clone()
    }

    /// Every event queued so far, in delivery order
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Next event, failing the test if none arrives in time
    pub async fn recv(&mut self) -> ServerEvent {
        timeout(RECV_TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Drain and return the events matching `pred`
    pub fn drain_matching(&mut self, pred: impl Fn(&ServerEvent) -> bool) -> Vec<ServerEvent> {
        self.drain().into_iter().filter(|event| pred(event)).collect()
    }

    /// Assert that no events are queued
    pub fn assert_silent(&mut self) {
        let events = self.drain();
        assert!(events.is_empty(), "expected no events, got {events:?}");
    }
}

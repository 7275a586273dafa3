//! Per-connection send handle.
//!
//! Every transport connection owns a bounded event queue drained by its
//! writer task. The rest of the hub only ever sees the cheap, cloneable
//! [`ClientHandle`] and pushes events through it fire-and-forget: a full
//! or closed queue is logged per recipient and never propagates, so one
//! slow client cannot stall a broadcast.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use common::types::ConnectionId;

use crate::events::ServerEvent;

/// Cheap handle for pushing events to one connection
#[derive(Debug, Clone)]
pub struct ClientHandle {
    connection_id: ConnectionId,
    sender: mpsc::Sender<ServerEvent>,
}

impl ClientHandle {
    /// Wrap an existing queue sender
    #[must_use]
    pub fn new(connection_id: ConnectionId, sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    /// Create a handle together with the receiver its writer task drains
    #[must_use]
    pub fn channel(
        connection_id: ConnectionId,
        queue_depth: usize,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(queue_depth);
        (Self::new(connection_id, sender), receiver)
    }

    /// The connection this handle delivers to
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Queue an event for delivery. Never blocks and never fails the
    /// caller: a full queue drops the event with a warning, a closed
    /// queue (connection torn down) drops it silently.
    pub fn emit(&self, event: ServerEvent) {
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(
                    target: "hub.client",
                    connection_id = %self.connection_id,
                    event = ?std::mem::discriminant(&dropped),
                    "Send queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    target: "hub.client",
                    connection_id = %self.connection_id,
                    "Connection closed, dropping event"
                );
            }
        }
    }

    /// Whether the writer side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::UserId;

    #[tokio::test]
    async fn emit_delivers_to_receiver() {
        let (handle, mut rx) = ClientHandle::channel(ConnectionId::new(), 4);
        handle.emit(ServerEvent::UserOnline {
            user_id: UserId::new("u1"),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ServerEvent::UserOnline {
                user_id: UserId::new("u1"),
            }
        );
    }

    #[tokio::test]
    async fn emit_on_full_queue_drops_without_blocking() {
        let (handle, mut rx) = ClientHandle::channel(ConnectionId::new(), 1);
        handle.emit(ServerEvent::UserOnline {
            user_id: UserId::new("u1"),
        });
        // Queue depth is 1, so this one is dropped.
        handle.emit(ServerEvent::UserOnline {
            user_id: UserId::new("u2"),
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            ServerEvent::UserOnline {
                user_id: UserId::new("u1"),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_after_receiver_dropped_is_silent() {
        let (handle, rx) = ClientHandle::channel(ConnectionId::new(), 4);
        drop(rx);
        assert!(handle.is_closed());
        // Must not panic or error.
        handle.emit(ServerEvent::UserOnline {
            user_id: UserId::new("u1"),
        });
    }
}

//! Pending-message flush.
//!
//! When a user's device connects, every message persisted for that user
//! but not yet delivered to them is pushed down the fresh connection as
//! individual `ReceiveMessage` events, oldest first, and each one is
//! marked delivered. Delivery records are per user, not per device: a
//! second device connecting after the flush gets nothing. Guests have no
//! message history and are skipped entirely.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::collab::MessageStore;
use crate::events::ServerEvent;
use crate::metrics::HubMetrics;
use crate::registry::DeviceConnection;

/// Drains a user's undelivered messages onto a fresh connection
pub struct PendingFlush {
    messages: Arc<dyn MessageStore>,
    metrics: Arc<HubMetrics>,
}

impl PendingFlush {
    pub fn new(messages: Arc<dyn MessageStore>, metrics: Arc<HubMetrics>) -> Self {
        Self { messages, metrics }
    }

    /// Push all undelivered messages to `connection` and mark them
    /// delivered. A failed lookup skips the flush (the messages stay
    /// pending for the next connect); a failed mark is logged and the
    /// flush continues, relying on idempotent delivery records.
    #[instrument(skip_all, fields(device_id = %connection.device_id))]
    pub async fn flush(&self, connection: &DeviceConnection) {
        let Some(user_id) = connection.user_id() else {
            return;
        };

        let pending = match self.messages.pending_messages(user_id, None).await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(
                    target: "hub.flush",
                    user_id = %user_id,
                    error = %err,
                    "Pending message lookup failed, skipping flush"
                );
                return;
            }
        };
        if pending.is_empty() {
            return;
        }

        let count = pending.len();
        for message in pending {
            let message_id = message.message_id.clone();
            connection.handle.emit(ServerEvent::ReceiveMessage { message });
            if let Err(err) = self.messages.mark_delivered(&message_id, user_id).await {
                warn!(
                    target: "hub.flush",
                    user_id = %user_id,
                    message_id = %message_id,
                    error = %err,
                    "Failed to record delivery"
                );
            }
        }
        self.metrics.record_flushed(count);

        info!(
            target: "hub.flush",
            user_id = %user_id,
            delivered = count,
            "Flushed pending messages"
        );
    }
}

//! Device-to-device message history sync.
//!
//! A user's fresh device can ask their other devices for message history.
//! The hub relays the request to every sibling and then relays the data
//! chunks back, verbatim and uninspected. Chunks may only flow between
//! devices of the same user; anything else is dropped. Guests have no
//! sibling devices and cannot use sync at all.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use common::types::{ConversationId, DeviceId};

use crate::errors::HubError;
use crate::events::ServerEvent;
use crate::registry::{ConnectionRegistry, DeviceConnection};

/// Relays sync requests and data between a user's devices
pub struct DeviceSyncRelay {
    registry: Arc<ConnectionRegistry>,
}

impl DeviceSyncRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Forward a sync request to every other device of the sender's user
    #[instrument(skip_all, fields(from = %sender.device_id))]
    pub fn request_sync(
        &self,
        sender: &DeviceConnection,
        conversation_id: Option<ConversationId>,
        since_timestamp: Option<i64>,
        chunk_size: u32,
    ) -> Result<(), HubError> {
        let user_id = sender.user_id().ok_or(HubError::AuthenticationMissing)?;

        let event = ServerEvent::DeviceSyncRequest {
            requesting_device_id: sender.device_id.clone(),
            conversation_id,
            since_timestamp,
            chunk_size,
        };
        let mut notified = 0;
        for sibling in self.registry.devices_of(user_id) {
            if sibling.device_id == sender.device_id {
                continue;
            }
            sibling.handle.emit(event.clone());
            notified += 1;
        }
        debug!(
            target: "hub.sync",
            user_id = %user_id,
            notified,
            "Relayed sync request to sibling devices"
        );
        Ok(())
    }

    /// Forward one chunk of history to a sibling device. Chunks addressed
    /// to an offline device or to a device of a different user are
    /// dropped (the latter with a warning).
    #[instrument(skip_all, fields(from = %sender.device_id, to = %to_device_id))]
    #[allow(clippy::too_many_arguments)]
    pub fn send_sync_data(
        &self,
        sender: &DeviceConnection,
        to_device_id: &DeviceId,
        conversation_id: Option<ConversationId>,
        messages: Vec<serde_json::Value>,
        chunk_index: u32,
        total_chunks: u32,
        is_last_chunk: bool,
    ) -> Result<(), HubError> {
        let user_id = sender.user_id().ok_or(HubError::AuthenticationMissing)?;

        let Some(target) = self.registry.find_by_device(to_device_id) else {
            debug!(
                target: "hub.sync",
                device_id = %to_device_id,
                "Sync target disconnected, dropping chunk"
            );
            return Ok(());
        };
        if target.user_id() != Some(user_id) {
            warn!(
                target: "hub.sync",
                from_user = %user_id,
                device_id = %to_device_id,
                "Sync chunk addressed to another user's device, dropping"
            );
            return Ok(());
        }

        target.handle.emit(ServerEvent::DeviceSyncData {
            from_device_id: sender.device_id.clone(),
            to_device_id: to_device_id.clone(),
            conversation_id,
            messages,
            chunk_index,
            total_chunks,
            is_last_chunk,
        });
        Ok(())
    }
}

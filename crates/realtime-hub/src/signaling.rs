//! WebRTC signaling relay.
//!
//! The hub forwards SDP and ICE payloads between devices without parsing
//! them. Room-scoped sends require the sender to be a current room
//! participant; directed answers and candidates without a room ID only
//! require a registered sender (they answer an offer the hub itself
//! relayed). An unreachable target is dropped silently: the caller's ICE
//! machinery retries, an error event would only confuse it.

use std::sync::Arc;

use tracing::{debug, instrument};

use common::types::{ConversationId, DeviceId};

use crate::errors::HubError;
use crate::events::ServerEvent;
use crate::registry::{ConnectionRegistry, DeviceConnection};
use crate::rooms::RoomTable;

/// Relays session negotiation payloads between room participants
pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomTable>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>, rooms: Arc<RoomTable>) -> Self {
        Self { registry, rooms }
    }

    fn ensure_participant(
        &self,
        room_id: &ConversationId,
        device_id: &DeviceId,
    ) -> Result<(), HubError> {
        if self.rooms.contains_participant(room_id, device_id) {
            return Ok(());
        }
        if self.rooms.participants(room_id).is_empty() {
            Err(HubError::RoomNotFound(room_id.to_string()))
        } else {
            Err(HubError::NotAParticipant(room_id.to_string()))
        }
    }

    fn emit_to_device(&self, device_id: &DeviceId, event: ServerEvent) {
        match self.registry.find_by_device(device_id) {
            Some(target) => target.handle.emit(event),
            None => {
                debug!(
                    target: "hub.signaling",
                    device_id = %device_id,
                    "Signaling target unreachable, dropping payload"
                );
            }
        }
    }

    /// Fan an offer out to every other participant of a room
    #[instrument(skip_all, fields(room_id = %room_id, from = %sender.device_id))]
    pub fn send_room_offer(
        &self,
        sender: &DeviceConnection,
        room_id: &ConversationId,
        sdp: &str,
    ) -> Result<(), HubError> {
        self.ensure_participant(room_id, &sender.device_id)?;
        for device_id in self.rooms.participant_device_ids(room_id) {
            if device_id == sender.device_id {
                continue;
            }
            self.emit_to_device(
                &device_id,
                ServerEvent::ReceiveOffer {
                    from_device_id: sender.device_id.clone(),
                    to_device_id: device_id.clone(),
                    room_id: Some(room_id.clone()),
                    sdp: sdp.to_string(),
                },
            );
        }
        Ok(())
    }

    /// Send an offer to one participant of a room. Targets outside the
    /// room are dropped silently.
    #[instrument(skip_all, fields(room_id = %room_id, from = %sender.device_id, to = %to_device_id))]
    pub fn send_offer(
        &self,
        sender: &DeviceConnection,
        to_device_id: &DeviceId,
        room_id: &ConversationId,
        sdp: &str,
    ) -> Result<(), HubError> {
        self.ensure_participant(room_id, &sender.device_id)?;
        if !self.rooms.contains_participant(room_id, to_device_id) {
            debug!(
                target: "hub.signaling",
                device_id = %to_device_id,
                room_id = %room_id,
                "Offer target not in room, dropping payload"
            );
            return Ok(());
        }
        self.emit_to_device(
            to_device_id,
            ServerEvent::ReceiveOffer {
                from_device_id: sender.device_id.clone(),
                to_device_id: to_device_id.clone(),
                room_id: Some(room_id.clone()),
                sdp: sdp.to_string(),
            },
        );
        Ok(())
    }

    /// Fan an ICE candidate out to every other participant of a room
    #[instrument(skip_all, fields(room_id = %room_id, from = %sender.device_id))]
    pub fn send_room_ice_candidate(
        &self,
        sender: &DeviceConnection,
        room_id: &ConversationId,
        candidate: &str,
        sdp_mid: Option<&str>,
        sdp_m_line_index: Option<u32>,
    ) -> Result<(), HubError> {
        self.ensure_participant(room_id, &sender.device_id)?;
        for device_id in self.rooms.participant_device_ids(room_id) {
            if device_id == sender.device_id {
                continue;
            }
            self.emit_to_device(
                &device_id,
                ServerEvent::ReceiveIceCandidate {
                    from_device_id: sender.device_id.clone(),
                    to_device_id: device_id.clone(),
                    room_id: Some(room_id.clone()),
                    candidate: candidate.to_string(),
                    sdp_mid: sdp_mid.map(str::to_string),
                    sdp_m_line_index,
                },
            );
        }
        Ok(())
    }

    /// Send an ICE candidate to one device. When a room ID is supplied
    /// the sender must be in that room; without one, any registered
    /// sender may answer signaling it received.
    #[instrument(skip_all, fields(from = %sender.device_id, to = %to_device_id))]
    pub fn send_ice_candidate(
        &self,
        sender: &DeviceConnection,
        to_device_id: &DeviceId,
        room_id: Option<&ConversationId>,
        candidate: &str,
        sdp_mid: Option<&str>,
        sdp_m_line_index: Option<u32>,
    ) -> Result<(), HubError> {
        if let Some(room_id) = room_id {
            self.ensure_participant(room_id, &sender.device_id)?;
        }
        self.emit_to_device(
            to_device_id,
            ServerEvent::ReceiveIceCandidate {
                from_device_id: sender.device_id.clone(),
                to_device_id: to_device_id.clone(),
                room_id: room_id.cloned(),
                candidate: candidate.to_string(),
                sdp_mid: sdp_mid.map(str::to_string),
                sdp_m_line_index,
            },
        );
        Ok(())
    }

    /// Send an SDP answer to one device. Same room rule as
    /// [`Self::send_ice_candidate`].
    #[instrument(skip_all, fields(from = %sender.device_id, to = %to_device_id))]
    pub fn send_answer(
        &self,
        sender: &DeviceConnection,
        to_device_id: &DeviceId,
        room_id: Option<&ConversationId>,
        sdp: &str,
    ) -> Result<(), HubError> {
        if let Some(room_id) = room_id {
            self.ensure_participant(room_id, &sender.device_id)?;
        }
        self.emit_to_device(
            to_device_id,
            ServerEvent::ReceiveAnswer {
                from_device_id: sender.device_id.clone(),
                to_device_id: to_device_id.clone(),
                room_id: room_id.cloned(),
                sdp: sdp.to_string(),
            },
        );
        Ok(())
    }
}

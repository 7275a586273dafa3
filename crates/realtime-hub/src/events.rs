//! Wire protocol: client commands in, server events out.
//!
//! Both directions are JSON. Commands are tagged by `op`, events by
//! `event`. Field names are camelCase to match the client SDKs. Sync
//! payloads are carried as raw JSON values: the hub relays them between
//! a user's devices without inspecting them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use common::types::{ConversationId, DeviceId, MessageId, UserId};

use crate::collab::PendingMessage;
use crate::errors::HubError;
use crate::rooms::{ParticipantView, RoomInfo};

fn default_chunk_size() -> u32 {
    100
}

/// A device visible in a `ConnectedDevices` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedDevice {
    pub device_id: DeviceId,
    pub connected_at: DateTime<Utc>,
    /// True on the entry describing the requesting device itself
    pub is_current_device: bool,
}

/// Commands a connected client can issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Subscribe to a conversation's broadcast topic
    JoinConversation { conversation_id: ConversationId },
    /// Unsubscribe from a conversation's broadcast topic
    LeaveConversation { conversation_id: ConversationId },
    /// Relay a typing indicator to conversation co-members
    SendTypingIndicator {
        conversation_id: ConversationId,
        is_typing: bool,
    },
    /// Record delivery of one message to this user
    AcknowledgeMessage { message_id: MessageId },
    /// Ask this user's other devices to offer message history
    RequestDeviceSync {
        conversation_id: Option<ConversationId>,
        since_timestamp: Option<i64>,
        #[serde(default = "default_chunk_size")]
        chunk_size: u32,
    },
    /// Forward one chunk of history to a sibling device
    SendDeviceSyncData {
        to_device_id: DeviceId,
        conversation_id: Option<ConversationId>,
        messages: Vec<serde_json::Value>,
        chunk_index: u32,
        total_chunks: u32,
        is_last_chunk: bool,
    },
    /// List this user's currently connected devices
    GetConnectedDevices,
    /// Create (or idempotently join) the conference room for a conversation
    CreateRoom { conversation_id: ConversationId },
    /// Join an existing conference room as an authenticated user
    JoinRoom { room_id: ConversationId },
    /// Join an existing conference room with an invite key
    JoinRoomAsGuest {
        invite_key: String,
        display_name: String,
    },
    /// Leave a conference room
    LeaveRoom {
        room_id: ConversationId,
        reason: Option<String>,
    },
    /// Fetch the current roster of a conference room
    GetRoomParticipants { room_id: ConversationId },
    /// Fan an SDP offer out to every other room participant
    SendRoomOffer { room_id: ConversationId, sdp: String },
    /// Send an SDP offer to one room participant
    SendOffer {
        to_device_id: DeviceId,
        room_id: ConversationId,
        sdp: String,
    },
    /// Fan an ICE candidate out to every other room participant
    SendRoomIceCandidate {
        room_id: ConversationId,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },
    /// Send an ICE candidate to one device
    SendIceCandidate {
        to_device_id: DeviceId,
        room_id: Option<ConversationId>,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },
    /// Send an SDP answer to one device
    SendAnswer {
        to_device_id: DeviceId,
        room_id: Option<ConversationId>,
        sdp: String,
    },
}

/// Events the hub pushes to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A conversation co-member came online (first device connected)
    UserOnline { user_id: UserId },
    /// A conversation co-member went offline (last device disconnected)
    UserOffline {
        user_id: UserId,
        last_seen_at: DateTime<Utc>,
    },
    /// A sibling device of this user connected
    DeviceConnected {
        user_id: UserId,
        device_id: DeviceId,
        total_devices: usize,
    },
    /// A sibling device of this user disconnected
    DeviceDisconnected {
        user_id: UserId,
        device_id: DeviceId,
        total_devices: usize,
    },
    /// Sent to a newly connected device when siblings are already online
    OtherDevicesAvailable {
        other_device_count: usize,
        total_devices: usize,
        other_device_ids: Vec<DeviceId>,
    },
    /// Reply to `GetConnectedDevices`
    ConnectedDevices { devices: Vec<ConnectedDevice> },
    /// A persisted message delivered on connect or by live fanout
    ReceiveMessage { message: PendingMessage },
    /// A co-member started or stopped typing
    TypingIndicator {
        conversation_id: ConversationId,
        user_id: UserId,
        is_typing: bool,
    },
    /// Sent to the creator of a new conference room. The invite key is
    /// only ever surfaced here.
    RoomCreated { room: RoomInfo, invite_key: String },
    /// Sent to a device that joined a room, with the full roster snapshot
    RoomJoined { room: RoomInfo },
    /// Reply to `GetRoomParticipants`
    RoomParticipants {
        room_id: ConversationId,
        participants: Vec<ParticipantView>,
    },
    /// A participant entered the room
    ParticipantJoined {
        room_id: ConversationId,
        participant: ParticipantView,
    },
    /// A participant left the room
    ParticipantLeft {
        room_id: ConversationId,
        participant: ParticipantView,
        reason: String,
    },
    /// Ring: the first participant entered a room for a conversation you
    /// belong to
    CallInitiated {
        room_id: ConversationId,
        caller: ParticipantView,
    },
    /// Relayed SDP offer
    ReceiveOffer {
        from_device_id: DeviceId,
        to_device_id: DeviceId,
        room_id: Option<ConversationId>,
        sdp: String,
    },
    /// Relayed SDP answer
    ReceiveAnswer {
        from_device_id: DeviceId,
        to_device_id: DeviceId,
        room_id: Option<ConversationId>,
        sdp: String,
    },
    /// Relayed ICE candidate
    ReceiveIceCandidate {
        from_device_id: DeviceId,
        to_device_id: DeviceId,
        room_id: Option<ConversationId>,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u32>,
    },
    /// A sibling device asked for message history
    DeviceSyncRequest {
        requesting_device_id: DeviceId,
        conversation_id: Option<ConversationId>,
        since_timestamp: Option<i64>,
        chunk_size: u32,
    },
    /// One chunk of relayed message history
    DeviceSyncData {
        from_device_id: DeviceId,
        to_device_id: DeviceId,
        conversation_id: Option<ConversationId>,
        messages: Vec<serde_json::Value>,
        chunk_index: u32,
        total_chunks: u32,
        is_last_chunk: bool,
    },
    /// An operation failed
    Error { code: i32, message: String },
}

impl ServerEvent {
    /// Build the wire error event for a failed operation
    #[must_use]
    pub fn from_error(err: &HubError) -> Self {
        ServerEvent::Error {
            code: err.error_code(),
            message: err.client_message(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_camel_case_json() {
        let cmd: ClientCommand = serde_json::from_str(
            r#"{"op":"joinConversation","conversationId":"conv-1"}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            ClientCommand::JoinConversation {
                conversation_id: ConversationId::new("conv-1"),
            }
        );
    }

    #[test]
    fn sync_request_defaults_chunk_size() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"op":"requestDeviceSync"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::RequestDeviceSync {
                conversation_id: None,
                since_timestamp: None,
                chunk_size: 100,
            }
        );
    }

    #[test]
    fn unit_command_parses_without_fields() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"op":"getConnectedDevices"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::GetConnectedDevices);
    }

    #[test]
    fn events_serialize_with_event_tag_and_camel_case_fields() {
        let event = ServerEvent::UserOnline {
            user_id: UserId::new("u1"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "UserOnline");
        assert_eq!(json["userId"], "u1");
    }

    #[test]
    fn error_event_uses_client_safe_message() {
        let event = ServerEvent::from_error(&HubError::Collaborator("pg down".to_string()));
        let ServerEvent::Error { code, message } = event else {
            panic!("expected error event");
        };
        assert_eq!(code, 5);
        assert!(!message.contains("pg"));
    }

    #[test]
    fn sync_payloads_round_trip_verbatim() {
        let raw = serde_json::json!({"id": "m1", "body": "hello", "nested": {"x": 1}});
        let cmd: ClientCommand = serde_json::from_value(serde_json::json!({
            "op": "sendDeviceSyncData",
            "toDeviceId": "dev-2",
            "messages": [raw.clone()],
            "chunkIndex": 0,
            "totalChunks": 1,
            "isLastChunk": true,
        }))
        .unwrap();
        let ClientCommand::SendDeviceSyncData { messages, .. } = cmd else {
            panic!("expected sync data command");
        };
        assert_eq!(messages, vec![raw]);
    }
}

//! Hub facade.
//!
//! One `Hub` per process owns all live state (connections, topics, rooms)
//! and the collaborator handles. The transport calls exactly three entry
//! points: `connect` when a socket is established, `handle_command` for
//! each inbound frame and `disconnect` when the socket goes away. Failed
//! commands are answered with a wire `Error` event on the issuing
//! connection; nothing a single client does can take the hub down.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use common::types::{ConnectionId, ConversationId, DeviceId, Identity, UserId};

use crate::client::ClientHandle;
use crate::collab::{ConversationStore, MessageStore, Notifier, UserDirectory};
use crate::errors::HubError;
use crate::events::{ClientCommand, ConnectedDevice, ServerEvent};
use crate::flush::PendingFlush;
use crate::metrics::HubMetrics;
use crate::presence::{bootstrap_online_members, PresenceTracker};
use crate::registry::{ConnectionRegistry, DeviceConnection};
use crate::rooms::{JoinOutcome, ParticipantView, RoomTable};
use crate::signaling::SignalingRelay;
use crate::sync::DeviceSyncRelay;
use crate::topics::{Topic, TopicRegistry};

/// The realtime coordinator
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    topics: Arc<TopicRegistry>,
    rooms: Arc<RoomTable>,
    presence: PresenceTracker,
    flush: PendingFlush,
    signaling: SignalingRelay,
    sync: DeviceSyncRelay,
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    directory: Arc<dyn UserDirectory>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<HubMetrics>,
}

impl Hub {
    /// Wire a hub to its collaborators
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        directory: Arc<dyn UserDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let topics = Arc::new(TopicRegistry::new());
        let rooms = Arc::new(RoomTable::new());
        let metrics = HubMetrics::new();

        Arc::new(Self {
            presence: PresenceTracker::new(
                Arc::clone(&registry),
                Arc::clone(&topics),
                Arc::clone(&conversations),
                Arc::clone(&directory),
                Arc::clone(&metrics),
            ),
            flush: PendingFlush::new(Arc::clone(&messages), Arc::clone(&metrics)),
            signaling: SignalingRelay::new(Arc::clone(&registry), Arc::clone(&rooms)),
            sync: DeviceSyncRelay::new(Arc::clone(&registry)),
            registry,
            topics,
            rooms,
            conversations,
            messages,
            directory,
            notifier,
            metrics,
        })
    }

    /// Shared counters for the health endpoint
    #[must_use]
    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }

    /// Register a freshly established connection and run the connect
    /// pipeline: presence announcement, topic subscriptions, pending
    /// message flush.
    #[instrument(skip_all, fields(device_id = %device_id, connection_id = %handle.connection_id()))]
    pub async fn connect(&self, identity: Identity, device_id: DeviceId, handle: ClientHandle) {
        let connection = DeviceConnection {
            handle,
            device_id,
            identity,
            connected_at: Utc::now(),
        };
        let registered = self.registry.register(connection.clone());
        if let Some(stale) = &registered.replaced {
            debug!(
                target: "hub.connection",
                device_id = %connection.device_id,
                stale_connection_id = %stale.connection_id(),
                "Device reconnected, dropped stale registration"
            );
            self.topics.drop_connection(stale.connection_id());
            // The device kept its room seats across the reconnect; move
            // those subscriptions onto the new socket so it keeps
            // receiving roster broadcasts.
            for room_id in self.rooms.rooms_of_device(&connection.device_id) {
                self.topics
                    .subscribe(Topic::Room(room_id), &connection.handle);
            }
        }
        self.metrics.connection_opened();
        if connection.user_id().is_some() && !registered.user_was_online {
            self.metrics.user_online();
        }

        self.presence.device_registered(&connection, &registered).await;
        self.flush.flush(&connection).await;

        info!(
            target: "hub.connection",
            device_id = %connection.device_id,
            guest = connection.is_guest(),
            "Device connected"
        );
    }

    /// Tear down a connection: drop its topic subscriptions, leave every
    /// room it occupied, then run the presence offline pipeline. Safe to
    /// call for sockets already superseded by a reconnect.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.topics.drop_connection(connection_id);
        let Some(unregistered) = self.registry.unregister(connection_id) else {
            debug!(
                target: "hub.connection",
                connection_id = %connection_id,
                "Disconnect for unknown or superseded connection"
            );
            return;
        };
        self.metrics.connection_closed();

        let connection = &unregistered.connection;
        for room_id in self.rooms.rooms_of_device(&connection.device_id) {
            self.leave_room_inner(connection, &room_id, "disconnected");
        }

        if connection.user_id().is_some() && unregistered.remaining_user_devices == 0 {
            self.metrics.user_offline();
        }
        self.presence.device_unregistered(&unregistered).await;

        info!(
            target: "hub.connection",
            device_id = %connection.device_id,
            "Device disconnected"
        );
    }

    /// Dispatch one inbound command. Errors are reported to the issuing
    /// connection as `Error` events; commands from unknown (already torn
    /// down) connections are dropped.
    pub async fn handle_command(&self, connection_id: ConnectionId, command: ClientCommand) {
        let Some(connection) = self.registry.find_by_connection(connection_id) else {
            debug!(
                target: "hub.command",
                connection_id = %connection_id,
                "Command from unknown connection, ignoring"
            );
            return;
        };
        self.metrics.record_command();

        if let Err(err) = self.dispatch(&connection, command).await {
            warn!(
                target: "hub.command",
                device_id = %connection.device_id,
                error = %err,
                "Command failed"
            );
            connection.handle.emit(ServerEvent::from_error(&err));
        }
    }

    /// Report a protocol-level error (for frames the transport could not
    /// even parse into a command)
    pub fn report_protocol_error(&self, connection_id: ConnectionId, message: String) {
        if let Some(connection) = self.registry.find_by_connection(connection_id) {
            connection.handle.emit(ServerEvent::Error { code: 0, message });
        }
    }

    async fn dispatch(
        &self,
        connection: &DeviceConnection,
        command: ClientCommand,
    ) -> Result<(), HubError> {
        match command {
            ClientCommand::JoinConversation { conversation_id } => {
                self.join_conversation(connection, &conversation_id).await
            }
            ClientCommand::LeaveConversation { conversation_id } => {
                self.topics.unsubscribe(
                    &Topic::Conversation(conversation_id),
                    connection.connection_id(),
                );
                Ok(())
            }
            ClientCommand::SendTypingIndicator {
                conversation_id,
                is_typing,
            } => self.send_typing(connection, conversation_id, is_typing),
            ClientCommand::AcknowledgeMessage { message_id } => {
                let user_id = connection
                    .user_id()
                    .ok_or(HubError::AuthenticationMissing)?;
                self.messages.mark_delivered(&message_id, user_id).await?;
                Ok(())
            }
            ClientCommand::RequestDeviceSync {
                conversation_id,
                since_timestamp,
                chunk_size,
            } => self
                .sync
                .request_sync(connection, conversation_id, since_timestamp, chunk_size),
            ClientCommand::SendDeviceSyncData {
                to_device_id,
                conversation_id,
                messages,
                chunk_index,
                total_chunks,
                is_last_chunk,
            } => self.sync.send_sync_data(
                connection,
                &to_device_id,
                conversation_id,
                messages,
                chunk_index,
                total_chunks,
                is_last_chunk,
            ),
            ClientCommand::GetConnectedDevices => self.get_connected_devices(connection),
            ClientCommand::CreateRoom { conversation_id } => {
                self.create_room(connection, &conversation_id).await
            }
            ClientCommand::JoinRoom { room_id } => self.join_room(connection, &room_id).await,
            ClientCommand::JoinRoomAsGuest {
                invite_key,
                display_name,
            } => {
                self.join_room_as_guest(connection, &invite_key, display_name)
                    .await
            }
            ClientCommand::LeaveRoom { room_id, reason } => {
                self.leave_room_inner(
                    connection,
                    &room_id,
                    reason.as_deref().unwrap_or("left"),
                );
                Ok(())
            }
            ClientCommand::GetRoomParticipants { room_id } => {
                self.get_room_participants(connection, &room_id).await
            }
            ClientCommand::SendRoomOffer { room_id, sdp } => {
                self.signaling.send_room_offer(connection, &room_id, &sdp)
            }
            ClientCommand::SendOffer {
                to_device_id,
                room_id,
                sdp,
            } => self
                .signaling
                .send_offer(connection, &to_device_id, &room_id, &sdp),
            ClientCommand::SendRoomIceCandidate {
                room_id,
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => self.signaling.send_room_ice_candidate(
                connection,
                &room_id,
                &candidate,
                sdp_mid.as_deref(),
                sdp_m_line_index,
            ),
            ClientCommand::SendIceCandidate {
                to_device_id,
                room_id,
                candidate,
                sdp_mid,
                sdp_m_line_index,
            } => self.signaling.send_ice_candidate(
                connection,
                &to_device_id,
                room_id.as_ref(),
                &candidate,
                sdp_mid.as_deref(),
                sdp_m_line_index,
            ),
            ClientCommand::SendAnswer {
                to_device_id,
                room_id,
                sdp,
            } => self
                .signaling
                .send_answer(connection, &to_device_id, room_id.as_ref(), &sdp),
        }
    }

    /// Subscribe to a conversation topic on demand (clients re-issue this
    /// when they open a conversation screen) and replay presence
    /// bootstrap for it.
    async fn join_conversation(
        &self,
        connection: &DeviceConnection,
        conversation_id: &ConversationId,
    ) -> Result<(), HubError> {
        let user_id = connection
            .user_id()
            .ok_or(HubError::AuthenticationMissing)?;
        if !self
            .conversations
            .is_participant(conversation_id, user_id)
            .await?
        {
            return Err(HubError::NotAParticipant(conversation_id.to_string()));
        }

        let topic = Topic::Conversation(conversation_id.clone());
        self.topics.subscribe(topic.clone(), &connection.handle);
        let published = self.topics.publish(
            &topic,
            &ServerEvent::UserOnline {
                user_id: user_id.clone(),
            },
            Some(connection.connection_id()),
        );
        self.metrics.record_published(published);

        if let Some(summary) = self
            .conversations
            .conversation_with_participants(conversation_id)
            .await?
        {
            bootstrap_online_members(&connection.handle, user_id, std::slice::from_ref(&summary));
        }
        Ok(())
    }

    fn send_typing(
        &self,
        connection: &DeviceConnection,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> Result<(), HubError> {
        let user_id = connection
            .user_id()
            .ok_or(HubError::AuthenticationMissing)?;
        let published = self.topics.publish(
            &Topic::Conversation(conversation_id.clone()),
            &ServerEvent::TypingIndicator {
                conversation_id,
                user_id: user_id.clone(),
                is_typing,
            },
            Some(connection.connection_id()),
        );
        self.metrics.record_published(published);
        Ok(())
    }

    fn get_connected_devices(&self, connection: &DeviceConnection) -> Result<(), HubError> {
        let user_id = connection
            .user_id()
            .ok_or(HubError::AuthenticationMissing)?;
        let mut devices: Vec<ConnectedDevice> = self
            .registry
            .devices_of(user_id)
            .into_iter()
            .map(|device| ConnectedDevice {
                is_current_device: device.device_id == connection.device_id,
                connected_at: device.connected_at,
                device_id: device.device_id,
            })
            .collect();
        devices.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        connection.handle.emit(ServerEvent::ConnectedDevices { devices });
        Ok(())
    }

    /// Build the roster entry for a joining device. Directory lookups are
    /// best-effort: a missing or failing directory falls back to the
    /// display name presented at connect.
    async fn participant_view_for(&self, connection: &DeviceConnection) -> ParticipantView {
        let fallback = ParticipantView {
            device_id: connection.device_id.clone(),
            user_id: connection.user_id().cloned(),
            display_name: connection.identity.display_name().to_string(),
            avatar_url: None,
            is_online: true,
            last_seen_at: None,
        };
        let Some(user_id) = connection.user_id() else {
            return fallback;
        };
        match self.directory.get_user(user_id).await {
            Ok(Some(profile)) => ParticipantView {
                device_id: connection.device_id.clone(),
                user_id: Some(user_id.clone()),
                display_name: profile.username,
                avatar_url: profile.avatar_url,
                is_online: true,
                last_seen_at: profile.last_seen_at,
            },
            Ok(None) => fallback,
            Err(err) => {
                warn!(
                    target: "hub.rooms",
                    user_id = %user_id,
                    error = %err,
                    "Directory lookup failed, using connect-time display name"
                );
                fallback
            }
        }
    }

    async fn create_room(
        &self,
        connection: &DeviceConnection,
        conversation_id: &ConversationId,
    ) -> Result<(), HubError> {
        let user_id = connection
            .user_id()
            .ok_or(HubError::AuthenticationMissing)?;
        if !self
            .conversations
            .is_participant(conversation_id, user_id)
            .await?
        {
            return Err(HubError::NotAParticipant(conversation_id.to_string()));
        }

        let view = self.participant_view_for(connection).await;
        let outcome = self
            .rooms
            .create_or_join(conversation_id, view.clone(), user_id)?;
        if let Some(invite_key) = &outcome.invite_key {
            self.metrics.room_created();
            connection.handle.emit(ServerEvent::RoomCreated {
                room: outcome.info.clone(),
                invite_key: invite_key.clone(),
            });
            info!(
                target: "hub.rooms",
                room_id = %conversation_id,
                created_by = %user_id,
                "Room created"
            );
        }
        self.after_join(connection, conversation_id, view, &outcome)
            .await;
        Ok(())
    }

    async fn join_room(
        &self,
        connection: &DeviceConnection,
        room_id: &ConversationId,
    ) -> Result<(), HubError> {
        let user_id = connection
            .user_id()
            .ok_or_else(|| HubError::NotAParticipant(room_id.to_string()))?;
        if !self.conversations.is_participant(room_id, user_id).await? {
            return Err(HubError::NotAParticipant(room_id.to_string()));
        }

        let view = self.participant_view_for(connection).await;
        let outcome = self.rooms.join_existing(room_id, view.clone())?;
        self.after_join(connection, room_id, view, &outcome).await;
        Ok(())
    }

    async fn join_room_as_guest(
        &self,
        connection: &DeviceConnection,
        invite_key: &str,
        display_name: String,
    ) -> Result<(), HubError> {
        let room_id = self
            .rooms
            .find_by_invite_key(invite_key)
            .ok_or(HubError::InvalidInviteKey)?;

        let view = ParticipantView {
            device_id: connection.device_id.clone(),
            user_id: None,
            display_name,
            avatar_url: None,
            is_online: true,
            last_seen_at: None,
        };
        let outcome = match self.rooms.join_existing(&room_id, view.clone()) {
            Ok(outcome) => outcome,
            // Room emptied out between key lookup and join. The key died
            // with it, so the credential is no longer valid.
            Err(HubError::RoomNotFound(_)) => return Err(HubError::InvalidInviteKey),
            Err(err) => return Err(err),
        };
        info!(
            target: "hub.rooms",
            room_id = %room_id,
            device_id = %connection.device_id,
            "Guest admitted by invite key"
        );
        self.after_join(connection, &room_id, view, &outcome).await;
        Ok(())
    }

    /// Post-join fanout, shared by all three join paths. Duplicate joins
    /// do nothing.
    async fn after_join(
        &self,
        connection: &DeviceConnection,
        room_id: &ConversationId,
        view: ParticipantView,
        outcome: &JoinOutcome,
    ) {
        if !outcome.newly_joined {
            debug!(
                target: "hub.rooms",
                room_id = %room_id,
                device_id = %connection.device_id,
                "Duplicate room join, no-op"
            );
            return;
        }

        let room_topic = Topic::Room(room_id.clone());
        self.topics.subscribe(room_topic.clone(), &connection.handle);

        let joined = ServerEvent::ParticipantJoined {
            room_id: room_id.clone(),
            participant: view.clone(),
        };
        let mut published = self
            .topics
            .publish(&room_topic, &joined, Some(connection.connection_id()));
        // Conversation members not in the call see the roster change too.
        published += self.topics.publish(
            &Topic::Conversation(room_id.clone()),
            &joined,
            Some(connection.connection_id()),
        );
        self.metrics.record_published(published);

        // The joiner gets the full snapshot plus one event per existing
        // participant, mirroring what earlier joiners saw incrementally.
        connection.handle.emit(ServerEvent::RoomJoined {
            room: outcome.info.clone(),
        });
        for existing in &outcome.info.participants {
            if existing.device_id != view.device_id {
                connection.handle.emit(ServerEvent::ParticipantJoined {
                    room_id: room_id.clone(),
                    participant: existing.clone(),
                });
            }
        }

        if outcome.participant_count == 1 {
            self.ring_conversation_members(connection, room_id, &view).await;
        }

        info!(
            target: "hub.rooms",
            room_id = %room_id,
            device_id = %connection.device_id,
            participants = outcome.participant_count,
            "Participant joined room"
        );
    }

    /// First participant entered: ring every other conversation member on
    /// all their devices, plus out-of-band alerts for the ones the live
    /// event may not reach. All of it is best-effort.
    async fn ring_conversation_members(
        &self,
        connection: &DeviceConnection,
        room_id: &ConversationId,
        caller: &ParticipantView,
    ) {
        let Some(caller_id) = connection.user_id() else {
            return;
        };
        let summary = match self
            .conversations
            .conversation_with_participants(room_id)
            .await
        {
            Ok(Some(summary)) => summary,
            Ok(None) => return,
            Err(err) => {
                warn!(
                    target: "hub.rooms",
                    room_id = %room_id,
                    error = %err,
                    "Membership lookup failed, call not announced"
                );
                return;
            }
        };

        let event = ServerEvent::CallInitiated {
            room_id: room_id.clone(),
            caller: caller.clone(),
        };
        for member in &summary.participants {
            if member.user_id == *caller_id {
                continue;
            }
            for device in self.registry.devices_of(&member.user_id) {
                device.handle.emit(event.clone());
            }
            self.send_call_alerts(&member.user_id, room_id, caller_id, caller)
                .await;
        }
    }

    async fn send_call_alerts(
        &self,
        callee: &UserId,
        room_id: &ConversationId,
        caller_id: &UserId,
        caller: &ParticipantView,
    ) {
        let data = serde_json::json!({
            "type": "call",
            "conversationId": room_id,
            "callerId": caller_id,
            "callerName": caller.display_name,
        });
        if let Err(err) = self
            .notifier
            .send_notification(
                callee,
                &caller.display_name,
                "Incoming call",
                caller.avatar_url.as_deref(),
                data,
            )
            .await
        {
            warn!(
                target: "hub.rooms",
                user_id = %callee,
                error = %err,
                "Call push notification failed"
            );
        }
        if let Err(err) = self
            .notifier
            .send_call_alert(callee, &caller.display_name, room_id)
            .await
        {
            warn!(
                target: "hub.rooms",
                user_id = %callee,
                error = %err,
                "Call alert failed"
            );
        }
    }

    /// Leave a room: remove the participant, unsubscribe from the room
    /// topic and broadcast the departure. A room emptied by this leave is
    /// destroyed and nothing is broadcast (there is no one left in it to
    /// tell). No-op when the device was not in the room.
    fn leave_room_inner(
        &self,
        connection: &DeviceConnection,
        room_id: &ConversationId,
        reason: &str,
    ) {
        let Some(outcome) = self.rooms.leave(room_id, &connection.device_id) else {
            return;
        };
        self.topics
            .unsubscribe(&Topic::Room(room_id.clone()), connection.connection_id());

        if outcome.destroyed {
            self.metrics.room_destroyed();
            info!(
                target: "hub.rooms",
                room_id = %room_id,
                "Room destroyed (last participant left)"
            );
            return;
        }

        let event = ServerEvent::ParticipantLeft {
            room_id: room_id.clone(),
            participant: outcome.view,
            reason: reason.to_string(),
        };
        let mut published = self.topics.publish(
            &Topic::Room(room_id.clone()),
            &event,
            Some(connection.connection_id()),
        );
        published += self.topics.publish(
            &Topic::Conversation(room_id.clone()),
            &event,
            Some(connection.connection_id()),
        );
        self.metrics.record_published(published);

        info!(
            target: "hub.rooms",
            room_id = %room_id,
            device_id = %connection.device_id,
            remaining = outcome.remaining,
            reason = reason,
            "Participant left room"
        );
    }

    /// Roster read. Users must be conversation members; guests must
    /// currently be in the room.
    async fn get_room_participants(
        &self,
        connection: &DeviceConnection,
        room_id: &ConversationId,
    ) -> Result<(), HubError> {
        match connection.user_id() {
            Some(user_id) => {
                if !self.conversations.is_participant(room_id, user_id).await? {
                    return Err(HubError::NotAParticipant(room_id.to_string()));
                }
            }
            None => {
                if !self.rooms.contains_participant(room_id, &connection.device_id) {
                    return Err(HubError::NotAParticipant(room_id.to_string()));
                }
            }
        }
        connection.handle.emit(ServerEvent::RoomParticipants {
            room_id: room_id.clone(),
            participants: self.rooms.participants(room_id),
        });
        Ok(())
    }
}

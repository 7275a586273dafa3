//! Presence tracking.
//!
//! Presence is derived, never stored: a user is online while they have at
//! least one registered device. Only the 0 -> 1 device transition
//! announces `UserOnline` and only the 1 -> 0 transition announces
//! `UserOffline`; adding or removing extra devices notifies the user's
//! own sibling devices instead. Guests never appear here at all.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use common::types::UserId;

use crate::client::ClientHandle;
use crate::collab::{ConversationStore, ConversationSummary, UserDirectory};
use crate::events::ServerEvent;
use crate::metrics::HubMetrics;
use crate::registry::{ConnectionRegistry, DeviceConnection, Registered, Unregistered};
use crate::topics::{Topic, TopicRegistry};

/// Reacts to device registration edges
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    topics: Arc<TopicRegistry>,
    conversations: Arc<dyn ConversationStore>,
    directory: Arc<dyn UserDirectory>,
    metrics: Arc<HubMetrics>,
}

impl PresenceTracker {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        topics: Arc<TopicRegistry>,
        conversations: Arc<dyn ConversationStore>,
        directory: Arc<dyn UserDirectory>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            registry,
            topics,
            conversations,
            directory,
            metrics,
        }
    }

    /// Handle a completed registration: subscribe the device to its
    /// user's conversation topics, then announce either the online edge
    /// or the new sibling device.
    #[instrument(skip_all, fields(device_id = %connection.device_id))]
    pub async fn device_registered(
        &self,
        connection: &DeviceConnection,
        registered: &Registered,
    ) {
        let Some(user_id) = connection.user_id() else {
            return;
        };

        let conversations = match self.conversations.user_conversations(user_id).await {
            Ok(conversations) => conversations,
            Err(err) => {
                warn!(
                    target: "hub.presence",
                    user_id = %user_id,
                    error = %err,
                    "Conversation lookup failed, device gets no topic subscriptions"
                );
                Vec::new()
            }
        };

        for conversation in &conversations {
            self.topics
                .subscribe(Topic::Conversation(conversation.id.clone()), &connection.handle);
        }

        if registered.user_was_online {
            self.notify_siblings_connected(connection, registered, user_id);
        } else {
            self.announce_online(connection, user_id, &conversations).await;
        }
    }

    async fn announce_online(
        &self,
        connection: &DeviceConnection,
        user_id: &UserId,
        conversations: &[ConversationSummary],
    ) {
        if let Err(err) = self.directory.set_online_status(user_id, true).await {
            warn!(
                target: "hub.presence",
                user_id = %user_id,
                error = %err,
                "Failed to persist online flag"
            );
        }

        let event = ServerEvent::UserOnline {
            user_id: user_id.clone(),
        };
        for conversation in conversations {
            let topic = Topic::Conversation(conversation.id.clone());
            let published = self
                .topics
                .publish(&topic, &event, Some(connection.connection_id()));
            self.metrics.record_published(published);
        }

        // Bootstrap: tell the fresh device which co-members are already
        // online, since it missed their online edges.
        bootstrap_online_members(&connection.handle, user_id, conversations);

        info!(target: "hub.presence", user_id = %user_id, "User online");
    }

    fn notify_siblings_connected(
        &self,
        connection: &DeviceConnection,
        registered: &Registered,
        user_id: &UserId,
    ) {
        let siblings: Vec<DeviceConnection> = self
            .registry
            .devices_of(user_id)
            .into_iter()
            .filter(|sibling| sibling.device_id != connection.device_id)
            .collect();
        // A single-device reconnect lands here (the user never appeared
        // offline) but has no siblings to tell and none to announce.
        if siblings.is_empty() {
            return;
        }

        let event = ServerEvent::DeviceConnected {
            user_id: user_id.clone(),
            device_id: connection.device_id.clone(),
            total_devices: registered.total_user_devices,
        };
        for sibling in &siblings {
            sibling.handle.emit(event.clone());
        }

        connection.handle.emit(ServerEvent::OtherDevicesAvailable {
            other_device_count: siblings.len(),
            total_devices: registered.total_user_devices,
            other_device_ids: siblings
                .iter()
                .map(|sibling| sibling.device_id.clone())
                .collect(),
        });
    }

    /// Handle a completed unregistration: announce the offline edge when
    /// the last device left, otherwise tell the remaining siblings.
    #[instrument(skip_all, fields(device_id = %unregistered.connection.device_id))]
    pub async fn device_unregistered(&self, unregistered: &Unregistered) {
        let connection = &unregistered.connection;
        let Some(user_id) = connection.user_id() else {
            return;
        };

        if unregistered.remaining_user_devices > 0 {
            let event = ServerEvent::DeviceDisconnected {
                user_id: user_id.clone(),
                device_id: connection.device_id.clone(),
                total_devices: unregistered.remaining_user_devices,
            };
            for sibling in self.registry.devices_of(user_id) {
                sibling.handle.emit(event.clone());
            }
            return;
        }

        let last_seen_at = Utc::now();
        if let Err(err) = self.directory.set_online_status(user_id, false).await {
            warn!(
                target: "hub.presence",
                user_id = %user_id,
                error = %err,
                "Failed to persist offline flag"
            );
        }

        match self.conversations.user_conversations(user_id).await {
            Ok(conversations) => {
                let event = ServerEvent::UserOffline {
                    user_id: user_id.clone(),
                    last_seen_at,
                };
                for conversation in conversations {
                    let topic = Topic::Conversation(conversation.id);
                    let published =
                        self.topics
                            .publish(&topic, &event, Some(connection.connection_id()));
                    self.metrics.record_published(published);
                }
            }
            Err(err) => {
                warn!(
                    target: "hub.presence",
                    user_id = %user_id,
                    error = %err,
                    "Conversation lookup failed, offline edge not broadcast"
                );
            }
        }

        info!(target: "hub.presence", user_id = %user_id, "User offline");
    }
}

/// Emit `UserOnline` to `handle` for every already-online co-member
pub(crate) fn bootstrap_online_members(
    handle: &ClientHandle,
    user_id: &UserId,
    conversations: &[ConversationSummary],
) {
    for conversation in conversations {
        for member in &conversation.participants {
            if member.user_id != *user_id && member.is_online {
                handle.emit(ServerEvent::UserOnline {
                    user_id: member.user_id.clone(),
                });
            }
        }
    }
}

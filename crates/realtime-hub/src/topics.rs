//! Broadcast topic registry.
//!
//! A topic is a named fanout group: one per conversation and one per
//! conference room. Membership is tracked both ways (topic -> members,
//! connection -> topics) so a disconnect can drop every subscription in
//! one pass. Publishing snapshots the member list before sending, so a
//! subscribe or unsubscribe racing a publish never blocks it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use common::types::{ConnectionId, ConversationId};

use crate::client::ClientHandle;
use crate::events::ServerEvent;

/// A fanout group name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// All connected devices of a conversation's members
    Conversation(ConversationId),
    /// All devices currently in a conference room
    Room(ConversationId),
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Conversation(id) => write!(f, "conversation:{id}"),
            Topic::Room(id) => write!(f, "room:{id}"),
        }
    }
}

/// Concurrent topic membership table
#[derive(Debug, Default)]
pub struct TopicRegistry {
    members: DashMap<Topic, HashMap<ConnectionId, ClientHandle>>,
    subscriptions: DashMap<ConnectionId, HashSet<Topic>>,
}

impl TopicRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a topic. Idempotent.
    pub fn subscribe(&self, topic: Topic, handle: &ClientHandle) {
        let connection_id = handle.connection_id();
        self.members
            .entry(topic.clone())
            .or_default()
            .insert(connection_id, handle.clone());
        self.subscriptions
            .entry(connection_id)
            .or_default()
            .insert(topic);
    }

    /// Remove a connection from a topic. Empty topics are dropped.
    pub fn unsubscribe(&self, topic: &Topic, connection_id: ConnectionId) {
        if let Entry::Occupied(mut occupied) = self.members.entry(topic.clone()) {
            occupied.get_mut().remove(&connection_id);
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
        if let Entry::Occupied(mut occupied) = self.subscriptions.entry(connection_id) {
            occupied.get_mut().remove(topic);
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
    }

    /// Remove a connection from every topic it subscribed to
    pub fn drop_connection(&self, connection_id: ConnectionId) {
        let topics = self
            .subscriptions
            .remove(&connection_id)
            .map(|(_, topics)| topics)
            .unwrap_or_default();
        for topic in topics {
            if let Entry::Occupied(mut occupied) = self.members.entry(topic) {
                occupied.get_mut().remove(&connection_id);
                if occupied.get().is_empty() {
                    occupied.remove();
                }
            }
        }
    }

    /// Send an event to every topic member, optionally excluding one
    /// connection (usually the originator). Returns the number of
    /// recipients the event was queued for. Publishing to a topic with
    /// no members is a no-op.
    pub fn publish(
        &self,
        topic: &Topic,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let recipients: Vec<ClientHandle> = match self.members.get(topic) {
            Some(members) => members
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(_, handle)| handle.clone())
                .collect(),
            None => return 0,
        };
        // Member lock released; emits are non-blocking fire-and-forget.
        let delivered = recipients.len();
        for handle in recipients {
            handle.emit(event.clone());
        }
        trace!(
            target: "hub.topics",
            topic = %topic,
            delivered,
            "Published event"
        );
        delivered
    }

    /// Number of members currently subscribed to a topic
    #[must_use]
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.members.get(topic).map_or(0, |members| members.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::UserId;
    use tokio::sync::mpsc;

    fn subscriber() -> (ClientHandle, mpsc::Receiver<ServerEvent>) {
        ClientHandle::channel(ConnectionId::new(), 16)
    }

    fn online(user: &str) -> ServerEvent {
        ServerEvent::UserOnline {
            user_id: UserId::new(user),
        }
    }

    #[test]
    fn topics_display_with_kind_prefix() {
        let id = ConversationId::new("c1");
        assert_eq!(Topic::Conversation(id.clone()).to_string(), "conversation:c1");
        assert_eq!(Topic::Room(id).to_string(), "room:c1");
    }

    #[tokio::test]
    async fn publish_reaches_all_members_except_excluded() {
        let registry = TopicRegistry::new();
        let topic = Topic::Conversation(ConversationId::new("c1"));
        let (alice, mut alice_rx) = subscriber();
        let (bob, mut bob_rx) = subscriber();
        registry.subscribe(topic.clone(), &alice);
        registry.subscribe(topic.clone(), &bob);

        let delivered = registry.publish(&topic, &online("u1"), Some(alice.connection_id()));

        assert_eq!(delivered, 1);
        assert_eq!(bob_rx.recv().await.unwrap(), online("u1"));
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn publish_to_empty_topic_is_noop() {
        let registry = TopicRegistry::new();
        let topic = Topic::Room(ConversationId::new("r1"));
        assert_eq!(registry.publish(&topic, &online("u1"), None), 0);
    }

    #[tokio::test]
    async fn one_dead_member_does_not_stop_the_broadcast() {
        let registry = TopicRegistry::new();
        let topic = Topic::Conversation(ConversationId::new("c1"));
        let (dead, dead_rx) = subscriber();
        let (live, mut live_rx) = subscriber();
        registry.subscribe(topic.clone(), &dead);
        registry.subscribe(topic.clone(), &live);
        drop(dead_rx);

        registry.publish(&topic, &online("u1"), None);

        assert_eq!(live_rx.recv().await.unwrap(), online("u1"));
    }

    #[test]
    fn unsubscribe_drops_empty_topics() {
        let registry = TopicRegistry::new();
        let topic = Topic::Conversation(ConversationId::new("c1"));
        let (handle, _rx) = subscriber();
        registry.subscribe(topic.clone(), &handle);
        assert_eq!(registry.subscriber_count(&topic), 1);

        registry.unsubscribe(&topic, handle.connection_id());
        assert_eq!(registry.subscriber_count(&topic), 0);
    }

    #[test]
    fn drop_connection_clears_every_subscription() {
        let registry = TopicRegistry::new();
        let conversation = Topic::Conversation(ConversationId::new("c1"));
        let room = Topic::Room(ConversationId::new("c1"));
        let (handle, _rx) = subscriber();
        registry.subscribe(conversation.clone(), &handle);
        registry.subscribe(room.clone(), &handle);

        registry.drop_connection(handle.connection_id());

        assert_eq!(registry.subscriber_count(&conversation), 0);
        assert_eq!(registry.subscriber_count(&room), 0);
    }

    #[test]
    fn subscribe_is_idempotent() {
        let registry = TopicRegistry::new();
        let topic = Topic::Conversation(ConversationId::new("c1"));
        let (handle, _rx) = subscriber();
        registry.subscribe(topic.clone(), &handle);
        registry.subscribe(topic.clone(), &handle);
        assert_eq!(registry.subscriber_count(&topic), 1);
    }
}

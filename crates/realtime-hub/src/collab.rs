//! Collaborator interfaces.
//!
//! The hub holds no persistent state of its own. Conversation membership,
//! message history, user profiles and push notifications all live behind
//! these traits, wired in at startup. Side-effecting collaborator failures
//! (a push notification that cannot be sent, an online flag that cannot be
//! persisted) are logged and swallowed so they never abort the client
//! operation that triggered them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use common::types::{ConversationId, MessageId, UserId};

/// Opaque failure from a collaborator call
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CollabError(String);

impl CollabError {
    /// Wrap any failure description
    #[must_use]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A user profile as known to the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub description: Option<String>,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// A conversation member with their persisted online flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMember {
    pub user_id: UserId,
    pub is_online: bool,
}

/// A conversation and its membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub participants: Vec<ConversationMember>,
}

/// A persisted message awaiting delivery to some recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: UserProfile,
    pub content: String,
    pub message_type: String,
    pub sent_at: DateTime<Utc>,
    pub media_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// Conversation membership queries
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Whether `user_id` is a member of `conversation_id`
    async fn is_participant(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<bool, CollabError>;

    /// All conversations `user_id` belongs to
    async fn user_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationSummary>, CollabError>;

    /// One conversation with its full membership, if it exists
    async fn conversation_with_participants(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ConversationSummary>, CollabError>;
}

/// Message persistence queries and delivery bookkeeping
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages not yet delivered to `user_id`, optionally scoped to one
    /// conversation, ordered by send time
    async fn pending_messages(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
    ) -> Result<Vec<PendingMessage>, CollabError>;

    /// Record delivery of `message_id` to `user_id`. Must be idempotent:
    /// repeated calls for the same pair are a no-op.
    async fn mark_delivered(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
    ) -> Result<(), CollabError>;
}

/// User profile lookups and online flag persistence
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Profile for `user_id`, if known
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserProfile>, CollabError>;

    /// Persist the online flag (and `last_seen_at` on the offline edge)
    async fn set_online_status(&self, user_id: &UserId, online: bool) -> Result<(), CollabError>;
}

/// Best-effort out-of-band notifications (push, ringers)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Generic push notification
    async fn send_notification(
        &self,
        user_id: &UserId,
        title: &str,
        body: &str,
        image_url: Option<&str>,
        data: serde_json::Value,
    ) -> Result<(), CollabError>;

    /// High-priority incoming-call alert (rings even when the app is
    /// backgrounded)
    async fn send_call_alert(
        &self,
        user_id: &UserId,
        caller_name: &str,
        session_id: &ConversationId,
    ) -> Result<(), CollabError>;
}

/// Development stand-ins used by the binary until a real backend is wired.
///
/// Every authenticated user is treated as a member of every conversation,
/// the directory and message store are empty, and notifications are logged
/// instead of sent. Useful for running the hub against a local client.
pub mod unbacked {
    use super::{
        async_trait, info, CollabError, ConversationId, ConversationStore, ConversationSummary,
        MessageId, MessageStore, Notifier, PendingMessage, UserDirectory, UserId, UserProfile,
    };

    /// Admits every user to every conversation
    #[derive(Debug, Default)]
    pub struct OpenConversationStore;

    #[async_trait]
    impl ConversationStore for OpenConversationStore {
        async fn is_participant(
            &self,
            _conversation_id: &ConversationId,
            _user_id: &UserId,
        ) -> Result<bool, CollabError> {
            Ok(true)
        }

        async fn user_conversations(
            &self,
            _user_id: &UserId,
        ) -> Result<Vec<ConversationSummary>, CollabError> {
            Ok(Vec::new())
        }

        async fn conversation_with_participants(
            &self,
            _conversation_id: &ConversationId,
        ) -> Result<Option<ConversationSummary>, CollabError> {
            Ok(None)
        }
    }

    /// Holds no messages
    #[derive(Debug, Default)]
    pub struct EmptyMessageStore;

    #[async_trait]
    impl MessageStore for EmptyMessageStore {
        async fn pending_messages(
            &self,
            _user_id: &UserId,
            _conversation_id: Option<&ConversationId>,
        ) -> Result<Vec<PendingMessage>, CollabError> {
            Ok(Vec::new())
        }

        async fn mark_delivered(
            &self,
            _message_id: &MessageId,
            _user_id: &UserId,
        ) -> Result<(), CollabError> {
            Ok(())
        }
    }

    /// Knows no users
    #[derive(Debug, Default)]
    pub struct EmptyDirectory;

    #[async_trait]
    impl UserDirectory for EmptyDirectory {
        async fn get_user(&self, _user_id: &UserId) -> Result<Option<UserProfile>, CollabError> {
            Ok(None)
        }

        async fn set_online_status(
            &self,
            _user_id: &UserId,
            _online: bool,
        ) -> Result<(), CollabError> {
            Ok(())
        }
    }

    /// Logs notifications instead of sending them
    #[derive(Debug, Default)]
    pub struct LoggingNotifier;

    #[async_trait]
    impl Notifier for LoggingNotifier {
        async fn send_notification(
            &self,
            user_id: &UserId,
            title: &str,
            _body: &str,
            _image_url: Option<&str>,
            _data: serde_json::Value,
        ) -> Result<(), CollabError> {
            info!(
                target: "hub.notify",
                user_id = %user_id,
                title = %title,
                "Notification (unbacked, not sent)"
            );
            Ok(())
        }

        async fn send_call_alert(
            &self,
            user_id: &UserId,
            caller_name: &str,
            session_id: &ConversationId,
        ) -> Result<(), CollabError> {
            info!(
                target: "hub.notify",
                user_id = %user_id,
                caller_name = %caller_name,
                session_id = %session_id,
                "Call alert (unbacked, not sent)"
            );
            Ok(())
        }
    }
}

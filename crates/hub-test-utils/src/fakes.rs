//! In-memory implementations of the collaborator traits.
//!
//! State lives behind plain mutexes; locks are held only for the duration
//! of a map operation, never across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use common::types::{ConversationId, MessageId, UserId};
use realtime_hub::collab::{
    CollabError, ConversationMember, ConversationStore, ConversationSummary, MessageStore,
    Notifier, PendingMessage, UserDirectory, UserProfile,
};

/// Directory of user profiles with mutable online flags
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: Mutex<HashMap<UserId, UserProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, user_id: &str, username: &str) {
        let user_id = UserId::new(user_id);
        self.users.lock().unwrap().insert(
            user_id.clone(),
            UserProfile {
                user_id,
                username: username.to_string(),
                avatar_url: None,
                description: None,
                is_online: false,
                last_seen_at: None,
            },
        );
    }

    /// The persisted online flag, as the hub last wrote it
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .map(|profile| profile.is_online)
            .unwrap_or(false)
    }

    pub fn last_seen(&self, user_id: &UserId) -> Option<chrono::DateTime<Utc>> {
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .and_then(|profile| profile.last_seen_at)
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserProfile>, CollabError> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn set_online_status(&self, user_id: &UserId, online: bool) -> Result<(), CollabError> {
        let mut users = self.users.lock().unwrap();
        if let Some(profile) = users.get_mut(user_id) {
            profile.is_online = online;
            if !online {
                profile.last_seen_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

/// Conversation membership table. Online flags in summaries come from the
/// shared directory, matching how a real store would join the two.
#[derive(Debug)]
pub struct InMemoryConversationStore {
    directory: Arc<InMemoryDirectory>,
    conversations: Mutex<HashMap<ConversationId, Vec<UserId>>>,
}

impl InMemoryConversationStore {
    pub fn new(directory: Arc<InMemoryDirectory>) -> Arc<Self> {
        Arc::new(Self {
            directory,
            conversations: Mutex::new(HashMap::new()),
        })
    }

    pub fn add_conversation(&self, conversation_id: &str, members: &[&str]) {
        self.conversations.lock().unwrap().insert(
            ConversationId::new(conversation_id),
            members.iter().map(|member| UserId::new(*member)).collect(),
        );
    }

    fn summary(&self, id: &ConversationId, members: &[UserId]) -> ConversationSummary {
        ConversationSummary {
            id: id.clone(),
            participants: members
                .iter()
                .map(|user_id| ConversationMember {
                    user_id: user_id.clone(),
                    is_online: self.directory.is_online(user_id),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn is_participant(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
    ) -> Result<bool, CollabError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .is_some_and(|members| members.contains(user_id)))
    }

    async fn user_conversations(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<ConversationSummary>, CollabError> {
        let conversations = self.conversations.lock().unwrap();
        let mut summaries: Vec<ConversationSummary> = conversations
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .map(|(id, members)| self.summary(id, members))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn conversation_with_participants(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<ConversationSummary>, CollabError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .map(|members| self.summary(conversation_id, members)))
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message: PendingMessage,
    recipient: UserId,
    delivered: bool,
}

/// Message store with per-recipient delivery records
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<StoredMessage>>,
    mark_calls: Mutex<Vec<(MessageId, UserId)>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_pending(&self, recipient: &str, message: PendingMessage) {
        self.messages.lock().unwrap().push(StoredMessage {
            message,
            recipient: UserId::new(recipient),
            delivered: false,
        });
    }

    /// Whether `message_id` has been delivered to `recipient`
    pub fn is_delivered(&self, message_id: &MessageId, recipient: &UserId) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|stored| {
                stored.message.message_id == *message_id
                    && stored.recipient == *recipient
                    && stored.delivered
            })
    }

    /// Every `mark_delivered` call received, in order (for idempotency
    /// assertions)
    pub fn mark_calls(&self) -> Vec<(MessageId, UserId)> {
        self.mark_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn pending_messages(
        &self,
        user_id: &UserId,
        conversation_id: Option<&ConversationId>,
    ) -> Result<Vec<PendingMessage>, CollabError> {
        let messages = self.messages.lock().unwrap();
        let mut pending: Vec<PendingMessage> = messages
            .iter()
            .filter(|stored| {
                !stored.delivered
                    && stored.recipient == *user_id
                    && conversation_id
                        .map(|id| stored.message.conversation_id == *id)
                        .unwrap_or(true)
            })
            .map(|stored| stored.message.clone())
            .collect();
        pending.sort_by_key(|message| message.sent_at);
        Ok(pending)
    }

    async fn mark_delivered(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
    ) -> Result<(), CollabError> {
        self.mark_calls
            .lock()
            .unwrap()
            .push((message_id.clone(), user_id.clone()));
        let mut messages = self.messages.lock().unwrap();
        for stored in messages.iter_mut() {
            if stored.message.message_id == *message_id && stored.recipient == *user_id {
                // Idempotent: re-marking a delivered message changes nothing.
                stored.delivered = true;
            }
        }
        Ok(())
    }
}

/// A recorded push notification
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub user_id: UserId,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// A recorded call alert
#[derive(Debug, Clone, PartialEq)]
pub struct SentCallAlert {
    pub user_id: UserId,
    pub caller_name: String,
    pub session_id: ConversationId,
}

/// Notifier that records instead of sending
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<SentNotification>>,
    call_alerts: Mutex<Vec<SentCallAlert>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<SentNotification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn call_alerts(&self) -> Vec<SentCallAlert> {
        self.call_alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(
        &self,
        user_id: &UserId,
        title: &str,
        body: &str,
        _image_url: Option<&str>,
        data: serde_json::Value,
    ) -> Result<(), CollabError> {
        self.notifications.lock().unwrap().push(SentNotification {
            user_id: user_id.clone(),
            title: title.to_string(),
            body: body.to_string(),
            data,
        });
        Ok(())
    }

    async fn send_call_alert(
        &self,
        user_id: &UserId,
        caller_name: &str,
        session_id: &ConversationId,
    ) -> Result<(), CollabError> {
        self.call_alerts.lock().unwrap().push(SentCallAlert {
            user_id: user_id.clone(),
            caller_name: caller_name.to_string(),
            session_id: session_id.clone(),
        });
        Ok(())
    }
}

/// Build a minimal pending message fixture
pub fn pending_message(
    message_id: &str,
    conversation_id: &str,
    sender: &str,
    content: &str,
) -> PendingMessage {
    PendingMessage {
        message_id: MessageId::new(message_id),
        conversation_id: ConversationId::new(conversation_id),
        sender: UserProfile {
            user_id: UserId::new(sender),
            username: sender.to_string(),
            avatar_url: None,
            description: None,
            is_online: true,
            last_seen_at: None,
        },
        content: content.to_string(),
        message_type: "text".to_string(),
        sent_at: Utc::now(),
        media_url: None,
        thumbnail_url: None,
    }
}

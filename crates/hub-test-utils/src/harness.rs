//! Hub wired to in-memory fakes.

use std::sync::Arc;

use common::types::Identity;
use realtime_hub::events::ClientCommand;
use realtime_hub::hub::Hub;

use crate::client::TestClient;
use crate::fakes::{
    InMemoryConversationStore, InMemoryDirectory, InMemoryMessageStore, RecordingNotifier,
};

/// A hub instance backed entirely by in-memory fakes
pub struct TestHub {
    pub hub: Arc<Hub>,
    pub directory: Arc<InMemoryDirectory>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub messages: Arc<InMemoryMessageStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestHub {
    pub fn new() -> Self {
        let directory = InMemoryDirectory::new();
        let conversations = InMemoryConversationStore::new(Arc::clone(&directory));
        let messages = InMemoryMessageStore::new();
        let notifier = RecordingNotifier::new();
        // Method-call clone so each Arc<Concrete> unsizes to the
        // Arc<dyn Trait> the constructor expects.
        let hub = Hub::new(
            conversations.clone(),
            messages.clone(),
            directory.clone(),
            notifier.clone(),
        );
        Self {
            hub,
            directory,
            conversations,
            messages,
            notifier,
        }
    }

    /// Register a user in the directory and return the harness for
    /// chaining
    pub fn with_user(self, user_id: &str, username: &str) -> Self {
        self.directory.add_user(user_id, username);
        self
    }

    /// Register a conversation and its members
    pub fn with_conversation(self, conversation_id: &str, members: &[&str]) -> Self {
        self.conversations.add_conversation(conversation_id, members);
        self
    }

    /// Connect a device for an authenticated user
    pub async fn connect_user(&self, user_id: &str, device_id: &str) -> TestClient {
        let client = TestClient::new(device_id);
        self.hub
            .connect(
                Identity::User {
                    user_id: common::types::UserId::new(user_id),
                    display_name: user_id.to_string(),
                },
                client.device_id(),
                client.handle(),
            )
            .await;
        client
    }

    /// Connect a guest device
    pub async fn connect_guest(&self, display_name: &str, device_id: &str) -> TestClient {
        let client = TestClient::new(device_id);
        self.hub
            .connect(
                Identity::Guest {
                    display_name: display_name.to_string(),
                },
                client.device_id(),
                client.handle(),
            )
            .await;
        client
    }

    /// Issue a command as `client`
    pub async fn command(&self, client: &TestClient, command: ClientCommand) {
        self.hub.handle_command(client.connection_id(), command).await;
    }

    /// Disconnect `client`'s socket
    pub async fn disconnect(&self, client: &TestClient) {
        self.hub.disconnect(client.connection_id()).await;
    }
}

impl Default for TestHub {
    fn default() -> Self {
        Self::new()
    }
}

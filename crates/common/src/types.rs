//! Common data types for Crosswire components.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a user account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Create a user ID from any string-like value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier for a physical device (survives reconnects)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a device ID from any string-like value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a conversation. Conference rooms reuse the
/// identifier of the conversation they were started from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Create a conversation ID from any string-like value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a persisted message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Create a message ID from any string-like value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the underlying string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-socket identifier, minted fresh for every transport connection.
/// Distinct from [`DeviceId`]: a device that reconnects gets a new
/// connection ID but keeps its device ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Mint a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Identity presented when a connection is established.
///
/// Guests carry only a display name. They can join conference rooms via
/// invite key but never participate in persistent presence, conversation
/// membership, or message delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    /// Anonymous participant admitted by invite key only
    Guest {
        /// Name shown to other room participants
        display_name: String,
    },
    /// Authenticated user
    User {
        /// The account this connection belongs to
        user_id: UserId,
        /// Name shown to other room participants
        display_name: String,
    },
}

impl Identity {
    /// The user ID, if this identity is authenticated
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Identity::Guest { .. } => None,
            Identity::User { user_id, .. } => Some(user_id),
        }
    }

    /// The display name carried by either identity kind
    #[must_use]
    pub fn display_name(&self) -> &str {
        match self {
            Identity::Guest { display_name } | Identity::User { display_name, .. } => display_name,
        }
    }

    /// Whether this identity is an anonymous guest
    #[must_use]
    pub fn is_guest(&self) -> bool {
        matches!(self, Identity::Guest { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_serialize_transparently() {
        let id = ConversationId::new("conv-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"conv-42\"");

        let back: ConversationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn guest_identity_has_no_user_id() {
        let guest = Identity::Guest {
            display_name: "Visitor".to_string(),
        };
        assert!(guest.is_guest());
        assert_eq!(guest.user_id(), None);
        assert_eq!(guest.display_name(), "Visitor");
    }

    #[test]
    fn user_identity_exposes_user_id() {
        let user = Identity::User {
            user_id: UserId::new("u1"),
            display_name: "Alice".to_string(),
        };
        assert!(!user.is_guest());
        assert_eq!(user.user_id(), Some(&UserId::new("u1")));
    }
}

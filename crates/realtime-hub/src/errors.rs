//! Error types for the realtime hub.
//!
//! Every failed client operation is answered with a wire `Error` event
//! carrying a stable numeric code and a client-safe message. Internal
//! details (collaborator failures, state inconsistencies) are logged
//! server-side and never leak to clients.

use thiserror::Error;

use crate::collab::CollabError;

/// Errors surfaced by hub operations
#[derive(Debug, Error)]
pub enum HubError {
    /// Operation requires an authenticated user but the connection is a
    /// guest (or carries no identity at all)
    #[error("authentication missing")]
    AuthenticationMissing,

    /// Sender is not a member of the conversation or room it targeted
    #[error("not a participant of {0}")]
    NotAParticipant(String),

    /// No active conference room with this ID
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// Presented invite key matched no active room
    #[error("invalid invite key")]
    InvalidInviteKey,

    /// A collaborator call (store, directory, notifier) failed
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Stable numeric code carried on the wire `Error` event
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            HubError::AuthenticationMissing => 1,
            HubError::NotAParticipant(_) => 2,
            HubError::RoomNotFound(_) => 3,
            HubError::InvalidInviteKey => 4,
            HubError::Collaborator(_) | HubError::Internal(_) => 5,
        }
    }

    /// Client-safe message. Never includes collaborator or internal
    /// detail strings.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            HubError::AuthenticationMissing => "Authentication required".to_string(),
            HubError::NotAParticipant(_) => {
                "You are not a participant of this conversation".to_string()
            }
            HubError::RoomNotFound(_) => "Room not found".to_string(),
            HubError::InvalidInviteKey => "Invalid invite key".to_string(),
            HubError::Collaborator(_) | HubError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl From<CollabError> for HubError {
    fn from(err: CollabError) -> Self {
        HubError::Collaborator(err.to_string())
    }
}

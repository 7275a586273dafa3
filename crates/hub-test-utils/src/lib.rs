//! Test utilities for the Crosswire Realtime Hub.
//!
//! Provides in-memory fakes for the collaborator traits, a `TestClient`
//! that plays the role of a connected device without a real socket, and
//! a `TestHub` harness wiring the two together.

/// In-memory collaborator fakes
pub mod fakes;

/// Fake connected device
pub mod client;

/// Hub wired to fakes
pub mod harness;

pub use client::TestClient;
pub use fakes::{
    InMemoryConversationStore, InMemoryDirectory, InMemoryMessageStore, RecordingNotifier,
};
pub use harness::TestHub;

//! Crosswire Realtime Hub.
//!
//! A stateful WebSocket coordinator for a messaging and calling product.
//! The hub tracks which devices are connected, derives user presence from
//! that, fans events out to conversation and room topics, runs the
//! conference room lifecycle (created by the first join, destroyed by the
//! last leave) and relays WebRTC signaling and device-to-device history
//! sync without inspecting the payloads. Persistence, auth token
//! verification and push delivery live behind the [`collab`] traits.
//!
//! ```text
//! transport (axum ws)
//!     └── hub (facade, command dispatch)
//!          ├── registry   connections by socket / device / user
//!          ├── topics     conversation + room fanout groups
//!          ├── rooms      conference room table, invite keys
//!          ├── presence   online/offline edges, sibling devices
//!          ├── flush      pending message delivery on connect
//!          ├── signaling  SDP / ICE relay
//!          └── sync       device-to-device history relay
//! ```

/// Per-connection send handles
pub mod client;

/// Collaborator traits and DTOs
pub mod collab;

/// Environment configuration
pub mod config;

/// Error taxonomy and wire error codes
pub mod errors;

/// Wire protocol types
pub mod events;

/// Pending message flush
pub mod flush;

/// The hub facade
pub mod hub;

/// Atomic counters for the health endpoint
pub mod metrics;

/// Presence tracking
pub mod presence;

/// Connection registry
pub mod registry;

/// Conference room table
pub mod rooms;

/// WebRTC signaling relay
pub mod signaling;

/// Device history sync relay
pub mod sync;

/// Broadcast topics
pub mod topics;

/// WebSocket endpoint and HTTP server
pub mod transport;

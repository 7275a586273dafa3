//! Hub counters.
//!
//! Cheap atomic gauges and counters exposed on the health endpoint.
//! Relaxed ordering throughout: readers want a consistent-enough picture,
//! not a synchronization point on every connect.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Shared counters updated by hub operations
#[derive(Debug, Default)]
pub struct HubMetrics {
    connections: AtomicUsize,
    users_online: AtomicUsize,
    active_rooms: AtomicUsize,
    commands_processed: AtomicU64,
    events_published: AtomicU64,
    messages_flushed: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connections: usize,
    pub users_online: usize,
    pub active_rooms: usize,
    pub commands_processed: u64,
    pub events_published: u64,
    pub messages_flushed: u64,
}

impl HubMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn user_online(&self) {
        self.users_online.fetch_add(1, Ordering::Relaxed);
    }

    pub fn user_offline(&self) {
        self.users_online.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn room_created(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_destroyed(&self) {
        self.active_rooms.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self, recipients: usize) {
        self.events_published
            .fetch_add(recipients as u64, Ordering::Relaxed);
    }

    pub fn record_flushed(&self, messages: usize) {
        self.messages_flushed
            .fetch_add(messages as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            users_online: self.users_online.load(Ordering::Relaxed),
            active_rooms: self.active_rooms.load(Ordering::Relaxed),
            commands_processed: self.commands_processed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            messages_flushed: self.messages_flushed.load(Ordering::Relaxed),
        }
    }
}

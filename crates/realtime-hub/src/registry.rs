//! Connection registry.
//!
//! Tracks every live connection three ways: by connection ID (socket),
//! by device ID (stable across reconnects) and by user ID (the set of a
//! user's devices). Registration is last-writer-wins per device: a
//! reconnecting device atomically replaces its stale entry. Unregister
//! is guarded by connection ID so a stale socket's late disconnect can
//! never tear down the registration that replaced it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use common::types::{ConnectionId, DeviceId, Identity, UserId};

use crate::client::ClientHandle;

/// One live device connection
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    pub handle: ClientHandle,
    pub device_id: DeviceId,
    pub identity: Identity,
    pub connected_at: DateTime<Utc>,
}

impl DeviceConnection {
    /// The owning user, unless this is a guest connection
    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        self.identity.user_id()
    }

    /// The socket currently backing this device
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.handle.connection_id()
    }

    /// Whether this connection is an anonymous guest
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.identity.is_guest()
    }
}

/// Result of a registration
#[derive(Debug)]
pub struct Registered {
    /// The stale connection this registration replaced, if the device
    /// was already registered
    pub replaced: Option<DeviceConnection>,
    /// Devices the owning user has online after this registration
    /// (1 for guests)
    pub total_user_devices: usize,
    /// Whether the owning user already had a device online before this
    /// registration (always false for guests)
    pub user_was_online: bool,
}

/// Result of an unregistration
#[derive(Debug)]
pub struct Unregistered {
    /// The connection that was removed
    pub connection: DeviceConnection,
    /// Devices the owning user still has online (0 for guests)
    pub remaining_user_devices: usize,
}

/// Concurrent table of live connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// Socket -> device, for command dispatch and disconnect
    connections: DashMap<ConnectionId, DeviceId>,
    /// Device -> live connection, last writer wins
    devices: DashMap<DeviceId, DeviceConnection>,
    /// User -> their online device IDs
    user_devices: DashMap<UserId, HashSet<DeviceId>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any stale registration for the
    /// same device ID.
    pub fn register(&self, connection: DeviceConnection) -> Registered {
        let device_id = connection.device_id.clone();
        let connection_id = connection.connection_id();
        let user_id = connection.user_id().cloned();

        let replaced = self.devices.insert(device_id.clone(), connection);
        if let Some(stale) = &replaced {
            self.connections.remove(&stale.connection_id());
            // Same device re-registered under a different account: pull
            // the device out of the previous owner's set.
            if stale.user_id() != user_id.as_ref() {
                if let Some(previous_owner) = stale.user_id() {
                    self.remove_user_device(previous_owner, &device_id);
                }
            }
        }
        self.connections.insert(connection_id, device_id.clone());

        let (total_user_devices, user_was_online) = match &user_id {
            Some(user_id) => {
                let mut devices = self.user_devices.entry(user_id.clone()).or_default();
                let already_present = !devices.insert(device_id);
                let total = devices.len();
                (total, already_present || total > 1)
            }
            None => (1, false),
        };

        Registered {
            replaced,
            total_user_devices,
            user_was_online,
        }
    }

    /// Remove the registration backed by `connection_id`. Returns `None`
    /// when the socket was already cleaned up or superseded by a newer
    /// registration for the same device.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Unregistered> {
        let (_, device_id) = self.connections.remove(&connection_id)?;
        let (_, connection) = self
            .devices
            .remove_if(&device_id, |_, conn| conn.connection_id() == connection_id)?;

        let remaining_user_devices = match connection.user_id() {
            Some(user_id) => self.remove_user_device(user_id, &device_id),
            None => 0,
        };

        Some(Unregistered {
            connection,
            remaining_user_devices,
        })
    }

    fn remove_user_device(&self, user_id: &UserId, device_id: &DeviceId) -> usize {
        match self.user_devices.entry(user_id.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().remove(device_id);
                let remaining = occupied.get().len();
                if remaining == 0 {
                    occupied.remove();
                }
                remaining
            }
            Entry::Vacant(_) => 0,
        }
    }

    /// The connection currently dispatching for `connection_id`. Returns
    /// `None` for sockets superseded by a reconnect, so a stale socket's
    /// late commands cannot act as the device.
    #[must_use]
    pub fn find_by_connection(&self, connection_id: ConnectionId) -> Option<DeviceConnection> {
        let device_id = self.connections.get(&connection_id)?.value().clone();
        let connection = self.devices.get(&device_id)?.value().clone();
        (connection.connection_id() == connection_id).then_some(connection)
    }

    /// The live connection for a device, if any
    #[must_use]
    pub fn find_by_device(&self, device_id: &DeviceId) -> Option<DeviceConnection> {
        self.devices.get(device_id).map(|conn| conn.value().clone())
    }

    /// All live connections belonging to `user_id`
    #[must_use]
    pub fn devices_of(&self, user_id: &UserId) -> Vec<DeviceConnection> {
        let device_ids: Vec<DeviceId> = match self.user_devices.get(user_id) {
            Some(devices) => devices.iter().cloned().collect(),
            None => return Vec::new(),
        };
        device_ids
            .iter()
            .filter_map(|id| self.find_by_device(id))
            .collect()
    }

    /// Whether `user_id` has at least one device online
    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.user_devices
            .get(user_id)
            .is_some_and(|devices| !devices.is_empty())
    }

    /// Number of live connections
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn user_connection(user: &str, device: &str) -> (DeviceConnection, ConnectionId) {
        let connection_id = ConnectionId::new();
        let (handle, _rx) = ClientHandle::channel(connection_id, 16);
        // Receiver is dropped; registry tests never deliver events.
        let conn = DeviceConnection {
            handle,
            device_id: DeviceId::new(device),
            identity: Identity::User {
                user_id: UserId::new(user),
                display_name: user.to_string(),
            },
            connected_at: Utc::now(),
        };
        (conn, connection_id)
    }

    fn guest_connection(device: &str) -> (DeviceConnection, ConnectionId) {
        let connection_id = ConnectionId::new();
        let (handle, _rx) = ClientHandle::channel(connection_id, 16);
        let conn = DeviceConnection {
            handle,
            device_id: DeviceId::new(device),
            identity: Identity::Guest {
                display_name: "Visitor".to_string(),
            },
            connected_at: Utc::now(),
        };
        (conn, connection_id)
    }

    #[test]
    fn first_device_marks_user_newly_online() {
        let registry = ConnectionRegistry::new();
        let (conn, _) = user_connection("u1", "d1");

        let registered = registry.register(conn);

        assert!(registered.replaced.is_none());
        assert_eq!(registered.total_user_devices, 1);
        assert!(!registered.user_was_online);
        assert!(registry.is_online(&UserId::new("u1")));
    }

    #[test]
    fn second_device_sees_user_already_online() {
        let registry = ConnectionRegistry::new();
        let (first, _) = user_connection("u1", "d1");
        let (second, _) = user_connection("u1", "d2");

        registry.register(first);
        let registered = registry.register(second);

        assert_eq!(registered.total_user_devices, 2);
        assert!(registered.user_was_online);
    }

    #[test]
    fn reconnect_replaces_stale_entry_for_same_device() {
        let registry = ConnectionRegistry::new();
        let (stale, stale_id) = user_connection("u1", "d1");
        let (fresh, fresh_id) = user_connection("u1", "d1");

        registry.register(stale);
        let registered = registry.register(fresh);

        let replaced = registered.replaced.unwrap();
        assert_eq!(replaced.connection_id(), stale_id);
        // Same device reconnecting does not change the device count and
        // the user never appeared offline.
        assert_eq!(registered.total_user_devices, 1);
        assert!(registered.user_was_online);
        assert!(registry.find_by_connection(stale_id).is_none());
        assert!(registry.find_by_connection(fresh_id).is_some());
    }

    #[test]
    fn stale_disconnect_cannot_unregister_the_reconnected_device() {
        let registry = ConnectionRegistry::new();
        let (stale, stale_id) = user_connection("u1", "d1");
        let (fresh, _) = user_connection("u1", "d1");

        registry.register(stale);
        registry.register(fresh);

        assert!(registry.unregister(stale_id).is_none());
        assert!(registry.is_online(&UserId::new("u1")));
        assert!(registry.find_by_device(&DeviceId::new("d1")).is_some());
    }

    #[test]
    fn last_device_unregister_takes_user_offline() {
        let registry = ConnectionRegistry::new();
        let (first, first_id) = user_connection("u1", "d1");
        let (second, second_id) = user_connection("u1", "d2");
        registry.register(first);
        registry.register(second);

        let unregistered = registry.unregister(first_id).unwrap();
        assert_eq!(unregistered.remaining_user_devices, 1);
        assert!(registry.is_online(&UserId::new("u1")));

        let unregistered = registry.unregister(second_id).unwrap();
        assert_eq!(unregistered.remaining_user_devices, 0);
        assert!(!registry.is_online(&UserId::new("u1")));
    }

    #[test]
    fn guests_never_touch_user_device_sets() {
        let registry = ConnectionRegistry::new();
        let (guest, guest_id) = guest_connection("g1");

        let registered = registry.register(guest);
        assert_eq!(registered.total_user_devices, 1);
        assert!(!registered.user_was_online);

        let unregistered = registry.unregister(guest_id).unwrap();
        assert!(unregistered.connection.is_guest());
        assert_eq!(unregistered.remaining_user_devices, 0);
    }

    #[test]
    fn device_handed_to_another_account_leaves_previous_owner() {
        let registry = ConnectionRegistry::new();
        let (as_alice, _) = user_connection("alice", "d1");
        let (as_bob, _) = user_connection("bob", "d1");

        registry.register(as_alice);
        registry.register(as_bob);

        assert!(!registry.is_online(&UserId::new("alice")));
        assert!(registry.is_online(&UserId::new("bob")));
    }

    #[test]
    fn devices_of_returns_live_connections_only() {
        let registry = ConnectionRegistry::new();
        let (first, _) = user_connection("u1", "d1");
        let (second, second_id) = user_connection("u1", "d2");
        registry.register(first);
        registry.register(second);
        registry.unregister(second_id);

        let devices = registry.devices_of(&UserId::new("u1"));
        assert_eq!(devices.len(), 1);
        assert!(devices.iter().all(|d| d.device_id == DeviceId::new("d1")));
    }
}

//! Presence lifecycle: online/offline edges, multi-device behavior and
//! reconnect races.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::UserId;
use hub_test_utils::TestHub;
use realtime_hub::events::{ClientCommand, ServerEvent};

fn two_member_hub() -> TestHub {
    TestHub::new()
        .with_user("alice", "Alice")
        .with_user("bob", "Bob")
        .with_conversation("c1", &["alice", "bob"])
}

#[tokio::test]
async fn first_device_announces_user_online_to_co_members() {
    let hub = two_member_hub();
    let mut alice = hub.connect_user("alice", "alice-phone").await;
    // No one else is connected yet; the first user hears nothing.
    alice.assert_silent();

    let mut bob = hub.connect_user("bob", "bob-phone").await;

    assert_eq!(
        alice.drain(),
        vec![ServerEvent::UserOnline {
            user_id: UserId::new("bob"),
        }]
    );
    // The fresh device is bootstrapped with already-online co-members.
    assert_eq!(
        bob.drain(),
        vec![ServerEvent::UserOnline {
            user_id: UserId::new("alice"),
        }]
    );
    assert!(hub.directory.is_online(&UserId::new("alice")));
    assert!(hub.directory.is_online(&UserId::new("bob")));
}

#[tokio::test]
async fn second_device_notifies_siblings_not_conversations() {
    let hub = two_member_hub();
    let mut phone = hub.connect_user("alice", "alice-phone").await;
    let mut bob = hub.connect_user("bob", "bob-phone").await;
    phone.drain();
    bob.drain();

    let mut laptop = hub.connect_user("alice", "alice-laptop").await;

    assert_eq!(
        phone.drain(),
        vec![ServerEvent::DeviceConnected {
            user_id: UserId::new("alice"),
            device_id: laptop.device_id(),
            total_devices: 2,
        }]
    );
    assert_eq!(
        laptop.drain(),
        vec![ServerEvent::OtherDevicesAvailable {
            other_device_count: 1,
            total_devices: 2,
            other_device_ids: vec![phone.device_id()],
        }]
    );
    // No second UserOnline for a user who is already online.
    bob.assert_silent();
}

#[tokio::test]
async fn user_offline_only_when_last_device_disconnects() {
    let hub = two_member_hub();
    let mut phone = hub.connect_user("alice", "alice-phone").await;
    let laptop = hub.connect_user("alice", "alice-laptop").await;
    let mut bob = hub.connect_user("bob", "bob-phone").await;
    phone.drain();
    bob.drain();

    hub.disconnect(&laptop).await;

    assert_eq!(
        phone.drain(),
        vec![ServerEvent::DeviceDisconnected {
            user_id: UserId::new("alice"),
            device_id: laptop.device_id(),
            total_devices: 1,
        }]
    );
    bob.assert_silent();
    assert!(hub.directory.is_online(&UserId::new("alice")));

    hub.disconnect(&phone).await;

    let events = bob.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        ServerEvent::UserOffline { user_id, .. } if *user_id == UserId::new("alice")
    ));
    assert!(!hub.directory.is_online(&UserId::new("alice")));
    assert!(hub.directory.last_seen(&UserId::new("alice")).is_some());
}

#[tokio::test]
async fn reconnect_replaces_registration_without_offline_blip() {
    let hub = two_member_hub();
    let stale = hub.connect_user("alice", "alice-phone").await;
    let mut bob = hub.connect_user("bob", "bob-phone").await;
    bob.drain();

    // Same device reconnects on a new socket before the old one noticed.
    let fresh = hub.connect_user("alice", "alice-phone").await;
    // The late disconnect of the superseded socket must not take the
    // user offline.
    hub.disconnect(&stale).await;

    bob.assert_silent();
    assert!(hub.directory.is_online(&UserId::new("alice")));

    hub.disconnect(&fresh).await;
    let events = bob.drain();
    assert!(matches!(&events[..], [ServerEvent::UserOffline { .. }]));
}

#[tokio::test]
async fn single_device_reconnect_hears_no_sibling_events() {
    let hub = two_member_hub();
    let _stale = hub.connect_user("alice", "alice-phone").await;

    let mut fresh = hub.connect_user("alice", "alice-phone").await;

    // The user never appeared offline and has no other devices, so the
    // fresh socket gets neither OtherDevicesAvailable nor a bootstrap.
    fresh.assert_silent();
}

#[tokio::test]
async fn commands_from_superseded_sockets_are_dropped() {
    let hub = two_member_hub();
    let mut stale = hub.connect_user("alice", "alice-phone").await;
    let _fresh = hub.connect_user("alice", "alice-phone").await;
    stale.drain();

    hub.command(
        &stale,
        ClientCommand::GetConnectedDevices,
    )
    .await;

    // Not even an error: the connection no longer exists as far as the
    // hub is concerned.
    stale.assert_silent();
}

#[tokio::test]
async fn guests_are_invisible_to_presence() {
    let hub = two_member_hub();
    let mut alice = hub.connect_user("alice", "alice-phone").await;
    alice.drain();

    let mut guest = hub.connect_guest("Visitor", "guest-dev").await;
    guest.assert_silent();
    alice.assert_silent();

    hub.disconnect(&guest).await;
    alice.assert_silent();
}

#[tokio::test]
async fn get_connected_devices_lists_all_with_current_flag() {
    let hub = two_member_hub();
    let mut phone = hub.connect_user("alice", "alice-phone").await;
    let laptop = hub.connect_user("alice", "alice-laptop").await;
    phone.drain();

    hub.command(&phone, ClientCommand::GetConnectedDevices).await;

    let events = phone.drain();
    let ServerEvent::ConnectedDevices { devices } = &events[0] else {
        panic!("expected ConnectedDevices, got {events:?}");
    };
    assert_eq!(devices.len(), 2);
    let current = devices
        .iter()
        .find(|d| d.device_id == phone.device_id())
        .unwrap();
    assert!(current.is_current_device);
    let other = devices
        .iter()
        .find(|d| d.device_id == laptop.device_id())
        .unwrap();
    assert!(!other.is_current_device);
}

#[tokio::test]
async fn join_conversation_rebroadcasts_and_bootstraps() {
    let hub = two_member_hub();
    let mut alice = hub.connect_user("alice", "alice-phone").await;
    let mut bob = hub.connect_user("bob", "bob-phone").await;
    alice.drain();
    bob.drain();

    hub.command(
        &bob,
        ClientCommand::JoinConversation {
            conversation_id: common::types::ConversationId::new("c1"),
        },
    )
    .await;

    // Co-members see the (re)announcement, the joiner gets a fresh
    // bootstrap of who is online.
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::UserOnline {
            user_id: UserId::new("bob"),
        }]
    );
    assert_eq!(
        bob.drain(),
        vec![ServerEvent::UserOnline {
            user_id: UserId::new("alice"),
        }]
    );
}

#[tokio::test]
async fn join_conversation_requires_membership() {
    let hub = two_member_hub().with_user("mallory", "Mallory");
    let mut mallory = hub.connect_user("mallory", "mallory-phone").await;
    mallory.drain();

    hub.command(
        &mallory,
        ClientCommand::JoinConversation {
            conversation_id: common::types::ConversationId::new("c1"),
        },
    )
    .await;

    let events = mallory.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code: 2, .. }]));
}

#[tokio::test]
async fn typing_indicator_reaches_co_members_only() {
    let hub = two_member_hub();
    let mut alice = hub.connect_user("alice", "alice-phone").await;
    let mut bob = hub.connect_user("bob", "bob-phone").await;
    alice.drain();
    bob.drain();

    hub.command(
        &alice,
        ClientCommand::SendTypingIndicator {
            conversation_id: common::types::ConversationId::new("c1"),
            is_typing: true,
        },
    )
    .await;

    assert_eq!(
        bob.drain(),
        vec![ServerEvent::TypingIndicator {
            conversation_id: common::types::ConversationId::new("c1"),
            user_id: UserId::new("alice"),
            is_typing: true,
        }]
    );
    alice.assert_silent();
}

//! WebRTC signaling relay and device-to-device sync relay.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use common::types::{ConversationId, DeviceId};
use hub_test_utils::{TestClient, TestHub};
use realtime_hub::events::{ClientCommand, ServerEvent};

fn c1() -> ConversationId {
    ConversationId::new("c1")
}

fn call_hub() -> TestHub {
    TestHub::new()
        .with_user("alice", "Alice")
        .with_user("bob", "Bob")
        .with_user("charlie", "Charlie")
        .with_conversation("c1", &["alice", "bob", "charlie"])
}

/// Alice creates the room, bob joins it, queues drained
async fn room_with_two(hub: &TestHub) -> (TestClient, TestClient) {
    let mut alice = hub.connect_user("alice", "alice-phone").await;
    let mut bob = hub.connect_user("bob", "bob-phone").await;
    hub.command(
        &alice,
        ClientCommand::CreateRoom {
            conversation_id: c1(),
        },
    )
    .await;
    hub.command(&bob, ClientCommand::JoinRoom { room_id: c1() }).await;
    alice.drain();
    bob.drain();
    (alice, bob)
}

#[tokio::test]
async fn room_offer_fans_out_to_everyone_else() {
    let hub = call_hub();
    let (mut alice, mut bob) = room_with_two(&hub).await;

    hub.command(
        &bob,
        ClientCommand::SendRoomOffer {
            room_id: c1(),
            sdp: "v=0 offer".to_string(),
        },
    )
    .await;

    assert_eq!(
        alice.drain(),
        vec![ServerEvent::ReceiveOffer {
            from_device_id: bob.device_id(),
            to_device_id: alice.device_id(),
            room_id: Some(c1()),
            sdp: "v=0 offer".to_string(),
        }]
    );
    bob.assert_silent();
}

#[tokio::test]
async fn room_signaling_requires_room_membership() {
    let hub = call_hub();
    let (mut alice, _bob) = room_with_two(&hub).await;

    // Charlie is a conversation member but never joined the call.
    let mut charlie = hub.connect_user("charlie", "charlie-phone").await;
    charlie.drain();
    alice.drain(); // clear charlie's online announcement
    hub.command(
        &charlie,
        ClientCommand::SendRoomOffer {
            room_id: c1(),
            sdp: "v=0".to_string(),
        },
    )
    .await;

    let events = charlie.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code: 2, .. }]));
    alice.assert_silent();
}

#[tokio::test]
async fn room_signaling_to_unknown_room_is_not_found() {
    let hub = call_hub();
    let (alice, _bob) = room_with_two(&hub).await;
    let mut alice = alice;

    hub.command(
        &alice,
        ClientCommand::SendRoomIceCandidate {
            room_id: ConversationId::new("nope"),
            candidate: "candidate:1".to_string(),
            sdp_mid: None,
            sdp_m_line_index: None,
        },
    )
    .await;

    let events = alice.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code: 3, .. }]));
}

#[tokio::test]
async fn room_ice_candidates_fan_out_with_metadata() {
    let hub = call_hub();
    let (mut alice, bob) = room_with_two(&hub).await;

    hub.command(
        &bob,
        ClientCommand::SendRoomIceCandidate {
            room_id: c1(),
            candidate: "candidate:1 udp".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        },
    )
    .await;

    assert_eq!(
        alice.drain(),
        vec![ServerEvent::ReceiveIceCandidate {
            from_device_id: bob.device_id(),
            to_device_id: alice.device_id(),
            room_id: Some(c1()),
            candidate: "candidate:1 udp".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }]
    );
}

#[tokio::test]
async fn directed_answer_without_room_only_needs_registration() {
    let hub = call_hub();
    let (mut alice, bob) = room_with_two(&hub).await;

    hub.command(
        &bob,
        ClientCommand::SendAnswer {
            to_device_id: alice.device_id(),
            room_id: None,
            sdp: "v=0 answer".to_string(),
        },
    )
    .await;

    assert_eq!(
        alice.drain(),
        vec![ServerEvent::ReceiveAnswer {
            from_device_id: bob.device_id(),
            to_device_id: alice.device_id(),
            room_id: None,
            sdp: "v=0 answer".to_string(),
        }]
    );
}

#[tokio::test]
async fn directed_answer_with_room_checks_sender_membership() {
    let hub = call_hub();
    let (mut alice, _bob) = room_with_two(&hub).await;
    let mut charlie = hub.connect_user("charlie", "charlie-phone").await;
    charlie.drain();
    alice.drain(); // clear charlie's online announcement

    hub.command(
        &charlie,
        ClientCommand::SendAnswer {
            to_device_id: alice.device_id(),
            room_id: Some(c1()),
            sdp: "v=0".to_string(),
        },
    )
    .await;

    let events = charlie.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code: 2, .. }]));
    alice.assert_silent();
}

#[tokio::test]
async fn unreachable_signaling_target_is_dropped_silently() {
    let hub = call_hub();
    let (_alice, mut bob) = room_with_two(&hub).await;

    hub.command(
        &bob,
        ClientCommand::SendIceCandidate {
            to_device_id: DeviceId::new("ghost-device"),
            room_id: None,
            candidate: "candidate:1".to_string(),
            sdp_mid: None,
            sdp_m_line_index: None,
        },
    )
    .await;

    // No error event: the sender's ICE machinery just moves on.
    bob.assert_silent();
}

#[tokio::test]
async fn directed_offer_to_device_outside_the_room_is_dropped() {
    let hub = call_hub();
    let (_alice, mut bob) = room_with_two(&hub).await;
    let mut charlie = hub.connect_user("charlie", "charlie-phone").await;
    charlie.drain();
    bob.drain(); // clear charlie's online announcement

    hub.command(
        &bob,
        ClientCommand::SendOffer {
            to_device_id: charlie.device_id(),
            room_id: c1(),
            sdp: "v=0".to_string(),
        },
    )
    .await;

    bob.assert_silent();
    charlie.assert_silent();
}

#[tokio::test]
async fn sync_request_reaches_siblings_only() {
    let hub = call_hub();
    let mut phone = hub.connect_user("alice", "alice-phone").await;
    let mut laptop = hub.connect_user("alice", "alice-laptop").await;
    let mut bob = hub.connect_user("bob", "bob-phone").await;
    phone.drain();
    laptop.drain();
    bob.drain();

    hub.command(
        &laptop,
        ClientCommand::RequestDeviceSync {
            conversation_id: Some(c1()),
            since_timestamp: Some(1_700_000_000),
            chunk_size: 50,
        },
    )
    .await;

    assert_eq!(
        phone.drain(),
        vec![ServerEvent::DeviceSyncRequest {
            requesting_device_id: laptop.device_id(),
            conversation_id: Some(c1()),
            since_timestamp: Some(1_700_000_000),
            chunk_size: 50,
        }]
    );
    laptop.assert_silent();
    bob.assert_silent();
}

#[tokio::test]
async fn sync_data_is_relayed_verbatim_between_siblings() {
    let hub = call_hub();
    let mut phone = hub.connect_user("alice", "alice-phone").await;
    let mut laptop = hub.connect_user("alice", "alice-laptop").await;
    phone.drain();
    laptop.drain();

    let payload = serde_json::json!({"id": "m1", "body": "hello", "reactions": ["+1"]});
    hub.command(
        &phone,
        ClientCommand::SendDeviceSyncData {
            to_device_id: laptop.device_id(),
            conversation_id: Some(c1()),
            messages: vec![payload.clone()],
            chunk_index: 2,
            total_chunks: 3,
            is_last_chunk: false,
        },
    )
    .await;

    assert_eq!(
        laptop.drain(),
        vec![ServerEvent::DeviceSyncData {
            from_device_id: phone.device_id(),
            to_device_id: laptop.device_id(),
            conversation_id: Some(c1()),
            messages: vec![payload],
            chunk_index: 2,
            total_chunks: 3,
            is_last_chunk: false,
        }]
    );
}

#[tokio::test]
async fn sync_data_to_another_users_device_is_dropped() {
    let hub = call_hub();
    let mut alice = hub.connect_user("alice", "alice-phone").await;
    let mut bob = hub.connect_user("bob", "bob-phone").await;
    alice.drain();
    bob.drain();

    hub.command(
        &alice,
        ClientCommand::SendDeviceSyncData {
            to_device_id: bob.device_id(),
            conversation_id: None,
            messages: vec![serde_json::json!({"id": "m1"})],
            chunk_index: 0,
            total_chunks: 1,
            is_last_chunk: true,
        },
    )
    .await;

    // Dropped, not errored: the chunk simply never arrives.
    bob.assert_silent();
    alice.assert_silent();
}

#[tokio::test]
async fn guests_cannot_use_device_sync() {
    let hub = call_hub();
    let mut guest = hub.connect_guest("Visitor", "guest-dev").await;

    hub.command(
        &guest,
        ClientCommand::RequestDeviceSync {
            conversation_id: None,
            since_timestamp: None,
            chunk_size: 100,
        },
    )
    .await;

    let events = guest.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code: 1, .. }]));
}

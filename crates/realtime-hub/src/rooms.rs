//! Conference room table.
//!
//! A room exists if and only if it has at least one participant: it is
//! created by the first join and destroyed by the last leave, with no
//! separate lifecycle calls. Join and leave for one room serialize
//! through that room's map entry, so concurrent joins cannot double-create
//! and a leave racing a join cannot destroy a room that just gained a
//! participant.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use common::types::{ConversationId, DeviceId, UserId};

use crate::errors::HubError;

/// Random credential admitting guests to one room.
///
/// 256 bits of CSPRNG output, hex encoded. Equality goes through SHA-256
/// digests so the comparison cannot leak key bytes through timing, and
/// the key is never logged; the `Debug` impl is redacted.
pub struct InviteKey(String);

impl InviteKey {
    /// Generate a fresh key
    pub fn generate() -> Result<Self, HubError> {
        let rng = ring::rand::SystemRandom::new();
        let mut bytes = [0u8; 32];
        ring::rand::SecureRandom::fill(&rng, &mut bytes)
            .map_err(|_| HubError::Internal("invite key generation failed".to_string()))?;
        Ok(Self(hex::encode(bytes)))
    }

    /// Whether `presented` matches this key. Exact match only; no
    /// prefix or case folding.
    #[must_use]
    pub fn matches(&self, presented: &str) -> bool {
        let expected = ring::digest::digest(&ring::digest::SHA256, self.0.as_bytes());
        let presented = ring::digest::digest(&ring::digest::SHA256, presented.as_bytes());
        expected.as_ref() == presented.as_ref()
    }

    /// The key material, for handing to the room creator
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InviteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InviteKey([REDACTED])")
    }
}

/// A room participant as seen by other clients. Keyed by device, not
/// user: two devices of the same user are two participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub device_id: DeviceId,
    /// Absent for guests
    pub user_id: Option<UserId>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Snapshot of a room and its roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: ConversationId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<ParticipantView>,
}

/// Live state of one conference room
#[derive(Debug)]
struct ConferenceRoom {
    name: String,
    created_by: UserId,
    created_at: DateTime<Utc>,
    invite_key: InviteKey,
    participants: HashMap<DeviceId, ParticipantView>,
}

impl ConferenceRoom {
    fn info(&self, room_id: &ConversationId) -> RoomInfo {
        RoomInfo {
            room_id: room_id.clone(),
            name: self.name.clone(),
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            participants: self.participants.values().cloned().collect(),
        }
    }
}

/// Result of a join
#[derive(Debug)]
pub struct JoinOutcome {
    /// Whether this join created the room
    pub created: bool,
    /// False when the device was already in the room (duplicate join)
    pub newly_joined: bool,
    /// Participant count after the join
    pub participant_count: usize,
    /// Roster snapshot taken atomically with the join
    pub info: RoomInfo,
    /// The invite key, present only on the creating join
    pub invite_key: Option<String>,
}

/// Result of a leave
#[derive(Debug)]
pub struct LeaveOutcome {
    /// The removed participant
    pub view: ParticipantView,
    /// Whether this leave emptied and destroyed the room
    pub destroyed: bool,
    /// Participants remaining after the leave
    pub remaining: usize,
}

/// Concurrent table of active conference rooms
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: DashMap<ConversationId, ConferenceRoom>,
}

impl RoomTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the room for `room_id`, creating it if absent. Creation and
    /// join are one atomic step: two devices racing here end up in the
    /// same room with exactly one invite key.
    pub fn create_or_join(
        &self,
        room_id: &ConversationId,
        participant: ParticipantView,
        creator: &UserId,
    ) -> Result<JoinOutcome, HubError> {
        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(mut occupied) => {
                Ok(Self::insert_participant(room_id, occupied.get_mut(), participant, false))
            }
            Entry::Vacant(vacant) => {
                let invite_key = InviteKey::generate()?;
                let mut room = vacant.insert(ConferenceRoom {
                    name: format!("Call {room_id}"),
                    created_by: creator.clone(),
                    created_at: Utc::now(),
                    invite_key,
                    participants: HashMap::new(),
                });
                Ok(Self::insert_participant(room_id, room.value_mut(), participant, true))
            }
        }
    }

    /// Join an existing room. Fails with `RoomNotFound` if no room is
    /// active for `room_id`.
    pub fn join_existing(
        &self,
        room_id: &ConversationId,
        participant: ParticipantView,
    ) -> Result<JoinOutcome, HubError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;
        Ok(Self::insert_participant(room_id, room.value_mut(), participant, false))
    }

    fn insert_participant(
        room_id: &ConversationId,
        room: &mut ConferenceRoom,
        participant: ParticipantView,
        created: bool,
    ) -> JoinOutcome {
        let newly_joined = !room.participants.contains_key(&participant.device_id);
        if newly_joined {
            room.participants
                .insert(participant.device_id.clone(), participant);
        }
        JoinOutcome {
            created,
            newly_joined,
            participant_count: room.participants.len(),
            info: room.info(room_id),
            invite_key: created.then(|| room.invite_key.expose().to_string()),
        }
    }

    /// Remove a device from a room, destroying the room if it empties.
    /// Returns `None` when the room does not exist or the device was not
    /// in it.
    pub fn leave(&self, room_id: &ConversationId, device_id: &DeviceId) -> Option<LeaveOutcome> {
        match self.rooms.entry(room_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let view = occupied.get_mut().participants.remove(device_id)?;
                let remaining = occupied.get().participants.len();
                let destroyed = remaining == 0;
                if destroyed {
                    occupied.remove();
                }
                Some(LeaveOutcome {
                    view,
                    destroyed,
                    remaining,
                })
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Whether `device_id` is currently in the room
    #[must_use]
    pub fn contains_participant(&self, room_id: &ConversationId, device_id: &DeviceId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.participants.contains_key(device_id))
    }

    /// Roster snapshot, empty if the room does not exist
    #[must_use]
    pub fn participants(&self, room_id: &ConversationId) -> Vec<ParticipantView> {
        self.rooms
            .get(room_id)
            .map(|room| room.participants.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Device IDs currently in the room
    #[must_use]
    pub fn participant_device_ids(&self, room_id: &ConversationId) -> Vec<DeviceId> {
        self.rooms
            .get(room_id)
            .map(|room| room.participants.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Find the room whose invite key matches `presented`
    #[must_use]
    pub fn find_by_invite_key(&self, presented: &str) -> Option<ConversationId> {
        self.rooms
            .iter()
            .find(|room| room.invite_key.matches(presented))
            .map(|room| room.key().clone())
    }

    /// Every room this device currently occupies
    #[must_use]
    pub fn rooms_of_device(&self, device_id: &DeviceId) -> Vec<ConversationId> {
        self.rooms
            .iter()
            .filter(|room| room.participants.contains_key(device_id))
            .map(|room| room.key().clone())
            .collect()
    }

    /// Number of active rooms
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no rooms are active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

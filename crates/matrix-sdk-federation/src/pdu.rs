// Copyright 2025 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persistent data units, the room events servers exchange over federation.

use std::{collections::BTreeMap, fmt};

use ruma::{
    events::TimelineEventType, EventId, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// A reference from an event to one of its `auth_events`.
///
/// Room versions 1 and 2 reference events by their ID and the reference hash
/// of the event, later room versions only use the event ID, which itself is
/// derived from the reference hash. Both shapes are kept as they were received
/// so that the event serializes back to exactly what was signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthEventReference {
    /// A `[event_id, {"sha256": hash}]` pair, as used by room versions 1 and
    /// 2.
    WithHashes(OwnedEventId, BTreeMap<String, String>),

    /// A bare event ID.
    EventId(OwnedEventId),
}

impl AuthEventReference {
    /// The ID of the referenced event.
    pub fn event_id(&self) -> &EventId {
        match self {
            AuthEventReference::WithHashes(event_id, _) | AuthEventReference::EventId(event_id) => {
                event_id
            }
        }
    }
}

impl From<OwnedEventId> for AuthEventReference {
    fn from(event_id: OwnedEventId) -> Self {
        Self::EventId(event_id)
    }
}

/// The `(type, state_key)` pair identifying a slot in the state of a room.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKeyTuple {
    /// The event type of the slot, e.g. `m.room.member`.
    pub event_type: String,
    /// The state key of the slot, e.g. the user ID of a member.
    pub state_key: String,
}

impl StateKeyTuple {
    /// Create a new tuple from the given event type and state key.
    pub fn new(event_type: impl Into<String>, state_key: impl Into<String>) -> Self {
        Self { event_type: event_type.into(), state_key: state_key.into() }
    }
}

impl fmt::Display for StateKeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.event_type, self.state_key)
    }
}

/// A room event as received over federation.
///
/// Only the fields needed to order and authorize events are parsed, every
/// other key of the JSON object (`hashes`, `signatures`, `prev_events`,
/// `depth`...) is retained verbatim so that the event can be handed to a
/// [`SignatureVerifier`](crate::SignatureVerifier) and serialized back without
/// loss.
///
/// A `Pdu` can't be modified once it has been constructed. Two `Pdu`s are
/// considered equal if they have the same event ID.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pdu {
    event_id: OwnedEventId,
    room_id: OwnedRoomId,
    sender: OwnedUserId,
    #[serde(rename = "type")]
    event_type: TimelineEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state_key: Option<String>,
    content: JsonValue,
    auth_events: Vec<AuthEventReference>,
    #[serde(flatten)]
    other: BTreeMap<String, JsonValue>,
}

impl Pdu {
    /// Create a `Pdu` from a JSON object that doesn't carry its own
    /// `event_id`.
    ///
    /// Starting with room version 3 the event ID is the reference hash of the
    /// event and isn't part of the JSON sent over federation, the caller is
    /// expected to have computed it.
    pub fn from_json_with_event_id(
        event_id: OwnedEventId,
        mut json: JsonMap<String, JsonValue>,
    ) -> serde_json::Result<Self> {
        json.insert("event_id".to_owned(), JsonValue::String(event_id.as_str().to_owned()));
        serde_json::from_value(JsonValue::Object(json))
    }

    /// The unique ID of this event.
    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// The ID of the room this event belongs to.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The user that sent this event.
    pub fn sender(&self) -> &UserId {
        &self.sender
    }

    /// The type of this event.
    pub fn event_type(&self) -> &TimelineEventType {
        &self.event_type
    }

    /// The state key of this event, `None` if this isn't a state event.
    pub fn state_key(&self) -> Option<&str> {
        self.state_key.as_deref()
    }

    /// Is this a state event?
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// The state slot this event occupies, `None` if this isn't a state event.
    pub fn state_key_tuple(&self) -> Option<StateKeyTuple> {
        let state_key = self.state_key.as_deref()?;
        Some(StateKeyTuple::new(self.event_type.to_string(), state_key))
    }

    /// The content of this event.
    pub fn content(&self) -> &JsonValue {
        &self.content
    }

    /// The references to the events that authorize this event, in the order
    /// they were declared.
    pub fn auth_events(&self) -> &[AuthEventReference] {
        &self.auth_events
    }

    /// The IDs of the events that authorize this event, in the order they were
    /// declared.
    pub fn auth_event_ids(&self) -> impl Iterator<Item = &EventId> + '_ {
        self.auth_events.iter().map(AuthEventReference::event_id)
    }

    /// Is `other` the very same event as this one?
    ///
    /// Unlike `==`, which only compares event IDs, this compares every field
    /// of the two events, including the ones that aren't parsed.
    pub fn is_identical_to(&self, other: &Pdu) -> bool {
        self.event_id == other.event_id
            && self.room_id == other.room_id
            && self.sender == other.sender
            && self.event_type == other.event_type
            && self.state_key == other.state_key
            && self.content == other.content
            && self.auth_events == other.auth_events
            && self.other == other.other
    }

    /// Get one of the fields that aren't parsed, e.g. `signatures` or
    /// `origin_server_ts`.
    pub fn get_field(&self, key: &str) -> Option<&JsonValue> {
        self.other.get(key)
    }
}

impl PartialEq for Pdu {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
    }
}

impl Eq for Pdu {}

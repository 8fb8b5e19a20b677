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

//! Helpers to create [`Pdu`]s and deterministic collaborators for tests.
//!
//! The fakes in here return canned decisions, they don't implement the real
//! authorization rules nor verify any signature.

use std::{collections::BTreeSet, sync::Mutex};

use async_trait::async_trait;
use ruma::{
    events::TimelineEventType, owned_room_id, OwnedEventId, OwnedRoomId, OwnedServerName,
    OwnedUserId, UserId,
};
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::{AuthRules, Pdu, SignatureError, SignatureVerifier, StateAuthEvents};

/// A factory for [`Pdu`]s that all belong to the same room.
#[derive(Debug)]
pub struct PduFactory {
    room_id: OwnedRoomId,
}

impl Default for PduFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PduFactory {
    /// Create a factory for events in `!room:example.org`.
    pub fn new() -> Self {
        Self { room_id: owned_room_id!("!room:example.org") }
    }

    /// Start building an event of the given type.
    pub fn event(&self, event_id: &str, event_type: &str) -> PduBuilder {
        let mut json = JsonMap::new();
        json.insert("event_id".to_owned(), event_id.into());
        json.insert("room_id".to_owned(), self.room_id.as_str().into());
        json.insert("sender".to_owned(), "@creator:example.org".into());
        json.insert("type".to_owned(), event_type.into());
        json.insert("content".to_owned(), json!({}));
        json.insert("auth_events".to_owned(), json!([]));
        json.insert("origin_server_ts".to_owned(), json!(0));

        PduBuilder { json }
    }

    /// An `m.room.create` event sent by `creator`.
    pub fn create(&self, event_id: &str, creator: &UserId) -> PduBuilder {
        self.event(event_id, "m.room.create")
            .sender(creator)
            .state_key("")
            .content(json!({ "creator": creator, "room_version": "1" }))
    }

    /// An `m.room.member` event where `user_id` changes their own membership.
    pub fn member(&self, event_id: &str, user_id: &UserId, membership: &str) -> PduBuilder {
        self.event(event_id, "m.room.member")
            .sender(user_id)
            .state_key(user_id.as_str())
            .content(json!({ "membership": membership }))
    }

    /// An `m.room.member` event where `sender` bans `target`.
    pub fn ban(&self, event_id: &str, sender: &UserId, target: &UserId) -> PduBuilder {
        self.event(event_id, "m.room.member")
            .sender(sender)
            .state_key(target.as_str())
            .content(json!({ "membership": "ban" }))
    }

    /// An `m.room.message` event, which isn't a state event.
    pub fn message(&self, event_id: &str, sender: &UserId, body: &str) -> PduBuilder {
        self.event(event_id, "m.room.message")
            .sender(sender)
            .content(json!({ "msgtype": "m.text", "body": body }))
    }
}

/// A builder for a single [`Pdu`], created by a [`PduFactory`].
#[derive(Debug)]
pub struct PduBuilder {
    json: JsonMap<String, JsonValue>,
}

impl PduBuilder {
    /// Set the sender of the event.
    pub fn sender(mut self, sender: &UserId) -> Self {
        self.json.insert("sender".to_owned(), sender.as_str().into());
        self
    }

    /// Set the state key of the event, making it a state event.
    pub fn state_key(mut self, state_key: &str) -> Self {
        self.json.insert("state_key".to_owned(), state_key.into());
        self
    }

    /// Set the content of the event.
    pub fn content(mut self, content: JsonValue) -> Self {
        self.json.insert("content".to_owned(), content);
        self
    }

    /// Set the `auth_events` of the event, as bare event IDs.
    pub fn auth_events<I>(mut self, auth_events: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let auth_events: Vec<JsonValue> =
            auth_events.into_iter().map(|event_id| event_id.as_ref().into()).collect();
        self.json.insert("auth_events".to_owned(), auth_events.into());
        self
    }

    /// Build the event.
    pub fn into_pdu(self) -> Pdu {
        serde_json::from_value(JsonValue::Object(self.json))
            .expect("the test event should be valid")
    }
}

impl From<PduBuilder> for Pdu {
    fn from(builder: PduBuilder) -> Self {
        builder.into_pdu()
    }
}

/// A [`SignatureVerifier`] that accepts every event except a configured set,
/// and records which events it was asked to verify.
#[derive(Debug, Default)]
pub struct FakeVerifier {
    rejected: BTreeSet<OwnedEventId>,
    verified: Mutex<Vec<OwnedEventId>>,
}

impl FakeVerifier {
    /// A verifier that accepts the signatures of every event.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// A verifier that considers the signatures of the given events invalid.
    pub fn rejecting(rejected: impl IntoIterator<Item = OwnedEventId>) -> Self {
        Self { rejected: rejected.into_iter().collect(), ..Default::default() }
    }

    /// The IDs of the events that were passed to the verifier so far.
    pub fn verified_events(&self) -> Vec<OwnedEventId> {
        self.verified.lock().unwrap().clone()
    }
}

#[cfg_attr(target_family = "wasm", async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait)]
impl SignatureVerifier for FakeVerifier {
    async fn verify_event(&self, event: &Pdu) -> Result<(), SignatureError> {
        self.verified.lock().unwrap().push(event.event_id().to_owned());

        if self.rejected.contains(event.event_id()) {
            let server_name: OwnedServerName = event.sender().server_name().to_owned();
            Err(SignatureError::InvalidSignature {
                event_id: event.event_id().to_owned(),
                server_name,
            })
        } else {
            Ok(())
        }
    }
}

/// The reasons for which [`MembershipRules`] rejects an event.
#[derive(Debug, thiserror::Error)]
pub enum FakeAuthError {
    /// A create event was authorized by other events.
    #[error("the create event must not have auth events")]
    CreateWithAuthEvents,

    /// The create event of the room isn't part of the auth events.
    #[error("no create event in the auth events")]
    MissingCreateEvent,

    /// The sender of an event other than a join isn't joined to the room.
    #[error("{0} isn't joined to the room")]
    SenderNotJoined(OwnedUserId),

    /// A banned user tried to join.
    #[error("{0} is banned from the room")]
    Banned(OwnedUserId),

    /// The event was explicitly configured to be rejected.
    #[error("event {0} was rejected")]
    Rejected(OwnedEventId),
}

/// A small, deterministic subset of the authorization rules.
///
/// * the create event must not have any auth events, every other event must
///   be authorized by the create event,
/// * users can join unless the auth events say they are banned,
/// * every other event must be sent by a joined user,
/// * events configured with [`MembershipRules::rejecting`] are never allowed.
#[derive(Debug, Default)]
pub struct MembershipRules {
    rejected: BTreeSet<OwnedEventId>,
}

impl MembershipRules {
    /// Rules that additionally reject the given events.
    pub fn rejecting(rejected: impl IntoIterator<Item = OwnedEventId>) -> Self {
        Self { rejected: rejected.into_iter().collect() }
    }

    fn membership<'a>(auth_events: &'a StateAuthEvents, user_id: &UserId) -> Option<&'a str> {
        auth_events.member(user_id)?.content().get("membership")?.as_str()
    }
}

impl AuthRules for MembershipRules {
    type AuthEvents = StateAuthEvents;
    type Error = FakeAuthError;

    fn allowed(&self, event: &Pdu, auth_events: &StateAuthEvents) -> Result<(), FakeAuthError> {
        if self.rejected.contains(event.event_id()) {
            return Err(FakeAuthError::Rejected(event.event_id().to_owned()));
        }

        if *event.event_type() == TimelineEventType::RoomCreate {
            return if auth_events.is_empty() {
                Ok(())
            } else {
                Err(FakeAuthError::CreateWithAuthEvents)
            };
        }

        if auth_events.create().is_none() {
            return Err(FakeAuthError::MissingCreateEvent);
        }

        let sender = event.sender();
        let is_join = *event.event_type() == TimelineEventType::RoomMember
            && event.state_key() == Some(sender.as_str())
            && event.content().get("membership").and_then(JsonValue::as_str) == Some("join");

        if is_join {
            if Self::membership(auth_events, sender) == Some("ban") {
                return Err(FakeAuthError::Banned(sender.to_owned()));
            }
        } else if Self::membership(auth_events, sender) != Some("join") {
            return Err(FakeAuthError::SenderNotJoined(sender.to_owned()));
        }

        Ok(())
    }
}

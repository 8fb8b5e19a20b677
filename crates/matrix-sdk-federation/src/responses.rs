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

//! The bodies of the federation responses that carry room state.

use ruma::{OwnedEventId, OwnedServerName};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::{
    order_events, AuthRules, OrderingError, Pdu, ResponseValidator, SignatureVerifier,
    ValidationError,
};

/// The response to `GET /_matrix/federation/v1/state/{roomId}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RespState {
    /// The state of the room before the requested event.
    #[serde(rename = "pdus")]
    pub state_events: Vec<Pdu>,

    /// The events needed to authenticate the state events.
    pub auth_chain: Vec<Pdu>,
}

impl RespState {
    /// Create a new response from the given state and auth chain.
    pub fn new(state_events: Vec<Pdu>, auth_chain: Vec<Pdu>) -> Self {
        Self { state_events, auth_chain }
    }

    /// Combine the state events and the auth chain, in an order where every
    /// event comes after its auth events.
    ///
    /// Each event only appears once in the output. See [`order_events()`].
    pub fn events(&self) -> Result<Vec<Pdu>, OrderingError> {
        order_events(self.state_events.iter().chain(&self.auth_chain))
    }

    /// Check that this response is valid, using the default
    /// [`ValidationSettings`](crate::ValidationSettings).
    ///
    /// See [`ResponseValidator::check_state_response()`].
    pub async fn check<V, R>(&self, verifier: &V, rules: &R) -> Result<(), ValidationError>
    where
        V: SignatureVerifier + ?Sized,
        R: AuthRules,
    {
        ResponseValidator::new(verifier, rules).check_state_response(self).await
    }
}

/// The response to `PUT /_matrix/federation/v2/send_join/{roomId}/{eventId}`.
///
/// It carries the same data as a [`RespState`], but under different keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RespSendJoin {
    /// The state of the room at the join event.
    #[serde(rename = "state")]
    pub state_events: Vec<Pdu>,

    /// The events needed to authenticate the state events.
    pub auth_chain: Vec<Pdu>,

    /// The server that sent the response.
    pub origin: OwnedServerName,
}

impl RespSendJoin {
    /// Strip the origin, leaving the room state.
    pub fn into_state_response(self) -> RespState {
        self.into()
    }

    /// Check that this response is valid and allows `join_event`, using the
    /// default [`ValidationSettings`](crate::ValidationSettings).
    ///
    /// See [`ResponseValidator::check_send_join_response()`].
    pub async fn check<V, R>(
        &self,
        verifier: &V,
        rules: &R,
        join_event: &Pdu,
    ) -> Result<(), ValidationError>
    where
        V: SignatureVerifier + ?Sized,
        R: AuthRules,
    {
        ResponseValidator::new(verifier, rules).check_send_join_response(self, join_event).await
    }
}

impl From<RespSendJoin> for RespState {
    fn from(response: RespSendJoin) -> Self {
        Self { state_events: response.state_events, auth_chain: response.auth_chain }
    }
}

/// The response to `GET /_matrix/federation/v1/state_ids/{roomId}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RespStateIds {
    /// The IDs of the state events of the room before the requested event.
    #[serde(rename = "pdu_ids")]
    pub state_event_ids: Vec<OwnedEventId>,

    /// The IDs of the events needed to authenticate the state events.
    pub auth_chain_ids: Vec<OwnedEventId>,
}

/// The response to `GET /_matrix/federation/v1/event_auth/{roomId}/{eventId}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RespEventAuth {
    /// The events needed to authenticate the requested event.
    pub auth_chain: Vec<Pdu>,
}

impl RespEventAuth {
    /// The auth chain, in an order where every event comes after its auth
    /// events.
    pub fn events(&self) -> Result<Vec<Pdu>, OrderingError> {
        order_events(&self.auth_chain)
    }
}

/// The response to `PUT /_matrix/federation/v1/invite/{roomId}/{eventId}`.
///
/// On the wire this isn't an object, but a two element array whose first
/// element is the integer `200`: `[200, {"event": {...}}]`. This oddity
/// stems from a bug in Synapse and is kept for compatibility, the first
/// element carries no meaning.
#[derive(Clone, Debug)]
pub struct RespInvite {
    /// The invite event, signed by the server of the invited user.
    pub event: Pdu,
}

#[derive(Serialize)]
struct RespInviteFieldsRef<'a> {
    event: &'a Pdu,
}

#[derive(Deserialize)]
struct RespInviteFields {
    event: Pdu,
}

const RESP_INVITE_STATUS: u16 = 200;

impl Serialize for RespInvite {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (RESP_INVITE_STATUS, RespInviteFieldsRef { event: &self.event }).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RespInvite {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tuple = Vec::<JsonValue>::deserialize(deserializer)?;

        let Ok([_, fields]) = <[JsonValue; 2]>::try_from(tuple) else {
            return Err(D::Error::custom(
                "invalid invite response, expected an array of exactly two elements",
            ));
        };

        let fields: RespInviteFields = serde_json::from_value(fields).map_err(D::Error::custom)?;

        Ok(Self { event: fields.event })
    }
}

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

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::check_allowed_by_auth_events, ordering::EventIndex, AuthEventSet, AuthRules, Pdu,
    RespSendJoin, RespState, SignatureVerifier, ValidationError,
};

/// Settings for the validation of federation responses.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// The maximum number of distinct events a response may contain. `None`,
    /// the default, means there's no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events: Option<usize>,
}

impl ValidationSettings {
    /// Create the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject responses containing more than `limit` distinct events.
    pub fn with_max_events(mut self, limit: usize) -> Self {
        self.max_events = Some(limit);
        self
    }
}

/// Validates the room state servers send each other over federation.
///
/// A response is only valid as a whole: if any check fails, none of its
/// events can be trusted.
#[derive(Debug)]
pub struct ResponseValidator<'a, V: ?Sized, R> {
    verifier: &'a V,
    rules: &'a R,
    settings: ValidationSettings,
}

impl<'a, V, R> ResponseValidator<'a, V, R>
where
    V: SignatureVerifier + ?Sized,
    R: AuthRules,
{
    /// Create a new validator with the default settings.
    pub fn new(verifier: &'a V, rules: &'a R) -> Self {
        Self { verifier, rules, settings: ValidationSettings::default() }
    }

    /// Use the given settings.
    pub fn with_settings(mut self, settings: ValidationSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The settings of this validator.
    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Check that a response to `/state` is valid.
    ///
    /// The checks, in order:
    ///
    /// 1. events that appear more than once, e.g. in both the state and the
    ///    auth chain, are identical copies of each other,
    /// 2. every event of the auth chain and of the state is a state event,
    /// 3. no two state events occupy the same state slot,
    /// 4. the auth events of every event are part of the response and don't
    ///    form a cycle,
    /// 5. every event is correctly signed,
    /// 6. every event is allowed by its own auth events.
    ///
    /// The structural checks, including the search for missing auth events
    /// and cycles, all run before the signatures are verified. A response
    /// that is both badly signed and missing an auth event is therefore
    /// rejected with [`ValidationError::MissingAuthEvent`], not with
    /// [`ValidationError::Signature`]. The signatures of every event are
    /// verified before any of the authorization rules run.
    #[instrument(skip_all, fields(
        state_events = response.state_events.len(),
        auth_chain = response.auth_chain.len()
    ))]
    pub async fn check_state_response(&self, response: &RespState) -> Result<(), ValidationError> {
        self.check_state(&response.state_events, &response.auth_chain)
            .await
            .inspect_err(|error| warn!("Rejecting the room state response: {error}"))
            .map(|_| ())
    }

    /// Check that a response to `/state` is valid, see
    /// [`ResponseValidator::check_state_response()`], and return its events in
    /// an order where every event comes after its auth events.
    ///
    /// Each event appears only once in the output.
    pub async fn checked_state_events(
        &self,
        response: &RespState,
    ) -> Result<Vec<Pdu>, ValidationError> {
        let sorted = self
            .check_state(&response.state_events, &response.auth_chain)
            .await
            .inspect_err(|error| warn!("Rejecting the room state response: {error}"))?;

        Ok(sorted.into_iter().cloned().collect())
    }

    /// Check that a response to `/send_join` is valid and that it allows
    /// `join_event`.
    ///
    /// On top of the checks of [`ResponseValidator::check_state_response()`],
    /// which apply to the state and auth chain of the response, the join
    /// event must be allowed:
    ///
    /// * by its own auth events, looked up in the state of the response,
    /// * by the whole state of the response, which catches join events
    ///   that leave out relevant auth events, e.g. the ban of the joining
    ///   user.
    #[instrument(skip_all, fields(
        origin = %response.origin,
        join_event_id = %join_event.event_id(),
        state_events = response.state_events.len(),
        auth_chain = response.auth_chain.len()
    ))]
    pub async fn check_send_join_response(
        &self,
        response: &RespSendJoin,
        join_event: &Pdu,
    ) -> Result<(), ValidationError> {
        self.check_send_join(response, join_event)
            .await
            .inspect_err(|error| warn!("Rejecting the send_join response: {error}"))
    }

    /// Check that `event` is allowed by its auth events, looking them up in
    /// `events`.
    ///
    /// This doesn't verify any signature.
    pub fn check_event(&self, event: &Pdu, events: &[Pdu]) -> Result<(), ValidationError> {
        let index = EventIndex::new(events);
        self.check_event_count(index.len())?;
        check_for_conflicting_events(&index, events)?;

        check_allowed_by_auth_events(event, &index, self.rules)
    }

    async fn check_send_join(
        &self,
        response: &RespSendJoin,
        join_event: &Pdu,
    ) -> Result<(), ValidationError> {
        // The response to /send_join carries the same data as a response to /state,
        // the same checks apply.
        self.check_state(&response.state_events, &response.auth_chain).await?;

        debug!("Checking the join event against its auth events");

        let state_index = EventIndex::new(&response.state_events);
        check_allowed_by_auth_events(join_event, &state_index, self.rules)?;

        debug!("Checking the join event against the supplied state");

        let mut auth_events = R::AuthEvents::default();

        for event in &response.state_events {
            auth_events.add_event(event).map_err(|error| {
                ValidationError::not_authorized_by_supplied_state(join_event.event_id(), error)
            })?;
        }

        self.rules.allowed(join_event, &auth_events).map_err(|error| {
            ValidationError::not_authorized_by_supplied_state(join_event.event_id(), error)
        })
    }

    /// Run all the checks of a state response, returning the deduplicated
    /// events sorted by their auth events.
    async fn check_state<'r>(
        &self,
        state_events: &'r [Pdu],
        auth_chain: &'r [Pdu],
    ) -> Result<Vec<&'r Pdu>, ValidationError> {
        let index = EventIndex::new(state_events.iter().chain(auth_chain));
        self.check_event_count(index.len())?;
        check_for_conflicting_events(&index, state_events.iter().chain(auth_chain))?;

        if let Some(event) = auth_chain.iter().find(|event| !event.is_state()) {
            return Err(ValidationError::NotStateEvent { event_id: event.event_id().to_owned() });
        }

        let mut state_key_tuples = BTreeSet::new();

        for event in state_events {
            let Some(state_key_tuple) = event.state_key_tuple() else {
                return Err(ValidationError::NotStateEvent {
                    event_id: event.event_id().to_owned(),
                });
            };

            if state_key_tuples.contains(&state_key_tuple) {
                return Err(ValidationError::DuplicateStateKey {
                    event_type: state_key_tuple.event_type,
                    state_key: state_key_tuple.state_key,
                });
            }

            state_key_tuples.insert(state_key_tuple);
        }

        let sorted = index.sorted()?;

        info!("Checking event signatures for {} events of room state", sorted.len());
        self.verifier.verify_events(&sorted).await?;

        debug!("Checking that the events are allowed by their auth events");

        for event in &sorted {
            check_allowed_by_auth_events(event, &index, self.rules)?;
        }

        Ok(sorted)
    }

    fn check_event_count(&self, count: usize) -> Result<(), ValidationError> {
        match self.settings.max_events {
            Some(limit) if count > limit => Err(ValidationError::TooManyEvents { count, limit }),
            _ => Ok(()),
        }
    }
}

/// Check that every copy of an event is identical to the one kept by the
/// index, only that one is verified and authorized.
fn check_for_conflicting_events<'a>(
    index: &EventIndex<'_>,
    events: impl IntoIterator<Item = &'a Pdu>,
) -> Result<(), ValidationError> {
    for event in events {
        let conflicting =
            index.get(event.event_id()).is_some_and(|indexed| !indexed.is_identical_to(event));

        if conflicting {
            return Err(ValidationError::ConflictingEvents {
                event_id: event.event_id().to_owned(),
            });
        }
    }

    Ok(())
}

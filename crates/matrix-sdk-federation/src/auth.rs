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

//! The seams to the authorization rules.

use std::collections::BTreeMap;

use ruma::{events::TimelineEventType, OwnedEventId, UserId};

use crate::{ordering::EventIndex, AsyncTraitDeps, Pdu, StateKeyTuple, ValidationError};

/// The working set of state events the authorization rules consult to
/// decide whether an event is allowed: the create event, power levels, join
/// rules, memberships...
pub trait AuthEventSet: Default {
    /// The error returned if an event can't be part of the set.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Add an event to the set.
    ///
    /// Returns an error if the event isn't suitable as an auth event, e.g.
    /// because it isn't a state event.
    fn add_event(&mut self, event: &Pdu) -> Result<(), Self::Error>;
}

/// The authorization rules of a room version.
///
/// The rules are shared with the validation futures, which need to be `Send`
/// on non-wasm targets.
pub trait AuthRules: AsyncTraitDeps {
    /// The set of auth events these rules work with.
    type AuthEvents: AuthEventSet;

    /// The error returned when an event isn't allowed.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Check whether `event` is allowed given the state in `auth_events`.
    fn allowed(&self, event: &Pdu, auth_events: &Self::AuthEvents) -> Result<(), Self::Error>;
}

/// An event without a state key was added to a [`StateAuthEvents`].
#[derive(Debug, thiserror::Error)]
#[error("event {event_id} of type {event_type} does not have a state key")]
pub struct MissingStateKey {
    /// The ID of the rejected event.
    pub event_id: OwnedEventId,
    /// The type of the rejected event.
    pub event_type: String,
}

/// An [`AuthEventSet`] keyed by the state slot of its events.
///
/// Adding an event for a slot that's already occupied replaces the previous
/// event.
#[derive(Clone, Debug, Default)]
pub struct StateAuthEvents {
    events: BTreeMap<StateKeyTuple, Pdu>,
}

impl StateAuthEvents {
    /// Get the event occupying the given state slot.
    pub fn get(&self, event_type: &TimelineEventType, state_key: &str) -> Option<&Pdu> {
        self.events.get(&StateKeyTuple::new(event_type.to_string(), state_key))
    }

    /// The `m.room.create` event.
    pub fn create(&self) -> Option<&Pdu> {
        self.get(&TimelineEventType::RoomCreate, "")
    }

    /// The `m.room.power_levels` event.
    pub fn power_levels(&self) -> Option<&Pdu> {
        self.get(&TimelineEventType::RoomPowerLevels, "")
    }

    /// The `m.room.join_rules` event.
    pub fn join_rules(&self) -> Option<&Pdu> {
        self.get(&TimelineEventType::RoomJoinRules, "")
    }

    /// The `m.room.member` event of the given user.
    pub fn member(&self, user_id: &UserId) -> Option<&Pdu> {
        self.get(&TimelineEventType::RoomMember, user_id.as_str())
    }

    /// The `m.room.third_party_invite` event with the given token.
    pub fn third_party_invite(&self, token: &str) -> Option<&Pdu> {
        self.get(&TimelineEventType::RoomThirdPartyInvite, token)
    }

    /// The number of events in the set.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate over the events of the set, ordered by their state slot.
    pub fn iter(&self) -> impl Iterator<Item = &Pdu> {
        self.events.values()
    }
}

impl AuthEventSet for StateAuthEvents {
    type Error = MissingStateKey;

    fn add_event(&mut self, event: &Pdu) -> Result<(), MissingStateKey> {
        let Some(state_key_tuple) = event.state_key_tuple() else {
            return Err(MissingStateKey {
                event_id: event.event_id().to_owned(),
                event_type: event.event_type().to_string(),
            });
        };

        self.events.insert(state_key_tuple, event.clone());

        Ok(())
    }
}

/// Check that an event is allowed by the events it lists as its auth events.
///
/// Only the declared auth events are consulted, looked up in `index`.
pub(crate) fn check_allowed_by_auth_events<R: AuthRules + ?Sized>(
    event: &Pdu,
    index: &EventIndex<'_>,
    rules: &R,
) -> Result<(), ValidationError> {
    let mut auth_events = R::AuthEvents::default();

    for auth_event_id in event.auth_event_ids() {
        let Some(auth_event) = index.get(auth_event_id) else {
            return Err(ValidationError::MissingAuthEvent {
                auth_event_id: auth_event_id.to_owned(),
                event_id: event.event_id().to_owned(),
            });
        };

        auth_events
            .add_event(auth_event)
            .map_err(|error| ValidationError::not_authorized(event.event_id(), error))?;
    }

    rules
        .allowed(event, &auth_events)
        .map_err(|error| ValidationError::not_authorized(event.event_id(), error))
}

/// Check that `event` is allowed by the events it lists as its auth events,
/// looking them up in `events`.
///
/// This doesn't verify any signature.
///
/// # Errors
///
/// * [`ValidationError::MissingAuthEvent`] if one of the auth events isn't
///   part of `events`,
/// * [`ValidationError::NotAuthorized`] if one of the auth events can't be
///   added to the auth event set of the rules, or if the rules don't allow the
///   event.
pub fn check_event_auth<R: AuthRules + ?Sized>(
    event: &Pdu,
    events: &[Pdu],
    rules: &R,
) -> Result<(), ValidationError> {
    check_allowed_by_auth_events(event, &EventIndex::new(events), rules)
}

#[cfg(test)]
mod tests {
    use assert_matches2::{assert_let, assert_matches};
    use ruma::{events::TimelineEventType, owned_event_id, user_id};

    use super::{check_event_auth, AuthEventSet, MissingStateKey, StateAuthEvents};
    use crate::{
        test_utils::{FakeAuthError, MembershipRules, PduFactory},
        ValidationError,
    };

    #[test]
    fn test_state_auth_events() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");
        let bob = user_id!("@bob:example.org");

        let mut auth_events = StateAuthEvents::default();
        auth_events.add_event(&f.create("$create", alice).into_pdu()).unwrap();
        auth_events.add_event(&f.member("$alice_join", alice, "join").into_pdu()).unwrap();
        auth_events.add_event(&f.member("$bob_join", bob, "join").into_pdu()).unwrap();
        auth_events.add_event(&f.member("$bob_leave", bob, "leave").into_pdu()).unwrap();

        assert_eq!(auth_events.len(), 3);
        assert_eq!(auth_events.create().unwrap().event_id(), "$create");
        assert_eq!(auth_events.member(alice).unwrap().event_id(), "$alice_join");
        // The later membership replaced the earlier one.
        assert_eq!(auth_events.member(bob).unwrap().event_id(), "$bob_leave");
        assert!(auth_events.power_levels().is_none());
        assert!(auth_events.join_rules().is_none());
        assert!(auth_events.third_party_invite("token").is_none());
        assert!(auth_events.get(&TimelineEventType::RoomMember, "@carol:example.org").is_none());
    }

    #[test]
    fn test_state_auth_events_reject_non_state_events() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let mut auth_events = StateAuthEvents::default();
        let result = auth_events.add_event(&f.message("$message", alice, "hi").into_pdu());

        assert_let!(Err(MissingStateKey { event_id, event_type }) = result);
        assert_eq!(event_id, "$message");
        assert_eq!(event_type, "m.room.message");
        assert!(auth_events.is_empty());
    }

    #[test]
    fn test_event_allowed_by_its_auth_events() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let join = f.member("$join", alice, "join").auth_events(["$create"]).into_pdu();
        let message =
            f.message("$message", alice, "hi").auth_events(["$create", "$join"]).into_pdu();
        let events = [create, join];

        check_event_auth(&events[0], &events, &MembershipRules::default()).unwrap();
        check_event_auth(&events[1], &events, &MembershipRules::default()).unwrap();
        check_event_auth(&message, &events, &MembershipRules::default()).unwrap();
    }

    #[test]
    fn test_only_declared_auth_events_are_consulted() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let join = f.member("$join", alice, "join").auth_events(["$create"]).into_pdu();
        // Alice is joined, but the message doesn't say so.
        let message = f.message("$message", alice, "hi").auth_events(["$create"]).into_pdu();

        let result = check_event_auth(&message, &[create, join], &MembershipRules::default());

        assert_let!(Err(ValidationError::NotAuthorized { event_id, source }) = result);
        assert_eq!(event_id, "$message");
        assert_let!(Ok(source) = source.downcast::<FakeAuthError>());
        assert_matches!(*source, FakeAuthError::SenderNotJoined(_));
    }

    #[test]
    fn test_missing_auth_event() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let join = f.member("$join", alice, "join").auth_events(["$create"]).into_pdu();
        let result = check_event_auth(&join, &[], &MembershipRules::default());

        assert_let!(Err(ValidationError::MissingAuthEvent { auth_event_id, event_id }) = result);
        assert_eq!(auth_event_id, "$create");
        assert_eq!(event_id, "$join");
    }

    #[test]
    fn test_auth_event_rejected_by_the_set() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let message = f.message("$message", alice, "hi").auth_events(["$create"]).into_pdu();
        let join =
            f.member("$join", alice, "join").auth_events(["$create", "$message"]).into_pdu();

        let result = check_event_auth(&join, &[create, message], &MembershipRules::default());

        assert_let!(Err(ValidationError::NotAuthorized { event_id, source }) = result);
        assert_eq!(event_id, "$join");
        assert!(source.is::<MissingStateKey>());
    }

    #[test]
    fn test_rules_verdict_is_propagated() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let rules = MembershipRules::rejecting([owned_event_id!("$create")]);

        let result = check_event_auth(&create, &[], &rules);

        assert_let!(Err(ValidationError::NotAuthorized { source, .. }) = result);
        assert_eq!(source.to_string(), "event $create was rejected");
    }
}

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

use ruma::{EventId, OwnedEventId};

use crate::{OrderingError, SignatureError};

/// A boxed error, as returned by the collaborators of the validation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The reason a federation response, or an event, was rejected.
///
/// Validation failures are terminal: the response has to be rejected as a
/// whole, none of its events can be trusted.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The response contains more events than the configured limit.
    #[error("the response contains {count} events, more than the limit of {limit}")]
    TooManyEvents {
        /// The number of distinct events in the response.
        count: usize,
        /// The configured limit.
        limit: usize,
    },

    /// An event references an auth event that isn't part of the events at
    /// hand.
    #[error("missing auth event with ID {auth_event_id} for event {event_id}")]
    MissingAuthEvent {
        /// The ID of the auth event that couldn't be found.
        auth_event_id: OwnedEventId,
        /// The ID of the event referencing the missing auth event.
        event_id: OwnedEventId,
    },

    /// The auth events form a cycle.
    #[error("auth event cycle for ID {event_id}")]
    AuthEventCycle {
        /// The ID of the event that was reached twice on the same path.
        event_id: OwnedEventId,
    },

    /// An event that should be a state event doesn't have a state key.
    #[error("event {event_id} does not have a state key")]
    NotStateEvent {
        /// The ID of the event.
        event_id: OwnedEventId,
    },

    /// Two state events occupy the same state slot.
    #[error("duplicate state key tuple ({event_type:?}, {state_key:?})")]
    DuplicateStateKey {
        /// The event type of the slot.
        event_type: String,
        /// The state key of the slot.
        state_key: String,
    },

    /// Two different events carry the same event ID.
    #[error("the response contains different events with the ID {event_id}")]
    ConflictingEvents {
        /// The shared event ID.
        event_id: OwnedEventId,
    },

    /// The signatures of an event couldn't be verified.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// An event isn't allowed by the events it lists as its auth events.
    #[error("event with ID {event_id} is not allowed by its auth_events: {source}")]
    NotAuthorized {
        /// The ID of the event.
        event_id: OwnedEventId,
        /// Why the event isn't allowed.
        source: BoxError,
    },

    /// A join event isn't allowed by the room state supplied alongside it.
    #[error("event with ID {event_id} is not allowed by the supplied state: {source}")]
    NotAuthorizedBySuppliedState {
        /// The ID of the join event.
        event_id: OwnedEventId,
        /// Why the event isn't allowed.
        source: BoxError,
    },
}

impl ValidationError {
    pub(crate) fn not_authorized(event_id: &EventId, error: impl Into<BoxError>) -> Self {
        Self::NotAuthorized { event_id: event_id.to_owned(), source: error.into() }
    }

    pub(crate) fn not_authorized_by_supplied_state(
        event_id: &EventId,
        error: impl Into<BoxError>,
    ) -> Self {
        Self::NotAuthorizedBySuppliedState { event_id: event_id.to_owned(), source: error.into() }
    }
}

impl From<OrderingError> for ValidationError {
    fn from(error: OrderingError) -> Self {
        match error {
            OrderingError::MissingAuthEvent { auth_event_id, event_id } => {
                Self::MissingAuthEvent { auth_event_id, event_id }
            }
            OrderingError::AuthEventCycle { event_id } => Self::AuthEventCycle { event_id },
        }
    }
}

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

use std::collections::{hash_map::Entry, HashMap};

use ruma::{EventId, OwnedEventId};

use crate::Pdu;

/// An error that occurred while ordering events by their auth events.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OrderingError {
    /// An event references an auth event that isn't part of the event set.
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
}

/// An arena of events, indexed by their event ID.
///
/// Events are stored in the order they were first seen, an event ID that
/// appears more than once is only stored once. The index only borrows the
/// events and is meant to live for the duration of a single validation.
#[derive(Debug)]
pub(crate) struct EventIndex<'a> {
    events: Vec<&'a Pdu>,
    positions: HashMap<&'a EventId, usize>,
}

impl<'a> EventIndex<'a> {
    pub(crate) fn new(events: impl IntoIterator<Item = &'a Pdu>) -> Self {
        let mut index = Self { events: Vec::new(), positions: HashMap::new() };

        for event in events {
            if let Entry::Vacant(entry) = index.positions.entry(event.event_id()) {
                entry.insert(index.events.len());
                index.events.push(event);
            }
        }

        index
    }

    /// The deduplicated events, in the order they were first seen.
    pub(crate) fn events(&self) -> &[&'a Pdu] {
        &self.events
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn get(&self, event_id: &EventId) -> Option<&'a Pdu> {
        self.position(event_id).map(|position| self.events[position])
    }

    fn position(&self, event_id: &EventId) -> Option<usize> {
        self.positions.get(event_id).copied()
    }

    /// Order the events so that every event comes after all of its auth
    /// events.
    ///
    /// This is a depth-first scan through the auth events, using an explicit
    /// stack rather than recursion: the events come from a remote server and
    /// the depth of the graph is unbounded.
    pub(crate) fn sorted(&self) -> Result<Vec<&'a Pdu>, OrderingError> {
        let mut queued = vec![false; self.events.len()];
        let mut emitted = vec![false; self.events.len()];
        let mut result = Vec::with_capacity(self.events.len());

        for start in 0..self.events.len() {
            if emitted[start] {
                continue;
            }

            // Each frame holds the position of an event and the number of its auth
            // events that were already handled, so that returning to a frame
            // resumes the scan where it stopped.
            let mut stack = vec![(start, 0)];
            queued[start] = true;

            'process_top_of_stack: while let Some(&(top, cursor)) = stack.last() {
                let event = self.events[top];

                for (offset, auth_event) in event.auth_events()[cursor..].iter().enumerate() {
                    let auth_event_id = auth_event.event_id();
                    let Some(auth_position) = self.position(auth_event_id) else {
                        return Err(OrderingError::MissingAuthEvent {
                            auth_event_id: auth_event_id.to_owned(),
                            event_id: event.event_id().to_owned(),
                        });
                    };

                    if emitted[auth_position] {
                        continue;
                    }

                    if queued[auth_position] {
                        return Err(OrderingError::AuthEventCycle {
                            event_id: auth_event_id.to_owned(),
                        });
                    }

                    // The auth event needs to be emitted before the event on top of the
                    // stack, process it first.
                    if let Some(frame) = stack.last_mut() {
                        frame.1 = cursor + offset + 1;
                    }
                    stack.push((auth_position, 0));
                    queued[auth_position] = true;

                    continue 'process_top_of_stack;
                }

                // All the auth events of the top of the stack have been emitted, so it
                // can be emitted too.
                stack.pop();
                emitted[top] = true;
                result.push(event);
            }
        }

        Ok(result)
    }
}

/// Order the given events so that every event comes after its auth events.
///
/// Each event appears only once in the output, even if it was passed in more
/// than once: federation responses routinely repeat events between the room
/// state and the auth chain. Independent events keep the relative order in
/// which they were passed in, so the output is deterministic for a given
/// input.
///
/// # Errors
///
/// Returns [`OrderingError::MissingAuthEvent`] if an event references an auth
/// event that isn't part of `events`, and [`OrderingError::AuthEventCycle`] if
/// the auth events form a cycle, including an event listing itself as one of
/// its auth events.
pub fn order_events<'a>(
    events: impl IntoIterator<Item = &'a Pdu>,
) -> Result<Vec<Pdu>, OrderingError> {
    let sorted = EventIndex::new(events).sorted()?;
    Ok(sorted.into_iter().cloned().collect())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use ruma::{event_id, user_id, EventId, OwnedEventId};

    use super::{order_events, EventIndex, OrderingError};
    use crate::{test_utils::PduFactory, Pdu};

    fn ids(events: &[Pdu]) -> Vec<&EventId> {
        events.iter().map(Pdu::event_id).collect()
    }

    /// Assert that every event comes strictly after all of its auth events.
    fn assert_topologically_sorted(events: &[Pdu]) {
        let positions: HashMap<&EventId, usize> =
            events.iter().enumerate().map(|(i, event)| (event.event_id(), i)).collect();

        for (position, event) in events.iter().enumerate() {
            for auth_event_id in event.auth_event_ids() {
                assert!(
                    positions[auth_event_id] < position,
                    "{auth_event_id} must come before {}",
                    event.event_id()
                );
            }
        }
    }

    #[test]
    fn test_empty() {
        let events: Vec<Pdu> = Vec::new();
        assert!(order_events(&events).unwrap().is_empty());
    }

    #[test]
    fn test_create_then_join() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let join = f.member("$join", alice, "join").auth_events(["$create"]).into_pdu();

        // The join is passed in first, but it depends on the create event.
        let sorted = order_events([&join, &create, &create]).unwrap();

        assert_eq!(ids(&sorted), [event_id!("$create"), event_id!("$join")]);
    }

    #[test]
    fn test_dependencies_are_emitted_in_declared_order() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let power_levels =
            f.event("$power_levels", "m.room.power_levels").state_key("").auth_events(["$create"]);
        let join_rules =
            f.event("$join_rules", "m.room.join_rules").state_key("").auth_events(["$create"]);
        let message = f
            .message("$message", alice, "hello")
            .auth_events(["$join_rules", "$power_levels", "$create"])
            .into_pdu();
        let power_levels = power_levels.into_pdu();
        let join_rules = join_rules.into_pdu();

        let sorted = order_events([&message, &power_levels, &join_rules, &create]).unwrap();

        assert_eq!(
            ids(&sorted),
            [
                event_id!("$create"),
                event_id!("$join_rules"),
                event_id!("$power_levels"),
                event_id!("$message"),
            ]
        );
    }

    #[test]
    fn test_missing_auth_event() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let join =
            f.member("$join", alice, "join").auth_events(["$create", "$unknown"]).into_pdu();

        let result = order_events([&create, &join]);

        assert_matches!(
            result,
            Err(OrderingError::MissingAuthEvent { auth_event_id, event_id }) => {
                assert_eq!(auth_event_id, "$unknown");
                assert_eq!(event_id, "$join");
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let event = f.member("$join", alice, "join").auth_events(["$join"]).into_pdu();

        assert_matches!(order_events([&event]), Err(OrderingError::AuthEventCycle { event_id }) => {
            assert_eq!(event_id, "$join");
        });
    }

    #[test]
    fn test_two_event_cycle() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let x = f.member("$x", alice, "join").auth_events(["$y"]).into_pdu();
        let y = f.event("$y", "m.room.join_rules").state_key("").auth_events(["$x"]).into_pdu();

        assert_matches!(order_events([&x, &y]), Err(OrderingError::AuthEventCycle { event_id }) => {
            assert!(event_id == "$x" || event_id == "$y");
        });
    }

    #[test]
    fn test_cycle_below_a_valid_prefix() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let a = f.event("$a", "m.room.join_rules").state_key("").auth_events(["$create", "$b"]);
        let b = f.event("$b", "m.room.power_levels").state_key("").auth_events(["$c"]);
        let c = f.member("$c", alice, "join").auth_events(["$create", "$a"]);
        let (a, b, c) = (a.into_pdu(), b.into_pdu(), c.into_pdu());

        assert_matches!(
            order_events([&create, &a, &b, &c]),
            Err(OrderingError::AuthEventCycle { event_id }) => {
                assert_eq!(event_id, "$a");
            }
        );
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");

        let create = f.create("$create", alice).into_pdu();
        let join = f.member("$join", alice, "join").auth_events(["$create"]).into_pdu();

        let index = EventIndex::new([&create, &join, &create, &join]);
        assert_eq!(index.len(), 2);
        assert!(index.get(event_id!("$join")).is_some());
        assert!(index.get(event_id!("$unknown")).is_none());

        let sorted = order_events([&join, &create, &join, &create]).unwrap();
        assert_eq!(ids(&sorted), [event_id!("$create"), event_id!("$join")]);
    }

    #[test]
    fn test_wide_auth_events() {
        let f = PduFactory::new();
        let alice = user_id!("@alice:example.org");
        let count = 5_000;

        // Every auth event of `$top` has an auth event of its own, so the scan of
        // `$top` is suspended and resumed once per auth event.
        let create = f.create("$create", alice).into_pdu();
        let members: Vec<Pdu> = (0..count)
            .map(|i| {
                f.event(&format!("$member{i}"), "m.room.member")
                    .state_key(&format!("@user{i}:example.org"))
                    .auth_events(["$create"])
                    .into_pdu()
            })
            .collect();
        let top = f
            .message("$top", alice, "hello")
            .auth_events(members.iter().map(|event| event.event_id().as_str()))
            .into_pdu();

        let sorted = order_events([&top].into_iter().chain(&members).chain([&create])).unwrap();

        assert_eq!(sorted.len(), count + 2);
        assert_eq!(sorted[0].event_id(), "$create");
        assert_eq!(sorted[1].event_id(), "$member0");
        assert_eq!(sorted[count + 1].event_id(), "$top");
        assert_topologically_sorted(&sorted);
    }

    /// Build a random DAG: event `i` may only depend on events with a smaller
    /// index, which guarantees that there's no cycle.
    fn dag() -> impl Strategy<Value = Vec<Pdu>> {
        prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..40)
            .prop_map(|dependencies| {
                let f = PduFactory::new();

                dependencies
                    .iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        let auth_events: Vec<String> = if i == 0 {
                            Vec::new()
                        } else {
                            deps.iter().map(|dep| format!("$event{}", dep.index(i))).collect()
                        };

                        f.event(&format!("$event{i}"), "m.room.member")
                            .state_key(&format!("@user{i}:example.org"))
                            .auth_events(auth_events)
                            .into_pdu()
                    })
                    .collect()
            })
            .prop_shuffle()
    }

    proptest! {
        #[test]
        fn test_ordering_is_complete_and_correct(events in dag()) {
            let sorted = order_events(&events).unwrap();

            prop_assert_eq!(sorted.len(), events.len());
            let mut sorted_ids: Vec<OwnedEventId> =
                sorted.iter().map(|event| event.event_id().to_owned()).collect();
            let mut input_ids: Vec<OwnedEventId> =
                events.iter().map(|event| event.event_id().to_owned()).collect();
            sorted_ids.sort();
            input_ids.sort();
            prop_assert_eq!(sorted_ids, input_ids);

            assert_topologically_sorted(&sorted);
        }

        #[test]
        fn test_ordering_is_idempotent(events in dag()) {
            let first = order_events(&events).unwrap();
            let second = order_events(&first).unwrap();

            // Sorting an already sorted sequence doesn't need to move anything.
            prop_assert_eq!(ids(&first), ids(&second));
            prop_assert_eq!(ids(&first), ids(&order_events(&events).unwrap()));
        }

        #[test]
        fn test_missing_event_is_detected(
            events in dag(),
            removed in any::<prop::sample::Index>(),
        ) {
            let removed = removed.index(events.len());
            let removed_id = events[removed].event_id().to_owned();
            let is_referenced = events
                .iter()
                .any(|event| event.auth_event_ids().any(|id| *id == *removed_id));

            let remaining =
                events.iter().enumerate().filter(|(i, _)| *i != removed).map(|(_, e)| e);

            match order_events(remaining) {
                Ok(sorted) => {
                    prop_assert!(!is_referenced);
                    prop_assert_eq!(sorted.len(), events.len() - 1);
                }
                Err(OrderingError::MissingAuthEvent { auth_event_id, .. }) => {
                    prop_assert!(is_referenced);
                    prop_assert_eq!(auth_event_id, removed_id);
                }
                Err(error) => prop_assert!(false, "unexpected error: {error}"),
            }
        }
    }
}

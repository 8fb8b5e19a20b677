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

use async_trait::async_trait;
use futures_util::future::try_join_all;
use ruma::{OwnedEventId, OwnedServerName};

use crate::{error::BoxError, AsyncTraitDeps, Pdu};

/// Error type describing why the signatures of an event couldn't be
/// verified.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The event isn't signed by a server that is required to sign it.
    #[error("event {event_id} is missing a signature from {server_name}")]
    MissingSignature {
        /// The ID of the event.
        event_id: OwnedEventId,
        /// The server whose signature is missing.
        server_name: OwnedServerName,
    },

    /// A signature of the event doesn't match the event.
    #[error("the signature of {server_name} on event {event_id} is invalid")]
    InvalidSignature {
        /// The ID of the event.
        event_id: OwnedEventId,
        /// The server whose signature is invalid.
        server_name: OwnedServerName,
    },

    /// None of the keys that were valid when the event was sent could be
    /// found, or they all expired.
    #[error("no valid signing key of {server_name} is available to verify event {event_id}")]
    KeyUnavailable {
        /// The ID of the event.
        event_id: OwnedEventId,
        /// The server whose keys are missing.
        server_name: OwnedServerName,
    },

    /// The verification failed for another reason, e.g. the event couldn't
    /// be converted to canonical JSON.
    #[error("failed to verify the signatures of event {event_id}: {source}")]
    Other {
        /// The ID of the event.
        event_id: OwnedEventId,
        /// The underlying error.
        source: BoxError,
    },
}

impl SignatureError {
    /// The ID of the event whose signatures couldn't be verified.
    pub fn event_id(&self) -> &OwnedEventId {
        match self {
            SignatureError::MissingSignature { event_id, .. }
            | SignatureError::InvalidSignature { event_id, .. }
            | SignatureError::KeyUnavailable { event_id, .. }
            | SignatureError::Other { event_id, .. } => event_id,
        }
    }
}

/// Checks that events carry valid signatures from all the servers that are
/// required to sign them.
///
/// Fetching the signing keys of remote servers and the signature algorithm
/// itself are the business of the implementor.
#[cfg_attr(target_family = "wasm", async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait)]
pub trait SignatureVerifier: AsyncTraitDeps {
    /// Verify the signatures of a single event.
    async fn verify_event(&self, event: &Pdu) -> Result<(), SignatureError>;

    /// Verify the signatures of a batch of events.
    ///
    /// The batch is only valid if every single event is valid. The default
    /// implementation verifies all the events concurrently and returns the
    /// first error it encounters. Implementors with a more efficient way to
    /// check many events at once should override this.
    async fn verify_events(&self, events: &[&Pdu]) -> Result<(), SignatureError> {
        try_join_all(events.iter().map(|event| self.verify_event(event))).await?;
        Ok(())
    }
}

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

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_debug_implementations, missing_docs)]

mod auth;
mod error;
mod ordering;
mod pdu;
mod responses;
mod signatures;
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
mod validator;

pub use auth::{check_event_auth, AuthEventSet, AuthRules, MissingStateKey, StateAuthEvents};
pub use error::{BoxError, ValidationError};
pub use ordering::{order_events, OrderingError};
pub use pdu::{AuthEventReference, Pdu, StateKeyTuple};
pub use responses::{RespEventAuth, RespInvite, RespSendJoin, RespState, RespStateIds};
pub use signatures::{SignatureError, SignatureVerifier};
pub use validator::{ResponseValidator, ValidationSettings};

/// Super trait that is used for our collaborator traits, this trait will
/// differ if it's used on WASM. WASM targets will not require `Send` and
/// `Sync` to have implemented, while other targets will.
#[cfg(not(target_family = "wasm"))]
pub trait AsyncTraitDeps: std::fmt::Debug + Send + Sync {}
#[cfg(not(target_family = "wasm"))]
impl<T: std::fmt::Debug + Send + Sync + ?Sized> AsyncTraitDeps for T {}

/// Super trait that is used for our collaborator traits, this trait will
/// differ if it's used on WASM. WASM targets will not require `Send` and
/// `Sync` to have implemented, while other targets will.
#[cfg(target_family = "wasm")]
pub trait AsyncTraitDeps: std::fmt::Debug {}
#[cfg(target_family = "wasm")]
impl<T: std::fmt::Debug + ?Sized> AsyncTraitDeps for T {}

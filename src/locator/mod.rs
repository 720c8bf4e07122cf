// Copyright 2023 The H2O Authors.
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

//! Locator servers remember where System Table state lives and arbitrate who may recreate it.

mod client;
pub mod protocol;
mod quorum;
mod server;
mod state;

pub use self::client::{LocalLocator, LocatorPeer, RemoteLocator};
pub use self::quorum::LocatorQuorum;
pub use self::server::LocatorServer;
pub use self::state::{LocatorSnapshot, LocatorState, DEFAULT_LOCK_TIMEOUT, INITIAL_UPDATE_COUNT};

#[cfg(test)]
pub(crate) use self::quorum::tests::DownLocator;

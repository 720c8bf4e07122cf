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

use std::borrow::Cow;

use thiserror::Error;

use crate::id::{DatabaseId, TableInfo};
use crate::manager::LockType;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Outcome of a cross-instance call other than success.
#[derive(Clone, Debug, Error)]
pub enum RemoteError {
    /// Peer is alive but no longer the authoritative System Table.
    #[error("system table moved to {location}")]
    Moved { location: DatabaseId },
    #[error("{target} unreachable: {message}")]
    Unreachable { target: DatabaseId, message: Cow<'static, str> },
    #[error("denied: {message}")]
    Denied { message: Cow<'static, str> },
    #[error("unexpected: {message}")]
    Unexpected { message: String },
}

impl RemoteError {
    pub fn moved(location: DatabaseId) -> Self {
        Self::Moved { location }
    }

    pub fn unreachable(target: DatabaseId, message: impl Into<Cow<'static, str>>) -> Self {
        Self::Unreachable { target, message: message.into() }
    }

    pub fn denied(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Denied { message: message.into() }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into() }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}

impl From<anyhow::Error> for RemoteError {
    fn from(err: anyhow::Error) -> Self {
        Self::Unexpected { message: format!("{err:#}") }
    }
}

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("no locator server configured")]
    NoServers,
    #[error("no quorum among {contacted} locator servers")]
    NoQuorum { contacted: usize },
    #[error("locator servers disagree on System Table locations")]
    NoAgreement,
    #[error("locator lock not granted to {requester}")]
    LockNotGranted { requester: String },
    #[error("locator servers did not acknowledge {command}")]
    NotAcknowledged { command: &'static str },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SystemTableError {
    #[error("not connected to System Table")]
    NotConnected,
    #[error("system table inaccessible: {message}")]
    Access { message: Cow<'static, str> },
    #[error("{0}")]
    Locator(#[from] LocatorError),
    #[error("{0}")]
    Remote(#[from] RemoteError),
}

impl SystemTableError {
    pub fn access(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Access { message: message.into() }
    }
}

impl From<SystemTableError> for RemoteError {
    fn from(err: SystemTableError) -> Self {
        match err {
            SystemTableError::Remote(err) => err,
            err => Self::unexpected(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("table {table} not found")]
    TableNotFound { table: TableInfo },
    #[error("table {table} already exists")]
    TableExists { table: TableInfo },
    #[error("{lock_type:?} lock on table {table} denied")]
    LockDenied { table: TableInfo, lock_type: LockType },
    #[error("no replica of table {table} applied the statement")]
    NoReplicaUpdated { table: TableInfo },
    #[error(transparent)]
    SystemTable(#[from] SystemTableError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl QueryError {
    pub fn table_not_found(table: &TableInfo) -> Self {
        Self::TableNotFound { table: table.clone() }
    }
}

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

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::error::{RemoteError, RemoteResult};
use crate::id::{DatabaseId, TableInfo};
use crate::instance::DatabaseInstanceRemote;
use crate::manager::TableManagerRemote;

/// Table Manager entry of System Table: table, hosting instance and, if resolved, a handle.
#[derive(Clone)]
pub struct TableManagerWrapper {
    table: TableInfo,
    location: DatabaseId,
    manager: Option<Arc<dyn TableManagerRemote>>,
}

impl TableManagerWrapper {
    pub fn new(manager: Arc<dyn TableManagerRemote>) -> Self {
        Self { table: manager.table().clone(), location: manager.location().clone(), manager: Some(manager) }
    }

    /// Entry whose manager could not be resolved.
    pub fn detached(table: TableInfo, location: DatabaseId) -> Self {
        Self { table, location, manager: None }
    }

    pub fn table(&self) -> &TableInfo {
        &self.table
    }

    pub fn location(&self) -> &DatabaseId {
        &self.location
    }

    pub fn manager(&self) -> RemoteResult<&Arc<dyn TableManagerRemote>> {
        self.manager
            .as_ref()
            .ok_or_else(|| RemoteError::unreachable(self.location.clone(), "table manager not resolved"))
    }

    /// Returns true if manager is resolved and answers.
    pub async fn is_accessible(&self) -> bool {
        match &self.manager {
            None => false,
            Some(manager) => manager.check_connection().await.is_ok(),
        }
    }
}

impl Debug for TableManagerWrapper {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableManagerWrapper")
            .field("table", &self.table)
            .field("location", &self.location)
            .field("resolved", &self.manager.is_some())
            .finish()
    }
}

/// Instance entry of System Table.
#[derive(Clone)]
pub struct DatabaseInstanceWrapper {
    id: DatabaseId,
    instance: Option<Arc<dyn DatabaseInstanceRemote>>,
    active: bool,
}

impl DatabaseInstanceWrapper {
    pub fn new(id: DatabaseId, instance: Option<Arc<dyn DatabaseInstanceRemote>>, active: bool) -> Self {
        Self { id, instance, active }
    }

    pub fn id(&self) -> &DatabaseId {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn instance(&self) -> RemoteResult<&Arc<dyn DatabaseInstanceRemote>> {
        self.instance.as_ref().ok_or_else(|| RemoteError::unreachable(self.id.clone(), "instance not resolved"))
    }
}

impl Debug for DatabaseInstanceWrapper {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseInstanceWrapper").field("id", &self.id).field("active", &self.active).finish()
    }
}

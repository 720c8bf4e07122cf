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

//! Database instances: the processes hosting table replicas, Table Managers and possibly System
//! Table.

mod database;
mod env;
mod executor;
mod registry;

use std::sync::Arc;

use async_trait::async_trait;

pub use self::database::{DatabaseInstance, SystemStatus};
pub use self::env::{InstanceEnv, DEFAULT_REPLICATION_FACTOR};
pub use self::executor::{MemoryQueryExecutor, QueryExecutor};
#[cfg(test)]
pub(crate) use self::registry::tests::FakeRegistry;
pub use self::registry::{InstanceRegistry, LocalInstanceRegistry};
use crate::error::RemoteResult;
use crate::id::{DatabaseId, TableInfo};
use crate::manager::TableManagerRemote;
use crate::protos::{SystemTableRecord, TableManagerStateRecord};
use crate::systable::SystemTableRemote;

/// Operations one instance offers to others.
#[async_trait]
pub trait DatabaseInstanceRemote: Send + Sync + 'static {
    fn id(&self) -> &DatabaseId;

    async fn check_connection(&self) -> RemoteResult<()>;

    /// Returns true if this instance hosts the active System Table.
    async fn is_system_table(&self) -> RemoteResult<bool>;

    async fn system_table(&self) -> RemoteResult<Arc<dyn SystemTableRemote>>;

    /// Recreates System Table here from locally persisted state under locator lock.
    async fn recreate_system_table(&self) -> RemoteResult<Arc<dyn SystemTableRemote>>;

    /// Recreates a non replicating System Table here from locally persisted state, bypassing
    /// locators.
    async fn recreate_in_memory_system_table_from_local_persisted_state(
        &self,
    ) -> RemoteResult<Arc<dyn SystemTableRemote>>;

    async fn store_system_table_state(&self, record: SystemTableRecord) -> RemoteResult<()>;

    async fn table_manager(&self, table: &TableInfo) -> RemoteResult<Option<Arc<dyn TableManagerRemote>>>;

    /// Recreates Table Manager of table here from locally replicated manager state.
    async fn recreate_table_manager(&self, table: &TableInfo) -> RemoteResult<Arc<dyn TableManagerRemote>>;

    /// Keeps record unless a newer version of the same table is already kept.
    async fn store_table_manager_state(&self, record: TableManagerStateRecord) -> RemoteResult<()>;

    /// Applies statement to the local replica of table. Returns affected rows.
    async fn execute_update(&self, table: &TableInfo, statement: &str) -> RemoteResult<u64>;

    async fn execute_query(&self, table: &TableInfo, statement: &str) -> RemoteResult<u64>;
}

impl std::fmt::Debug for dyn DatabaseInstanceRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DatabaseInstance({})", self.id())
    }
}

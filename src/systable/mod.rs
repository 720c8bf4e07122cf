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

//! System Table: the single authoritative metadata catalog, its migration and its recovery.

mod recovery;
mod reference;
mod service;
mod state;
mod wrapper;

use async_trait::async_trait;

pub use self::recovery::{ReferenceState, SystemTableFailureRecovery, SystemTableHost};
pub use self::reference::SystemTableReference;
pub use self::service::{MigrationState, SystemTable};
pub use self::wrapper::{DatabaseInstanceWrapper, TableManagerWrapper};
use crate::error::RemoteResult;
use crate::id::{DatabaseId, TableInfo};
use crate::monitor::{MachineMonitoringData, Metric, Requirements};
use crate::protos::SystemTableRecord;

/// Operations of System Table as seen from any instance.
///
/// Every call made to a System Table that has migrated away fails with
/// [RemoteError::Moved](crate::error::RemoteError::Moved). Calls made while a migration is
/// draining fail with [RemoteError::Denied](crate::error::RemoteError::Denied).
#[async_trait]
pub trait SystemTableRemote: Send + Sync + 'static {
    /// Instance hosting this System Table.
    fn location(&self) -> &DatabaseId;

    /// Returns true if this System Table is the authoritative one.
    async fn is_system_table(&self) -> RemoteResult<bool>;

    /// Table Manager of table, recreating or forgetting an unreachable one.
    async fn lookup(&self, table: &TableInfo) -> RemoteResult<Option<TableManagerWrapper>>;

    async fn exists(&self, table: &TableInfo) -> RemoteResult<bool>;

    /// Registers a new Table Manager. Returns false if table already has one.
    async fn add_table_information(
        &self,
        manager: TableManagerWrapper,
        state_replicas: Vec<DatabaseId>,
    ) -> RemoteResult<bool>;

    async fn remove_table_information(&self, table: &TableInfo) -> RemoteResult<bool>;

    /// Registers a connecting instance. Returns number of active instances.
    async fn add_connection_information(&self, database: DatabaseId) -> RemoteResult<usize>;

    async fn remove_connection_information(&self, database: &DatabaseId) -> RemoteResult<bool>;

    async fn add_table_manager_state_replica(
        &self,
        table: &TableInfo,
        replica: DatabaseId,
        primary: bool,
    ) -> RemoteResult<bool>;

    /// Removes a state replica of a Table Manager. Refuses to remove the last one.
    async fn remove_table_manager_state_replica(&self, table: &TableInfo, replica: &DatabaseId) -> RemoteResult<bool>;

    async fn table_manager_state_replicas(&self, table: &TableInfo) -> RemoteResult<Vec<DatabaseId>>;

    /// Probes every Table Manager, recovering unreachable ones. Returns number of tables whose
    /// manager was recreated or forgotten.
    async fn check_table_manager_accessibility(&self) -> RemoteResult<usize>;

    /// Reports a possibly failed instance. Returns true if it was confirmed unreachable and evicted.
    async fn suspect_instance_of_failure(&self, database: &DatabaseId) -> RemoteResult<bool>;

    async fn add_monitoring_summary(&self, data: MachineMonitoringData) -> RemoteResult<()>;

    /// Active instances meeting requirements, best first.
    async fn get_ranked_list_of_instances(
        &self,
        metric: Metric,
        requirements: Requirements,
    ) -> RemoteResult<Vec<DatabaseInstanceWrapper>>;

    async fn active_instances(&self) -> RemoteResult<Vec<DatabaseId>>;

    /// Stops admitting calls, waits for in flight ones and hands out full state for a successor
    /// at `successor`.
    async fn prepare_for_migration(&self, successor: DatabaseId) -> RemoteResult<SystemTableRecord>;

    /// Turns this System Table into a forwarder to the successor.
    async fn complete_migration(&self) -> RemoteResult<()>;

    /// Resumes service after an abandoned migration.
    async fn abort_migration(&self) -> RemoteResult<()>;
}

impl std::fmt::Debug for dyn SystemTableRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SystemTable({})", self.location())
    }
}

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

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use static_assertions::assert_impl_all;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info, instrument, warn};

use super::recovery::SystemTableHost;
use super::state::SystemTableState;
use super::wrapper::{DatabaseInstanceWrapper, TableManagerWrapper};
use super::SystemTableRemote;
use crate::error::{RemoteError, RemoteResult};
use crate::id::{DatabaseId, TableInfo};
use crate::instance::InstanceRegistry;
use crate::locator::LocatorQuorum;
use crate::monitor::{MachineMonitoringData, Metric, Requirements, SystemTableDataCollector};
use crate::protos::SystemTableRecord;
use crate::utils::DropWatcher;

/// Migration progress of a System Table instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationState {
    Active,
    /// No new calls are admitted. Waiting for in flight calls.
    Preparing { successor: DatabaseId },
    /// State handed out. Waiting for successor to take over.
    Draining { successor: DatabaseId },
    /// Successor took over. Every call answers [RemoteError::Moved].
    Migrated { successor: DatabaseId },
}

struct Admission {
    migration: MigrationState,
    in_flight: usize,
}

struct AdmissionGuard<'a> {
    table: &'a SystemTable,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        let mut admission = self.table.admission.lock().unwrap();
        admission.in_flight -= 1;
        if admission.in_flight == 0 {
            self.table.drained.notify_waiters();
        }
    }
}

/// Authoritative metadata catalog hosted on one instance.
///
/// Mutations are serialized, persisted to state replicas and, when state replicas change,
/// published on locators. Monitoring data and rankings live behind their own locks.
pub struct SystemTable {
    location: DatabaseId,
    liveness: DropWatcher,
    registry: Arc<dyn InstanceRegistry>,
    locators: LocatorQuorum,
    replication_factor: usize,
    persistent: bool,
    state: AsyncMutex<SystemTableState>,
    admission: Mutex<Admission>,
    drained: Notify,
    monitoring: SystemTableDataCollector,
}

assert_impl_all!(SystemTable: Send, Sync);

impl SystemTable {
    fn with_state(host: &SystemTableHost, state: SystemTableState, persistent: bool) -> Self {
        let env = host.env();
        Self {
            location: host.id().clone(),
            liveness: host.liveness().clone(),
            registry: env.registry().clone(),
            locators: LocatorQuorum::new(env.locators().to_vec()),
            replication_factor: env.replication_factor(),
            persistent,
            state: AsyncMutex::new(state),
            admission: Mutex::new(Admission { migration: MigrationState::Active, in_flight: 0 }),
            drained: Notify::new(),
            monitoring: SystemTableDataCollector::new(env.clock().clone()),
        }
    }

    /// Empty System Table on host.
    pub fn new(host: &SystemTableHost, persistent: bool) -> Self {
        Self::with_state(host, SystemTableState::new(host.id()), persistent)
    }

    /// System Table on host rebuilt from a record of a predecessor or of persisted state.
    pub async fn restore(host: &SystemTableHost, record: &SystemTableRecord, persistent: bool) -> Result<Self> {
        let state = SystemTableState::restore(host.id(), record, host.env().registry().as_ref()).await?;
        info!(
            "restored System Table epoch {} with {} tables and {} instances",
            state.epoch,
            state.managers.len(),
            state.instances.len()
        );
        Ok(Self::with_state(host, state, persistent))
    }

    pub fn migration_state(&self) -> MigrationState {
        self.admission.lock().unwrap().migration.clone()
    }

    /// Returns false once migrated away.
    /// Whether this instance may claim the role. Handing out state gives up the claim, since the
    /// successor installs itself whether or not completion reaches us.
    pub fn is_authoritative(&self) -> bool {
        matches!(self.admission.lock().unwrap().migration, MigrationState::Active | MigrationState::Preparing { .. })
    }

    pub fn monitoring(&self) -> &SystemTableDataCollector {
        &self.monitoring
    }

    pub async fn epoch(&self) -> u64 {
        self.state.lock().await.epoch
    }

    pub async fn state_replicas(&self) -> Vec<DatabaseId> {
        self.state.lock().await.state_replicas.clone()
    }

    pub async fn locations(&self) -> Vec<String> {
        self.state.lock().await.locations()
    }

    /// Tops up replication, persists state and publishes locations of state replicas.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.top_up_replication(self.replication_factor) {
            self.publish_locations(&state).await;
        }
        self.persist(&state).await;
    }

    fn check_alive(&self) -> RemoteResult<()> {
        if self.liveness.is_dropped() {
            return Err(RemoteError::unreachable(self.location.clone(), "instance stopped"));
        }
        Ok(())
    }

    fn admit(&self) -> RemoteResult<AdmissionGuard<'_>> {
        self.check_alive()?;
        let mut admission = self.admission.lock().unwrap();
        match &admission.migration {
            MigrationState::Active => {},
            MigrationState::Preparing { .. } | MigrationState::Draining { .. } => {
                return Err(RemoteError::denied("system table is migrating"))
            },
            MigrationState::Migrated { successor } => return Err(RemoteError::moved(successor.clone())),
        }
        admission.in_flight += 1;
        Ok(AdmissionGuard { table: self })
    }

    async fn persist(&self, state: &SystemTableState) {
        if !self.persistent {
            return;
        }
        let record = &state.to_record();
        let results = join_all(state.state_replicas.iter().map(|replica| async move {
            let instance = self.registry.instance(replica)?;
            instance.store_system_table_state(record.clone()).await
        }))
        .await;
        for (replica, result) in state.state_replicas.iter().zip(results) {
            if let Err(err) = result {
                warn!("fail to persist System Table state to {replica}: {err}");
            }
        }
    }

    async fn publish_locations(&self, state: &SystemTableState) {
        let locations = state.locations();
        if !self.locators.set_locations(locations.clone()).await {
            warn!("locators did not acknowledge System Table locations {locations:?}");
        }
    }

    async fn probe(&self, database: &DatabaseId) -> bool {
        match self.registry.instance(database) {
            Ok(instance) => instance.check_connection().await.is_ok(),
            Err(_) => false,
        }
    }

    /// Recreates Table Manager of table on one of its state replicas, or forgets the table if none
    /// can take over.
    async fn recover_table_manager(
        &self,
        state: &mut SystemTableState,
        table: &TableInfo,
    ) -> Option<TableManagerWrapper> {
        let current = state.managers.get(table)?.clone();
        if current.is_accessible().await {
            return Some(current);
        }
        let candidates = state.replicas.get(table).cloned().unwrap_or_default();
        info!("table manager of {table} on {} unreachable, trying {candidates:?}", current.location());
        for candidate in candidates.iter() {
            let instance = match self.registry.instance(candidate) {
                Ok(instance) => instance,
                Err(err) => {
                    debug!("state replica {candidate} of {table} unavailable: {err}");
                    continue;
                },
            };
            match instance.recreate_table_manager(table).await {
                Ok(manager) => {
                    info!("recreated table manager of {table} on {candidate}");
                    let wrapper = TableManagerWrapper::new(manager);
                    state.managers.insert(table.clone(), wrapper.clone());
                    state.primaries.insert(table.clone(), candidate.clone());
                    self.persist(state).await;
                    return Some(wrapper);
                },
                Err(err) => debug!("fail to recreate table manager of {table} on {candidate}: {err}"),
            }
        }
        warn!("no state replica of {table} could recreate its table manager, removing table");
        state.managers.remove(table);
        state.replicas.remove(table);
        state.primaries.remove(table);
        self.persist(state).await;
        None
    }
}

#[async_trait]
impl SystemTableRemote for SystemTable {
    fn location(&self) -> &DatabaseId {
        &self.location
    }

    async fn is_system_table(&self) -> RemoteResult<bool> {
        self.check_alive()?;
        Ok(self.is_authoritative())
    }

    #[instrument(skip_all, fields(table = %table))]
    async fn lookup(&self, table: &TableInfo) -> RemoteResult<Option<TableManagerWrapper>> {
        let _admission = self.admit()?;
        let mut state = self.state.lock().await;
        let Some(wrapper) = state.managers.get(table).cloned() else {
            return Ok(None);
        };
        if wrapper.is_accessible().await {
            return Ok(Some(wrapper));
        }
        Ok(self.recover_table_manager(&mut state, table).await)
    }

    async fn exists(&self, table: &TableInfo) -> RemoteResult<bool> {
        let _admission = self.admit()?;
        Ok(self.state.lock().await.managers.contains_key(table))
    }

    #[instrument(skip_all, fields(table = %manager.table(), location = %manager.location()))]
    async fn add_table_information(
        &self,
        manager: TableManagerWrapper,
        state_replicas: Vec<DatabaseId>,
    ) -> RemoteResult<bool> {
        let _admission = self.admit()?;
        let mut state = self.state.lock().await;
        let table = manager.table().clone();
        if state.managers.contains_key(&table) {
            return Ok(false);
        }
        let mut replicas = vec![manager.location().clone()];
        replicas.extend(state_replicas.into_iter().filter(|replica| replica != manager.location()));
        state.primaries.insert(table.clone(), manager.location().clone());
        state.replicas.insert(table.clone(), replicas);
        state.managers.insert(table, manager);
        self.persist(&state).await;
        Ok(true)
    }

    async fn remove_table_information(&self, table: &TableInfo) -> RemoteResult<bool> {
        let _admission = self.admit()?;
        let mut state = self.state.lock().await;
        if state.managers.remove(table).is_none() {
            return Ok(false);
        }
        state.replicas.remove(table);
        state.primaries.remove(table);
        self.persist(&state).await;
        Ok(true)
    }

    #[instrument(skip_all, fields(database = %database))]
    async fn add_connection_information(&self, database: DatabaseId) -> RemoteResult<usize> {
        let _admission = self.admit()?;
        let instance = self.registry.instance(&database)?;
        let mut state = self.state.lock().await;
        let wrapper = DatabaseInstanceWrapper::new(database.clone(), Some(instance), true);
        state.instances.insert(database, wrapper);
        if state.top_up_replication(self.replication_factor) {
            self.publish_locations(&state).await;
        }
        self.persist(&state).await;
        Ok(state.active_instances().len())
    }

    async fn remove_connection_information(&self, database: &DatabaseId) -> RemoteResult<bool> {
        let _admission = self.admit()?;
        let mut state = self.state.lock().await;
        let Some(wrapper) = state.instances.get_mut(database) else {
            return Ok(false);
        };
        wrapper.set_active(false);
        let mut changed = state.forget_state_replica(database, &self.location);
        changed |= state.top_up_replication(self.replication_factor);
        if changed {
            self.publish_locations(&state).await;
        }
        self.persist(&state).await;
        Ok(true)
    }

    async fn add_table_manager_state_replica(
        &self,
        table: &TableInfo,
        replica: DatabaseId,
        primary: bool,
    ) -> RemoteResult<bool> {
        let _admission = self.admit()?;
        let mut state = self.state.lock().await;
        let Some(replicas) = state.replicas.get_mut(table) else {
            return Ok(false);
        };
        let added = !replicas.contains(&replica);
        if added {
            replicas.push(replica.clone());
        }
        if primary {
            state.primaries.insert(table.clone(), replica);
        }
        self.persist(&state).await;
        Ok(added)
    }

    async fn remove_table_manager_state_replica(&self, table: &TableInfo, replica: &DatabaseId) -> RemoteResult<bool> {
        let _admission = self.admit()?;
        let mut state = self.state.lock().await;
        let Some(replicas) = state.replicas.get_mut(table) else {
            return Ok(false);
        };
        if replicas.len() <= 1 || !replicas.contains(replica) {
            return Ok(false);
        }
        replicas.retain(|existing| existing != replica);
        let next = replicas[0].clone();
        if state.primaries.get(table) == Some(replica) {
            state.primaries.insert(table.clone(), next);
        }
        self.persist(&state).await;
        Ok(true)
    }

    async fn table_manager_state_replicas(&self, table: &TableInfo) -> RemoteResult<Vec<DatabaseId>> {
        let _admission = self.admit()?;
        Ok(self.state.lock().await.replicas.get(table).cloned().unwrap_or_default())
    }

    async fn check_table_manager_accessibility(&self) -> RemoteResult<usize> {
        let _admission = self.admit()?;
        let mut state = self.state.lock().await;
        let tables: Vec<_> = state.managers.keys().cloned().collect();
        let mut recovered = 0;
        for table in tables {
            let Some(wrapper) = state.managers.get(&table).cloned() else {
                continue;
            };
            if wrapper.is_accessible().await {
                continue;
            }
            self.recover_table_manager(&mut state, &table).await;
            recovered += 1;
        }
        Ok(recovered)
    }

    #[instrument(skip_all, fields(database = %database))]
    async fn suspect_instance_of_failure(&self, database: &DatabaseId) -> RemoteResult<bool> {
        let _admission = self.admit()?;
        if self.probe(database).await {
            debug!("suspected instance {database} answers");
            return Ok(false);
        }
        let mut state = self.state.lock().await;
        let Some(wrapper) = state.instances.get_mut(database) else {
            return Ok(false);
        };
        wrapper.set_active(false);
        info!("evicting failed instance {database}");
        self.monitoring.remove_monitoring_data(database);
        let mut changed = state.forget_state_replica(database, &self.location);
        changed |= state.top_up_replication(self.replication_factor);
        if changed {
            self.publish_locations(&state).await;
        }
        self.persist(&state).await;
        Ok(true)
    }

    async fn add_monitoring_summary(&self, data: MachineMonitoringData) -> RemoteResult<()> {
        let _admission = self.admit()?;
        self.monitoring.add_monitoring_summary(data);
        Ok(())
    }

    async fn get_ranked_list_of_instances(
        &self,
        metric: Metric,
        requirements: Requirements,
    ) -> RemoteResult<Vec<DatabaseInstanceWrapper>> {
        let _admission = self.admit()?;
        let ranking = self.monitoring.get_ranked_list_of_instances(metric, requirements);
        let state = self.state.lock().await;
        Ok(ranking
            .iter()
            .filter_map(|database| state.instances.get(database))
            .filter(|instance| instance.is_active())
            .cloned()
            .collect())
    }

    async fn active_instances(&self) -> RemoteResult<Vec<DatabaseId>> {
        let _admission = self.admit()?;
        Ok(self.state.lock().await.active_instances())
    }

    #[instrument(skip_all, fields(location = %self.location, successor = %successor))]
    async fn prepare_for_migration(&self, successor: DatabaseId) -> RemoteResult<SystemTableRecord> {
        self.check_alive()?;
        {
            let mut admission = self.admission.lock().unwrap();
            match admission.migration.clone() {
                MigrationState::Active => {
                    admission.migration = MigrationState::Preparing { successor: successor.clone() }
                },
                MigrationState::Migrated { successor } => return Err(RemoteError::moved(successor)),
                _ => return Err(RemoteError::denied("system table is migrating")),
            }
        }
        info!("preparing System Table migration");
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let in_flight = self.admission.lock().unwrap().in_flight;
            if in_flight == 0 {
                break;
            }
            debug!("waiting for {in_flight} in flight calls");
            notified.await;
        }
        self.admission.lock().unwrap().migration = MigrationState::Draining { successor };
        Ok(self.state.lock().await.to_record())
    }

    async fn complete_migration(&self) -> RemoteResult<()> {
        self.check_alive()?;
        let mut admission = self.admission.lock().unwrap();
        match admission.migration.clone() {
            MigrationState::Draining { successor } => {
                info!("System Table migrated to {successor}");
                admission.migration = MigrationState::Migrated { successor };
                Ok(())
            },
            MigrationState::Migrated { successor } => Err(RemoteError::moved(successor)),
            state => Err(RemoteError::unexpected(format!("complete migration in state {state:?}"))),
        }
    }

    async fn abort_migration(&self) -> RemoteResult<()> {
        self.check_alive()?;
        let mut admission = self.admission.lock().unwrap();
        match admission.migration.clone() {
            MigrationState::Preparing { successor } | MigrationState::Draining { successor } => {
                info!("System Table migration to {successor} aborted");
                admission.migration = MigrationState::Active;
                Ok(())
            },
            MigrationState::Migrated { successor } => Err(RemoteError::moved(successor)),
            MigrationState::Active => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertor::*;

    use super::*;
    use crate::instance::{FakeRegistry, InstanceEnv};
    use crate::monitor::machine;
    use crate::store::MemoryStateStore;
    use crate::utils::{self, DropOwner};

    fn db(name: &str) -> DatabaseId {
        DatabaseId::mem(name)
    }

    fn new_host(name: &str, registry: Arc<FakeRegistry>) -> (DropOwner, SystemTableHost) {
        let (owner, watcher) = utils::drop_watcher();
        let env = InstanceEnv::new(registry, vec![]);
        (owner, SystemTableHost::new(db(name), env, Arc::new(MemoryStateStore::new()), watcher))
    }

    #[tokio::test]
    async fn test_tables() {
        let registry = Arc::new(FakeRegistry::default());
        let (_owner, host) = new_host("a", registry.clone());
        let table = SystemTable::new(&host, true);
        let info = TableInfo::new("", "t");
        let wrapper = TableManagerWrapper::detached(info.clone(), db("b"));

        assert_that!(table.exists(&info).await.unwrap()).is_false();
        assert_that!(table.add_table_information(wrapper.clone(), vec![db("b"), db("c")]).await.unwrap()).is_true();
        assert_that!(table.add_table_information(wrapper, vec![]).await.unwrap()).is_false();
        assert_that!(table.exists(&info).await.unwrap()).is_true();
        assert_that!(table.table_manager_state_replicas(&info).await.unwrap()).is_equal_to(vec![db("b"), db("c")]);
        assert_that!(registry.stored_system_table_states(&db("a"))).is_equal_to(1);

        assert_that!(table.remove_table_manager_state_replica(&info, &db("b")).await.unwrap()).is_true();
        assert_that!(table.remove_table_manager_state_replica(&info, &db("c")).await.unwrap()).is_false();
        assert_that!(table.add_table_manager_state_replica(&info, db("d"), true).await.unwrap()).is_true();
        assert_that!(table.table_manager_state_replicas(&info).await.unwrap()).is_equal_to(vec![db("c"), db("d")]);

        assert_that!(table.remove_table_information(&info).await.unwrap()).is_true();
        assert_that!(table.remove_table_information(&info).await.unwrap()).is_false();
    }

    #[tokio::test]
    async fn test_lookup_forgets_unrecoverable_manager() {
        let registry = Arc::new(FakeRegistry::default());
        let (_owner, host) = new_host("a", registry.clone());
        let table = SystemTable::new(&host, true);
        let info = TableInfo::new("", "t");
        table.add_table_information(TableManagerWrapper::detached(info.clone(), db("b")), vec![]).await.unwrap();
        registry.set_down(&db("b"), true);
        assert_that!(table.lookup(&info).await.unwrap().is_none()).is_true();
        assert_that!(table.exists(&info).await.unwrap()).is_false();
    }

    #[tokio::test]
    async fn test_connections_and_replication() {
        let registry = Arc::new(FakeRegistry::default());
        let (_owner, host) = new_host("a", registry.clone());
        let table = SystemTable::new(&host, true);
        assert_that!(table.add_connection_information(db("a")).await.unwrap()).is_equal_to(1);
        assert_that!(table.state_replicas().await).is_equal_to(vec![db("a")]);
        assert_that!(table.add_connection_information(db("b")).await.unwrap()).is_equal_to(2);
        assert_that!(table.add_connection_information(db("c")).await.unwrap()).is_equal_to(3);
        assert_that!(table.state_replicas().await).is_equal_to(vec![db("a"), db("b")]);

        assert_that!(table.suspect_instance_of_failure(&db("b")).await.unwrap()).is_false();
        registry.set_down(&db("b"), true);
        assert_that!(table.suspect_instance_of_failure(&db("b")).await.unwrap()).is_true();
        assert_that!(table.active_instances().await.unwrap()).is_equal_to(vec![db("a"), db("c")]);
        assert_that!(table.state_replicas().await).is_equal_to(vec![db("a"), db("c")]);
        assert_that!(registry.stored_system_table_states(&db("c")) > 0).is_true();

        assert_that!(table.remove_connection_information(&db("c")).await.unwrap()).is_true();
        assert_that!(table.remove_connection_information(&db("x")).await.unwrap()).is_false();
        assert_that!(table.active_instances().await.unwrap()).is_equal_to(vec![db("a")]);
    }

    #[tokio::test]
    async fn test_ranked_instances() {
        let registry = Arc::new(FakeRegistry::default());
        let (_owner, host) = new_host("a", registry.clone());
        let table = SystemTable::new(&host, false);
        for name in ["a", "b", "c"] {
            table.add_connection_information(db(name)).await.unwrap();
        }
        table.add_monitoring_summary(machine("a", 3000, 16, 0.9, 0.9, None)).await.unwrap();
        table.add_monitoring_summary(machine("b", 3000, 16, 0.1, 0.1, None)).await.unwrap();
        table.add_monitoring_summary(machine("x", 3000, 16, 0.0, 0.0, None)).await.unwrap();
        let ranked = table.get_ranked_list_of_instances(Metric::BALANCED, Requirements::NONE).await.unwrap();
        let ids: Vec<_> = ranked.iter().map(|instance| instance.id().clone()).collect();
        assert_that!(ids).is_equal_to(vec![db("b"), db("a")]);
    }

    #[tokio::test]
    async fn test_migration() {
        let registry = Arc::new(FakeRegistry::default());
        let (_owner, host) = new_host("a", registry.clone());
        let table = Arc::new(SystemTable::new(&host, true));
        table.add_connection_information(db("a")).await.unwrap();

        let record = table.prepare_for_migration(db("b")).await.unwrap();
        assert_that!(record.instances.len()).is_equal_to(1);
        assert_that!(table.migration_state()).is_equal_to(MigrationState::Draining { successor: db("b") });
        let err = table.exists(&TableInfo::new("", "t")).await.unwrap_err();
        assert_that!(matches!(err, RemoteError::Denied { .. })).is_true();
        assert_that!(table.is_system_table().await.unwrap()).is_false();

        table.complete_migration().await.unwrap();
        let err = table.active_instances().await.unwrap_err();
        assert_that!(matches!(err, RemoteError::Moved { location } if location == db("b"))).is_true();
        assert_that!(table.is_system_table().await.unwrap()).is_false();
        assert_that!(matches!(table.prepare_for_migration(db("c")).await, Err(RemoteError::Moved { .. }))).is_true();
    }

    #[tokio::test]
    async fn test_abort_migration() {
        let registry = Arc::new(FakeRegistry::default());
        let (_owner, host) = new_host("a", registry);
        let table = SystemTable::new(&host, false);
        table.prepare_for_migration(db("b")).await.unwrap();
        assert_that!(matches!(table.prepare_for_migration(db("c")).await, Err(RemoteError::Denied { .. })))
            .is_true();
        assert_that!(table.is_system_table().await.unwrap()).is_false();
        table.abort_migration().await.unwrap();
        assert_that!(table.migration_state()).is_equal_to(MigrationState::Active);
        assert_that!(table.is_system_table().await.unwrap()).is_true();
        assert_that!(table.active_instances().await.unwrap().len()).is_equal_to(0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_migration_waits_for_in_flight_calls() {
        let registry = Arc::new(FakeRegistry::default());
        let (_owner, host) = new_host("a", registry);
        let table = Arc::new(SystemTable::new(&host, false));

        let admission = table.admit().unwrap();
        let preparing = tokio::spawn({
            let table = table.clone();
            async move { table.prepare_for_migration(db("b")).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_that!(table.migration_state()).is_equal_to(MigrationState::Preparing { successor: db("b") });
        assert_that!(preparing.is_finished()).is_false();

        drop(admission);
        preparing.await.unwrap().unwrap();
        assert_that!(table.migration_state()).is_equal_to(MigrationState::Draining { successor: db("b") });
    }

    #[tokio::test]
    async fn test_unreachable_after_host_stops() {
        let registry = Arc::new(FakeRegistry::default());
        let (owner, host) = new_host("a", registry);
        let table = SystemTable::new(&host, false);
        drop(owner);
        assert_that!(table.is_system_table().await.unwrap_err().is_unreachable()).is_true();
        assert_that!(table.active_instances().await.unwrap_err().is_unreachable()).is_true();
    }
}

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

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use hashbrown::HashMap;
use tracing::{debug, info, instrument, warn};

use super::env::InstanceEnv;
use super::DatabaseInstanceRemote;
use crate::error::{QueryError, RemoteError, RemoteResult, SystemTableError};
use crate::id::{DatabaseId, TableInfo};
use crate::manager::{LockType, TableManager, TableManagerRemote};
use crate::monitor::{LocalDataCollector, MachineProbe, Metric, MonitoringDaemon, Requirements};
use crate::protos::{SystemTableRecord, TableManagerStateRecord};
use crate::store::StateStore;
use crate::systable::{
    ReferenceState,
    SystemTableFailureRecovery,
    SystemTableHost,
    SystemTableReference,
    SystemTableRemote,
    TableManagerWrapper,
};
use crate::utils::{self, DropOwner, DropWatcher};

/// Connection status of an instance to System Table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemStatus {
    connected: bool,
    system_table: Option<DatabaseId>,
    reference_state: ReferenceState,
}

impl SystemStatus {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Where this instance believes System Table lives.
    pub fn system_table(&self) -> Option<&DatabaseId> {
        self.system_table.as_ref()
    }

    pub fn reference_state(&self) -> ReferenceState {
        self.reference_state
    }
}

/// A database process: hosts table replicas, Table Managers of tables it created and possibly
/// System Table.
pub struct DatabaseInstance {
    id: DatabaseId,
    env: InstanceEnv,
    drop_owner: Mutex<Option<DropOwner>>,
    liveness: DropWatcher,
    host: Arc<SystemTableHost>,
    reference: Arc<SystemTableReference>,
    managers: Mutex<HashMap<TableInfo, Arc<TableManager>>>,
    manager_states: Mutex<HashMap<TableInfo, TableManagerStateRecord>>,
    collector: Arc<LocalDataCollector>,
}

impl DatabaseInstance {
    /// Starts an instance and joins it to the system, locating System Table through locators or
    /// creating the first one.
    ///
    /// An instance that fails to join keeps running disconnected. See [DatabaseInstance::status].
    #[instrument(skip_all, fields(id = %id))]
    pub async fn start(id: DatabaseId, env: InstanceEnv, store: Arc<dyn StateStore>) -> Arc<Self> {
        let (drop_owner, liveness) = utils::drop_watcher();
        let host = Arc::new(SystemTableHost::new(id.clone(), env.clone(), store, liveness.clone()));
        let recovery = SystemTableFailureRecovery::new(host.clone());
        let reference = Arc::new(SystemTableReference::new(id.clone(), recovery));
        let collector = Arc::new(LocalDataCollector::new(id.clone(), env.file_system_monitoring(), reference.clone()));
        let instance = Arc::new(Self {
            id: id.clone(),
            env,
            drop_owner: Mutex::new(Some(drop_owner)),
            liveness,
            host,
            reference,
            managers: Mutex::new(HashMap::new()),
            manager_states: Mutex::new(HashMap::new()),
            collector,
        });
        let strong: Arc<dyn DatabaseInstanceRemote> = instance.clone();
        let remote: Weak<dyn DatabaseInstanceRemote> = Arc::downgrade(&strong);
        instance.env.registry().register(id, remote);
        instance.join().await;
        instance
    }

    pub fn id(&self) -> &DatabaseId {
        &self.id
    }

    pub fn env(&self) -> &InstanceEnv {
        &self.env
    }

    pub fn reference(&self) -> &Arc<SystemTableReference> {
        &self.reference
    }

    pub fn collector(&self) -> &Arc<LocalDataCollector> {
        &self.collector
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            connected: self.reference.is_connected() && !self.liveness.is_dropped(),
            system_table: self.reference.get_system_table().map(|remote| remote.location().clone()),
            reference_state: self.reference.state(),
        }
    }

    fn check_alive(&self) -> RemoteResult<()> {
        if self.liveness.is_dropped() {
            return Err(RemoteError::unreachable(self.id.clone(), "instance stopped"));
        }
        Ok(())
    }

    async fn connect(&self) -> Result<usize, SystemTableError> {
        self.reference.reconnect().await?;
        self.reference
            .with_system_table(|remote| {
                let id = self.id.clone();
                async move { remote.add_connection_information(id).await }
            })
            .await
    }

    async fn join(&self) -> bool {
        let attempts = self.env.join_attempts();
        for attempt in 1..=attempts {
            match self.connect().await {
                Ok(active) => {
                    info!("{} joined System Table with {active} active instances", self.id);
                    return true;
                },
                Err(err) => warn!("attempt {attempt}/{attempts} of {} to join System Table failed: {err}", self.id),
            }
            if attempt < attempts {
                tokio::time::sleep(self.env.join_backoff()).await;
            }
        }
        self.reference.disconnect();
        false
    }

    /// Joins System Table again after being disconnected. Returns whether it succeeded.
    pub async fn reconnect(&self) -> bool {
        if self.liveness.is_dropped() {
            return false;
        }
        self.join().await
    }

    /// Moves System Table to this instance.
    pub async fn migrate_system_table_here(&self) -> Result<(), SystemTableError> {
        self.check_alive()?;
        let remote = self.reference.migrate_here().await?;
        info!("System Table now hosted by {}", remote.location());
        Ok(())
    }

    /// Reports an instance this one failed to reach.
    pub async fn suspect_instance_of_failure(&self, database: &DatabaseId) -> Result<bool, SystemTableError> {
        self.reference
            .with_system_table(|remote| {
                let database = database.clone();
                async move { remote.suspect_instance_of_failure(&database).await }
            })
            .await
    }

    /// Starts periodic monitoring of this machine. Monitoring stops when the daemon is dropped.
    pub fn start_monitoring(&self, probe: Arc<dyn MachineProbe>) -> MonitoringDaemon {
        MonitoringDaemon::start(
            probe,
            self.collector.clone(),
            self.env.monitoring(),
            self.env.file_system_monitoring(),
        )
    }

    /// Stops this instance abruptly. Every handle of it answers unreachable afterwards.
    pub fn kill(&self) {
        if self.drop_owner.lock().unwrap().take().is_some() {
            info!("instance {} stopped", self.id);
        }
    }

    /// Leaves System Table, then stops.
    pub async fn shutdown(&self) {
        let left = self
            .reference
            .with_system_table(|remote| {
                let id = self.id.clone();
                async move { remote.remove_connection_information(&id).await }
            })
            .await;
        if let Err(err) = left {
            debug!("{} fail to leave System Table: {err}", self.id);
        }
        self.kill();
        self.env.registry().deregister(&self.id);
    }

    /// Instances to hold Table Manager state of a new table: this one plus best ranked others.
    async fn choose_state_replicas(&self) -> Result<Vec<DatabaseId>, SystemTableError> {
        let factor = self.env.replication_factor();
        let mut replicas = vec![self.id.clone()];
        if replicas.len() >= factor {
            return Ok(replicas);
        }
        let ranked = self
            .reference
            .with_system_table(|remote| async move {
                remote.get_ranked_list_of_instances(Metric::default(), Requirements::default()).await
            })
            .await?;
        let active = self.reference.with_system_table(|remote| async move { remote.active_instances().await }).await?;
        let candidates =
            ranked.iter().filter(|wrapper| wrapper.is_active()).map(|wrapper| wrapper.id()).chain(active.iter());
        for candidate in candidates {
            if replicas.len() >= factor {
                break;
            }
            if !replicas.contains(candidate) {
                replicas.push(candidate.clone());
            }
        }
        Ok(replicas)
    }

    fn forget_manager(&self, table: &TableInfo) {
        self.managers.lock().unwrap().remove(table);
    }

    /// Creates table with this instance hosting its Table Manager and first replica.
    #[instrument(skip_all, fields(id = %self.id, table = %table))]
    pub async fn create_table(&self, table: &TableInfo, statement: &str) -> Result<(), QueryError> {
        self.check_alive()?;
        if self.reference.lookup(table, false).await?.is_some() {
            return Err(QueryError::TableExists { table: table.clone() });
        }
        let state_replicas = self.choose_state_replicas().await?;
        let manager = Arc::new(TableManager::new(
            table.clone(),
            self.id.clone(),
            self.liveness.clone(),
            self.env.registry().clone(),
            state_replicas.clone(),
        ));
        self.managers.lock().unwrap().insert(table.clone(), manager.clone());
        let proxy = manager.get_query_proxy(LockType::Create, &self.id).await?;
        let wrapper = TableManagerWrapper::new(manager.clone());
        let added = self
            .reference
            .with_system_table(|remote| {
                let (wrapper, state_replicas) = (wrapper.clone(), state_replicas.clone());
                async move { remote.add_table_information(wrapper, state_replicas).await }
            })
            .await;
        match added {
            Ok(true) => {},
            Ok(false) => {
                self.forget_manager(table);
                return Err(QueryError::TableExists { table: table.clone() });
            },
            Err(err) => {
                self.forget_manager(table);
                return Err(err.into());
            },
        }
        manager.replicate().await;
        if let Err(err) = proxy.execute_update(manager.as_ref(), self.env.registry().as_ref(), statement).await {
            warn!("fail to create table {table}: {err}");
            self.forget_manager(table);
            if let Err(err) = self.reference.remove_table_information(table).await {
                warn!("fail to remove information of table {table}: {err}");
            }
            return Err(err);
        }
        self.reference.add_proxy(wrapper);
        info!("created table {table} with state replicas {state_replicas:?}");
        Ok(())
    }

    /// Runs `f` against Table Manager of table. An unreachable or refusing manager is looked up
    /// afresh, which lets System Table recreate or forget it, and `f` retried once.
    async fn with_manager<T, F, Fut>(&self, table: &TableInfo, f: F) -> Result<T, QueryError>
    where
        F: Fn(TableManagerWrapper) -> Fut,
        Fut: Future<Output = Result<T, QueryError>>, {
        self.check_alive()?;
        let wrapper = self.reference.lookup(table, true).await?.ok_or_else(|| QueryError::table_not_found(table))?;
        match f(wrapper.clone()).await {
            Err(QueryError::Remote(err @ (RemoteError::Unreachable { .. } | RemoteError::Denied { .. }))) => {
                debug!("table manager of {table} on {} failed: {err}", wrapper.location());
                self.reference.remove_proxy(table);
                let wrapper =
                    self.reference.lookup(table, false).await?.ok_or_else(|| QueryError::table_not_found(table))?;
                f(wrapper).await
            },
            result => result,
        }
    }

    async fn execute_exclusive(
        &self,
        wrapper: TableManagerWrapper,
        lock_type: LockType,
        statement: &str,
    ) -> Result<Vec<DatabaseId>, QueryError> {
        let manager = wrapper.manager()?;
        let proxy = manager.get_query_proxy(lock_type, &self.id).await?;
        if !proxy.is_granted() {
            return Err(QueryError::LockDenied { table: wrapper.table().clone(), lock_type });
        }
        proxy.execute_update(manager.as_ref(), self.env.registry().as_ref(), statement).await
    }

    /// Applies statement to every active replica of table. Returns replicas that applied it.
    #[instrument(skip_all, fields(id = %self.id, table = %table))]
    pub async fn update(&self, table: &TableInfo, statement: &str) -> Result<Vec<DatabaseId>, QueryError> {
        self.with_manager(table, |wrapper| self.execute_exclusive(wrapper, LockType::Write, statement)).await
    }

    /// Runs query on one active replica of table, preferring the local one.
    #[instrument(skip_all, fields(id = %self.id, table = %table))]
    pub async fn query(&self, table: &TableInfo, statement: &str) -> Result<u64, QueryError> {
        self.with_manager(table, |wrapper| async move {
            let manager = wrapper.manager()?;
            let proxy = manager.get_query_proxy(LockType::Read, &self.id).await?;
            if !proxy.is_granted() {
                return Err(QueryError::LockDenied { table: wrapper.table().clone(), lock_type: LockType::Read });
            }
            proxy.execute_query(manager.as_ref(), self.env.registry().as_ref(), statement).await
        })
        .await
    }

    /// Drops table on every active replica and removes it from System Table.
    #[instrument(skip_all, fields(id = %self.id, table = %table))]
    pub async fn drop_table(&self, table: &TableInfo, statement: &str) -> Result<(), QueryError> {
        self.with_manager(table, |wrapper| self.execute_exclusive(wrapper, LockType::Drop, statement)).await?;
        self.forget_manager(table);
        if !self.reference.remove_table_information(table).await? {
            debug!("table {table} already gone from System Table");
        }
        info!("dropped table {table}");
        Ok(())
    }

    /// Table Manager state replicated to this instance.
    pub fn table_manager_state(&self, table: &TableInfo) -> Option<TableManagerStateRecord> {
        self.manager_states.lock().unwrap().get(table).cloned()
    }
}

#[async_trait]
impl DatabaseInstanceRemote for DatabaseInstance {
    fn id(&self) -> &DatabaseId {
        &self.id
    }

    async fn check_connection(&self) -> RemoteResult<()> {
        self.check_alive()
    }

    async fn is_system_table(&self) -> RemoteResult<bool> {
        self.check_alive()?;
        Ok(self.host.hosted().is_some())
    }

    async fn system_table(&self) -> RemoteResult<Arc<dyn SystemTableRemote>> {
        self.check_alive()?;
        match self.host.hosted() {
            Some(table) => Ok(table),
            None => Err(RemoteError::denied(format!("{} does not host System Table", self.id))),
        }
    }

    async fn recreate_system_table(&self) -> RemoteResult<Arc<dyn SystemTableRemote>> {
        self.check_alive()?;
        Ok(self.reference.recreate_locally(true).await?)
    }

    async fn recreate_in_memory_system_table_from_local_persisted_state(
        &self,
    ) -> RemoteResult<Arc<dyn SystemTableRemote>> {
        self.check_alive()?;
        let table = self.reference.recovery().recreate_from_local_persisted_state(false).await?;
        Ok(table)
    }

    async fn store_system_table_state(&self, record: SystemTableRecord) -> RemoteResult<()> {
        self.check_alive()?;
        self.host.store_state(&record).await?;
        Ok(())
    }

    async fn table_manager(&self, table: &TableInfo) -> RemoteResult<Option<Arc<dyn TableManagerRemote>>> {
        self.check_alive()?;
        let manager = self.managers.lock().unwrap().get(table).cloned();
        Ok(manager.map(|manager| manager as Arc<dyn TableManagerRemote>))
    }

    #[instrument(skip_all, fields(id = %self.id, table = %table))]
    async fn recreate_table_manager(&self, table: &TableInfo) -> RemoteResult<Arc<dyn TableManagerRemote>> {
        self.check_alive()?;
        if let Some(manager) = self.managers.lock().unwrap().get(table).cloned() {
            return Ok(manager);
        }
        let Some(record) = self.table_manager_state(table) else {
            return Err(RemoteError::denied(format!("no state of table manager of {table} on {}", self.id)));
        };
        let manager = Arc::new(TableManager::restore(
            self.id.clone(),
            self.liveness.clone(),
            self.env.registry().clone(),
            &record,
        )?);
        let manager = self.managers.lock().unwrap().entry(table.clone()).or_insert(manager).clone();
        manager.replicate().await;
        info!("recreated table manager of {table} from state version {}", record.version);
        Ok(manager)
    }

    async fn store_table_manager_state(&self, record: TableManagerStateRecord) -> RemoteResult<()> {
        self.check_alive()?;
        let table = record.table_info()?;
        let mut states = self.manager_states.lock().unwrap();
        if let Some(kept) = states.get(&table).map(|kept| kept.version).filter(|kept| *kept > record.version) {
            debug!("ignore state version {} of {table}, have {kept}", record.version);
            return Ok(());
        }
        states.insert(table, record);
        Ok(())
    }

    async fn execute_update(&self, table: &TableInfo, statement: &str) -> RemoteResult<u64> {
        self.check_alive()?;
        Ok(self.env.executor().execute_update(&self.id, table, statement).await?)
    }

    async fn execute_query(&self, table: &TableInfo, statement: &str) -> RemoteResult<u64> {
        self.check_alive()?;
        Ok(self.env.executor().execute_query(&self.id, table, statement).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertor::*;

    use super::*;
    use crate::instance::{InstanceRegistry, LocalInstanceRegistry, MemoryQueryExecutor};
    use crate::locator::{LocalLocator, LocatorPeer, LocatorState};
    use crate::store::MemoryStateStore;

    fn db(name: &str) -> DatabaseId {
        DatabaseId::mem(name)
    }

    struct Cluster {
        registry: Arc<LocalInstanceRegistry>,
        executor: Arc<MemoryQueryExecutor>,
        env: InstanceEnv,
    }

    impl Cluster {
        fn new() -> Self {
            let registry = Arc::new(LocalInstanceRegistry::new());
            let executor = Arc::new(MemoryQueryExecutor::default());
            let peers: Vec<Arc<dyn LocatorPeer>> = (0..3)
                .map(|i| {
                    Arc::new(LocalLocator::new(format!("locator-{i}"), Arc::new(LocatorState::new())))
                        as Arc<dyn LocatorPeer>
                })
                .collect();
            let env = InstanceEnv::new(registry.clone(), peers)
                .with_executor(executor.clone())
                .with_join_attempts(1, Duration::from_millis(10));
            Self { registry, executor, env }
        }

        async fn start(&self, name: &str) -> Arc<DatabaseInstance> {
            DatabaseInstance::start(db(name), self.env.clone(), Arc::new(MemoryStateStore::new())).await
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_first_instance_hosts_system_table() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        let status = a.status();
        assert_that!(status.is_connected()).is_true();
        assert_that!(status.system_table().cloned()).is_equal_to(Some(db("a")));
        assert_that!(a.is_system_table().await.unwrap()).is_true();
        assert_that!(cluster.registry.len()).is_equal_to(1);

        let registered = cluster.registry.instance(&db("a")).unwrap();
        assert_that!(registered.is_system_table().await.unwrap()).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_table_lifecycle() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        let b = cluster.start("b").await;
        let table = TableInfo::new("", "t");

        a.create_table(&table, "create table t").await.unwrap();
        let err = b.create_table(&table, "create table t").await.unwrap_err();
        assert_that!(matches!(err, QueryError::TableExists { .. })).is_true();
        assert_that!(a.table_manager_state(&table).is_some()).is_true();
        assert_that!(b.table_manager_state(&table).is_some()).is_true();

        let updated = b.update(&table, "insert into t").await.unwrap();
        assert_that!(updated).is_equal_to(vec![db("a")]);
        assert_that!(b.query(&table, "select").await.unwrap()).is_equal_to(2);
        assert_that!(cluster.executor.statements(&db("a"), &table).len()).is_equal_to(2);

        b.drop_table(&table, "drop table t").await.unwrap();
        let err = a.query(&table, "select").await.unwrap_err();
        assert_that!(matches!(err, QueryError::TableNotFound { .. })).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_keeps_newest_manager_state() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        let table = TableInfo::new("", "t");
        let record = |version| TableManagerStateRecord {
            table: Some((&table).into()),
            version,
            ..Default::default()
        };
        a.store_table_manager_state(record(3)).await.unwrap();
        a.store_table_manager_state(record(2)).await.unwrap();
        assert_that!(a.table_manager_state(&table).unwrap().version).is_equal_to(3);
        a.store_table_manager_state(record(4)).await.unwrap();
        assert_that!(a.table_manager_state(&table).unwrap().version).is_equal_to(4);
    }

    #[test_log::test(tokio::test)]
    async fn test_killed_instance_is_unreachable() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        a.kill();
        assert_that!(a.status().is_connected()).is_false();
        let handle = cluster.registry.instance(&db("a")).unwrap();
        assert_that!(handle.check_connection().await.unwrap_err().is_unreachable()).is_true();
        assert_that!(a.reconnect().await).is_false();
    }

    #[test_log::test(tokio::test)]
    async fn test_shutdown_leaves_system_table() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        let b = cluster.start("b").await;
        let system_table = a.system_table().await.unwrap();
        assert_that!(system_table.active_instances().await.unwrap().len()).is_equal_to(2);
        b.shutdown().await;
        assert_that!(system_table.active_instances().await.unwrap()).is_equal_to(vec![db("a")]);
        assert_that!(cluster.registry.instance(&db("b")).is_err()).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_disconnected_instance_fails_fast() {
        let registry = Arc::new(LocalInstanceRegistry::new());
        let peers: Vec<Arc<dyn LocatorPeer>> =
            vec![Arc::new(crate::locator::DownLocator), Arc::new(crate::locator::DownLocator)];
        let env = InstanceEnv::new(registry, peers).with_join_attempts(2, Duration::from_millis(1));
        let a = DatabaseInstance::start(db("a"), env, Arc::new(MemoryStateStore::new())).await;
        assert_that!(a.status().is_connected()).is_false();
        let err = a.create_table(&TableInfo::new("", "t"), "create table t").await.unwrap_err();
        assert_that!(matches!(err, QueryError::SystemTable(SystemTableError::NotConnected))).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_system_table_failover() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        let b = cluster.start("b").await;
        let c = cluster.start("c").await;
        let table = TableInfo::new("", "t");
        b.create_table(&table, "create table t").await.unwrap();
        assert_that!(c.status().system_table().cloned()).is_equal_to(Some(db("a")));

        a.kill();
        assert_that!(c.query(&table, "select").await.unwrap()).is_equal_to(1);
        assert_that!(c.status().system_table().cloned()).is_equal_to(Some(db("b")));
        assert_that!(c.status().is_connected()).is_true();
        assert_that!(b.is_system_table().await.unwrap()).is_true();

        let system_table = b.system_table().await.unwrap();
        assert_that!(system_table.active_instances().await.unwrap()).is_equal_to(vec![db("b"), db("c")]);
        assert_that!(system_table.exists(&table).await.unwrap()).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_migration_redirects_stale_handles() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        let b = cluster.start("b").await;
        let c = cluster.start("c").await;
        let table = TableInfo::new("", "t");
        c.create_table(&table, "create table t").await.unwrap();
        let stale = c.reference().get_system_table().unwrap();

        b.migrate_system_table_here().await.unwrap();
        assert_that!(a.is_system_table().await.unwrap()).is_false();
        assert_that!(b.is_system_table().await.unwrap()).is_true();
        let err = stale.exists(&table).await.unwrap_err();
        assert_that!(matches!(err, RemoteError::Moved { ref location } if *location == db("b"))).is_true();

        let found = c.reference().lookup(&table, false).await.unwrap().unwrap();
        assert_that!(found.location().clone()).is_equal_to(db("c"));
        assert_that!(c.status().system_table().cloned()).is_equal_to(Some(db("b")));
        assert_that!(a.status().system_table().cloned()).is_equal_to(Some(db("a")));
        assert_that!(a.query(&table, "select").await.unwrap()).is_equal_to(1);
        assert_that!(a.status().system_table().cloned()).is_equal_to(Some(db("b")));
    }

    #[test_log::test(tokio::test)]
    async fn test_table_manager_recreated_on_state_replica() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        let b = cluster.start("b").await;
        let c = cluster.start("c").await;
        let table = TableInfo::new("", "t");
        c.create_table(&table, "create table t").await.unwrap();
        let manager = c.table_manager(&table).await.unwrap().unwrap();
        assert_that!(manager.add_replica(db("a")).await.unwrap()).is_true();
        assert_that!(a.table_manager_state(&table).unwrap().replicas.len()).is_equal_to(2);

        c.kill();
        let updated = b.update(&table, "insert into t").await.unwrap();
        assert_that!(updated).is_equal_to(vec![db("a")]);
        let recreated = a.table_manager(&table).await.unwrap().unwrap();
        assert_that!(recreated.active_replicas().await.unwrap()).is_equal_to(vec![db("a")]);
        assert_that!(b.query(&table, "select").await.unwrap()).is_equal_to(1);
        let found = b.reference().lookup(&table, true).await.unwrap().unwrap();
        assert_that!(found.location().clone()).is_equal_to(db("a"));
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_replica_marked_inactive() {
        let cluster = Cluster::new();
        let a = cluster.start("a").await;
        let b = cluster.start("b").await;
        let table = TableInfo::new("", "t");
        a.create_table(&table, "create table t").await.unwrap();
        let manager = a.table_manager(&table).await.unwrap().unwrap();
        manager.add_replica(db("b")).await.unwrap();

        cluster.executor.set_failing(&db("b"), true);
        let updated = b.update(&table, "insert into t").await.unwrap();
        assert_that!(updated).is_equal_to(vec![db("a")]);
        assert_that!(manager.active_replicas().await.unwrap()).is_equal_to(vec![db("a")]);
        assert_that!(b.table_manager_state(&table).unwrap().replicas.iter().filter(|r| r.active).count())
            .is_equal_to(1);
    }
}

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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::recovery::{ReferenceState, SystemTableFailureRecovery};
use super::wrapper::TableManagerWrapper;
use super::SystemTableRemote;
use crate::error::{RemoteError, RemoteResult, SystemTableError};
use crate::id::{DatabaseId, TableInfo};
use crate::monitor::{MachineMonitoringData, MonitoringSink};

struct CachedSystemTable {
    remote: Arc<dyn SystemTableRemote>,
}

/// Instance local view of System Table: a cached handle, a cache of Table Manager handles and the
/// recovery that replaces a failed handle.
pub struct SystemTableReference {
    local: DatabaseId,
    recovery: SystemTableFailureRecovery,
    cached: ArcSwapOption<CachedSystemTable>,
    proxies: Mutex<HashMap<TableInfo, TableManagerWrapper>>,
    connected: AtomicBool,
    recovering: AsyncMutex<()>,
}

impl SystemTableReference {
    pub fn new(local: DatabaseId, recovery: SystemTableFailureRecovery) -> Self {
        Self {
            local,
            recovery,
            cached: ArcSwapOption::empty(),
            proxies: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            recovering: AsyncMutex::new(()),
        }
    }

    pub fn recovery(&self) -> &SystemTableFailureRecovery {
        &self.recovery
    }

    pub fn state(&self) -> ReferenceState {
        self.recovery.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Cached System Table handle without any attempt to locate one.
    pub fn get_system_table(&self) -> Option<Arc<dyn SystemTableRemote>> {
        self.cached.load_full().map(|cached| cached.remote.clone())
    }

    fn install(&self, remote: Arc<dyn SystemTableRemote>) {
        debug!("System Table of {} now at {}", self.local, remote.location());
        self.cached.store(Some(Arc::new(CachedSystemTable { remote })));
    }

    /// System Table handle, located through recovery if none is cached.
    pub async fn system_table(&self) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        if !self.is_connected() {
            return Err(SystemTableError::NotConnected);
        }
        match self.get_system_table() {
            Some(remote) => Ok(remote),
            None => self.recover(None).await,
        }
    }

    /// Locates System Table afresh and marks this reference connected on success.
    pub async fn reconnect(&self) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        let remote = self.recover(None).await?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(remote)
    }

    /// Replaces a failed handle. Concurrent callers that saw the same failed handle share one
    /// recovery.
    async fn recover(
        &self,
        failed: Option<&Arc<dyn SystemTableRemote>>,
    ) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        let _recovering = self.recovering.lock().await;
        if let Some(failed) = failed {
            match self.get_system_table() {
                Some(current) if !Arc::ptr_eq(&current, failed) => return Ok(current),
                _ => self.recovery.mark_stale(),
            }
        }
        match self.recovery.get().await {
            Ok(remote) => {
                self.install(remote.clone());
                Ok(remote)
            },
            Err(err) => {
                warn!("fail to locate System Table: {err}");
                self.cached.store(None);
                Err(err)
            },
        }
    }

    async fn handle_moved(
        &self,
        failed: &Arc<dyn SystemTableRemote>,
        location: DatabaseId,
    ) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        let _recovering = self.recovering.lock().await;
        if let Some(current) = self.get_system_table() {
            if !Arc::ptr_eq(&current, failed) {
                return Ok(current);
            }
        }
        self.recovery.mark_stale();
        info!("System Table moved from {} to {location}", failed.location());
        let remote = match self.recovery.find(&location).await {
            Ok(remote) => remote,
            Err(err) => {
                debug!("fail to follow System Table to {location}: {err}");
                self.recovery.get().await?
            },
        };
        self.install(remote.clone());
        Ok(remote)
    }

    /// Runs `f` against System Table. A moved or unreachable System Table is replaced once and `f`
    /// retried. Failing to replace it disconnects this reference.
    pub async fn with_system_table<T, F, Fut>(&self, f: F) -> Result<T, SystemTableError>
    where
        F: Fn(Arc<dyn SystemTableRemote>) -> Fut,
        Fut: Future<Output = RemoteResult<T>>, {
        let remote = self.system_table().await?;
        let err = match f(remote.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let replacement = match err {
            RemoteError::Moved { location } => self.handle_moved(&remote, location).await,
            RemoteError::Unreachable { .. } => {
                debug!("System Table at {} unreachable", remote.location());
                self.recover(Some(&remote)).await
            },
            err => return Err(err.into()),
        };
        let replacement = match replacement {
            Ok(replacement) => replacement,
            Err(err) => {
                warn!("{} disconnected from System Table: {err}", self.local);
                self.disconnect();
                return Err(err);
            },
        };
        Ok(f(replacement).await?)
    }

    /// Table Manager of table, from cache if `use_cache` and present. Cached handles are not served
    /// while disconnected.
    pub async fn lookup(
        &self,
        table: &TableInfo,
        use_cache: bool,
    ) -> Result<Option<TableManagerWrapper>, SystemTableError> {
        if !self.is_connected() {
            return Err(SystemTableError::NotConnected);
        }
        if use_cache {
            if let Some(wrapper) = self.proxies.lock().unwrap().get(table) {
                return Ok(Some(wrapper.clone()));
            }
        }
        let found = self
            .with_system_table(|remote| {
                let table = table.clone();
                async move { remote.lookup(&table).await }
            })
            .await?;
        match &found {
            Some(wrapper) => self.add_proxy(wrapper.clone()),
            None => self.remove_proxy(table),
        }
        Ok(found)
    }

    pub fn add_proxy(&self, wrapper: TableManagerWrapper) {
        self.proxies.lock().unwrap().insert(wrapper.table().clone(), wrapper);
    }

    pub fn remove_proxy(&self, table: &TableInfo) {
        self.proxies.lock().unwrap().remove(table);
    }

    pub async fn remove_table_information(&self, table: &TableInfo) -> Result<bool, SystemTableError> {
        self.remove_proxy(table);
        self.with_system_table(|remote| {
            let table = table.clone();
            async move { remote.remove_table_information(&table).await }
        })
        .await
    }

    /// Recreates System Table on the local instance from its persisted state.
    pub async fn recreate_locally(&self, persisted: bool) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        let remote = self.recovery.restart(persisted, true, None).await?;
        self.install(remote.clone());
        Ok(remote)
    }

    /// Moves System Table from where it currently lives to the local instance.
    pub async fn migrate_here(&self) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        let current = self.system_table().await?;
        if current.location() == &self.local && current.is_system_table().await.unwrap_or(false) {
            return Ok(current);
        }
        let _recovering = self.recovering.lock().await;
        let remote = self.recovery.restart(true, false, Some(current)).await?;
        self.install(remote.clone());
        Ok(remote)
    }
}

#[async_trait]
impl MonitoringSink for SystemTableReference {
    async fn add_monitoring_summary(&self, data: MachineMonitoringData) -> anyhow::Result<()> {
        self.with_system_table(|remote| {
            let data = data.clone();
            async move { remote.add_monitoring_summary(data).await }
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;
    use crate::instance::{FakeRegistry, InstanceEnv};
    use crate::locator::{LocalLocator, LocatorPeer, LocatorState};
    use crate::store::MemoryStateStore;
    use crate::systable::SystemTableHost;
    use crate::utils::{self, DropOwner};

    fn new_reference(name: &str) -> (DropOwner, SystemTableReference) {
        let (owner, watcher) = utils::drop_watcher();
        let peers: Vec<Arc<dyn LocatorPeer>> =
            vec![Arc::new(LocalLocator::new("locator", Arc::new(LocatorState::new())))];
        let env = InstanceEnv::new(Arc::new(FakeRegistry::default()), peers);
        let host = SystemTableHost::new(DatabaseId::mem(name), env, Arc::new(MemoryStateStore::new()), watcher);
        let recovery = SystemTableFailureRecovery::new(Arc::new(host));
        (owner, SystemTableReference::new(DatabaseId::mem(name), recovery))
    }

    #[tokio::test]
    async fn test_not_connected_fails_fast() {
        let (_owner, reference) = new_reference("a");
        let err = reference.lookup(&TableInfo::new("", "t"), true).await.unwrap_err();
        assert_that!(matches!(err, SystemTableError::NotConnected)).is_true();
        assert_that!(reference.get_system_table().is_none()).is_true();
    }

    #[tokio::test]
    async fn test_reconnect_and_proxy_cache() {
        let (_owner, reference) = new_reference("a");
        let remote = reference.reconnect().await.unwrap();
        assert_that!(reference.is_connected()).is_true();
        assert_that!(reference.state()).is_equal_to(ReferenceState::ActiveKnown);
        assert_that!(Arc::ptr_eq(&reference.get_system_table().unwrap(), &remote)).is_true();

        let table = TableInfo::new("", "t");
        let wrapper = TableManagerWrapper::detached(table.clone(), DatabaseId::mem("b"));
        reference.add_proxy(wrapper);
        let cached = reference.lookup(&table, true).await.unwrap().unwrap();
        assert_that!(cached.location().clone()).is_equal_to(DatabaseId::mem("b"));
        assert_that!(reference.lookup(&table, false).await.unwrap().is_none()).is_true();
        assert_that!(reference.lookup(&table, true).await.unwrap().is_none()).is_true();
    }

    #[tokio::test]
    async fn test_disconnected_ignores_proxy_cache() {
        let (_owner, reference) = new_reference("a");
        reference.reconnect().await.unwrap();
        let table = TableInfo::new("", "t");
        reference.add_proxy(TableManagerWrapper::detached(table.clone(), DatabaseId::mem("b")));
        assert_that!(reference.lookup(&table, true).await.unwrap().is_some()).is_true();

        reference.disconnect();
        let err = reference.lookup(&table, true).await.unwrap_err();
        assert_that!(matches!(err, SystemTableError::NotConnected)).is_true();
    }

    #[tokio::test]
    async fn test_host_stop_disconnects() {
        let (owner, reference) = new_reference("a");
        reference.reconnect().await.unwrap();
        drop(owner);
        let err = reference.lookup(&TableInfo::new("", "t"), false).await.unwrap_err();
        assert_that!(reference.is_connected()).is_false();
        assert_that!(matches!(err, SystemTableError::NotConnected)).is_false();
        let err = reference.lookup(&TableInfo::new("", "t"), false).await.unwrap_err();
        assert_that!(matches!(err, SystemTableError::NotConnected)).is_true();
    }
}

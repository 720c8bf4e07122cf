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

use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwapOption;
use ignore_result::Ignore;
use scopeguard::ScopeGuard;
use tracing::{debug, info, instrument, warn};

use super::service::SystemTable;
use super::SystemTableRemote;
use crate::error::{LocatorError, RemoteError, SystemTableError};
use crate::id::DatabaseId;
use crate::instance::InstanceEnv;
use crate::locator::LocatorQuorum;
use crate::protos::{self, SystemTableRecord};
use crate::store::{self, StateStore};
use crate::utils::DropWatcher;

/// What an instance hosts of System Table: possibly the live System Table and always the locally
/// persisted copy of its state.
pub struct SystemTableHost {
    id: DatabaseId,
    env: InstanceEnv,
    store: Arc<dyn StateStore>,
    liveness: DropWatcher,
    hosted: ArcSwapOption<SystemTable>,
}

impl SystemTableHost {
    pub fn new(id: DatabaseId, env: InstanceEnv, store: Arc<dyn StateStore>, liveness: DropWatcher) -> Self {
        Self { id, env, store, liveness, hosted: ArcSwapOption::empty() }
    }

    pub fn id(&self) -> &DatabaseId {
        &self.id
    }

    pub fn env(&self) -> &InstanceEnv {
        &self.env
    }

    pub fn liveness(&self) -> &DropWatcher {
        &self.liveness
    }

    /// Hosted System Table unless its state was handed to a successor.
    pub fn hosted(&self) -> Option<Arc<SystemTable>> {
        if self.liveness.is_dropped() {
            return None;
        }
        self.hosted.load_full().filter(|table| table.is_authoritative())
    }

    fn check_alive(&self) -> Result<(), SystemTableError> {
        if self.liveness.is_dropped() {
            return Err(RemoteError::unreachable(self.id.clone(), "instance stopped").into());
        }
        Ok(())
    }

    fn install(&self, table: Arc<SystemTable>) {
        self.hosted.store(Some(table));
    }

    pub async fn store_state(&self, record: &SystemTableRecord) -> Result<()> {
        store::store_record(self.store.as_ref(), record).await
    }

    pub async fn load_state(&self) -> Result<Option<SystemTableRecord>> {
        store::load_record(self.store.as_ref()).await
    }
}

/// Knowledge an instance has about where System Table lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferenceState {
    #[default]
    Unknown,
    ActiveKnown,
    /// Cached handle failed or answered moved.
    Stale,
    Locating,
    Recreating,
}

/// Locates System Table through locators and recreates it when no instance hosts it.
///
/// Recreation runs the locator protocol: GET, LOCK, build, SET, install, COMMIT.
pub struct SystemTableFailureRecovery {
    host: Arc<SystemTableHost>,
    locators: LocatorQuorum,
    state: spin::Mutex<ReferenceState>,
}

impl SystemTableFailureRecovery {
    pub fn new(host: Arc<SystemTableHost>) -> Self {
        let locators = LocatorQuorum::new(host.env().locators().to_vec());
        Self { host, locators, state: spin::Mutex::new(ReferenceState::Unknown) }
    }

    pub fn host(&self) -> &Arc<SystemTableHost> {
        &self.host
    }

    pub fn state(&self) -> ReferenceState {
        *self.state.lock()
    }

    fn set_state(&self, state: ReferenceState) {
        *self.state.lock() = state;
    }

    pub fn mark_stale(&self) {
        self.set_state(ReferenceState::Stale);
    }

    /// Resolves System Table at a location it reportedly moved to.
    pub async fn find(&self, location: &DatabaseId) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        let instance = self.host.env().registry().instance(location)?;
        if !instance.is_system_table().await? {
            return Err(SystemTableError::access(format!("{location} does not host System Table")));
        }
        let table = instance.system_table().await?;
        self.set_state(ReferenceState::ActiveKnown);
        Ok(table)
    }

    /// Locates System Table, recreating it if no candidate on locators hosts it.
    #[instrument(skip_all, fields(local = %self.host.id()))]
    pub async fn get(&self) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        self.set_state(ReferenceState::Locating);
        let result = self.locate_or_recreate().await;
        self.set_state(match result {
            Ok(_) => ReferenceState::ActiveKnown,
            Err(_) => ReferenceState::Stale,
        });
        result
    }

    async fn locate_or_recreate(&self) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        self.host.check_alive()?;
        if let Some(table) = self.host.hosted() {
            return Ok(table);
        }
        let candidates = self.candidates().await?;
        if let Some(table) = self.try_to_find_system_table_via_locator(&candidates).await {
            return Ok(table);
        }
        self.set_state(ReferenceState::Recreating);
        self.reinstantiate_system_table(&candidates).await
    }

    /// Instances recorded on locators as holding System Table state.
    pub async fn candidates(&self) -> Result<Vec<DatabaseId>, SystemTableError> {
        let snapshot = self.locators.get_locations().await?.ok_or(LocatorError::NoAgreement)?;
        let candidates = protos::parse_locations(&snapshot.locations).map_err(LocatorError::from)?;
        debug!("locators record System Table candidates {candidates:?}");
        Ok(candidates)
    }

    /// Asks each candidate whether it hosts the active System Table.
    pub async fn try_to_find_system_table_via_locator(
        &self,
        candidates: &[DatabaseId],
    ) -> Option<Arc<dyn SystemTableRemote>> {
        for candidate in candidates.iter() {
            let instance = match self.host.env().registry().instance(candidate) {
                Ok(instance) => instance,
                Err(err) => {
                    debug!("candidate {candidate} unavailable: {err}");
                    continue;
                },
            };
            match instance.is_system_table().await {
                Ok(true) => match instance.system_table().await {
                    Ok(table) => {
                        debug!("found System Table on {candidate}");
                        return Some(table);
                    },
                    Err(err) => debug!("candidate {candidate} stopped hosting System Table: {err}"),
                },
                Ok(false) => debug!("candidate {candidate} does not host System Table"),
                Err(err) => debug!("candidate {candidate} unreachable: {err}"),
            }
        }
        None
    }

    /// Recreates System Table from persisted state of a candidate, preferring the local instance.
    /// Without candidates a fresh System Table is created locally.
    pub async fn reinstantiate_system_table(
        &self,
        candidates: &[DatabaseId],
    ) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        if candidates.is_empty() {
            info!("no System Table recorded on locators, creating one");
            return self.restart(true, false, None).await;
        }
        let local = self.host.id();
        let mut last_error = None;
        if candidates.contains(local) {
            match self.restart(true, true, None).await {
                Ok(table) => return Ok(table),
                Err(err) => {
                    warn!("fail to recreate System Table locally: {err}");
                    last_error = Some(err);
                },
            }
        }
        for candidate in candidates.iter().filter(|candidate| *candidate != local) {
            let result = match self.host.env().registry().instance(candidate) {
                Ok(instance) => instance.recreate_system_table().await,
                Err(err) => Err(err),
            };
            match result {
                Ok(table) => {
                    info!("System Table recreated on {candidate}");
                    return Ok(table);
                },
                Err(err) => {
                    debug!("candidate {candidate} could not recreate System Table: {err}");
                    last_error = Some(err.into());
                },
            }
        }
        Err(last_error.unwrap_or_else(|| SystemTableError::access("no candidate recreated System Table")))
    }

    /// Builds System Table on the local instance from locally persisted state and installs it,
    /// without touching locators.
    pub async fn recreate_from_local_persisted_state(
        &self,
        persisted: bool,
    ) -> Result<Arc<SystemTable>, SystemTableError> {
        let table = Arc::new(self.build_from_local_persisted_state(persisted).await?);
        self.host.install(table.clone());
        table.start().await;
        Ok(table)
    }

    async fn build_from_local_persisted_state(&self, persisted: bool) -> Result<SystemTable, SystemTableError> {
        let record = self
            .host
            .load_state()
            .await
            .map_err(|err| SystemTableError::access(format!("fail to load persisted state: {err:#}")))?
            .ok_or_else(|| SystemTableError::access("no persisted System Table state"))?;
        SystemTable::restore(&self.host, &record, persisted)
            .await
            .map_err(|err| SystemTableError::access(format!("fail to restore System Table: {err:#}")))
    }

    /// Asks `old` to hand over its state, following it once if it already moved.
    async fn prepare_migration(
        &self,
        old: Arc<dyn SystemTableRemote>,
    ) -> Result<(Arc<dyn SystemTableRemote>, SystemTableRecord), SystemTableError> {
        let local = self.host.id().clone();
        match old.prepare_for_migration(local.clone()).await {
            Ok(record) => Ok((old, record)),
            Err(RemoteError::Moved { location }) => {
                debug!("System Table moved to {location} before migration");
                let current = self.find(&location).await?;
                let record = current.prepare_for_migration(local).await?;
                Ok((current, record))
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Starts System Table on the local instance under locator lock.
    ///
    /// State comes from `old` if given, from local persisted state if `recreate_from_persisted`,
    /// or is empty otherwise. A non `persisted` System Table does not replicate its state.
    #[instrument(skip_all, fields(local = %self.host.id(), persisted = persisted, migrate = old.is_some()))]
    pub async fn restart(
        &self,
        persisted: bool,
        recreate_from_persisted: bool,
        old: Option<Arc<dyn SystemTableRemote>>,
    ) -> Result<Arc<dyn SystemTableRemote>, SystemTableError> {
        self.host.check_alive()?;
        if old.is_none() {
            if let Some(table) = self.host.hosted() {
                return Ok(table);
            }
        }
        let requester = self.host.id().to_string();
        self.locators.get_locations().await?.ok_or(LocatorError::NoAgreement)?;
        if !self.locators.lock_locators(&requester).await {
            return Err(LocatorError::LockNotGranted { requester }.into());
        }
        let (table, predecessor) = match old {
            Some(old) => {
                let (predecessor, record) = self.prepare_migration(old).await?;
                let predecessor = scopeguard::guard(predecessor, |predecessor| {
                    tokio::spawn(async move { predecessor.abort_migration().await.ignore() });
                });
                let table = SystemTable::restore(&self.host, &record, persisted)
                    .await
                    .map_err(|err| SystemTableError::access(format!("fail to restore System Table: {err:#}")))?;
                (table, Some(predecessor))
            },
            None if recreate_from_persisted => (self.build_from_local_persisted_state(persisted).await?, None),
            None => (SystemTable::new(&self.host, persisted), None),
        };
        let table = Arc::new(table);
        if !self.locators.set_locations(table.locations().await).await {
            return Err(LocatorError::NotAcknowledged { command: "SET" }.into());
        }
        if let Some(predecessor) = predecessor.map(ScopeGuard::into_inner) {
            if let Err(err) = predecessor.complete_migration().await {
                warn!("predecessor {} did not complete migration: {err}", predecessor.location());
            }
        }
        self.host.install(table.clone());
        table.start().await;
        if !self.locators.commit_locators(&requester).await {
            warn!("locators did not acknowledge commit, lock expires on its own");
        }
        info!("System Table started with epoch {}", table.epoch().await);
        Ok(table)
    }
}

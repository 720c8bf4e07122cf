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

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use hashbrown::HashMap;
use rand::seq::SliceRandom;
use tracing::{debug, info, instrument, warn};

use super::proxy::QueryProxy;
use super::{LockType, TableManagerRemote};
use crate::error::{RemoteError, RemoteResult};
use crate::id::{DatabaseId, TableInfo};
use crate::instance::InstanceRegistry;
use crate::protos::{self, TableInfoRecord, TableManagerStateRecord, TableReplicaRecord};
use crate::utils::DropWatcher;

/// Update id carried by read grants. Exclusive grants count from one.
const READ_UPDATE_ID: u64 = 0;

#[derive(Clone, Debug)]
struct ExclusiveLock {
    holder: DatabaseId,
    lock_type: LockType,
    update_id: u64,
}

#[derive(Debug, Default)]
struct ManagerState {
    /// Data replicas and whether each is up to date.
    replicas: BTreeMap<DatabaseId, bool>,
    exclusive: Option<ExclusiveLock>,
    readers: HashMap<DatabaseId, usize>,
    last_update_id: u64,
    state_replicas: Vec<DatabaseId>,
    version: u64,
    dropped: bool,
}

impl ManagerState {
    fn active_replicas(&self) -> Vec<DatabaseId> {
        self.replicas.iter().filter(|(_, active)| **active).map(|(replica, _)| replica.clone()).collect()
    }

    fn to_record(&self, table: &TableInfo) -> TableManagerStateRecord {
        TableManagerStateRecord {
            table: Some(TableInfoRecord::from(table)),
            replicas: self
                .replicas
                .iter()
                .map(|(replica, active)| TableReplicaRecord { location: replica.to_string(), active: *active })
                .collect(),
            last_update_id: self.last_update_id,
            state_replicas: self.state_replicas.iter().map(|replica| replica.to_string()).collect(),
            version: self.version,
        }
    }
}

/// Lock manager and replica directory of one table, hosted on one instance.
///
/// Many readers or one exclusive holder. An exclusive holder may also read. Every change to
/// replica bookkeeping is pushed to the state replicas so another instance can take over.
pub struct TableManager {
    table: TableInfo,
    location: DatabaseId,
    liveness: DropWatcher,
    registry: Arc<dyn InstanceRegistry>,
    state: Mutex<ManagerState>,
}

impl TableManager {
    /// Manager of a new table whose only replica lives on the hosting instance.
    pub fn new(
        table: TableInfo,
        location: DatabaseId,
        liveness: DropWatcher,
        registry: Arc<dyn InstanceRegistry>,
        state_replicas: Vec<DatabaseId>,
    ) -> Self {
        let mut state = ManagerState { state_replicas, ..Default::default() };
        state.replicas.insert(location.clone(), true);
        Self { table, location, liveness, registry, state: Mutex::new(state) }
    }

    /// Manager rebuilt from replicated state on a new hosting instance. Locks are not carried over.
    pub fn restore(
        location: DatabaseId,
        liveness: DropWatcher,
        registry: Arc<dyn InstanceRegistry>,
        record: &TableManagerStateRecord,
    ) -> Result<Self> {
        let table = record.table_info()?;
        let mut state = ManagerState {
            last_update_id: record.last_update_id,
            state_replicas: protos::parse_locations(&record.state_replicas)?,
            version: record.version,
            ..Default::default()
        };
        for replica in record.replicas.iter() {
            state.replicas.insert(replica.location.parse()?, replica.active);
        }
        Ok(Self { table, location, liveness, registry, state: Mutex::new(state) })
    }

    fn check_alive(&self) -> RemoteResult<()> {
        if self.liveness.is_dropped() {
            return Err(RemoteError::unreachable(self.location.clone(), "instance stopped"));
        }
        Ok(())
    }

    pub fn record(&self) -> TableManagerStateRecord {
        self.state.lock().unwrap().to_record(&self.table)
    }

    pub fn state_replicas(&self) -> Vec<DatabaseId> {
        self.state.lock().unwrap().state_replicas.clone()
    }

    /// Pushes current state to state replicas.
    pub async fn replicate(&self) {
        let (targets, record) = {
            let state = self.state.lock().unwrap();
            (state.state_replicas.clone(), state.to_record(&self.table))
        };
        self.push(targets, record).await;
    }

    async fn push(&self, targets: Vec<DatabaseId>, record: TableManagerStateRecord) {
        let record = &record;
        let results = join_all(targets.iter().map(|target| async move {
            let instance = self.registry.instance(target)?;
            instance.store_table_manager_state(record.clone()).await
        }))
        .await;
        for (target, result) in targets.iter().zip(results) {
            if let Err(err) = result {
                warn!("fail to replicate state of {} to {target}: {err}", self.table);
            }
        }
    }

    fn bump(&self, state: &mut ManagerState) -> (Vec<DatabaseId>, TableManagerStateRecord) {
        state.version += 1;
        (state.state_replicas.clone(), state.to_record(&self.table))
    }

    fn grant_read(&self, state: &mut ManagerState, requester: &DatabaseId) -> QueryProxy {
        if let Some(lock) = &state.exclusive {
            if lock.holder != *requester {
                debug!("read of {} by {requester} conflicts with {:?} by {}", self.table, lock.lock_type, lock.holder);
                return QueryProxy::denied(self.table.clone(), requester.clone());
            }
        }
        let active = state.active_replicas();
        let chosen = match active.contains(requester) {
            true => requester.clone(),
            false => match active.choose(&mut rand::thread_rng()) {
                Some(replica) => replica.clone(),
                None => return QueryProxy::denied(self.table.clone(), requester.clone()),
            },
        };
        *state.readers.entry(requester.clone()).or_default() += 1;
        QueryProxy::new(self.table.clone(), LockType::Read, requester.clone(), READ_UPDATE_ID, vec![chosen])
    }

    fn grant_exclusive(&self, state: &mut ManagerState, lock_type: LockType, requester: &DatabaseId) -> QueryProxy {
        let active = state.active_replicas();
        if active.is_empty() {
            warn!("table {} has no active replica", self.table);
            return QueryProxy::denied(self.table.clone(), requester.clone());
        }
        if let Some(lock) = state.exclusive.as_mut() {
            if lock.holder != *requester {
                debug!(
                    "{lock_type:?} of {} by {requester} conflicts with {:?} by {}",
                    self.table, lock.lock_type, lock.holder
                );
                return QueryProxy::denied(self.table.clone(), requester.clone());
            }
            if lock_type == LockType::Drop {
                lock.lock_type = LockType::Drop;
            }
            return QueryProxy::new(self.table.clone(), lock.lock_type, requester.clone(), lock.update_id, active);
        }
        if state.readers.keys().any(|reader| reader != requester) {
            debug!("{lock_type:?} of {} by {requester} conflicts with {} readers", self.table, state.readers.len());
            return QueryProxy::denied(self.table.clone(), requester.clone());
        }
        state.last_update_id += 1;
        let update_id = state.last_update_id;
        state.exclusive = Some(ExclusiveLock { holder: requester.clone(), lock_type, update_id });
        QueryProxy::new(self.table.clone(), lock_type, requester.clone(), update_id, active)
    }
}

#[async_trait]
impl TableManagerRemote for TableManager {
    fn table(&self) -> &TableInfo {
        &self.table
    }

    fn location(&self) -> &DatabaseId {
        &self.location
    }

    async fn check_connection(&self) -> RemoteResult<()> {
        self.check_alive()
    }

    #[instrument(skip_all, fields(table = %self.table, lock = ?lock_type, requester = %requester))]
    async fn get_query_proxy(&self, lock_type: LockType, requester: &DatabaseId) -> RemoteResult<QueryProxy> {
        self.check_alive()?;
        let mut state = self.state.lock().unwrap();
        if state.dropped {
            return Err(RemoteError::denied(format!("table {} dropped", self.table)));
        }
        let proxy = match lock_type {
            LockType::None => QueryProxy::denied(self.table.clone(), requester.clone()),
            LockType::Read => self.grant_read(&mut state, requester),
            LockType::Write | LockType::Create | LockType::Drop => {
                self.grant_exclusive(&mut state, lock_type, requester)
            },
        };
        Ok(proxy)
    }

    #[instrument(skip_all, fields(table = %self.table, requester = %requester, update_id = update_id))]
    async fn release_lock(&self, requester: &DatabaseId, updated: &[DatabaseId], update_id: u64) -> RemoteResult<bool> {
        self.check_alive()?;
        let (targets, record) = {
            let mut state = self.state.lock().unwrap();
            if update_id == READ_UPDATE_ID {
                let Some(count) = state.readers.get_mut(requester) else {
                    return Ok(false);
                };
                *count -= 1;
                if *count == 0 {
                    state.readers.remove(requester);
                }
                return Ok(true);
            }
            let lock = match state.exclusive.take() {
                Some(lock) if lock.holder == *requester && lock.update_id == update_id => lock,
                other => {
                    state.exclusive = other;
                    return Ok(false);
                },
            };
            if updated.is_empty() {
                debug!("update {update_id} of {} applied nowhere", self.table);
                return Ok(true);
            }
            for (replica, active) in state.replicas.iter_mut() {
                if *active && !updated.contains(replica) {
                    info!("replica {replica} of {} missed update {update_id}, marking inactive", self.table);
                    *active = false;
                }
            }
            if lock.lock_type == LockType::Drop {
                state.dropped = true;
            }
            self.bump(&mut state)
        };
        self.push(targets, record).await;
        Ok(true)
    }

    async fn add_replica(&self, replica: DatabaseId) -> RemoteResult<bool> {
        self.check_alive()?;
        let (targets, record) = {
            let mut state = self.state.lock().unwrap();
            if state.exclusive.is_some() || state.replicas.get(&replica) == Some(&true) {
                return Ok(false);
            }
            state.replicas.insert(replica, true);
            self.bump(&mut state)
        };
        self.push(targets, record).await;
        Ok(true)
    }

    async fn active_replicas(&self) -> RemoteResult<Vec<DatabaseId>> {
        self.check_alive()?;
        Ok(self.state.lock().unwrap().active_replicas())
    }

    async fn state_record(&self) -> RemoteResult<TableManagerStateRecord> {
        self.check_alive()?;
        Ok(self.record())
    }
}

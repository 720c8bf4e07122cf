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

use futures::future::join_all;
use tracing::{debug, warn};

use super::{LockType, TableManagerRemote};
use crate::error::{QueryError, RemoteError, RemoteResult};
use crate::id::{DatabaseId, TableInfo};
use crate::instance::InstanceRegistry;

/// Lock grant of a Table Manager together with replicas a query should run on.
#[derive(Clone, Debug)]
pub struct QueryProxy {
    table: TableInfo,
    lock_type: LockType,
    requester: DatabaseId,
    update_id: u64,
    replicas: Vec<DatabaseId>,
}

impl QueryProxy {
    pub(crate) fn new(
        table: TableInfo,
        lock_type: LockType,
        requester: DatabaseId,
        update_id: u64,
        replicas: Vec<DatabaseId>,
    ) -> Self {
        Self { table, lock_type, requester, update_id, replicas }
    }

    pub(crate) fn denied(table: TableInfo, requester: DatabaseId) -> Self {
        Self::new(table, LockType::None, requester, 0, Vec::new())
    }

    pub fn table(&self) -> &TableInfo {
        &self.table
    }

    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    pub fn is_granted(&self) -> bool {
        self.lock_type != LockType::None
    }

    pub fn requester(&self) -> &DatabaseId {
        &self.requester
    }

    pub fn update_id(&self) -> u64 {
        self.update_id
    }

    pub fn replicas(&self) -> &[DatabaseId] {
        &self.replicas
    }

    /// Runs statement on every replica of an exclusive grant, then releases the lock reporting
    /// replicas that applied it. Returns those replicas.
    pub async fn execute_update(
        &self,
        manager: &dyn TableManagerRemote,
        registry: &dyn InstanceRegistry,
        statement: &str,
    ) -> Result<Vec<DatabaseId>, QueryError> {
        if !self.lock_type.is_exclusive() {
            return Err(QueryError::LockDenied { table: self.table.clone(), lock_type: self.lock_type });
        }
        let results = join_all(self.replicas.iter().map(|replica| async move {
            let instance = registry.instance(replica)?;
            instance.execute_update(&self.table, statement).await
        }))
        .await;
        let mut updated = Vec::with_capacity(results.len());
        for (replica, result) in self.replicas.iter().zip(results) {
            match result {
                Ok(rows) => {
                    debug!("replica {replica} of {} applied update {}: {rows} rows", self.table, self.update_id);
                    updated.push(replica.clone());
                },
                Err(err) => warn!("replica {replica} of {} failed update {}: {err}", self.table, self.update_id),
            }
        }
        if !manager.release_lock(&self.requester, &updated, self.update_id).await? {
            warn!("lock of {} for update {} was not held at release", self.table, self.update_id);
        }
        if updated.is_empty() {
            return Err(QueryError::NoReplicaUpdated { table: self.table.clone() });
        }
        Ok(updated)
    }

    /// Runs query on the first replica that answers. A read lock is released afterwards.
    pub async fn execute_query(
        &self,
        manager: &dyn TableManagerRemote,
        registry: &dyn InstanceRegistry,
        statement: &str,
    ) -> Result<u64, QueryError> {
        if !self.is_granted() {
            return Err(QueryError::LockDenied { table: self.table.clone(), lock_type: LockType::Read });
        }
        let mut result: RemoteResult<u64> = Err(RemoteError::denied("no replica to query"));
        for replica in self.replicas.iter() {
            result = match registry.instance(replica) {
                Ok(instance) => instance.execute_query(&self.table, statement).await,
                Err(err) => Err(err),
            };
            match &result {
                Ok(_) => break,
                Err(err) => debug!("replica {replica} of {} failed query: {err}", self.table),
            }
        }
        if self.lock_type == LockType::Read {
            manager.release_lock(&self.requester, &[], self.update_id).await?;
        }
        Ok(result?)
    }
}

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

use anyhow::Result;
use hashbrown::HashMap;
use tracing::debug;

use super::wrapper::{DatabaseInstanceWrapper, TableManagerWrapper};
use crate::id::{DatabaseId, TableInfo};
use crate::instance::InstanceRegistry;
use crate::protos::{self, InstanceRecord, SystemTableRecord, TableInfoRecord, TableManagerRecord};

/// In memory catalog of System Table.
#[derive(Debug)]
pub(super) struct SystemTableState {
    pub epoch: u64,
    pub managers: HashMap<TableInfo, TableManagerWrapper>,
    /// State replicas of each Table Manager.
    pub replicas: HashMap<TableInfo, Vec<DatabaseId>>,
    pub primaries: HashMap<TableInfo, DatabaseId>,
    pub instances: BTreeMap<DatabaseId, DatabaseInstanceWrapper>,
    /// Instances holding a persisted copy of this state, hosting instance first.
    pub state_replicas: Vec<DatabaseId>,
}

impl SystemTableState {
    pub fn new(location: &DatabaseId) -> Self {
        Self {
            epoch: 1,
            managers: HashMap::new(),
            replicas: HashMap::new(),
            primaries: HashMap::new(),
            instances: BTreeMap::new(),
            state_replicas: vec![location.clone()],
        }
    }

    /// Rebuilds state on `location` from a record, resolving handles through registry.
    pub async fn restore(
        location: &DatabaseId,
        record: &SystemTableRecord,
        registry: &dyn InstanceRegistry,
    ) -> Result<Self> {
        let mut state = Self::new(location);
        state.epoch = record.epoch + 1;
        for replica in protos::parse_locations(&record.state_replicas)? {
            if !state.state_replicas.contains(&replica) {
                state.state_replicas.push(replica);
            }
        }
        for instance in record.instances.iter() {
            let id: DatabaseId = instance.location.parse()?;
            let handle = registry.instance(&id).ok();
            let reachable = match &handle {
                Some(handle) => handle.check_connection().await.is_ok(),
                None => false,
            };
            let active = instance.active && (reachable || id == *location);
            debug!("restored instance {id}, active {active}");
            state.instances.insert(id.clone(), DatabaseInstanceWrapper::new(id, handle, active));
        }
        state.state_replicas.retain(|replica| {
            replica == location || state.instances.get(replica).map_or(false, |instance| instance.is_active())
        });
        for manager in record.table_managers.iter() {
            let table = manager.table_info()?;
            let manager_location: DatabaseId = manager.location.parse()?;
            let handle = match registry.instance(&manager_location) {
                Ok(instance) => instance.table_manager(&table).await.ok().flatten(),
                Err(_) => None,
            };
            let wrapper = match handle {
                Some(handle) => TableManagerWrapper::new(handle),
                None => TableManagerWrapper::detached(table.clone(), manager_location),
            };
            if !manager.primary.is_empty() {
                state.primaries.insert(table.clone(), manager.primary.parse()?);
            }
            state.replicas.insert(table.clone(), protos::parse_locations(&manager.state_replicas)?);
            state.managers.insert(table, wrapper);
        }
        Ok(state)
    }

    pub fn to_record(&self) -> SystemTableRecord {
        let table_managers = self
            .managers
            .iter()
            .map(|(table, wrapper)| TableManagerRecord {
                table: Some(TableInfoRecord::from(table)),
                location: wrapper.location().to_string(),
                primary: self.primaries.get(table).map(|primary| primary.to_string()).unwrap_or_default(),
                state_replicas: self
                    .replicas
                    .get(table)
                    .map(|replicas| replicas.iter().map(|replica| replica.to_string()).collect())
                    .unwrap_or_default(),
            })
            .collect();
        let instances = self
            .instances
            .values()
            .map(|instance| InstanceRecord { location: instance.id().to_string(), active: instance.is_active() })
            .collect();
        SystemTableRecord {
            epoch: self.epoch,
            table_managers,
            instances,
            state_replicas: self.state_replicas.iter().map(|replica| replica.to_string()).collect(),
        }
    }

    pub fn active_instances(&self) -> Vec<DatabaseId> {
        self.instances.values().filter(|instance| instance.is_active()).map(|instance| instance.id().clone()).collect()
    }

    /// Adds active instances as state replicas until there are `factor` of them. Returns whether
    /// state replicas changed.
    pub fn top_up_replication(&mut self, factor: usize) -> bool {
        let mut changed = false;
        for candidate in self.active_instances() {
            if self.state_replicas.len() >= factor {
                break;
            }
            if !self.state_replicas.contains(&candidate) {
                self.state_replicas.push(candidate);
                changed = true;
            }
        }
        changed
    }

    /// Forgets a failed instance as state replica of System Table and of every Table Manager that
    /// keeps another one. Returns whether state replicas of System Table changed.
    pub fn forget_state_replica(&mut self, database: &DatabaseId, hosting: &DatabaseId) -> bool {
        for replicas in self.replicas.values_mut() {
            if replicas.len() > 1 {
                replicas.retain(|replica| replica != database);
            }
        }
        if database == hosting {
            return false;
        }
        let before = self.state_replicas.len();
        self.state_replicas.retain(|replica| replica != database);
        before != self.state_replicas.len()
    }

    /// Locations to publish on locators.
    pub fn locations(&self) -> Vec<String> {
        self.state_replicas.iter().map(|replica| replica.clone().with_system_table(true).to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assertor::*;

    use super::*;
    use crate::instance::FakeRegistry;

    fn db(name: &str) -> DatabaseId {
        DatabaseId::mem(name)
    }

    #[test]
    fn test_top_up_replication() {
        let mut state = SystemTableState::new(&db("a"));
        for name in ["a", "b", "c"] {
            state.instances.insert(db(name), DatabaseInstanceWrapper::new(db(name), None, name != "b"));
        }
        assert_that!(state.top_up_replication(2)).is_true();
        assert_that!(state.state_replicas.clone()).is_equal_to(vec![db("a"), db("c")]);
        assert_that!(state.top_up_replication(2)).is_false();

        assert_that!(state.forget_state_replica(&db("c"), &db("a"))).is_true();
        assert_that!(state.forget_state_replica(&db("a"), &db("a"))).is_false();
        assert_that!(state.state_replicas.clone()).is_equal_to(vec![db("a")]);
        assert_that!(state.locations()).is_equal_to(vec!["jdbc:h2:sm:mem:a".to_string()]);
    }

    #[test]
    fn test_forget_keeps_last_manager_replica() {
        let mut state = SystemTableState::new(&db("a"));
        let (one, two) = (TableInfo::new("", "one"), TableInfo::new("", "two"));
        state.replicas.insert(one.clone(), vec![db("b")]);
        state.replicas.insert(two.clone(), vec![db("b"), db("c")]);
        state.forget_state_replica(&db("b"), &db("a"));
        assert_that!(state.replicas[&one].clone()).is_equal_to(vec![db("b")]);
        assert_that!(state.replicas[&two].clone()).is_equal_to(vec![db("c")]);
    }

    #[tokio::test]
    async fn test_restore_from_record() {
        let mut state = SystemTableState::new(&db("a"));
        let table = TableInfo::new("", "t");
        state.instances.insert(db("a"), DatabaseInstanceWrapper::new(db("a"), None, true));
        state.instances.insert(db("b"), DatabaseInstanceWrapper::new(db("b"), None, true));
        state.instances.insert(db("down"), DatabaseInstanceWrapper::new(db("down"), None, true));
        state.managers.insert(table.clone(), TableManagerWrapper::detached(table.clone(), db("b")));
        state.replicas.insert(table.clone(), vec![db("b"), db("a")]);
        state.primaries.insert(table.clone(), db("b"));
        state.state_replicas.push(db("b"));
        let record = state.to_record();

        let registry = Arc::new(FakeRegistry::default());
        registry.set_down(&db("down"), true);
        let restored = SystemTableState::restore(&db("b"), &record, registry.as_ref()).await.unwrap();
        assert_that!(restored.epoch).is_equal_to(2);
        assert_that!(restored.state_replicas.clone()).is_equal_to(vec![db("b"), db("a")]);
        assert_that!(restored.active_instances()).is_equal_to(vec![db("a"), db("b")]);
        assert_that!(restored.replicas[&table].clone()).is_equal_to(vec![db("b"), db("a")]);
        assert_that!(restored.primaries[&table].clone()).is_equal_to(db("b"));
        assert_that!(restored.managers[&table].location().clone()).is_equal_to(db("b"));
        assert_that!(restored.to_record().table_managers.len()).is_equal_to(1);
    }
}

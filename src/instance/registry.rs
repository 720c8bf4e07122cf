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

use std::sync::{Arc, RwLock, Weak};

use hashbrown::HashMap;
use tracing::debug;

use super::DatabaseInstanceRemote;
use crate::error::{RemoteError, RemoteResult};
use crate::id::DatabaseId;

/// Resolves instance ids to handles.
pub trait InstanceRegistry: Send + Sync + 'static {
    fn register(&self, id: DatabaseId, instance: Weak<dyn DatabaseInstanceRemote>);

    fn deregister(&self, id: &DatabaseId);

    /// Handle of instance. Fails with [RemoteError::Unreachable] if it is unknown or gone.
    fn instance(&self, id: &DatabaseId) -> RemoteResult<Arc<dyn DatabaseInstanceRemote>>;
}

/// Registry of instances running in this process.
///
/// Handles are kept weakly, so a dropped instance becomes unreachable rather than kept alive.
#[derive(Default)]
pub struct LocalInstanceRegistry {
    instances: RwLock<HashMap<DatabaseId, Weak<dyn DatabaseInstanceRemote>>>,
}

impl LocalInstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstanceRegistry for LocalInstanceRegistry {
    fn register(&self, id: DatabaseId, instance: Weak<dyn DatabaseInstanceRemote>) {
        debug!("registering instance {id}");
        self.instances.write().unwrap().insert(id, instance);
    }

    fn deregister(&self, id: &DatabaseId) {
        self.instances.write().unwrap().remove(id);
    }

    fn instance(&self, id: &DatabaseId) -> RemoteResult<Arc<dyn DatabaseInstanceRemote>> {
        let instances = self.instances.read().unwrap();
        let Some(instance) = instances.get(id) else {
            return Err(RemoteError::unreachable(id.clone(), "unknown instance"));
        };
        instance.upgrade().ok_or_else(|| RemoteError::unreachable(id.clone(), "instance dropped"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use assertor::*;
    use async_trait::async_trait;
    use hashbrown::HashSet;

    use super::*;
    use crate::id::TableInfo;
    use crate::manager::TableManagerRemote;
    use crate::protos::{SystemTableRecord, TableManagerStateRecord};
    use crate::systable::SystemTableRemote;

    #[derive(Default)]
    struct FakeState {
        down: HashSet<DatabaseId>,
        system_table_states: HashMap<DatabaseId, usize>,
        manager_states: HashMap<DatabaseId, usize>,
    }

    /// Registry resolving every id to a passive instance that only counts what it stores.
    #[derive(Default)]
    pub struct FakeRegistry {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeRegistry {
        pub fn set_down(&self, id: &DatabaseId, down: bool) {
            let mut state = self.state.lock().unwrap();
            match down {
                true => state.down.insert(id.clone()),
                false => state.down.remove(id),
            };
        }

        pub fn stored_system_table_states(&self, id: &DatabaseId) -> usize {
            self.state.lock().unwrap().system_table_states.get(id).copied().unwrap_or(0)
        }

        pub fn stored_manager_states(&self, id: &DatabaseId) -> usize {
            self.state.lock().unwrap().manager_states.get(id).copied().unwrap_or(0)
        }
    }

    impl InstanceRegistry for FakeRegistry {
        fn register(&self, _id: DatabaseId, _instance: Weak<dyn DatabaseInstanceRemote>) {}

        fn deregister(&self, _id: &DatabaseId) {}

        fn instance(&self, id: &DatabaseId) -> RemoteResult<Arc<dyn DatabaseInstanceRemote>> {
            if self.state.lock().unwrap().down.contains(id) {
                return Err(RemoteError::unreachable(id.clone(), "down"));
            }
            Ok(Arc::new(FakeInstance { id: id.clone(), state: self.state.clone() }))
        }
    }

    struct FakeInstance {
        id: DatabaseId,
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeInstance {
        fn check(&self) -> RemoteResult<()> {
            if self.state.lock().unwrap().down.contains(&self.id) {
                return Err(RemoteError::unreachable(self.id.clone(), "down"));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DatabaseInstanceRemote for FakeInstance {
        fn id(&self) -> &DatabaseId {
            &self.id
        }

        async fn check_connection(&self) -> RemoteResult<()> {
            self.check()
        }

        async fn is_system_table(&self) -> RemoteResult<bool> {
            self.check()?;
            Ok(false)
        }

        async fn system_table(&self) -> RemoteResult<Arc<dyn SystemTableRemote>> {
            self.check()?;
            Err(RemoteError::denied("not hosting System Table"))
        }

        async fn recreate_system_table(&self) -> RemoteResult<Arc<dyn SystemTableRemote>> {
            self.check()?;
            Err(RemoteError::denied("no persisted state"))
        }

        async fn recreate_in_memory_system_table_from_local_persisted_state(
            &self,
        ) -> RemoteResult<Arc<dyn SystemTableRemote>> {
            self.check()?;
            Err(RemoteError::denied("no persisted state"))
        }

        async fn store_system_table_state(&self, _record: SystemTableRecord) -> RemoteResult<()> {
            self.check()?;
            *self.state.lock().unwrap().system_table_states.entry(self.id.clone()).or_default() += 1;
            Ok(())
        }

        async fn table_manager(&self, _table: &TableInfo) -> RemoteResult<Option<Arc<dyn TableManagerRemote>>> {
            self.check()?;
            Ok(None)
        }

        async fn recreate_table_manager(&self, _table: &TableInfo) -> RemoteResult<Arc<dyn TableManagerRemote>> {
            self.check()?;
            Err(RemoteError::denied("no table manager state"))
        }

        async fn store_table_manager_state(&self, _record: TableManagerStateRecord) -> RemoteResult<()> {
            self.check()?;
            *self.state.lock().unwrap().manager_states.entry(self.id.clone()).or_default() += 1;
            Ok(())
        }

        async fn execute_update(&self, _table: &TableInfo, _statement: &str) -> RemoteResult<u64> {
            self.check()?;
            Ok(1)
        }

        async fn execute_query(&self, _table: &TableInfo, _statement: &str) -> RemoteResult<u64> {
            self.check()?;
            Ok(1)
        }
    }

    #[test]
    fn test_local_registry_holds_instances_weakly() {
        let registry = LocalInstanceRegistry::new();
        let id = DatabaseId::mem("a");
        let fake = FakeRegistry::default();
        let instance = fake.instance(&id).unwrap();
        registry.register(id.clone(), Arc::downgrade(&instance));
        assert_that!(registry.len()).is_equal_to(1);
        assert_that!(registry.instance(&id).is_ok()).is_true();

        drop(instance);
        assert_that!(registry.instance(&id).unwrap_err().is_unreachable()).is_true();
        registry.deregister(&id);
        assert_that!(registry.is_empty()).is_true();
        assert_that!(registry.instance(&id).unwrap_err().is_unreachable()).is_true();
    }
}

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

use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};

use crate::id::{DatabaseId, TableInfo};

/// Local query engine of instances. Statements are opaque here.
#[async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    async fn execute_update(&self, database: &DatabaseId, table: &TableInfo, statement: &str) -> Result<u64>;

    async fn execute_query(&self, database: &DatabaseId, table: &TableInfo, statement: &str) -> Result<u64>;
}

#[derive(Default)]
struct ExecutorState {
    applied: HashMap<(DatabaseId, TableInfo), Vec<String>>,
    failing: HashSet<DatabaseId>,
}

/// Executor keeping applied statements per replica in memory.
///
/// An update affects one row and a query returns the number of statements applied to the replica.
#[derive(Default)]
pub struct MemoryQueryExecutor {
    state: Mutex<ExecutorState>,
}

impl MemoryQueryExecutor {
    /// Statements applied to replica of table on database, in order.
    pub fn statements(&self, database: &DatabaseId, table: &TableInfo) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.applied.get(&(database.clone(), table.clone())).cloned().unwrap_or_default()
    }

    /// Makes every statement on database fail, as if its storage broke.
    pub fn set_failing(&self, database: &DatabaseId, failing: bool) {
        let mut state = self.state.lock().unwrap();
        match failing {
            true => state.failing.insert(database.clone()),
            false => state.failing.remove(database),
        };
    }
}

#[async_trait]
impl QueryExecutor for MemoryQueryExecutor {
    async fn execute_update(&self, database: &DatabaseId, table: &TableInfo, statement: &str) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(database) {
            bail!("storage of {database} failed")
        }
        state.applied.entry((database.clone(), table.clone())).or_default().push(statement.to_string());
        Ok(1)
    }

    async fn execute_query(&self, database: &DatabaseId, table: &TableInfo, _statement: &str) -> Result<u64> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(database) {
            bail!("storage of {database} failed")
        }
        match state.applied.get(&(database.clone(), table.clone())) {
            None => bail!("table {table} not found on {database}"),
            Some(statements) => Ok(statements.len() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    #[tokio::test]
    async fn test_memory_executor() {
        let executor = MemoryQueryExecutor::default();
        let (a, b) = (DatabaseId::mem("a"), DatabaseId::mem("b"));
        let table = TableInfo::new("", "t");
        assert_that!(executor.execute_query(&a, &table, "select").await.is_err()).is_true();
        assert_that!(executor.execute_update(&a, &table, "create").await.unwrap()).is_equal_to(1);
        assert_that!(executor.execute_update(&a, &table, "insert").await.unwrap()).is_equal_to(1);
        assert_that!(executor.execute_query(&a, &table, "select").await.unwrap()).is_equal_to(2);
        assert_that!(executor.statements(&a, &table)).is_equal_to(vec!["create".to_string(), "insert".to_string()]);

        executor.set_failing(&b, true);
        assert_that!(executor.execute_update(&b, &table, "create").await.is_err()).is_true();
        executor.set_failing(&b, false);
        assert_that!(executor.execute_update(&b, &table, "create").await.is_ok()).is_true();
    }
}

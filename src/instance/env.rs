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
use std::time::Duration;

use super::executor::{MemoryQueryExecutor, QueryExecutor};
use super::registry::InstanceRegistry;
use crate::clock::Clock;
use crate::endpoint::LocatorEndpoint;
use crate::locator::{LocatorPeer, RemoteLocator};
use crate::monitor::MonitoringSchedule;

/// Number of instances holding System Table state, hosting instance included.
pub const DEFAULT_REPLICATION_FACTOR: usize = 2;

/// Everything an instance shares with its peers or takes from configuration.
#[derive(Clone)]
pub struct InstanceEnv {
    registry: Arc<dyn InstanceRegistry>,
    locators: Vec<Arc<dyn LocatorPeer>>,
    executor: Arc<dyn QueryExecutor>,
    clock: Clock,
    replication_factor: usize,
    monitoring: MonitoringSchedule,
    file_system_monitoring: bool,
    join_attempts: usize,
    join_backoff: Duration,
}

impl InstanceEnv {
    pub fn new(registry: Arc<dyn InstanceRegistry>, locators: Vec<Arc<dyn LocatorPeer>>) -> Self {
        Self {
            registry,
            locators,
            executor: Arc::new(MemoryQueryExecutor::default()),
            clock: Clock::new(),
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            monitoring: MonitoringSchedule::default(),
            file_system_monitoring: true,
            join_attempts: 3,
            join_backoff: Duration::from_millis(200),
        }
    }

    /// Environment whose locators are remote servers of endpoint.
    pub fn with_endpoint(registry: Arc<dyn InstanceRegistry>, endpoint: &LocatorEndpoint) -> Self {
        let locators = endpoint
            .servers()
            .iter()
            .map(|server| Arc::new(RemoteLocator::new(server.clone())) as Arc<dyn LocatorPeer>)
            .collect();
        Self::new(registry, locators)
    }

    pub fn with_executor(self, executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor, ..self }
    }

    pub fn with_clock(self, clock: Clock) -> Self {
        Self { clock, ..self }
    }

    pub fn with_replication_factor(self, replication_factor: usize) -> Self {
        Self { replication_factor: replication_factor.max(1), ..self }
    }

    pub fn with_monitoring(self, monitoring: MonitoringSchedule, file_system_monitoring: bool) -> Self {
        Self { monitoring, file_system_monitoring, ..self }
    }

    /// Attempts to join System Table at start, with backoff between attempts.
    pub fn with_join_attempts(self, join_attempts: usize, join_backoff: Duration) -> Self {
        Self { join_attempts: join_attempts.max(1), join_backoff, ..self }
    }

    pub fn registry(&self) -> &Arc<dyn InstanceRegistry> {
        &self.registry
    }

    pub fn locators(&self) -> &[Arc<dyn LocatorPeer>] {
        &self.locators
    }

    pub fn executor(&self) -> &Arc<dyn QueryExecutor> {
        &self.executor
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn monitoring(&self) -> MonitoringSchedule {
        self.monitoring
    }

    pub fn file_system_monitoring(&self) -> bool {
        self.file_system_monitoring
    }

    pub fn join_attempts(&self) -> usize {
        self.join_attempts
    }

    pub fn join_backoff(&self) -> Duration {
        self.join_backoff
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assertor::*;
    use tokio::net::TcpListener;

    use super::*;
    use crate::instance::LocalInstanceRegistry;
    use crate::locator::{LocatorQuorum, LocatorServer, LocatorState};

    #[tokio::test]
    async fn test_env_with_endpoint() {
        let state = Arc::new(LocatorState::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = LocatorServer::start(listener, state.clone()).unwrap();
        let endpoint: LocatorEndpoint = format!("locator://{}", server.local_addr()).parse().unwrap();
        let env = InstanceEnv::with_endpoint(Arc::new(LocalInstanceRegistry::new()), &endpoint)
            .with_replication_factor(0)
            .with_join_attempts(0, Duration::ZERO);
        assert_that!(env.locators().len()).is_equal_to(1);
        assert_that!(env.replication_factor()).is_equal_to(1);
        assert_that!(env.join_attempts()).is_equal_to(1);

        let quorum = LocatorQuorum::new(env.locators().to_vec());
        assert_that!(quorum.set_locations(vec!["jdbc:h2:sm:mem:a".to_string()]).await).is_true();
        assert_that!(state.get().await.locations).is_equal_to(vec!["jdbc:h2:sm:mem:a".to_string()]);
    }
}

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

use anyhow::{bail, Result};
use async_trait::async_trait;
use hashbrown::HashMap;
use tracing::{debug, trace};

use super::ranking::MachineSorter;
use super::types::{
    FileSystemSummary,
    MachineMonitoringData,
    MachineUtilizationSummary,
    Metric,
    MonitoringSummary,
    Requirements,
};
use crate::clock::{Clock, Timestamp};
use crate::id::DatabaseId;

/// Maximum number of cached rankings. Overflow clears the whole cache.
pub const MAXIMUM_CACHE_SIZE: usize = 10;

/// Destination of combined monitoring records, normally the System Table.
#[async_trait]
pub trait MonitoringSink: Send + Sync + 'static {
    async fn add_monitoring_summary(&self, data: MachineMonitoringData) -> Result<()>;
}

#[derive(Default)]
struct PendingSummaries {
    machine: Option<MachineUtilizationSummary>,
    file_system: Option<FileSystemSummary>,
}

/// Joins machine and file system summaries of the local instance before forwarding them.
pub struct LocalDataCollector {
    database: DatabaseId,
    file_system_monitoring: bool,
    pending: Mutex<PendingSummaries>,
    sink: Arc<dyn MonitoringSink>,
}

impl LocalDataCollector {
    pub fn new(database: DatabaseId, file_system_monitoring: bool, sink: Arc<dyn MonitoringSink>) -> Self {
        Self { database, file_system_monitoring, pending: Mutex::new(PendingSummaries::default()), sink }
    }

    pub fn database(&self) -> &DatabaseId {
        &self.database
    }

    /// Records a summary and forwards a combined record once a machine summary and, if enabled, a
    /// file system summary are both present. Returns whether a record was forwarded.
    ///
    /// A later summary of the same kind replaces an unforwarded earlier one.
    pub async fn collate_ranking_data(&self, summary: MonitoringSummary) -> Result<bool> {
        if summary.database() != &self.database {
            bail!("summary of {} sent to collector of {}", summary.database(), self.database)
        }
        let Some(data) = self.collate(summary) else {
            return Ok(false);
        };
        trace!("forwarding monitoring data of {}", self.database);
        self.sink.add_monitoring_summary(data).await?;
        Ok(true)
    }

    fn collate(&self, summary: MonitoringSummary) -> Option<MachineMonitoringData> {
        let mut pending = self.pending.lock().unwrap();
        match summary {
            MonitoringSummary::Machine(summary) => pending.machine = Some(summary),
            MonitoringSummary::FileSystem(summary) => pending.file_system = Some(summary),
        }
        if pending.machine.is_none() || (self.file_system_monitoring && pending.file_system.is_none()) {
            return None;
        }
        let utilization = pending.machine.take()?;
        let file_system = pending.file_system.take();
        Some(MachineMonitoringData { utilization, file_system })
    }
}

struct MonitoringState {
    machines: HashMap<DatabaseId, MachineMonitoringData>,
    time_of_last_update: Timestamp,
}

struct CachedRanking {
    computed_at: Timestamp,
    ranking: Arc<[DatabaseId]>,
}

/// Latest monitoring record per instance plus a small cache of rankings computed from them.
///
/// Records and ranking cache sit behind separate locks so placement queries do not serialize
/// behind metadata mutations.
pub struct SystemTableDataCollector {
    clock: Clock,
    state: Mutex<MonitoringState>,
    cache: Mutex<HashMap<(Metric, Requirements), CachedRanking>>,
}

impl SystemTableDataCollector {
    pub fn new(clock: Clock) -> Self {
        let state = MonitoringState { machines: HashMap::new(), time_of_last_update: Timestamp::ZERO };
        Self { clock, state: Mutex::new(state), cache: Mutex::new(HashMap::new()) }
    }

    pub fn add_monitoring_summary(&self, data: MachineMonitoringData) {
        let mut state = self.state.lock().unwrap();
        state.time_of_last_update = self.clock.now();
        debug!("monitoring data of {} updated at {}", data.database(), state.time_of_last_update);
        state.machines.insert(data.database().clone(), data);
    }

    pub fn remove_monitoring_data(&self, database: &DatabaseId) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.machines.remove(database).is_none() {
            return false;
        }
        state.time_of_last_update = self.clock.now();
        true
    }

    pub fn monitoring_data(&self, database: &DatabaseId) -> Option<MachineMonitoringData> {
        self.state.lock().unwrap().machines.get(database).cloned()
    }

    pub fn time_of_last_update(&self) -> Timestamp {
        self.state.lock().unwrap().time_of_last_update
    }

    /// Machines satisfying requirements, best first.
    pub fn get_ranked_list_of_instances(&self, metric: Metric, requirements: Requirements) -> Arc<[DatabaseId]> {
        let key = (metric, requirements);
        let time_of_last_update = self.time_of_last_update();
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            if cached.computed_at > time_of_last_update {
                return cached.ranking.clone();
            }
        }
        let (machines, computed_at) = {
            let state = self.state.lock().unwrap();
            (state.machines.values().cloned().collect::<Vec<_>>(), self.clock.now())
        };
        let ranking: Arc<[DatabaseId]> =
            MachineSorter::filter_then_rank_machines(metric, requirements, machines.iter()).into();
        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= MAXIMUM_CACHE_SIZE && !cache.contains_key(&key) {
            debug!("ranking cache full, clearing {} entries", cache.len());
            cache.clear();
        }
        cache.insert(key, CachedRanking { computed_at, ranking: ranking.clone() });
        ranking
    }

    #[cfg(test)]
    fn cached_rankings(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

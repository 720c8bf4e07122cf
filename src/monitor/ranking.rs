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

use std::cmp::Ordering;

use super::types::{MachineMonitoringData, Metric, Requirements};
use crate::id::DatabaseId;

/// Drops machines whose static capacity falls below requirements.
#[derive(Clone, Copy, Debug)]
pub struct MachineFilter {
    requirements: Requirements,
}

impl MachineFilter {
    pub fn new(requirements: Requirements) -> Self {
        Self { requirements }
    }

    pub fn accepts(&self, data: &MachineMonitoringData) -> bool {
        let capacity = data.capacity();
        if capacity.cpu_clock_mhz < self.requirements.cpu_clock_mhz || capacity.memory < self.requirements.memory {
            return false;
        }
        if self.requirements.disk_free.as_u64() == 0 {
            return true;
        }
        // Unknown disk never satisfies a disk requirement.
        data.disk_free().map(|free| free >= self.requirements.disk_free).unwrap_or(false)
    }

    pub fn filter<'a>(
        &self,
        machines: impl IntoIterator<Item = &'a MachineMonitoringData>,
    ) -> Vec<&'a MachineMonitoringData> {
        machines.into_iter().filter(|data| self.accepts(data)).collect()
    }
}

/// Ranks machines by weighted availability.
///
/// Value of a machine is `Σ (raw / max raw) × (1 − utilization) × weight` over cpu and memory,
/// where max is taken among ranked machines.
#[derive(Clone, Copy, Debug)]
pub struct MachineRanker {
    metric: Metric,
}

impl MachineRanker {
    pub fn new(metric: Metric) -> Self {
        Self { metric }
    }

    fn normalize(raw: f64, max: f64) -> f64 {
        if max <= 0.0 {
            0.0
        } else {
            raw / max
        }
    }

    fn availability(utilization: f64) -> f64 {
        1.0 - utilization.clamp(0.0, 1.0)
    }

    /// Ranked machines with their values, highest first. Equal values are ordered by database id.
    pub fn rank(&self, machines: &[&MachineMonitoringData]) -> Vec<(DatabaseId, f64)> {
        let max_cpu = machines.iter().map(|data| data.capacity().cpu_capacity()).fold(0.0, f64::max);
        let max_memory = machines.iter().map(|data| data.capacity().memory.as_u64() as f64).fold(0.0, f64::max);
        let mut ranked: Vec<_> = machines
            .iter()
            .map(|data| {
                let utilization = &data.utilization;
                let cpu = Self::normalize(data.capacity().cpu_capacity(), max_cpu)
                    * Self::availability(utilization.cpu_utilization)
                    * self.metric.cpu();
                let memory = Self::normalize(data.capacity().memory.as_u64() as f64, max_memory)
                    * Self::availability(utilization.memory_utilization)
                    * self.metric.memory();
                (data.database().clone(), cpu + memory)
            })
            .collect();
        ranked.sort_by(|(id1, v1), (id2, v2)| {
            v2.partial_cmp(v1).unwrap_or(Ordering::Equal).then_with(|| id1.cmp(id2))
        });
        ranked
    }
}

pub struct MachineSorter;

impl MachineSorter {
    pub fn filter_then_rank_machines<'a>(
        metric: Metric,
        requirements: Requirements,
        machines: impl IntoIterator<Item = &'a MachineMonitoringData>,
    ) -> Vec<DatabaseId> {
        let candidates = MachineFilter::new(requirements).filter(machines);
        MachineRanker::new(metric).rank(&candidates).into_iter().map(|(id, _)| id).collect()
    }
}

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

//! Machine monitoring and ranking for replica placement.

mod collector;
mod daemon;
mod ranking;
mod types;

pub use self::collector::{LocalDataCollector, MonitoringSink, SystemTableDataCollector, MAXIMUM_CACHE_SIZE};
pub use self::daemon::{MachineProbe, MachineSample, MonitoringDaemon, MonitoringSchedule};
pub use self::ranking::{MachineFilter, MachineRanker, MachineSorter};
pub use self::types::{
    FileSystemSummary,
    MachineCapacity,
    MachineMonitoringData,
    MachineUtilizationSummary,
    Metric,
    MonitoringSummary,
    Requirements,
};

#[cfg(test)]
pub(crate) use self::ranking::tests::machine;

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

use anyhow::Result;
use bytesize::ByteSize;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, instrument, warn};

use super::collector::LocalDataCollector;
use super::types::{FileSystemSummary, MachineCapacity, MachineUtilizationSummary, MonitoringSummary};
use crate::utils::{self, DropOwner, DropWatcher};

/// One point in time utilization reading. Ratios are in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MachineSample {
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub swap_utilization: f64,
}

/// Source of machine facts, normally backed by the operating system.
pub trait MachineProbe: Send + Sync + 'static {
    fn capacity(&self) -> MachineCapacity;

    fn sample(&self) -> Result<MachineSample>;

    /// Returns capacity and free space of the file system holding database files.
    fn file_system(&self) -> Result<(ByteSize, ByteSize)>;
}

#[derive(Clone, Copy, Debug)]
pub struct MonitoringSchedule {
    /// Interval between two machine samples.
    pub sample_interval: Duration,
    /// Number of samples averaged into one machine summary.
    pub samples_per_summary: u32,
    /// Interval between two file system summaries.
    pub file_system_interval: Duration,
}

impl Default for MonitoringSchedule {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            samples_per_summary: 6,
            file_system_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct SampleAccumulator {
    cpu: f64,
    memory: f64,
    swap: f64,
    samples: u32,
}

impl SampleAccumulator {
    fn add(&mut self, sample: MachineSample) {
        self.cpu += sample.cpu_utilization;
        self.memory += sample.memory_utilization;
        self.swap += sample.swap_utilization;
        self.samples += 1;
    }

    fn summarize(&mut self, collector: &LocalDataCollector, capacity: MachineCapacity) -> MachineUtilizationSummary {
        let accumulated = std::mem::take(self);
        let samples = accumulated.samples.max(1) as f64;
        MachineUtilizationSummary {
            database: collector.database().clone(),
            capacity,
            cpu_utilization: accumulated.cpu / samples,
            memory_utilization: accumulated.memory / samples,
            swap_utilization: accumulated.swap / samples,
            samples: accumulated.samples,
        }
    }
}

/// Periodically samples a [MachineProbe] and feeds summaries to a [LocalDataCollector].
///
/// Sampling stops when the daemon is dropped.
pub struct MonitoringDaemon {
    _drop_owner: DropOwner,
}

impl MonitoringDaemon {
    pub fn start(
        probe: Arc<dyn MachineProbe>,
        collector: Arc<LocalDataCollector>,
        schedule: MonitoringSchedule,
        file_system_monitoring: bool,
    ) -> Self {
        let (_drop_owner, drop_watcher) = utils::drop_watcher();
        tokio::spawn(Self::run(probe, collector, schedule, file_system_monitoring, drop_watcher));
        Self { _drop_owner }
    }

    #[instrument(skip_all, fields(database = %collector.database()))]
    async fn run(
        probe: Arc<dyn MachineProbe>,
        collector: Arc<LocalDataCollector>,
        schedule: MonitoringSchedule,
        file_system_monitoring: bool,
        mut drop_watcher: DropWatcher,
    ) {
        let mut sample_ticker = time::interval(schedule.sample_interval);
        sample_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut file_system_ticker = time::interval(schedule.file_system_interval);
        file_system_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut accumulator = SampleAccumulator::default();
        loop {
            let summary = tokio::select! {
                _ = drop_watcher.dropped() => {
                    debug!("monitoring stopped");
                    return;
                },
                _ = sample_ticker.tick() => {
                    match probe.sample() {
                        Ok(sample) => accumulator.add(sample),
                        Err(err) => warn!("fail to sample machine: {err:#}"),
                    }
                    if accumulator.samples < schedule.samples_per_summary.max(1) {
                        continue;
                    }
                    MonitoringSummary::Machine(accumulator.summarize(&collector, probe.capacity()))
                },
                _ = file_system_ticker.tick(), if file_system_monitoring => {
                    match probe.file_system() {
                        Ok((capacity, free)) => MonitoringSummary::FileSystem(FileSystemSummary {
                            database: collector.database().clone(),
                            capacity,
                            free,
                        }),
                        Err(err) => {
                            warn!("fail to probe file system: {err:#}");
                            continue;
                        },
                    }
                },
            };
            if let Err(err) = collector.collate_ranking_data(summary).await {
                warn!("fail to forward monitoring data: {err:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assertor::*;
    use async_trait::async_trait;

    use super::*;
    use crate::id::DatabaseId;
    use crate::monitor::collector::MonitoringSink;
    use crate::monitor::types::MachineMonitoringData;

    struct FixedProbe;

    impl MachineProbe for FixedProbe {
        fn capacity(&self) -> MachineCapacity {
            MachineCapacity {
                cpu_clock_mhz: 2400,
                cpu_cores: 8,
                cpu_sockets: 1,
                memory: ByteSize::gb(32),
                swap: ByteSize::gb(4),
            }
        }

        fn sample(&self) -> Result<MachineSample> {
            Ok(MachineSample { cpu_utilization: 0.25, memory_utilization: 0.5, swap_utilization: 0.0 })
        }

        fn file_system(&self) -> Result<(ByteSize, ByteSize)> {
            Ok((ByteSize::gb(500), ByteSize::gb(200)))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<MachineMonitoringData>>,
    }

    #[async_trait]
    impl MonitoringSink for RecordingSink {
        async fn add_monitoring_summary(&self, data: MachineMonitoringData) -> Result<()> {
            self.records.lock().unwrap().push(data);
            Ok(())
        }
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_daemon_forwards_averaged_summaries() {
        let sink = Arc::new(RecordingSink::default());
        let collector = Arc::new(LocalDataCollector::new(DatabaseId::mem("one"), true, sink.clone()));
        let schedule = MonitoringSchedule {
            sample_interval: Duration::from_secs(1),
            samples_per_summary: 3,
            file_system_interval: Duration::from_secs(10),
        };
        let daemon = MonitoringDaemon::start(Arc::new(FixedProbe), collector, schedule, true);

        time::sleep(Duration::from_millis(2500)).await;
        let records = sink.records.lock().unwrap().clone();
        assert_that!(records.len()).is_equal_to(1);
        assert_that!(records[0].samples()).is_equal_to(3);
        assert_that!(records[0].utilization.cpu_utilization).is_equal_to(0.25);
        assert_that!(records[0].disk_free()).is_equal_to(Some(ByteSize::gb(200)));

        drop(daemon);
        time::sleep(Duration::from_secs(30)).await;
        assert_that!(sink.records.lock().unwrap().len()).is_equal_to(1);
    }
}

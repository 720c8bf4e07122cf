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

use bytesize::ByteSize;
use ordered_float::OrderedFloat;

use crate::id::DatabaseId;

/// Static hardware facts of a machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MachineCapacity {
    pub cpu_clock_mhz: u32,
    pub cpu_cores: u32,
    pub cpu_sockets: u32,
    pub memory: ByteSize,
    pub swap: ByteSize,
}

impl MachineCapacity {
    /// Aggregate cpu capacity as clock × cores × sockets.
    pub fn cpu_capacity(&self) -> f64 {
        self.cpu_clock_mhz as f64 * self.cpu_cores.max(1) as f64 * self.cpu_sockets.max(1) as f64
    }
}

/// Utilization averaged over a number of samples. Ratios are in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct MachineUtilizationSummary {
    pub database: DatabaseId,
    pub capacity: MachineCapacity,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub swap_utilization: f64,
    pub samples: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FileSystemSummary {
    pub database: DatabaseId,
    pub capacity: ByteSize,
    pub free: ByteSize,
}

impl FileSystemSummary {
    pub fn utilization(&self) -> f64 {
        if self.capacity.as_u64() == 0 {
            return 1.0;
        }
        1.0 - self.free.as_u64() as f64 / self.capacity.as_u64() as f64
    }
}

/// Either of the two independently produced summaries of a machine.
#[derive(Clone, Debug, PartialEq)]
pub enum MonitoringSummary {
    Machine(MachineUtilizationSummary),
    FileSystem(FileSystemSummary),
}

impl MonitoringSummary {
    pub fn database(&self) -> &DatabaseId {
        match self {
            Self::Machine(summary) => &summary.database,
            Self::FileSystem(summary) => &summary.database,
        }
    }
}

/// Combined monitoring record of one instance as kept by System Table.
#[derive(Clone, Debug, PartialEq)]
pub struct MachineMonitoringData {
    pub utilization: MachineUtilizationSummary,
    pub file_system: Option<FileSystemSummary>,
}

impl MachineMonitoringData {
    pub fn database(&self) -> &DatabaseId {
        &self.utilization.database
    }

    pub fn capacity(&self) -> &MachineCapacity {
        &self.utilization.capacity
    }

    pub fn samples(&self) -> u32 {
        self.utilization.samples
    }

    pub fn disk_free(&self) -> Option<ByteSize> {
        self.file_system.as_ref().map(|fs| fs.free)
    }
}

/// Weights of resources when ranking machines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Metric {
    cpu: OrderedFloat<f64>,
    memory: OrderedFloat<f64>,
}

impl Metric {
    pub const BALANCED: Metric = Metric { cpu: OrderedFloat(1.0), memory: OrderedFloat(1.0) };
    pub const CPU: Metric = Metric { cpu: OrderedFloat(1.0), memory: OrderedFloat(0.0) };
    pub const MEMORY: Metric = Metric { cpu: OrderedFloat(0.0), memory: OrderedFloat(1.0) };

    pub fn new(cpu: f64, memory: f64) -> Self {
        Self { cpu: OrderedFloat(cpu), memory: OrderedFloat(memory) }
    }

    pub fn cpu(&self) -> f64 {
        self.cpu.into_inner()
    }

    pub fn memory(&self) -> f64 {
        self.memory.into_inner()
    }
}

impl Default for Metric {
    fn default() -> Self {
        Self::BALANCED
    }
}

/// Minimum static capacity a machine must have to be considered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Requirements {
    pub cpu_clock_mhz: u32,
    pub memory: ByteSize,
    pub disk_free: ByteSize,
}

impl Requirements {
    pub const NONE: Requirements = Requirements { cpu_clock_mhz: 0, memory: ByteSize(0), disk_free: ByteSize(0) };

    pub fn new(cpu_clock_mhz: u32, memory: ByteSize, disk_free: ByteSize) -> Self {
        Self { cpu_clock_mhz, memory, disk_free }
    }
}

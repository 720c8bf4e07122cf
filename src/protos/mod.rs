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

//! Protobuf records for durable locator and System Table state.

use anyhow::{anyhow, Result};

use crate::id::{DatabaseId, TableInfo};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ::prost::Message)]
pub struct Timestamp {
    #[prost(uint64, tag = "1")]
    pub seconds: u64,
    #[prost(uint32, tag = "2")]
    pub nanoseconds: u32,
    #[prost(uint32, tag = "3")]
    pub logical: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LocatorRecord {
    #[prost(uint64, tag = "1")]
    pub update_count: u64,
    #[prost(string, repeated, tag = "2")]
    pub locations: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableInfoRecord {
    #[prost(string, tag = "1")]
    pub schema: String,
    #[prost(string, tag = "2")]
    pub table: String,
    #[prost(uint64, tag = "3")]
    pub modification_id: u64,
    #[prost(int32, tag = "4")]
    pub table_set: i32,
    #[prost(string, tag = "5")]
    pub owner: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableManagerRecord {
    #[prost(message, optional, tag = "1")]
    pub table: Option<TableInfoRecord>,
    #[prost(string, tag = "2")]
    pub location: String,
    #[prost(string, tag = "3")]
    pub primary: String,
    #[prost(string, repeated, tag = "4")]
    pub state_replicas: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InstanceRecord {
    #[prost(string, tag = "1")]
    pub location: String,
    #[prost(bool, tag = "2")]
    pub active: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemTableRecord {
    #[prost(uint64, tag = "1")]
    pub epoch: u64,
    #[prost(message, repeated, tag = "2")]
    pub table_managers: Vec<TableManagerRecord>,
    #[prost(message, repeated, tag = "3")]
    pub instances: Vec<InstanceRecord>,
    #[prost(string, repeated, tag = "4")]
    pub state_replicas: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableReplicaRecord {
    #[prost(string, tag = "1")]
    pub location: String,
    #[prost(bool, tag = "2")]
    pub active: bool,
}

/// Durable state of a Table Manager, replicated to its state replicas.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableManagerStateRecord {
    #[prost(message, optional, tag = "1")]
    pub table: Option<TableInfoRecord>,
    #[prost(message, repeated, tag = "2")]
    pub replicas: Vec<TableReplicaRecord>,
    #[prost(uint64, tag = "3")]
    pub last_update_id: u64,
    #[prost(string, repeated, tag = "4")]
    pub state_replicas: Vec<String>,
    /// Bumped on every change so that state replicas keep only the latest record.
    #[prost(uint64, tag = "5")]
    pub version: u64,
}

impl From<&TableInfo> for TableInfoRecord {
    fn from(table: &TableInfo) -> Self {
        Self {
            schema: table.schema().to_string(),
            table: table.table().to_string(),
            modification_id: table.modification_id(),
            table_set: table.table_set(),
            owner: table.owner().map(|owner| owner.to_string()).unwrap_or_default(),
        }
    }
}

impl TryFrom<&TableInfoRecord> for TableInfo {
    type Error = anyhow::Error;

    fn try_from(record: &TableInfoRecord) -> Result<TableInfo> {
        let owner = match record.owner.as_str() {
            "" => None,
            owner => Some(owner.parse::<DatabaseId>()?),
        };
        let table = TableInfo::new(record.schema.as_str(), record.table.as_str())
            .with_modification_id(record.modification_id)
            .with_table_set(record.table_set);
        Ok(match owner {
            None => table,
            Some(owner) => table.with_owner(owner),
        })
    }
}

impl TableManagerRecord {
    pub fn table_info(&self) -> Result<TableInfo> {
        let table = self.table.as_ref().ok_or_else(|| anyhow!("table manager record has no table"))?;
        TableInfo::try_from(table)
    }
}

impl TableManagerStateRecord {
    pub fn table_info(&self) -> Result<TableInfo> {
        let table = self.table.as_ref().ok_or_else(|| anyhow!("table manager state record has no table"))?;
        TableInfo::try_from(table)
    }
}

pub fn parse_locations<'a>(locations: impl IntoIterator<Item = &'a String>) -> Result<Vec<DatabaseId>> {
    locations.into_iter().map(|location| location.parse()).collect()
}

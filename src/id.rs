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

//! Identities of database instances and tables.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use anyhow::{anyhow, bail, Error, Result};
use compact_str::{CompactString, ToCompactString};
use uriparse::Authority;

const URL_PREFIX: &str = "jdbc:h2:";
const SYSTEM_TABLE_MARKER: &str = "sm:";
const DEFAULT_SCHEMA: &str = "PUBLIC";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
    Tcp,
    Mem,
}

/// Identity of a database instance.
///
/// It has shape `jdbc:h2:[sm:]tcp://host:port/location` or `jdbc:h2:[sm:]mem:location`. The `sm:` marker
/// flags an instance that hosted the System Table when the url was written; it takes no part in
/// equality, hashing or ordering.
#[derive(Clone, Debug)]
pub struct DatabaseId {
    transport: Transport,
    host: CompactString,
    port: u16,
    location: CompactString,
    system_table: bool,
}

impl DatabaseId {
    pub fn tcp(host: impl Into<CompactString>, port: u16, location: impl Into<CompactString>) -> Self {
        Self { transport: Transport::Tcp, host: host.into(), port, location: location.into(), system_table: false }
    }

    pub fn mem(location: impl Into<CompactString>) -> Self {
        Self {
            transport: Transport::Mem,
            host: CompactString::new("localhost"),
            port: 0,
            location: location.into(),
            system_table: false,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_system_table(&self) -> bool {
        self.system_table
    }

    pub fn with_system_table(self, system_table: bool) -> Self {
        Self { system_table, ..self }
    }

    /// Url without the System Table marker.
    pub fn plain(&self) -> CompactString {
        self.clone().with_system_table(false).to_compact_string()
    }

    fn key(&self) -> (Transport, &str, u16, &str) {
        (self.transport, &self.host, self.port, &self.location)
    }
}

impl PartialEq for DatabaseId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DatabaseId {}

impl Hash for DatabaseId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl PartialOrd for DatabaseId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DatabaseId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Display for DatabaseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(URL_PREFIX)?;
        if self.system_table {
            f.write_str(SYSTEM_TABLE_MARKER)?;
        }
        match self.transport {
            Transport::Tcp => write!(f, "tcp://{}:{}/{}", self.host, self.port, self.location),
            Transport::Mem => write!(f, "mem:{}", self.location),
        }
    }
}

impl FromStr for DatabaseId {
    type Err = Error;

    fn from_str(s: &str) -> Result<DatabaseId> {
        let Some(trailing) = s.strip_prefix(URL_PREFIX) else {
            bail!("database url must start with {URL_PREFIX}: {s}")
        };
        let (system_table, trailing) = match trailing.strip_prefix(SYSTEM_TABLE_MARKER) {
            Some(trailing) => (true, trailing),
            None => (false, trailing),
        };
        if let Some(location) = trailing.strip_prefix("mem:") {
            if location.is_empty() {
                bail!("no location in database url: {s}")
            }
            return Ok(DatabaseId::mem(location).with_system_table(system_table));
        }
        let Some(trailing) = trailing.strip_prefix("tcp://") else {
            bail!("unsupported transport in database url: {s}")
        };
        let (address, location) =
            trailing.split_once('/').ok_or_else(|| anyhow!("no location in database url: {s}"))?;
        if location.is_empty() {
            bail!("no location in database url: {s}")
        }
        let authority = Authority::try_from(address).map_err(|_| anyhow!("invalid address in database url: {s}"))?;
        if authority.has_username() {
            bail!("unsupported username in database url: {s}")
        }
        let port = authority.port().ok_or_else(|| anyhow!("no port in database url: {s}"))?;
        let host = authority.host().to_compact_string();
        Ok(DatabaseId::tcp(host, port, location).with_system_table(system_table))
    }
}

/// Fully qualified identity of a table.
///
/// Equality and hashing consider only the schema and table name, so a [TableInfo] carrying stale
/// counters still finds its entry.
#[derive(Clone, Debug)]
pub struct TableInfo {
    schema: CompactString,
    table: CompactString,
    modification_id: u64,
    table_set: i32,
    owner: Option<DatabaseId>,
}

impl TableInfo {
    pub fn new(schema: &str, table: &str) -> Self {
        let schema = match schema {
            "" => CompactString::new(DEFAULT_SCHEMA),
            schema => schema.to_uppercase().into(),
        };
        Self { schema, table: table.to_uppercase().into(), modification_id: 0, table_set: 0, owner: None }
    }

    /// Parses `schema.table` or `table`, the latter in the default schema.
    pub fn parse(name: &str) -> Result<Self> {
        let (schema, table) = match name.split_once('.') {
            Some((schema, table)) => (schema, table),
            None => ("", name),
        };
        if table.is_empty() || table.contains('.') {
            bail!("invalid table name: {name}")
        }
        Ok(Self::new(schema, table))
    }

    pub fn with_modification_id(self, modification_id: u64) -> Self {
        Self { modification_id, ..self }
    }

    pub fn with_table_set(self, table_set: i32) -> Self {
        Self { table_set, ..self }
    }

    pub fn with_owner(self, owner: DatabaseId) -> Self {
        Self { owner: Some(owner), ..self }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn modification_id(&self) -> u64 {
        self.modification_id
    }

    pub fn table_set(&self) -> i32 {
        self.table_set
    }

    pub fn owner(&self) -> Option<&DatabaseId> {
        self.owner.as_ref()
    }
}

impl PartialEq for TableInfo {
    fn eq(&self, other: &Self) -> bool {
        (&self.schema, &self.table) == (&other.schema, &other.table)
    }
}

impl Eq for TableInfo {}

impl Hash for TableInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema.hash(state);
        self.table.hash(state);
    }
}

impl Display for TableInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

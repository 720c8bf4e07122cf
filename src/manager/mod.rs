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

//! Per table lock and replica bookkeeping.

mod proxy;
mod table;

use async_trait::async_trait;

pub use self::proxy::QueryProxy;
pub use self::table::TableManager;
use crate::error::RemoteResult;
use crate::id::{DatabaseId, TableInfo};
use crate::protos::TableManagerStateRecord;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LockType {
    /// No lock. A proxy carrying it was denied.
    #[default]
    None,
    Read,
    Write,
    Create,
    Drop,
}

impl LockType {
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::Write | Self::Create | Self::Drop)
    }
}

#[async_trait]
pub trait TableManagerRemote: Send + Sync + 'static {
    fn table(&self) -> &TableInfo;

    /// Instance hosting this manager.
    fn location(&self) -> &DatabaseId;

    async fn check_connection(&self) -> RemoteResult<()>;

    /// Acquires lock for requester. A conflicting request gets a proxy of [LockType::None].
    async fn get_query_proxy(&self, lock_type: LockType, requester: &DatabaseId) -> RemoteResult<QueryProxy>;

    /// Releases lock held by requester. For an exclusive lock, `updated` lists replicas that
    /// applied update `update_id` and every other active replica is marked inactive. Read grants
    /// are released with the update id of their proxy, which never names an exclusive grant.
    async fn release_lock(&self, requester: &DatabaseId, updated: &[DatabaseId], update_id: u64) -> RemoteResult<bool>;

    async fn add_replica(&self, replica: DatabaseId) -> RemoteResult<bool>;

    async fn active_replicas(&self) -> RemoteResult<Vec<DatabaseId>>;

    async fn state_record(&self) -> RemoteResult<TableManagerStateRecord>;
}

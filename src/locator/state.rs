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
use compact_str::CompactString;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protos::LocatorRecord;
use crate::store::{self, StateStore};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Update count a freshly created locator starts from. Zero is reserved for "refused".
pub const INITIAL_UPDATE_COUNT: u64 = 1;

/// What a GET returns: the update count and the locations believed to hold System Table state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LocatorSnapshot {
    pub update_count: u64,
    pub locations: Vec<String>,
}

impl LocatorSnapshot {
    pub fn new(update_count: u64, locations: Vec<String>) -> Self {
        Self { update_count, locations }
    }
}

#[derive(Debug)]
struct LockHolder {
    requester: CompactString,
    acquired: Instant,
}

#[derive(Debug)]
struct LocatorInner {
    update_count: u64,
    locations: Vec<String>,
    lock: Option<LockHolder>,
}

/// Durable state of one locator server.
///
/// Readers run concurrently, SET/LOCK/COMMIT are exclusive. [tokio::sync::RwLock] is write
/// preferring: once a writer queues, later readers wait behind it.
pub struct LocatorState {
    inner: RwLock<LocatorInner>,
    lock_timeout: Duration,
    store: Option<Arc<dyn StateStore>>,
}

impl Default for LocatorState {
    fn default() -> Self {
        Self::new()
    }
}

impl LocatorState {
    /// Creates an empty, non persistent state.
    pub fn new() -> Self {
        Self::with_record(LocatorRecord { update_count: INITIAL_UPDATE_COUNT, locations: Vec::new() }, None)
    }

    /// Opens state from store, creating an empty one if store has nothing yet.
    pub async fn open(store: Arc<dyn StateStore>) -> Result<Self> {
        let record = match store::load_record::<LocatorRecord>(store.as_ref()).await? {
            Some(record) => {
                info!(
                    "recovered locator state with update count {} and locations {:?}",
                    record.update_count, record.locations
                );
                record
            },
            None => {
                let record = LocatorRecord { update_count: INITIAL_UPDATE_COUNT, locations: Vec::new() };
                store::store_record(store.as_ref(), &record).await?;
                info!("created empty locator state");
                record
            },
        };
        Ok(Self::with_record(record, Some(store)))
    }

    fn with_record(record: LocatorRecord, store: Option<Arc<dyn StateStore>>) -> Self {
        let inner = LocatorInner {
            update_count: record.update_count.max(INITIAL_UPDATE_COUNT),
            locations: record.locations,
            lock: None,
        };
        Self { inner: RwLock::new(inner), lock_timeout: DEFAULT_LOCK_TIMEOUT, store }
    }

    pub fn with_lock_timeout(self, lock_timeout: Duration) -> Self {
        Self { lock_timeout, ..self }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub async fn get(&self) -> LocatorSnapshot {
        let inner = self.inner.read().await;
        LocatorSnapshot { update_count: inner.update_count, locations: inner.locations.clone() }
    }

    /// Overwrites locations. Lock state is untouched.
    pub async fn set(&self, locations: Vec<String>) -> bool {
        let mut inner = self.inner.write().await;
        let record = LocatorRecord { update_count: inner.update_count, locations };
        if let Err(err) = self.persist(&record).await {
            warn!("fail to persist locations: {err:#}");
            return false;
        }
        debug!("locations set to {:?}", record.locations);
        inner.locations = record.locations;
        true
    }

    /// Acquires the lock for requester, returning current update count or zero if lock is held
    /// by someone else and has not expired.
    pub async fn lock(&self, requester: &str) -> u64 {
        let mut inner = self.inner.write().await;
        let now = Instant::now();
        if let Some(holder) = &inner.lock {
            let expired = now.duration_since(holder.acquired) >= self.lock_timeout;
            if holder.requester != requester && !expired {
                debug!("lock requested by {requester} refused, held by {}", holder.requester);
                return 0;
            }
            if expired && holder.requester != requester {
                info!("lock of {} expired, granting to {requester}", holder.requester);
            }
        }
        inner.lock = Some(LockHolder { requester: requester.into(), acquired: now });
        inner.update_count
    }

    /// Releases the lock and bumps update count if requester holds an unexpired lock.
    pub async fn commit(&self, requester: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(holder) = &inner.lock else {
            debug!("commit from {requester} refused, no lock held");
            return false;
        };
        if holder.requester != requester {
            debug!("commit from {requester} refused, lock held by {}", holder.requester);
            return false;
        }
        if holder.acquired.elapsed() >= self.lock_timeout {
            debug!("commit from {requester} refused, lock expired");
            inner.lock = None;
            return false;
        }
        let record = LocatorRecord { update_count: inner.update_count + 1, locations: inner.locations.clone() };
        if let Err(err) = self.persist(&record).await {
            warn!("fail to persist update count: {err:#}");
            return false;
        }
        inner.lock = None;
        inner.update_count = record.update_count;
        info!("{requester} committed, update count {}", inner.update_count);
        true
    }

    async fn persist(&self, record: &LocatorRecord) -> Result<()> {
        match &self.store {
            None => Ok(()),
            Some(store) => store::store_record(store.as_ref(), record).await,
        }
    }
}

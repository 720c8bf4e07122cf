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

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use hashbrown::HashMap;
use tracing::{debug, info, warn};

use super::client::LocatorPeer;
use super::state::LocatorSnapshot;
use crate::error::LocatorError;
use crate::utils::has_achieved_majority;


/// Single logical locator service backed by several independent locator servers.
///
/// Reads need a majority of identical answers. Writes need a majority of acknowledgements. This
/// is a lease style approximation, not consensus: a competing client can complete a full
/// LOCK/COMMIT cycle between our GET and LOCK.
pub struct LocatorQuorum {
    peers: Vec<Arc<dyn LocatorPeer>>,
    /// Update count each server answered in last GET, zero if unknown.
    cached: Mutex<Vec<u64>>,
}

impl LocatorQuorum {
    pub fn new(peers: Vec<Arc<dyn LocatorPeer>>) -> Self {
        let cached = Mutex::new(vec![0; peers.len()]);
        Self { peers, cached }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Queries all locators for the current locations.
    ///
    /// Returns `Ok(None)` if a majority answered but no single answer is shared by a majority, and
    /// [LocatorError::NoQuorum] if fewer than a majority answered at all.
    pub async fn get_locations(&self) -> Result<Option<LocatorSnapshot>, LocatorError> {
        let n = self.peers.len();
        if n == 0 {
            return Err(LocatorError::NoServers);
        }
        let mut pending = self
            .peers
            .iter()
            .enumerate()
            .map(|(i, peer)| async move { (i, peer.get().await) })
            .collect::<FuturesUnordered<_>>();
        let mut counts = vec![0; n];
        let mut reachable = 0;
        let mut tally: HashMap<LocatorSnapshot, usize> = HashMap::new();
        let mut winner = None;
        while let Some((i, result)) = pending.next().await {
            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    debug!("locator {} unreachable: {err:#}", self.peers[i]);
                    continue;
                },
            };
            reachable += 1;
            counts[i] = snapshot.update_count;
            let votes = tally.entry(snapshot.clone()).or_insert(0);
            *votes += 1;
            if has_achieved_majority(*votes, n) {
                winner = Some(snapshot);
                break;
            }
        }
        drop(pending);
        *self.cached.lock().unwrap() = counts;
        match winner {
            Some(snapshot) => Ok(Some(snapshot)),
            None if has_achieved_majority(reachable, n) => {
                warn!("{reachable} of {n} locators answered without agreement");
                Ok(None)
            },
            None => Err(LocatorError::NoQuorum { contacted: n }),
        }
    }

    /// Overwrites locations on all locators, succeeding on a majority of acknowledgements.
    pub async fn set_locations(&self, locations: Vec<String>) -> bool {
        let results = join_all(self.peers.iter().map(|peer| peer.set(locations.clone()))).await;
        let acks = self.count_acks("SET", results);
        let succeeded = has_achieved_majority(acks, self.peers.len());
        debug!("set locations {locations:?}: {acks} of {} acknowledged", self.peers.len());
        succeeded
    }

    /// Locks all locators for requester.
    ///
    /// A locator votes only if it granted the lock with the non-zero update count it answered in
    /// last [LocatorQuorum::get_locations].
    pub async fn lock_locators(&self, requester: &str) -> bool {
        let cached = self.cached.lock().unwrap().clone();
        let results = join_all(self.peers.iter().map(|peer| peer.lock(requester))).await;
        let mut votes = 0;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(0) => debug!("locator {} refused lock for {requester}", self.peers[i]),
                Ok(count) if cached[i] != 0 && count == cached[i] => votes += 1,
                Ok(count) => {
                    debug!("locator {} granted lock at update count {count}, cached {}", self.peers[i], cached[i])
                },
                Err(err) => debug!("locator {} unreachable: {err:#}", self.peers[i]),
            }
        }
        let granted = has_achieved_majority(votes, self.peers.len());
        info!("lock for {requester}: {votes} of {} votes, granted {granted}", self.peers.len());
        granted
    }

    /// Commits on all locators, succeeding on a majority. Cached counts are invalidated, so a
    /// further lock needs a fresh [LocatorQuorum::get_locations].
    pub async fn commit_locators(&self, requester: &str) -> bool {
        let results = join_all(self.peers.iter().map(|peer| peer.commit(requester))).await;
        let acks = self.count_acks("COMMIT", results);
        self.cached.lock().unwrap().iter_mut().for_each(|count| *count = 0);
        let committed = has_achieved_majority(acks, self.peers.len());
        info!("commit for {requester}: {acks} of {} acknowledged", self.peers.len());
        committed
    }

    fn count_acks(&self, command: &str, results: Vec<anyhow::Result<bool>>) -> usize {
        let mut acks = 0;
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(true) => acks += 1,
                Ok(false) => debug!("locator {} refused {command}", self.peers[i]),
                Err(err) => debug!("locator {} unreachable: {err:#}", self.peers[i]),
            }
        }
        acks
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fmt::{Display, Formatter};

    use anyhow::{anyhow, Result};
    use assertor::*;
    use async_trait::async_trait;

    use super::*;
    use crate::locator::client::LocalLocator;
    use crate::locator::state::LocatorState;

    pub struct DownLocator;

    impl Display for DownLocator {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            f.write_str("down")
        }
    }

    #[async_trait]
    impl LocatorPeer for DownLocator {
        async fn get(&self) -> Result<LocatorSnapshot> {
            Err(anyhow!("connection refused"))
        }

        async fn set(&self, _locations: Vec<String>) -> Result<bool> {
            Err(anyhow!("connection refused"))
        }

        async fn lock(&self, _requester: &str) -> Result<u64> {
            Err(anyhow!("connection refused"))
        }

        async fn commit(&self, _requester: &str) -> Result<bool> {
            Err(anyhow!("connection refused"))
        }
    }

    pub async fn new_state(update_count: u64, locations: &[&str]) -> Arc<LocatorState> {
        let state = LocatorState::new();
        while state.get().await.update_count < update_count {
            state.lock("setup").await;
            state.commit("setup").await;
        }
        state.set(locations.iter().map(|s| s.to_string()).collect()).await;
        Arc::new(state)
    }

    fn quorum(states: &[Arc<LocatorState>]) -> LocatorQuorum {
        let peers = states
            .iter()
            .enumerate()
            .map(|(i, state)| {
                Arc::new(LocalLocator::new(format!("locator-{i}"), state.clone())) as Arc<dyn LocatorPeer>
            })
            .collect();
        LocatorQuorum::new(peers)
    }

    fn strings(locations: &[&str]) -> Vec<String> {
        locations.iter().map(|s| s.to_string()).collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_majority_scenario() {
        let states = vec![
            new_state(5, &["dbA", "dbB"]).await,
            new_state(5, &["dbA", "dbB"]).await,
            new_state(3, &["dbA"]).await,
        ];
        let quorum = quorum(&states);

        let snapshot = quorum.get_locations().await.unwrap().unwrap();
        assert_that!(snapshot).is_equal_to(LocatorSnapshot::new(5, strings(&["dbA", "dbB"])));

        assert_that!(quorum.lock_locators("dbC").await).is_true();
        assert_that!(quorum.set_locations(strings(&["dbC"])).await).is_true();
        assert_that!(quorum.commit_locators("dbC").await).is_true();

        assert_that!(states[0].get().await).is_equal_to(LocatorSnapshot::new(6, strings(&["dbC"])));
        assert_that!(states[1].get().await).is_equal_to(LocatorSnapshot::new(6, strings(&["dbC"])));
        assert_that!(states[2].get().await).is_equal_to(LocatorSnapshot::new(4, strings(&["dbC"])));
    }

    #[test_log::test(tokio::test)]
    async fn test_lock_votes_on_own_cached_count() {
        let states = vec![new_state(1, &["dbA"]).await, new_state(2, &["dbA"]).await, new_state(3, &["dbA"]).await];
        let quorum = quorum(&states);
        assert_that!(quorum.get_locations().await.unwrap()).is_equal_to(None);
        assert_that!(quorum.lock_locators("dbC").await).is_true();
        assert_that!(quorum.commit_locators("dbC").await).is_true();
        assert_that!(states[0].get().await.update_count).is_equal_to(2);
        assert_that!(states[2].get().await.update_count).is_equal_to(4);
    }

    #[test_log::test(tokio::test)]
    async fn test_lock_vote_needs_matching_count() {
        let states = vec![new_state(1, &["dbA"]).await, new_state(1, &["dbA"]).await, new_state(1, &["dbA"]).await];
        let quorum = quorum(&states);
        quorum.get_locations().await.unwrap().unwrap();
        for state in states.iter().take(2) {
            state.lock("other").await;
            state.commit("other").await;
        }
        assert_that!(quorum.lock_locators("dbC").await).is_false();
    }

    #[test_log::test(tokio::test)]
    async fn test_minority_down() {
        let state = new_state(2, &["dbA"]).await;
        let peers: Vec<Arc<dyn LocatorPeer>> = vec![
            Arc::new(LocalLocator::new("l0", state.clone())),
            Arc::new(LocalLocator::new("l1", new_state(2, &["dbA"]).await)),
            Arc::new(DownLocator),
        ];
        let quorum = LocatorQuorum::new(peers);
        assert_that!(quorum.get_locations().await.unwrap().unwrap().locations).is_equal_to(strings(&["dbA"]));
        assert_that!(quorum.lock_locators("dbB").await).is_true();
        assert_that!(quorum.set_locations(strings(&["dbB"])).await).is_true();
        assert_that!(quorum.commit_locators("dbB").await).is_true();
        assert_that!(state.get().await).is_equal_to(LocatorSnapshot::new(3, strings(&["dbB"])));
    }

    #[test_log::test(tokio::test)]
    async fn test_majority_down() {
        let peers: Vec<Arc<dyn LocatorPeer>> = vec![
            Arc::new(LocalLocator::new("l0", new_state(2, &["dbA"]).await)),
            Arc::new(DownLocator),
            Arc::new(DownLocator),
        ];
        let quorum = LocatorQuorum::new(peers);
        assert_that!(matches!(quorum.get_locations().await, Err(LocatorError::NoQuorum { contacted: 3 }))).is_true();
        assert_that!(quorum.set_locations(strings(&["dbB"])).await).is_false();
        assert_that!(quorum.lock_locators("dbB").await).is_false();
        assert_that!(quorum.commit_locators("dbB").await).is_false();
    }

    #[test_log::test(tokio::test)]
    async fn test_lock_requires_prior_get() {
        let states = vec![new_state(1, &[]).await, new_state(1, &[]).await, new_state(1, &[]).await];
        let quorum = quorum(&states);
        assert_that!(quorum.lock_locators("dbA").await).is_false();
        quorum.get_locations().await.unwrap().unwrap();
        assert_that!(quorum.lock_locators("dbA").await).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_stale_cached_count_rejected() {
        let states = vec![new_state(1, &[]).await, new_state(1, &[]).await, new_state(1, &[]).await];
        let first = quorum(&states);
        let second = quorum(&states);

        first.get_locations().await.unwrap().unwrap();

        second.get_locations().await.unwrap().unwrap();
        assert_that!(second.lock_locators("dbB").await).is_true();
        assert_that!(second.set_locations(strings(&["dbB"])).await).is_true();
        assert_that!(second.commit_locators("dbB").await).is_true();

        assert_that!(first.lock_locators("dbA").await).is_false();

        let snapshot = first.get_locations().await.unwrap().unwrap();
        assert_that!(snapshot).is_equal_to(LocatorSnapshot::new(2, strings(&["dbB"])));
        assert_that!(first.lock_locators("dbA").await).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_concurrent_lock_exclusive() {
        let states = vec![new_state(1, &[]).await, new_state(1, &[]).await, new_state(1, &[]).await];
        let first = quorum(&states);
        let second = quorum(&states);
        first.get_locations().await.unwrap().unwrap();
        second.get_locations().await.unwrap().unwrap();
        assert_that!(first.lock_locators("dbA").await).is_true();
        assert_that!(second.lock_locators("dbB").await).is_false();
        assert_that!(second.commit_locators("dbB").await).is_false();
        assert_that!(first.commit_locators("dbA").await).is_true();
    }

    #[test_log::test(tokio::test)]
    async fn test_commit_invalidates_cache() {
        let states = vec![new_state(1, &[]).await];
        let quorum = quorum(&states);
        quorum.get_locations().await.unwrap().unwrap();
        assert_that!(quorum.lock_locators("dbA").await).is_true();
        assert_that!(quorum.commit_locators("dbA").await).is_true();
        assert_that!(quorum.lock_locators("dbA").await).is_false();
    }

    #[tokio::test]
    async fn test_no_servers() {
        let quorum = LocatorQuorum::new(vec![]);
        assert_that!(matches!(quorum.get_locations().await, Err(LocatorError::NoServers))).is_true();
    }
}

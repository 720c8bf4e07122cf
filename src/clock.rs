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
use std::time::SystemTime;

use static_assertions::assert_impl_all;

pub use crate::protos::Timestamp;

/// Strictly increasing wall clock shared by everything that compares "newer than" watermarks.
///
/// Two calls to [Clock::now] never return the same timestamp, so a ranking computed after an update
/// always compares greater than that update, even within the same nanosecond.
#[derive(Clone)]
pub struct Clock {
    last: Arc<spin::Mutex<Timestamp>>,
}

assert_impl_all!(Clock: Send, Sync);

impl Clock {
    pub fn new() -> Self {
        Self { last: Arc::new(spin::Mutex::new(Self::wall_time())) }
    }

    fn wall_time() -> Timestamp {
        let elapsed = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
        Timestamp { seconds: elapsed.as_secs(), nanoseconds: elapsed.subsec_nanos(), logical: 0 }
    }

    /// Wall time, or one logical tick past the last reading if wall time has not moved beyond it.
    pub fn now(&self) -> Timestamp {
        let wall = Self::wall_time();
        let mut last = self.last.lock();
        match wall > *last {
            true => *last = wall,
            false => last.logical += 1,
        }
        *last
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}+{}", self.seconds, self.nanoseconds, self.logical)
    }
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { seconds: 0, nanoseconds: 0, logical: 0 };
}

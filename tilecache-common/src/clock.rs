// Copyright 2026 tilecache Project Authors
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

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Ticks per second of [`Clock`] timestamps (100ns resolution).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Strictly increasing timestamp source for `last_touched`.
///
/// Ticks are 100ns units since the unix epoch. Two calls never return the same value, even when the wall clock
/// stalls or steps backwards, which keeps eviction order deterministic for entries created in the same instant.
/// The only exception is a clock observed at `i64::MAX`, which saturates instead of overflowing.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicI64,
}

impl Clock {
    /// Create a new clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next timestamp.
    pub fn tick(&self) -> i64 {
        let now = Self::wall();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(p) => prev = p,
            }
        }
    }

    /// Make sure every later [`Clock::tick`] is greater than `ticks`.
    ///
    /// Called with the newest timestamp of a loaded index so entries written after a restart are always younger.
    pub fn observe(&self, ticks: i64) {
        self.last.fetch_max(ticks, Ordering::AcqRel);
    }

    /// Ticks of the wall clock, without advancing the clock.
    pub fn wall() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_nanos() / 100) as i64)
            .unwrap_or_default()
    }
}

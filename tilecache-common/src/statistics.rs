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

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Per-tier counters, updated without locking.
#[derive(Debug, Default)]
pub struct Statistics {
    /// Lookups served by the tier.
    pub hits: AtomicUsize,
    /// Lookups the tier could not serve.
    pub misses: AtomicUsize,
    /// Payloads accepted by the tier.
    pub inserts: AtomicUsize,
    /// Entries unloaded by eviction passes.
    pub evictions: AtomicUsize,
    /// Background I/O submissions dropped because the work queue was full or closed.
    pub dropped_submissions: AtomicUsize,
    /// Atlas files written.
    pub atlas_saves: AtomicUsize,
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    /// See [`Statistics::hits`].
    pub hits: usize,
    /// See [`Statistics::misses`].
    pub misses: usize,
    /// See [`Statistics::inserts`].
    pub inserts: usize,
    /// See [`Statistics::evictions`].
    pub evictions: usize,
    /// See [`Statistics::dropped_submissions`].
    pub dropped_submissions: usize,
    /// See [`Statistics::atlas_saves`].
    pub atlas_saves: usize,
}

impl Statistics {
    /// Record a lookup outcome.
    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            dropped_submissions: self.dropped_submissions.load(Ordering::Relaxed),
            atlas_saves: self.atlas_saves.load(Ordering::Relaxed),
        }
    }
}

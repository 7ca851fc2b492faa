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

//! The in-memory half of a tier index: an insertion-ordered list of [`CacheEntry`] plus a running total size.
//!
//! The persistent tiers wrap a [`Ledger`] in an atlas file, the memory tier uses a bare one to decide what to unload.

use itertools::Itertools;

use crate::{hasher::key_hash, strict_assert_eq};

/// Bookkeeping record of one cached payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    key: String,
    hash: i32,
    size: usize,
    last_touched: i64,
}

impl CacheEntry {
    /// Create an entry, hashing the key.
    pub fn new(key: impl Into<String>, size: usize, last_touched: i64) -> Self {
        let key = key.into();
        let hash = key_hash(&key);
        Self {
            key,
            hash,
            size,
            last_touched,
        }
    }

    /// Logical identity of the payload.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cached hash of [`CacheEntry::key`].
    pub fn hash(&self) -> i32 {
        self.hash
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Creation time, or last access time for memory entries, in [`crate::clock::Clock`] ticks.
    pub fn last_touched(&self) -> i64 {
        self.last_touched
    }

    #[inline]
    fn matches(&self, hash: i32, key: &str) -> bool {
        self.hash == hash && self.key == key
    }
}

/// Insertion-ordered entry list with O(1) amortized append and O(n) bulk compaction.
///
/// `total_size` always equals the sum of the sizes of the live entries. It is maintained incrementally and only
/// computed by a full scan when a ledger is built from loaded entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    entries: Vec<CacheEntry>,
    total_size: usize,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger from entries in insertion order.
    ///
    /// A key that appears more than once keeps only its last occurrence, the same outcome as re-adding it.
    pub fn from_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let mut entries = entries
            .into_iter()
            .collect_vec()
            .into_iter()
            .rev()
            .unique_by(|e| e.key.clone())
            .collect_vec();
        entries.reverse();
        let total_size = entries.iter().map(|e| e.size).sum();
        Self { entries, total_size }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the sizes of all live entries.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// The largest `last_touched` in the ledger.
    pub fn newest(&self) -> Option<i64> {
        self.entries.iter().map(|e| e.last_touched).max()
    }

    /// Position of `key` in insertion order.
    ///
    /// Linear scan comparing the cached hash first and the key string only on a hash match.
    pub fn position(&self, key: &str) -> Option<usize> {
        let hash = key_hash(key);
        self.entries.iter().position(|e| e.matches(hash, key))
    }

    /// Whether `key` is indexed.
    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Entry of `key`, if indexed.
    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.position(key).map(|i| &self.entries[i])
    }

    /// Insert `key` or refresh it.
    ///
    /// An existing key has its size replaced (adjusting the total by the delta), its timestamp set to `now` and is
    /// moved to the back of the order. A new key is appended.
    pub fn add_or_refresh(&mut self, key: &str, size: usize, now: i64) -> &CacheEntry {
        match self.position(key) {
            Some(index) => {
                let mut entry = self.entries.remove(index);
                self.total_size = self.total_size - entry.size + size;
                entry.size = size;
                entry.last_touched = now;
                self.entries.push(entry);
            }
            None => {
                self.entries.push(CacheEntry::new(key, size, now));
                self.total_size += size;
            }
        }
        strict_assert_eq!(self.total_size, self.entries.iter().map(|e| e.size).sum::<usize>());
        &self.entries[self.entries.len() - 1]
    }

    /// Update the timestamp of `key` in place. Returns `false` if `key` is not indexed.
    pub fn touch(&mut self, key: &str, now: i64) -> bool {
        match self.position(key) {
            Some(index) => {
                self.entries[index].last_touched = now;
                true
            }
            None => false,
        }
    }

    /// Remove a single key.
    pub fn remove_key(&mut self, key: &str) -> Option<CacheEntry> {
        let index = self.position(key)?;
        let entry = self.entries.remove(index);
        self.total_size -= entry.size;
        Some(entry)
    }

    /// Remove the entries at `indices` and return them in their original order.
    ///
    /// The remaining entries keep their relative order. Duplicate indices are removed once.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of range.
    pub fn remove(&mut self, indices: &[usize]) -> Vec<CacheEntry> {
        if indices.is_empty() {
            return vec![];
        }

        let len = self.entries.len();
        let mut doomed = vec![false; len];
        for &index in indices {
            assert!(index < len, "ledger index {index} out of range (len: {len})");
            doomed[index] = true;
        }

        let mut removed = Vec::with_capacity(indices.len());
        let mut kept = Vec::with_capacity(len);
        for (entry, doomed) in std::mem::take(&mut self.entries).into_iter().zip(doomed) {
            if doomed {
                self.total_size -= entry.size;
                removed.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.entries = kept;

        strict_assert_eq!(self.total_size, self.entries.iter().map(|e| e.size).sum::<usize>());
        removed
    }

    /// Indices of the `count` entries with the smallest `last_touched`, oldest first.
    ///
    /// Ties are broken by insertion order. A `count` larger than the ledger saturates at [`Ledger::len`].
    ///
    /// Keeps a sorted buffer of at most `count` candidates while scanning once, so the cost is O(n * count) and
    /// no full sort happens when only a small fraction is unloaded.
    pub fn select_oldest(&self, count: usize) -> Vec<usize> {
        let count = count.min(self.entries.len());
        if count == 0 {
            return vec![];
        }

        let mut selected: Vec<usize> = Vec::with_capacity(count + 1);
        for (index, entry) in self.entries.iter().enumerate() {
            if selected.len() == count && entry.last_touched >= self.entries[selected[count - 1]].last_touched {
                continue;
            }
            // Equal timestamps stay in front of the candidate since they were scanned earlier.
            let pos = selected.partition_point(|&i| self.entries[i].last_touched <= entry.last_touched);
            selected.insert(pos, index);
            selected.truncate(count);
        }
        selected
    }

    /// Select and remove the `count` oldest entries.
    pub fn remove_oldest(&mut self, count: usize) -> Vec<CacheEntry> {
        let indices = self.select_oldest(count);
        self.remove(&indices)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_size = 0;
    }
}

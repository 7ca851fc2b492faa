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

use std::{fmt::Display, sync::Arc};

use bytes::Bytes;
use futures_util::future::try_join;
use serde::{Deserialize, Serialize};
use tilecache_common::{error::Result, statistics::StatisticsSnapshot};
use tilecache_memory::{MemoryCache, PinnedEntry};
use tilecache_storage::{CustomStore, FileStore, TileKey};

/// One of the cache layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Decoded payloads kept in process.
    Memory,
    /// Fetched tiles persisted under a path template.
    File,
    /// Caller-supplied blobs.
    Custom,
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::File => write!(f, "file"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Counters of every tier. Disabled tiers report zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Memory Tier counters.
    pub memory: StatisticsSnapshot,
    /// File Tier counters.
    pub file: StatisticsSnapshot,
    /// Custom Tier counters.
    pub custom: StatisticsSnapshot,
}

#[derive(Debug)]
pub(crate) struct TileCacheInner {
    pub(crate) memory: Option<MemoryCache<Bytes>>,
    pub(crate) file: Option<FileStore>,
    pub(crate) custom: Option<CustomStore>,
}

/// The tiered tile cache: the single entry point of the tile pipeline.
///
/// Lookups go memory first, then file. Tiles fetched from the network are written through to both. The Custom
/// Tier is independent of tiles and is used through [`TileCache::custom`].
///
/// Cloning is cheap: clones share the same tiers.
#[derive(Debug, Clone)]
pub struct TileCache {
    inner: Arc<TileCacheInner>,
}

impl TileCache {
    pub(crate) fn new(inner: TileCacheInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// The Memory Tier, if enabled.
    pub fn memory(&self) -> Option<&MemoryCache<Bytes>> {
        self.inner.memory.as_ref()
    }

    /// The File Tier, if enabled.
    pub fn file(&self) -> Option<&FileStore> {
        self.inner.file.as_ref()
    }

    /// The Custom Tier, if enabled.
    pub fn custom(&self) -> Option<&CustomStore> {
        self.inner.custom.as_ref()
    }

    /// Look `tile` up in memory, then on disk. A disk hit is also put into memory.
    ///
    /// `None` means the caller has to fetch the tile.
    pub async fn try_load(&self, tile: &TileKey) -> Option<Bytes> {
        let key = tile.to_string();
        if let Some(memory) = self.inner.memory.as_ref() {
            if let Some(data) = memory.get(&key) {
                return Some(data.as_ref().clone());
            }
        }

        let data = self.inner.file.as_ref()?.load(tile).await?;
        if let Some(memory) = self.inner.memory.as_ref() {
            memory.insert(key, data.clone());
        }
        Some(data)
    }

    /// Look up and pin a batch of tiles in memory under one lock acquisition.
    ///
    /// Pinned tiles are exempt from memory eviction until the returned entries are dropped. Every slot is `None`
    /// if the Memory Tier is disabled.
    pub fn preload(&self, tiles: &[TileKey]) -> Vec<Option<PinnedEntry<Bytes>>> {
        match self.inner.memory.as_ref() {
            Some(memory) => {
                let keys = tiles.iter().map(|tile| tile.to_string()).collect::<Vec<_>>();
                memory.get_pinned_batch(keys.iter().map(|key| key.as_str()))
            }
            None => tiles.iter().map(|_| None).collect(),
        }
    }

    /// Write a tile that arrived from the network through to memory and disk.
    pub fn on_fetched(&self, tile: &TileKey, data: Bytes) {
        if let Some(memory) = self.inner.memory.as_ref() {
            memory.insert(tile.to_string(), data.clone());
        }
        if let Some(file) = self.inner.file.as_ref() {
            file.store(tile, data);
        }
        tracing::trace!(tile = %tile, "[tilecache]: tile fetched");
    }

    /// Clear every tier, including pinned memory entries and files nobody indexed.
    pub async fn clear_all(&self) -> Result<()> {
        if let Some(memory) = self.inner.memory.as_ref() {
            memory.clear();
        }
        try_join(
            async {
                match self.inner.file.as_ref() {
                    Some(file) => file.clear().await,
                    None => Ok(()),
                }
            },
            async {
                match self.inner.custom.as_ref() {
                    Some(custom) => custom.clear().await,
                    None => Ok(()),
                }
            },
        )
        .await?;
        tracing::info!("[tilecache]: all tiers cleared");
        Ok(())
    }

    /// Current size of `tier` in bytes, `0` if disabled.
    pub fn current_size(&self, tier: Tier) -> usize {
        match tier {
            Tier::Memory => self.inner.memory.as_ref().map(|m| m.usage()).unwrap_or_default(),
            Tier::File => self.inner.file.as_ref().map(|f| f.store_ref().size()).unwrap_or_default(),
            Tier::Custom => self.inner.custom.as_ref().map(|c| c.store_ref().size()).unwrap_or_default(),
        }
    }

    /// Size of `tier` as recorded in its atlas header on disk, without loading the entries.
    ///
    /// The Memory Tier and disabled tiers report `0`.
    pub async fn fast_size_on_disk(&self, tier: Tier) -> Result<u64> {
        let store = match tier {
            Tier::Memory => None,
            Tier::File => self.inner.file.as_ref().map(|f| f.store_ref()),
            Tier::Custom => self.inner.custom.as_ref().map(|c| c.store_ref()),
        };
        match store {
            Some(store) => store.size_on_disk().await,
            None => Ok(0),
        }
    }

    /// Counters of every tier.
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            memory: self
                .inner
                .memory
                .as_ref()
                .map(|m| m.statistics().snapshot())
                .unwrap_or_default(),
            file: self
                .inner
                .file
                .as_ref()
                .map(|f| f.store_ref().statistics().snapshot())
                .unwrap_or_default(),
            custom: self
                .inner
                .custom
                .as_ref()
                .map(|c| c.store_ref().statistics().snapshot())
                .unwrap_or_default(),
        }
    }

    /// Save every atlas and wait for the queued file I/O. Later writes to the persistent tiers are ignored.
    pub async fn close(&self) -> Result<()> {
        try_join(
            async {
                match self.inner.file.as_ref() {
                    Some(file) => file.close().await,
                    None => Ok(()),
                }
            },
            async {
                match self.inner.custom.as_ref() {
                    Some(custom) => custom.close().await,
                    None => Ok(()),
                }
            },
        )
        .await?;
        tracing::info!("[tilecache]: closed");
        Ok(())
    }
}

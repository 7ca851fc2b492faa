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
    fmt::Debug,
    future::Future,
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tilecache_common::{
    asyncify::asyncify_with_runtime,
    clock::Clock,
    error::{Error, ErrorKind, Result},
    rate::UnloadRate,
    statistics::Statistics,
};

use crate::{
    atlas::Atlas,
    flusher::{FlushScheduler, Flusher, Submission},
    keeper::Keeper,
    runtime::{Runtime, RuntimeOptions},
};

/// Default name of the atlas file inside the tier root.
pub const DEFAULT_ATLAS_FILE_NAME: &str = "index.atlas";

/// What [`Store::store`] does with a key that is already indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Keep the existing payload, the write is a no-op.
    FirstWins,
    /// Replace the payload and refresh the entry.
    Overwrite,
}

/// Maps an atlas key to the file holding its payload.
pub trait Layout: Send + Sync + Debug + 'static {
    /// The payload file of `key` under `root`.
    fn path(&self, root: &Path, key: &str) -> PathBuf;
}

/// `root/<key>.<extension>`, the key being a relative path.
#[derive(Debug, Clone)]
pub struct ExtensionLayout {
    extension: String,
}

impl ExtensionLayout {
    /// Create a layout appending `extension` (without the dot) to every key.
    pub fn new(extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            extension: extension.trim_start_matches('.').to_string(),
        }
    }
}

impl Layout for ExtensionLayout {
    /// Root, prefix and `..` components of `key` are dropped, so the file always lies below `root`.
    fn path(&self, root: &Path, key: &str) -> PathBuf {
        let mut path = root.to_path_buf();
        let mut depth = 0;
        for component in Path::new(key).components() {
            if let Component::Normal(name) = component {
                path.push(name);
                depth += 1;
            }
        }
        if depth == 0 {
            path.push("_");
        }
        if !self.extension.is_empty() {
            path.as_mut_os_string().push(format!(".{}", self.extension));
        }
        path
    }
}

/// `root/<percent-encoded key>.bin`, one flat file per arbitrary key.
#[derive(Debug, Clone, Default)]
pub struct EncodedLayout;

impl Layout for EncodedLayout {
    fn path(&self, root: &Path, key: &str) -> PathBuf {
        root.join(format!("{}.bin", urlencoding::encode(key)))
    }
}

#[derive(Debug)]
struct StoreInner {
    name: String,
    root: PathBuf,
    layout: Box<dyn Layout>,

    capacity: usize,
    unload_rate: UnloadRate,
    write_policy: WritePolicy,
    preserve: Vec<PathBuf>,

    atlas: Arc<Atlas>,
    keeper: Arc<Keeper>,
    flusher: Flusher,
    scheduler: FlushScheduler,

    clock: Arc<Clock>,
    statistics: Arc<Statistics>,
    runtime: Runtime,

    closed: AtomicBool,
}

/// A size-bounded directory of payload files indexed by one atlas.
///
/// Index mutations happen synchronously on the caller, file I/O is queued to the tier's single writer. The index can
/// be briefly ahead of the disk: payloads whose write is still queued are served from memory, and an indexed
/// payload whose file is gone is dropped from the index on lookup.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Name of the tier, used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Directory holding the payload files.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Path of the atlas file.
    pub fn atlas_path(&self) -> &Path {
        self.inner.atlas.path()
    }

    /// Payload file of `key`.
    pub fn path(&self, key: &str) -> PathBuf {
        self.inner.layout.path(&self.inner.root, key)
    }

    /// Size budget in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Fraction of entries unloaded when over budget.
    pub fn unload_rate(&self) -> UnloadRate {
        self.inner.unload_rate
    }

    /// Write policy for already indexed keys.
    pub fn write_policy(&self) -> WritePolicy {
        self.inner.write_policy
    }

    /// Total indexed payload size in bytes.
    pub fn size(&self) -> usize {
        self.inner.atlas.ledger().total_size()
    }

    /// Number of indexed payloads.
    pub fn len(&self) -> usize {
        self.inner.atlas.ledger().len()
    }

    /// Whether no payload is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tier counters.
    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.inner.statistics
    }

    /// Whether [`Store::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Whether `key` is indexed.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.atlas.ledger().contains(key)
    }

    /// Read the payload of `key`.
    ///
    /// A missing key, a read error and a missing file are all misses. A missing file also drops the key from the
    /// index so the next [`Store::store`] writes it again.
    pub async fn load(&self, key: &str) -> Option<Bytes> {
        let indexed = self.contains(key);
        if !indexed {
            self.inner.statistics.record_lookup(false);
            tracing::trace!(name = %self.inner.name, key, "[store]: miss");
            return None;
        }

        if let Some(data) = self.inner.keeper.get(key) {
            self.inner.statistics.record_lookup(true);
            tracing::trace!(name = %self.inner.name, key, "[store]: hit queued write");
            return Some(data);
        }

        let path = self.path(key);
        let res = {
            let path = path.clone();
            asyncify_with_runtime(self.inner.runtime.read(), move || std::fs::read(path)).await
        };
        match res {
            Ok(data) => {
                self.inner.statistics.record_lookup(true);
                tracing::trace!(name = %self.inner.name, key, "[store]: hit");
                Some(Bytes::from(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.inner.statistics.record_lookup(false);
                let healed = {
                    let mut ledger = self.inner.atlas.ledger();
                    // A concurrent overwrite may have queued a fresh payload meanwhile.
                    self.inner.keeper.get(key).is_none() && ledger.remove_key(key).is_some()
                };
                if healed {
                    tracing::debug!(name = %self.inner.name, key, path = %path.display(), "[store]: indexed file missing, entry dropped");
                    self.inner.scheduler.schedule();
                }
                None
            }
            Err(e) => {
                self.inner.statistics.record_lookup(false);
                tracing::warn!(name = %self.inner.name, key, path = %path.display(), "[store]: read failed: {e}");
                None
            }
        }
    }

    /// Index `data` under `key` and queue its file write.
    ///
    /// Returns `false` if nothing was written: the key is indexed under [`WritePolicy::FirstWins`], the store is
    /// closed, or the write queue is full. Runs [`Store::evict_if_over_budget`] and schedules an atlas save.
    pub fn store(&self, key: &str, data: Bytes) -> bool {
        if self.is_closed() {
            tracing::trace!(name = %self.inner.name, key, "[store]: closed, write ignored");
            return false;
        }

        let (previous, previous_piece) = {
            let mut ledger = self.inner.atlas.ledger();
            if self.inner.write_policy == WritePolicy::FirstWins && ledger.contains(key) {
                return false;
            }
            let previous = ledger.get(key).cloned();
            let previous_piece = self.inner.keeper.get(key);
            ledger.add_or_refresh(key, data.len(), self.inner.clock.tick());
            self.inner.keeper.insert(key, data.clone());
            (previous, previous_piece)
        };

        let submitted = self.inner.flusher.submit(Submission::Write {
            key: key.to_string(),
            path: self.path(key),
            data,
        });
        if !submitted {
            // Put back what was indexed before, its file is still on disk or queued.
            let mut ledger = self.inner.atlas.ledger();
            match previous {
                Some(entry) => {
                    ledger.add_or_refresh(key, entry.size(), entry.last_touched());
                }
                None => {
                    ledger.remove_key(key);
                }
            }
            match previous_piece {
                Some(piece) => self.inner.keeper.insert(key, piece),
                None => self.inner.keeper.remove(key),
            }
            return false;
        }

        self.inner.statistics.inserts.fetch_add(1, Ordering::Relaxed);
        self.evict_if_over_budget();
        self.inner.scheduler.schedule();
        true
    }

    /// Drop `key` from the index and queue the deletion of its file.
    pub fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut ledger = self.inner.atlas.ledger();
            self.inner.keeper.remove(key);
            ledger.remove_key(key)
        };
        if removed.is_none() {
            return false;
        }
        self.inner.flusher.submit(Submission::Delete {
            paths: vec![self.path(key)],
        });
        self.inner.scheduler.schedule();
        true
    }

    /// If the indexed size exceeds the budget, drop the oldest fraction of entries and queue their deletion.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_if_over_budget(&self) -> usize {
        let (removed, freed, remaining) = {
            let mut ledger = self.inner.atlas.ledger();
            if ledger.total_size() <= self.inner.capacity {
                return 0;
            }
            let before = ledger.total_size();
            let count = self.inner.unload_rate.unload_count(ledger.len());
            let removed = ledger.remove_oldest(count);
            for entry in removed.iter() {
                self.inner.keeper.remove(entry.key());
            }
            (removed, before - ledger.total_size(), ledger.total_size())
        };

        let paths = removed.iter().map(|entry| self.path(entry.key())).collect_vec();
        self.inner.flusher.submit(Submission::Delete { paths });
        self.inner
            .statistics
            .evictions
            .fetch_add(removed.len(), Ordering::Relaxed);
        tracing::debug!(
            name = %self.inner.name,
            count = removed.len(),
            freed,
            remaining,
            capacity = self.inner.capacity,
            "[store]: eviction pass"
        );

        self.inner.scheduler.schedule();
        removed.len()
    }

    /// Save the atlas now and wait for every queued write.
    pub async fn flush(&self) -> Result<()> {
        self.inner.flusher.save().await
    }

    /// Resolves once every queued file operation is done.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.flusher.wait()
    }

    /// Drop every entry, remove every file under the root and save the empty atlas.
    pub async fn clear(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::new(ErrorKind::Closed, "store is closed").with_context("name", &self.inner.name));
        }
        {
            let mut ledger = self.inner.atlas.ledger();
            ledger.clear();
            self.inner.keeper.clear();
        }
        tracing::info!(name = %self.inner.name, root = %self.inner.root.display(), "[store]: clear");
        self.inner
            .flusher
            .submit_async(Submission::Purge {
                dir: self.inner.root.clone(),
                preserve: self.inner.preserve.clone(),
            })
            .await?;
        self.flush().await
    }

    /// Reject further writes, save the atlas and wait for the queue to drain.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush().await?;
        tracing::info!(name = %self.inner.name, entries = self.len(), size = self.size(), "[store]: closed");
        Ok(())
    }

    /// The total size recorded in the atlas header on disk, without loading the entries.
    pub async fn size_on_disk(&self) -> Result<u64> {
        let path = self.atlas_path().to_path_buf();
        asyncify_with_runtime(self.inner.runtime.read(), move || Atlas::peek_total_size(path)).await
    }
}

/// Options shared by the persistent tiers.
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    name: String,
    root: PathBuf,
    capacity: usize,
    unload_rate: UnloadRate,
    write_policy: Option<WritePolicy>,
    atlas_file_name: String,
    flush_debounce: Duration,
    submit_queue_size: usize,
    preserve: Vec<PathBuf>,
    runtime_options: RuntimeOptions,
    runtime: Option<Runtime>,
    clock: Option<Arc<Clock>>,
    statistics: Option<Arc<Statistics>>,
}

impl StoreBuilder {
    /// Create a builder for a tier rooted at `root` with a budget of `capacity` bytes.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            capacity,
            unload_rate: UnloadRate::default(),
            write_policy: None,
            atlas_file_name: DEFAULT_ATLAS_FILE_NAME.to_string(),
            flush_debounce: Duration::from_secs(1),
            submit_queue_size: 1024,
            preserve: vec![],
            runtime_options: RuntimeOptions::Disabled,
            runtime: None,
            clock: None,
            statistics: None,
        }
    }

    /// Set the fraction of entries unloaded when over budget.
    ///
    /// Default: `0.3`.
    pub fn with_unload_rate(mut self, unload_rate: UnloadRate) -> Self {
        self.unload_rate = unload_rate;
        self
    }

    /// Set the write policy for already indexed keys.
    ///
    /// Default: decided by the tier.
    pub fn with_write_policy(mut self, write_policy: WritePolicy) -> Self {
        self.write_policy = Some(write_policy);
        self
    }

    /// Set the atlas file name inside the root.
    ///
    /// Default: `index.atlas`.
    pub fn with_atlas_file_name(mut self, atlas_file_name: impl Into<String>) -> Self {
        self.atlas_file_name = atlas_file_name.into();
        self
    }

    /// Set the window in which atlas saves are coalesced.
    ///
    /// Default: 1s.
    pub fn with_flush_debounce(mut self, flush_debounce: Duration) -> Self {
        self.flush_debounce = flush_debounce;
        self
    }

    /// Set the capacity of the I/O queue. Submissions beyond it are dropped.
    ///
    /// Default: `1024`.
    pub fn with_submit_queue_size(mut self, submit_queue_size: usize) -> Self {
        self.submit_queue_size = submit_queue_size;
        self
    }

    /// Keep `path`, a direct child of the root, when the tier is cleared.
    pub fn with_preserved_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preserve.push(path.into());
        self
    }

    /// Set the runtime options used when no runtime is given.
    ///
    /// Default: [`RuntimeOptions::Disabled`].
    pub fn with_runtime_options(mut self, runtime_options: RuntimeOptions) -> Self {
        self.runtime_options = runtime_options;
        self
    }

    /// Share an already built runtime.
    pub fn with_runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Share a clock with other tiers.
    pub fn with_clock(mut self, clock: Arc<Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a statistics sink.
    pub fn with_statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Load the atlas and start the I/O queue.
    ///
    /// Must be called within a tokio runtime.
    pub async fn build(self, layout: impl Layout, default_write_policy: WritePolicy) -> Result<Store> {
        if self.submit_queue_size == 0 {
            return Err(Error::config("submit queue size must be positive").with_context("name", &self.name));
        }
        if self.atlas_file_name.is_empty() {
            return Err(Error::config("atlas file name must not be empty").with_context("name", &self.name));
        }

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Runtime::build(&self.runtime_options, &self.name)?,
        };

        let atlas_path = self.root.join(&self.atlas_file_name);
        let atlas = asyncify_with_runtime(runtime.read(), move || Atlas::open(atlas_path)).await;
        let atlas = Arc::new(atlas);

        let clock = self.clock.unwrap_or_default();
        if let Some(newest) = atlas.ledger().newest() {
            clock.observe(newest);
        }
        let statistics = self.statistics.unwrap_or_default();

        let keeper = Arc::new(Keeper::default());
        let flusher = Flusher::open(
            self.name.as_str(),
            self.submit_queue_size,
            atlas.clone(),
            keeper.clone(),
            statistics.clone(),
            &runtime,
        );
        let scheduler = FlushScheduler::new(self.flush_debounce, flusher.clone(), runtime.clone());

        let write_policy = self.write_policy.unwrap_or(default_write_policy);
        tracing::info!(
            name = %self.name,
            root = %self.root.display(),
            capacity = self.capacity,
            unload_rate = %self.unload_rate,
            ?write_policy,
            entries = atlas.ledger().len(),
            "[store]: store opened"
        );

        let store = Store {
            inner: Arc::new(StoreInner {
                name: self.name,
                root: self.root,
                layout: Box::new(layout),
                capacity: self.capacity,
                unload_rate: self.unload_rate,
                write_policy,
                preserve: self.preserve,
                atlas,
                keeper,
                flusher,
                scheduler,
                clock,
                statistics,
                runtime,
                closed: AtomicBool::new(false),
            }),
        };

        // The persisted index may already exceed a budget that has been lowered since.
        store.evict_if_over_budget();
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use tilecache_common::ledger::{CacheEntry, Ledger};

    use super::*;
    use crate::atlas::encode;

    const KB: usize = 1024;

    fn builder(root: &Path, capacity: usize) -> StoreBuilder {
        StoreBuilder::new("test", root, capacity)
            .with_unload_rate(UnloadRate::new(0.5).unwrap())
            .with_flush_debounce(Duration::from_millis(10))
    }

    async fn open(root: &Path, capacity: usize, write_policy: WritePolicy) -> Store {
        builder(root, capacity)
            .with_write_policy(write_policy)
            .build(ExtensionLayout::new("png"), WritePolicy::FirstWins)
            .await
            .unwrap()
    }

    #[test]
    fn test_extension_layout_stays_under_root() {
        let root = Path::new("/cache/tiles");
        let layout = ExtensionLayout::new(".png");
        assert_eq!(layout.path(root, "osm/3/4/5"), root.join("osm/3/4/5.png"));
        assert_eq!(layout.path(root, "/srv/other/3"), root.join("srv/other/3.png"));
        assert_eq!(layout.path(root, "../../etc/3"), root.join("etc/3.png"));
        assert_eq!(layout.path(root, "osm/./../3"), root.join("osm/3.png"));
        assert_eq!(layout.path(root, ".."), root.join("_.png"));
        assert_eq!(ExtensionLayout::new("").path(root, "a/b"), root.join("a/b"));
    }

    #[test_log::test(tokio::test)]
    async fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;

        assert!(store.load("osm/1/0/0").await.is_none());
        assert!(store.store("osm/1/0/0", Bytes::from_static(b"tile")));
        // Served before the write reached the disk.
        assert_eq!(store.load("osm/1/0/0").await.as_deref(), Some(&b"tile"[..]));

        store.wait().await;
        assert_eq!(std::fs::read(dir.path().join("osm/1/0/0.png")).unwrap(), b"tile");
        assert_eq!(store.load("osm/1/0/0").await.as_deref(), Some(&b"tile"[..]));

        let stats = store.statistics().snapshot();
        assert_eq!((stats.hits, stats.misses, stats.inserts), (2, 1, 1));
    }

    #[test_log::test(tokio::test)]
    async fn test_first_wins_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;

        assert!(store.store("k", Bytes::from_static(b"first")));
        assert!(!store.store("k", Bytes::from_static(b"second write")));
        store.wait().await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), 5);
        assert_eq!(std::fs::read(store.path("k")).unwrap(), b"first");
    }

    #[test_log::test(tokio::test)]
    async fn test_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024 * KB, WritePolicy::Overwrite).await;

        assert!(store.store("k", Bytes::from_static(b"first")));
        assert!(store.store("k", Bytes::from_static(b"second write")));
        store.wait().await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), 12);
        assert_eq!(std::fs::read(store.path("k")).unwrap(), b"second write");
    }

    #[test_log::test(tokio::test)]
    async fn test_evict_oldest_fraction() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;
        let blob = Bytes::from(vec![7u8; 300 * KB]);

        for i in 0..5 {
            store.store(&format!("tile/{i}"), blob.clone());
        }
        store.wait().await;

        // The 4th write went over budget and unloaded round(4 * 0.5) = 2 oldest entries.
        assert_eq!(store.len(), 3);
        assert_eq!(store.size(), 900 * KB);
        for i in 0..2 {
            assert!(!store.contains(&format!("tile/{i}")));
            assert!(!store.path(&format!("tile/{i}")).exists());
            assert!(store.load(&format!("tile/{i}")).await.is_none());
        }
        for i in 2..5 {
            assert!(store.path(&format!("tile/{i}")).exists());
        }
        assert_eq!(store.statistics().snapshot().evictions, 2);
        assert_eq!(store.evict_if_over_budget(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_file_heals_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;
        store.store("k", Bytes::from_static(b"abc"));
        store.wait().await;

        std::fs::remove_file(store.path("k")).unwrap();
        assert!(store.load("k").await.is_none());
        assert!(!store.contains("k"));
        assert_eq!(store.size(), 0);

        // First-wins no longer blocks the rewrite.
        assert!(store.store("k", Bytes::from_static(b"abc")));
    }

    #[test_log::test(tokio::test)]
    async fn test_restart_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(Clock::new());
        {
            let store = builder(dir.path(), 1024 * KB)
                .with_clock(clock.clone())
                .build(ExtensionLayout::new("png"), WritePolicy::FirstWins)
                .await
                .unwrap();
            store.store("a", Bytes::from_static(b"aa"));
            store.store("b", Bytes::from_static(b"bbb"));
            store.close().await.unwrap();
            assert!(!store.store("c", Bytes::from_static(b"c")));
            assert_eq!(store.clear().await.unwrap_err().kind(), ErrorKind::Closed);
        }

        let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;
        assert_eq!(store.len(), 2);
        assert_eq!(store.size(), 5);
        assert_eq!(store.size_on_disk().await.unwrap(), 5);
        assert_eq!(store.load("b").await.as_deref(), Some(&b"bbb"[..]));

        // Entries written after the restart are younger than the loaded ones.
        store.store("c", Bytes::from_static(b"c"));
        let ledger = store.inner.atlas.ledger();
        let newest = ledger.entries().iter().map(|e| e.last_touched()).max().unwrap();
        assert_eq!(ledger.get("c").unwrap().last_touched(), newest);
    }

    #[test_log::test(tokio::test)]
    async fn test_lowered_budget_evicts_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;
            for i in 0..4 {
                store.store(&format!("k{i}"), Bytes::from(vec![0u8; 100]));
            }
            store.close().await.unwrap();
        }

        let store = open(dir.path(), 300, WritePolicy::FirstWins).await;
        assert_eq!(store.len(), 2);
        assert!(store.contains("k2") && store.contains("k3"));
    }

    #[test_log::test(tokio::test)]
    async fn test_eviction_converges_to_budget() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;
            for i in 0..10 {
                store.store(&format!("k{i}"), Bytes::from(vec![0u8; 100]));
            }
            store.close().await.unwrap();
        }

        let store = builder(dir.path(), 100)
            .with_unload_rate(UnloadRate::new(0.3).unwrap())
            .build(ExtensionLayout::new("png"), WritePolicy::FirstWins)
            .await
            .unwrap();
        // Opening already ran one pass over the ten entries.
        assert_eq!(store.size(), 700);

        let mut passes = 0;
        while store.size() > store.capacity() {
            let before = store.size();
            assert!(store.evict_if_over_budget() > 0);
            assert!(store.size() < before);
            passes += 1;
            assert!(passes < 10, "eviction does not converge");
        }
        assert_eq!(store.size(), 100);
        assert_eq!(store.evict_if_over_budget(), 0);
        assert!(store.contains("k9"));

        store.wait().await;
        for i in 0..9 {
            assert!(!store.path(&format!("k{i}")).exists());
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_future_atlas_timestamp_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = Ledger::from_entries([CacheEntry::new("a", 1, i64::MAX)]);
        std::fs::write(dir.path().join(DEFAULT_ATLAS_FILE_NAME), encode(&garbage)).unwrap();

        let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;
        assert!(store.is_empty());
        assert!(store.store("b", Bytes::from_static(b"b")));
        assert!(store.store("c", Bytes::from_static(b"c")));
        let ledger = store.inner.atlas.ledger();
        assert!(ledger.get("b").unwrap().last_touched() < ledger.get("c").unwrap().last_touched());
    }

    #[test_log::test(tokio::test)]
    async fn test_dropped_overwrite_keeps_previous_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = builder(dir.path(), 1024 * KB)
            .with_submit_queue_size(1)
            .build(ExtensionLayout::new("bin"), WritePolicy::Overwrite)
            .await
            .unwrap();

        assert!(store.store("k", Bytes::from_static(b"v1")));
        store.wait().await;

        // No await in between: the runner cannot drain the single slot taken by v2.
        assert!(store.store("k", Bytes::from_static(b"v2-longer")));
        assert!(!store.store("k", Bytes::from_static(b"v3")));

        assert!(store.contains("k"));
        assert_eq!(store.size(), 9);
        assert_eq!(store.load("k").await.as_deref(), Some(&b"v2-longer"[..]));
        assert!(store.statistics().snapshot().dropped_submissions >= 1);

        store.wait().await;
        assert_eq!(std::fs::read(store.path("k")).unwrap(), b"v2-longer");
        assert_eq!(store.load("k").await.as_deref(), Some(&b"v2-longer"[..]));
    }

    #[test_log::test(tokio::test)]
    async fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("custom");
        std::fs::create_dir_all(&keep).unwrap();
        let store = builder(dir.path(), 1024 * KB)
            .with_preserved_path(&keep)
            .build(ExtensionLayout::new("png"), WritePolicy::FirstWins)
            .await
            .unwrap();

        store.store("a/1", Bytes::from_static(b"1"));
        store.store("a/2", Bytes::from_static(b"2"));
        store.wait().await;

        assert!(store.remove("a/1"));
        assert!(!store.remove("a/1"));
        store.wait().await;
        assert!(!store.path("a/1").exists());
        assert_eq!(store.size(), 1);

        // An orphan nobody indexed.
        std::fs::write(dir.path().join("orphan.png"), b"x").unwrap();
        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert!(!store.path("a/2").exists());
        assert!(!dir.path().join("orphan.png").exists());
        assert!(keep.exists());
        assert_eq!(Atlas::peek_total_size(store.atlas_path()).unwrap(), 0);
        assert!(store.atlas_path().exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_debounced_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 1024 * KB, WritePolicy::FirstWins).await;
        for i in 0..20 {
            store.store(&format!("k{i}"), Bytes::from_static(b"x"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.wait().await;

        assert_eq!(store.statistics().snapshot().atlas_saves, 1);
        assert_eq!(Atlas::peek_total_size(store.atlas_path()).unwrap(), 20);
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_options() {
        let dir = tempfile::tempdir().unwrap();
        let err = builder(dir.path(), 1)
            .with_submit_queue_size(0)
            .build(EncodedLayout, WritePolicy::Overwrite)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_layouts() {
        let root = Path::new("/cache");
        assert_eq!(ExtensionLayout::new(".png").path(root, "osm/1/2/3"), root.join("osm/1/2/3.png"));
        assert_eq!(ExtensionLayout::new("").path(root, "osm/1"), root.join("osm/1"));
        assert_eq!(EncodedLayout.path(root, "../etc/passwd"), root.join("..%2Fetc%2Fpasswd.bin"));
    }
}

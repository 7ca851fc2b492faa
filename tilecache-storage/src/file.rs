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

use std::{future::Future, path::PathBuf, sync::Arc};

use bytes::Bytes;
use tilecache_common::error::Result;

use crate::{
    store::{ExtensionLayout, Store, StoreBuilder, WritePolicy},
    template::PathTemplate,
    tile::TileKey,
};

/// The File Tier: encoded tiles stored as `root/<short path>.<extension>`.
///
/// The short path is rendered from a [`PathTemplate`] and is the atlas key. The first write of a short path wins
/// unless another [`WritePolicy`] is configured.
#[derive(Debug, Clone)]
pub struct FileStore {
    store: Store,
    template: Arc<PathTemplate>,
}

impl FileStore {
    /// The short path of `tile`.
    pub fn short_path(&self, tile: &TileKey) -> String {
        self.template.render(tile)
    }

    /// The payload file of `tile`.
    pub fn path(&self, tile: &TileKey) -> PathBuf {
        self.store.path(&self.short_path(tile))
    }

    /// The path template.
    pub fn template(&self) -> &PathTemplate {
        &self.template
    }

    /// Whether `tile` is indexed.
    pub fn contains(&self, tile: &TileKey) -> bool {
        self.store.contains(&self.short_path(tile))
    }

    /// Read the encoded bytes of `tile`.
    pub async fn load(&self, tile: &TileKey) -> Option<Bytes> {
        self.store.load(&self.short_path(tile)).await
    }

    /// Persist the encoded bytes of `tile`. See [`Store::store`].
    pub fn store(&self, tile: &TileKey, data: Bytes) -> bool {
        self.store.store(&self.short_path(tile), data)
    }

    /// Drop `tile` and its file.
    pub fn remove(&self, tile: &TileKey) -> bool {
        self.store.remove(&self.short_path(tile))
    }

    /// See [`Store::evict_if_over_budget`].
    pub fn evict_if_over_budget(&self) -> usize {
        self.store.evict_if_over_budget()
    }

    /// See [`Store::flush`].
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }

    /// See [`Store::wait`].
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        self.store.wait()
    }

    /// See [`Store::clear`].
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    /// See [`Store::close`].
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    /// The underlying store, for size queries and statistics.
    pub fn store_ref(&self) -> &Store {
        &self.store
    }
}

/// Builder of [`FileStore`].
#[derive(Debug, Clone)]
pub struct FileStoreBuilder {
    builder: StoreBuilder,
    template: PathTemplate,
    extension: String,
}

impl FileStoreBuilder {
    /// Create a builder from the shared store options.
    pub fn new(builder: StoreBuilder) -> Self {
        Self {
            builder,
            template: PathTemplate::default(),
            extension: "png".to_string(),
        }
    }

    /// Set the path template.
    ///
    /// Default: `{pid}/{mid}/{zoom}/{x}/{y}`.
    pub fn with_path_template(mut self, template: PathTemplate) -> Self {
        self.template = template;
        self
    }

    /// Set the payload file extension.
    ///
    /// Default: `png`.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Open the File Tier.
    pub async fn build(self) -> Result<FileStore> {
        let store = self
            .builder
            .build(ExtensionLayout::new(self.extension), WritePolicy::FirstWins)
            .await?;
        Ok(FileStore {
            store,
            template: Arc::new(self.template),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn test_template_paths() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileStoreBuilder::new(StoreBuilder::new("file", dir.path(), 1 << 20))
            .with_path_template(PathTemplate::new("{pid}/{quad}").unwrap())
            .with_extension("jpg")
            .build()
            .await
            .unwrap();

        let tile = TileKey::new("bing", "aerial", 2, 3, 3);
        assert_eq!(files.short_path(&tile), "bing/33");
        assert!(files.store(&tile, Bytes::from_static(b"jpeg")));
        assert!(!files.store(&tile, Bytes::from_static(b"other")));
        files.wait().await;

        assert_eq!(files.path(&tile), dir.path().join("bing/33.jpg"));
        assert_eq!(std::fs::read(files.path(&tile)).unwrap(), b"jpeg");
        assert!(files.contains(&tile));
        assert_eq!(files.load(&tile).await.as_deref(), Some(&b"jpeg"[..]));

        // Fields the template ignores map to the same file.
        let same = tile.clone().with_language("fr");
        assert_eq!(files.load(&same).await.as_deref(), Some(&b"jpeg"[..]));

        assert!(files.remove(&tile));
        assert!(files.load(&tile).await.is_none());
        files.close().await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_payloads_stay_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("cache");
        let files = FileStoreBuilder::new(StoreBuilder::new("file", root.clone(), 1 << 20))
            .with_path_template(PathTemplate::new("{pid}/{x}").unwrap())
            .build()
            .await
            .unwrap();

        let tile = TileKey::new("../../escape", "mapnik", 1, 3, 0);
        assert!(files.store(&tile, Bytes::from_static(b"x")));
        files.wait().await;

        let path = files.path(&tile);
        assert_eq!(path, root.join("escape").join("3.png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"x");
        assert!(!dir.path().join("escape").exists());
        files.close().await.unwrap();
    }
}

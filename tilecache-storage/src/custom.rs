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

use std::{fmt::Debug, future::Future, path::PathBuf, sync::Arc};

use bytes::Bytes;
use tilecache_common::error::Result;

use crate::store::{EncodedLayout, Store, StoreBuilder, WritePolicy};

/// Override hook consulted by [`CustomStore::get`] before the local copy.
///
/// Returning `None` declines and falls back to the local files.
pub trait ExternalLoader: Fn(&str) -> Option<Bytes> + Send + Sync + 'static {}
impl<T> ExternalLoader for T where T: Fn(&str) -> Option<Bytes> + Send + Sync + 'static {}

/// The Custom Tier: arbitrary caller keys mapped to flat, percent-encoded file names.
///
/// Overwrites an existing key by default.
#[derive(Clone)]
pub struct CustomStore {
    store: Store,
    loader: Option<Arc<dyn ExternalLoader>>,
}

impl Debug for CustomStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomStore")
            .field("store", &self.store)
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

impl CustomStore {
    /// Get the bytes of `key`, asking the external loader first if one is installed.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(loader) = self.loader.as_ref() {
            if let Some(data) = loader(key) {
                tracing::trace!(key, "[custom store]: served by external loader");
                return Some(data);
            }
        }
        self.store.load(key).await
    }

    /// Store `data` under `key`. See [`Store::store`].
    pub fn add(&self, key: &str, data: Bytes) -> bool {
        self.store.store(key, data)
    }

    /// Whether a local copy of `key` is indexed.
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// The file holding the local copy of `key`.
    pub fn path(&self, key: &str) -> PathBuf {
        self.store.path(key)
    }

    /// Drop the local copy of `key`.
    pub fn remove(&self, key: &str) -> bool {
        self.store.remove(key)
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

/// Builder of [`CustomStore`].
pub struct CustomStoreBuilder {
    builder: StoreBuilder,
    loader: Option<Arc<dyn ExternalLoader>>,
}

impl CustomStoreBuilder {
    /// Create a builder from the shared store options.
    pub fn new(builder: StoreBuilder) -> Self {
        Self { builder, loader: None }
    }

    /// Install an external loader.
    ///
    /// Default: none, every lookup goes to the local files.
    pub fn with_external_loader(mut self, loader: impl ExternalLoader) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Open the Custom Tier.
    pub async fn build(self) -> Result<CustomStore> {
        let store = self.builder.build(EncodedLayout, WritePolicy::Overwrite).await?;
        Ok(CustomStore {
            store,
            loader: self.loader,
        })
    }
}

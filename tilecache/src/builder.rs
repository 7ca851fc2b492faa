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
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use tilecache_common::{clock::Clock, error::Result, event::EventListener};
use tilecache_memory::MemoryCacheBuilder;
use tilecache_storage::{CustomStoreBuilder, ExternalLoader, FileStoreBuilder, Runtime, StoreBuilder};

use crate::{
    cache::{TileCache, TileCacheInner},
    config::CacheConfig,
};

/// Builder of [`TileCache`].
///
/// Tuning comes from a [`CacheConfig`], hooks that cannot be serialized are set here.
pub struct TileCacheBuilder {
    config: CacheConfig,
    event_listener: Option<Arc<dyn EventListener<Value = Bytes>>>,
    external_loader: Option<Arc<dyn ExternalLoader>>,
}

impl Default for TileCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCacheBuilder {
    /// Create a builder with the default config.
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    /// Create a builder from `config`.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            event_listener: None,
            external_loader: None,
        }
    }

    /// Set event listener of the Memory Tier.
    ///
    /// Default: No event listener installed.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener<Value = Bytes>>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Set the external loader of the Custom Tier.
    ///
    /// Default: none.
    pub fn with_external_loader(mut self, loader: impl ExternalLoader) -> Self {
        self.external_loader = Some(Arc::new(loader));
        self
    }

    /// Validate the config and open the enabled tiers.
    ///
    /// Must be called within a tokio runtime.
    pub async fn build(self) -> Result<TileCache> {
        let config = self.config;
        config.validate()?;

        let clock = Arc::new(Clock::new());

        let memory = if config.use_memory_cache {
            let mut builder = MemoryCacheBuilder::new(config.memory_capacity())
                .with_unload_rate(config.memory_unload_rate()?)
                .with_weighter(|_: &str, data: &Bytes| data.len())
                .with_clock(clock.clone());
            if let Some(event_listener) = self.event_listener {
                builder = builder.with_event_listener(event_listener);
            }
            Some(builder.build())
        } else {
            None
        };

        let runtime = if config.use_file_cache || config.use_custom_cache {
            Some(Runtime::build(&config.runtime, "tilecache")?)
        } else {
            None
        };
        let store_builder = |name: &str, root: PathBuf, capacity: usize| {
            let builder = StoreBuilder::new(name, root, capacity)
                .with_flush_debounce(Duration::from_millis(config.flush_debounce_ms))
                .with_submit_queue_size(config.submit_queue_size)
                .with_clock(clock.clone());
            match runtime.as_ref() {
                Some(runtime) => builder.with_runtime(runtime.clone()),
                None => builder,
            }
        };

        let custom_root = config.custom_root();

        let file = if config.use_file_cache {
            let mut builder = store_builder("file", config.file_cache_root.clone(), config.file_capacity())
                .with_unload_rate(config.file_unload_rate()?);
            if config.use_custom_cache {
                if let Some(child) = nested_child(&config.file_cache_root, &custom_root) {
                    builder = builder.with_preserved_path(child);
                }
            }
            let file = FileStoreBuilder::new(builder)
                .with_path_template(config.path_template()?)
                .with_extension(config.file_extension.as_str())
                .build()
                .await?;
            Some(file)
        } else {
            None
        };

        let custom = if config.use_custom_cache {
            let builder = store_builder("custom", custom_root, config.custom_capacity())
                .with_unload_rate(config.custom_unload_rate()?)
                .with_write_policy(config.custom_write_policy);
            let mut builder = CustomStoreBuilder::new(builder);
            if let Some(loader) = self.external_loader {
                builder = builder.with_external_loader(move |key: &str| loader(key));
            }
            Some(builder.build().await?)
        } else {
            None
        };

        tracing::info!(
            memory = memory.is_some(),
            file = file.is_some(),
            custom = custom.is_some(),
            "[tilecache]: cache built"
        );

        Ok(TileCache::new(TileCacheInner { memory, file, custom }))
    }
}

/// The direct child of `parent` on the way to `nested`, if `nested` lies strictly below `parent`.
fn nested_child(parent: &Path, nested: &Path) -> Option<PathBuf> {
    let rest = nested.strip_prefix(parent).ok()?;
    match rest.components().next()? {
        Component::Normal(name) => Some(parent.join(name)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_child() {
        let root = Path::new("/cache/tiles");
        assert_eq!(
            nested_child(root, Path::new("/cache/tiles/custom/blobs")),
            Some(PathBuf::from("/cache/tiles/custom"))
        );
        assert_eq!(nested_child(root, Path::new("/cache/blobs")), None);
        assert_eq!(nested_child(root, root), None);
    }
}

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

pub use crate::{
    builder::TileCacheBuilder,
    cache::{CacheStatistics, Tier, TileCache},
    config::CacheConfig,
};
pub use tilecache_common::{
    clock::Clock,
    error::{Error, ErrorKind, Result},
    event::{Event, EventListener},
    ledger::{CacheEntry, Ledger},
    rate::UnloadRate,
    statistics::{Statistics, StatisticsSnapshot},
};
pub use tilecache_memory::{MemoryCache, MemoryCacheBuilder, PinGuard, PinnedEntry, Weighter};
pub use tilecache_storage::{
    Atlas, CustomStore, CustomStoreBuilder, ExternalLoader, FileStore, FileStoreBuilder, PathTemplate, RuntimeOptions,
    Store, StoreBuilder, TileKey, TokioRuntimeOptions, WritePolicy,
};

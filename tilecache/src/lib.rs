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

//! tilecache: a tiered tile and blob cache.
//!
//! - The Memory Tier keeps payloads in process, bounded by size, with RAII pins that exempt in-use entries from
//!   eviction.
//! - The File Tier persists fetched tiles under a path template, indexed by a compact binary atlas that survives
//!   restarts.
//! - The Custom Tier stores arbitrary caller blobs with the same atlas and eviction mechanics.
//!
//! All three are reached through [`TileCache`], built from a [`CacheConfig`] by a [`TileCacheBuilder`].

mod builder;
mod cache;
mod config;

mod prelude;
pub use prelude::*;

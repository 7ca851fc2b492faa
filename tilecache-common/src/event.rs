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

/// Why an entry left a cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Unloaded by an eviction pass.
    Evict,
    /// Replaced by an insertion with the same key.
    Replace,
    /// Removed explicitly.
    Remove,
    /// Dropped by a full clear.
    Clear,
}

/// Trait for the customized event listener.
///
/// Tile consumers use it to dispose decoded resources (textures, meshes) when the memory tier lets go of them.
pub trait EventListener: Send + Sync + 'static {
    /// Associated value type.
    type Value;

    /// Called when a cache entry leaves the tier with the reason.
    ///
    /// Never called while the tier lock is held.
    #[expect(unused_variables)]
    fn on_leave(&self, reason: Event, key: &str, value: &Self::Value) {}
}

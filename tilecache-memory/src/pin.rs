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

use std::{fmt::Debug, ops::Deref, sync::Arc};

use crate::cache::Inner;

struct Pinned<V> {
    inner: Arc<Inner<V>>,
    key: String,
    id: u64,
}

/// Keeps a memory tier entry out of eviction until dropped.
///
/// Dropping the guard releases exactly one pin. If the entry has been removed or cleared meanwhile, the release
/// does nothing, even if an entry with the same key was inserted again.
#[must_use = "the pin is released as soon as the guard is dropped"]
pub struct PinGuard<V> {
    pinned: Option<Pinned<V>>,
}

impl<V> Debug for PinGuard<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinGuard")
            .field("key", &self.pinned.as_ref().map(|p| p.key.as_str()))
            .finish()
    }
}

impl<V> PinGuard<V> {
    pub(crate) fn new(inner: Arc<Inner<V>>, key: String, id: u64) -> Self {
        Self {
            pinned: Some(Pinned { inner, key, id }),
        }
    }

    pub(crate) fn noop() -> Self {
        Self { pinned: None }
    }

    /// Whether the guard holds a pin. `false` if the key was not resident when pinning.
    pub fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }

    /// The pinned key, if any.
    pub fn key(&self) -> Option<&str> {
        self.pinned.as_ref().map(|p| p.key.as_str())
    }
}

impl<V> Drop for PinGuard<V> {
    fn drop(&mut self) {
        if let Some(pinned) = self.pinned.take() {
            pinned.inner.unpin(&pinned.key, pinned.id);
        }
    }
}

/// A payload returned together with the pin that protects its entry.
pub struct PinnedEntry<V> {
    value: Arc<V>,
    guard: PinGuard<V>,
}

impl<V> Debug for PinnedEntry<V>
where
    V: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedEntry")
            .field("key", &self.guard.key())
            .field("value", &self.value)
            .finish()
    }
}

impl<V> Deref for PinnedEntry<V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<V> PinnedEntry<V> {
    pub(crate) fn new(value: Arc<V>, guard: PinGuard<V>) -> Self {
        Self { value, guard }
    }

    /// The shared payload.
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }

    /// Split into the payload and the guard, e.g. to keep the pin while handing the payload elsewhere.
    pub fn into_parts(self) -> (Arc<V>, PinGuard<V>) {
        (self.value, self.guard)
    }
}

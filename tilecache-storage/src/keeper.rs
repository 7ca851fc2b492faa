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

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::Mutex;

/// Holds payloads whose file write is still queued, so lookups can be served before the write lands on disk.
#[derive(Debug, Default)]
pub struct Keeper {
    pieces: Mutex<HashMap<String, Bytes>>,
}

impl Keeper {
    /// Keep `data` for `key` until it is released, replacing an older piece.
    pub fn insert(&self, key: impl Into<String>, data: Bytes) {
        self.pieces.lock().insert(key.into(), data);
    }

    /// Get the kept piece of `key`.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.pieces.lock().get(key).cloned()
    }

    /// Drop the piece of `key` unconditionally.
    pub fn remove(&self, key: &str) {
        self.pieces.lock().remove(key);
    }

    /// Drop the piece of `key` once `data` has been written, unless a newer piece replaced it meanwhile.
    pub fn release(&self, key: &str, data: &Bytes) {
        let mut pieces = self.pieces.lock();
        if pieces
            .get(key)
            .is_some_and(|kept| kept.as_ptr() == data.as_ptr() && kept.len() == data.len())
        {
            pieces.remove(key);
        }
    }

    /// Drop every piece.
    pub fn clear(&self) {
        self.pieces.lock().clear();
    }

    /// Number of kept pieces.
    pub fn len(&self) -> usize {
        self.pieces.lock().len()
    }

    /// Whether no piece is kept.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_keeps_newer_piece() {
        let keeper = Keeper::default();
        let old = Bytes::from_static(b"old");
        let new = Bytes::from(b"new".to_vec());

        keeper.insert("k", old.clone());
        keeper.insert("k", new.clone());
        keeper.release("k", &old);
        assert_eq!(keeper.get("k"), Some(new.clone()));

        keeper.release("k", &new);
        assert!(keeper.is_empty());
    }
}

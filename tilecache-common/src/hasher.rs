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

use twox_hash::XxHash32;

const KEY_HASH_SEED: u32 = 0;

/// Stable 32-bit hash of a cache key.
///
/// The hash is only a fast pre-check before comparing key strings. It is recomputed when a persisted index is
/// loaded, so it must not depend on per-process state.
pub fn key_hash(key: &str) -> i32 {
    XxHash32::oneshot(KEY_HASH_SEED, key.as_bytes()) as i32
}

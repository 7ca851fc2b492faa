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

//! The persistent tiers of tilecache: the atlas format, the single-writer I/O queue, the File Tier and the Custom
//! Tier.

mod atlas;
mod custom;
mod file;
mod flusher;
mod keeper;
mod runtime;
mod store;
mod template;
mod tile;

mod prelude;
pub use prelude::*;

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
    atlas::{decode, encode, Atlas, AtlasHeader},
    custom::{CustomStore, CustomStoreBuilder, ExternalLoader},
    file::{FileStore, FileStoreBuilder},
    flusher::{FlushScheduler, Flusher, Submission},
    keeper::Keeper,
    runtime::{Runtime, RuntimeOptions, TokioRuntimeOptions},
    store::{EncodedLayout, ExtensionLayout, Layout, Store, StoreBuilder, WritePolicy, DEFAULT_ATLAS_FILE_NAME},
    template::{PathTemplate, DEFAULT_PATH_TEMPLATE},
    tile::TileKey,
};

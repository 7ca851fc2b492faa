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

//! Shared components for tilecache.

/// Assertion macros.
pub mod assert;
/// Blocking work on a runtime's blocking pool.
pub mod asyncify;
/// Monotonic timestamps.
pub mod clock;
/// The tilecache error type.
pub mod error;
/// Cache event listener.
pub mod event;
/// Key hashing.
pub mod hasher;
/// Entry ledger shared by all tiers.
pub mod ledger;
/// Eviction fraction.
pub mod rate;
/// Runtime wrappers.
pub mod runtime;
/// Tier counters.
pub mod statistics;

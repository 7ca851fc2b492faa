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

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tilecache_common::{
    error::{Error, Result},
    rate::UnloadRate,
};
use tilecache_storage::{PathTemplate, RuntimeOptions, WritePolicy, DEFAULT_PATH_TEMPLATE};

const MB: usize = 1024 * 1024;

/// Recognized options of a [`crate::TileCache`].
///
/// Every field has a default, so a TOML file only needs the options it changes:
///
/// ```toml
/// max_file_cache_mb = 512
/// file_cache_root = "/var/cache/tiles"
/// file_path_template = "{pid}/{mid}/{z}/{quad}"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether decoded tiles are kept in memory.
    pub use_memory_cache: bool,
    /// Memory Tier budget in MiB.
    pub max_memory_cache_mb: usize,
    /// Fraction of Memory Tier entries unloaded when over budget, in `(0, 1]`.
    pub memory_unload_rate: f64,

    /// Whether fetched tiles are persisted.
    pub use_file_cache: bool,
    /// File Tier budget in MiB.
    pub max_file_cache_mb: usize,
    /// Fraction of File Tier entries unloaded when over budget, in `(0, 1]`.
    pub file_unload_rate: f64,
    /// File Tier root directory.
    pub file_cache_root: PathBuf,
    /// Template of the File Tier short paths.
    pub file_path_template: String,
    /// Extension of the File Tier files, without the dot.
    pub file_extension: String,

    /// Whether the Custom Tier is available.
    pub use_custom_cache: bool,
    /// Custom Tier budget in MiB.
    pub max_custom_cache_mb: usize,
    /// Fraction of Custom Tier entries unloaded when over budget, in `(0, 1]`.
    pub custom_unload_rate: f64,
    /// Custom Tier root directory. Defaults to `custom` under the File Tier root.
    pub custom_cache_root: Option<PathBuf>,
    /// What a second write of a Custom Tier key does.
    pub custom_write_policy: WritePolicy,

    /// Window in which atlas saves are coalesced, in milliseconds.
    pub flush_debounce_ms: u64,
    /// Capacity of each persistent tier's I/O queue.
    pub submit_queue_size: usize,
    /// Where disk I/O runs.
    pub runtime: RuntimeOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_memory_cache: true,
            max_memory_cache_mb: 10,
            memory_unload_rate: 0.3,
            use_file_cache: true,
            max_file_cache_mb: 100,
            file_unload_rate: 0.3,
            file_cache_root: PathBuf::from("tilecache"),
            file_path_template: DEFAULT_PATH_TEMPLATE.to_string(),
            file_extension: "png".to_string(),
            use_custom_cache: true,
            max_custom_cache_mb: 20,
            custom_unload_rate: 0.3,
            custom_cache_root: None,
            custom_write_policy: WritePolicy::Overwrite,
            flush_debounce_ms: 1000,
            submit_queue_size: 1024,
            runtime: RuntimeOptions::Disabled,
        }
    }
}

impl CacheConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::parse("invalid cache config").with_source(e))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|e| Error::from(e).with_context("path", path.display()))?;
        Self::from_toml_str(&s).map_err(|e| e.with_context("path", path.display()))
    }

    /// Reject options that would evict everything or nothing, or that cannot work at all.
    pub fn validate(&self) -> Result<()> {
        self.memory_unload_rate()?;
        self.file_unload_rate()?;
        self.custom_unload_rate()?;
        self.path_template()?;
        if self.submit_queue_size == 0 {
            return Err(Error::config("submit queue size must be positive"));
        }
        if self.use_file_cache && self.use_custom_cache {
            // Each tier owns its directory and atlas. Only the custom root may nest inside the file root, which
            // preserves it on clear.
            let custom_root = self.custom_root();
            if self.file_cache_root.starts_with(&custom_root) {
                return Err(Error::config("file and custom tiers must not share a directory")
                    .with_context("file_cache_root", self.file_cache_root.display())
                    .with_context("custom_cache_root", custom_root.display()));
            }
        }
        Ok(())
    }

    /// Memory Tier budget in bytes.
    pub fn memory_capacity(&self) -> usize {
        self.max_memory_cache_mb.saturating_mul(MB)
    }

    /// File Tier budget in bytes.
    pub fn file_capacity(&self) -> usize {
        self.max_file_cache_mb.saturating_mul(MB)
    }

    /// Custom Tier budget in bytes.
    pub fn custom_capacity(&self) -> usize {
        self.max_custom_cache_mb.saturating_mul(MB)
    }

    /// Validated Memory Tier unload rate.
    pub fn memory_unload_rate(&self) -> Result<UnloadRate> {
        UnloadRate::new(self.memory_unload_rate).map_err(|e| e.with_context("option", "memory_unload_rate"))
    }

    /// Validated File Tier unload rate.
    pub fn file_unload_rate(&self) -> Result<UnloadRate> {
        UnloadRate::new(self.file_unload_rate).map_err(|e| e.with_context("option", "file_unload_rate"))
    }

    /// Validated Custom Tier unload rate.
    pub fn custom_unload_rate(&self) -> Result<UnloadRate> {
        UnloadRate::new(self.custom_unload_rate).map_err(|e| e.with_context("option", "custom_unload_rate"))
    }

    /// Parsed File Tier path template.
    pub fn path_template(&self) -> Result<PathTemplate> {
        PathTemplate::new(self.file_path_template.as_str()).map_err(|e| e.with_context("option", "file_path_template"))
    }

    /// Custom Tier root, falling back to `custom` under the File Tier root.
    pub fn custom_root(&self) -> PathBuf {
        self.custom_cache_root
            .clone()
            .unwrap_or_else(|| self.file_cache_root.join("custom"))
    }
}

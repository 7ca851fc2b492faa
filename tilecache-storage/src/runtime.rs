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

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tilecache_common::{
    error::{Error, ErrorKind, Result},
    runtime::{BackgroundShutdownRuntime, SingletonHandle},
};
use tokio::runtime::Handle;

/// Tokio runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokioRuntimeOptions {
    /// Dedicated runtime worker threads.
    ///
    /// If the value is set to `0`, tokio's default (one worker per core) is used.
    pub worker_threads: usize,

    /// Max threads to run blocking filesystem calls.
    ///
    /// If the value is set to `0`, tokio's default (512) is used.
    pub max_blocking_threads: usize,
}

/// Where the persistent tiers run their disk I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeOptions {
    /// Run on the runtime the cache is built on.
    #[default]
    Disabled,
    /// Use one dedicated runtime for reads and writes.
    Unified(TokioRuntimeOptions),
    /// Use separated dedicated runtimes for reads and writes.
    Separated {
        /// Dedicated runtime for lookups.
        read_runtime_options: TokioRuntimeOptions,
        /// Dedicated runtime for file writes, deletes and atlas saves.
        write_runtime_options: TokioRuntimeOptions,
    },
}

#[derive(Debug)]
struct RuntimeInner {
    _read_runtime: Option<Arc<BackgroundShutdownRuntime>>,
    _write_runtime: Option<Arc<BackgroundShutdownRuntime>>,

    read_runtime_handle: SingletonHandle,
    write_runtime_handle: SingletonHandle,
}

/// [`Runtime`] holds the runtime references and non-cloneable handles to prevent handle usage after shutdown.
///
/// Cloning is cheap: all persistent tiers of one cache share the same runtimes.
#[derive(Debug, Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the dedicated runtimes if given, falling back to `user_runtime_handle`.
    pub fn new(
        read_runtime: Option<Arc<BackgroundShutdownRuntime>>,
        write_runtime: Option<Arc<BackgroundShutdownRuntime>>,
        user_runtime_handle: Handle,
    ) -> Self {
        let read_runtime_handle = read_runtime
            .as_ref()
            .map(|rt| rt.handle().clone())
            .unwrap_or(user_runtime_handle.clone());
        let write_runtime_handle = write_runtime
            .as_ref()
            .map(|rt| rt.handle().clone())
            .unwrap_or(user_runtime_handle);
        Self {
            inner: Arc::new(RuntimeInner {
                _read_runtime: read_runtime,
                _write_runtime: write_runtime,
                read_runtime_handle: read_runtime_handle.into(),
                write_runtime_handle: write_runtime_handle.into(),
            }),
        }
    }

    /// Create a runtime on the current tokio runtime only.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(None, None, Handle::current())
    }

    /// Build the runtimes selected by `options`. Dedicated threads are named after `name`.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(options: &RuntimeOptions, name: &str) -> Result<Self> {
        let build_runtime = |options: &TokioRuntimeOptions, suffix: &str| {
            let mut builder = tokio::runtime::Builder::new_multi_thread();
            if options.worker_threads != 0 {
                builder.worker_threads(options.worker_threads);
            }
            if options.max_blocking_threads != 0 {
                builder.max_blocking_threads(options.max_blocking_threads);
            }
            builder.thread_name(format!("{name}-{suffix}"));
            let runtime = builder
                .enable_all()
                .build()
                .map_err(|e| Error::new(ErrorKind::Io, "failed to build dedicated runtime").with_source(e))?;
            Ok::<_, Error>(Arc::new(BackgroundShutdownRuntime::from(runtime)))
        };

        let user_runtime_handle = Handle::try_current()
            .map_err(|e| Error::config("persistent tiers must be built within a tokio runtime").with_source(e))?;
        let (read_runtime, write_runtime) = match options {
            RuntimeOptions::Disabled => {
                tracing::info!("[runtime]: Dedicated runtime is disabled, disk I/O runs on the caller's runtime.");
                (None, None)
            }
            RuntimeOptions::Unified(options) => {
                let runtime = build_runtime(options, "unified")?;
                (Some(runtime.clone()), Some(runtime))
            }
            RuntimeOptions::Separated {
                read_runtime_options,
                write_runtime_options,
            } => {
                let read_runtime = build_runtime(read_runtime_options, "read")?;
                let write_runtime = build_runtime(write_runtime_options, "write")?;
                (Some(read_runtime), Some(write_runtime))
            }
        };
        Ok(Self::new(read_runtime, write_runtime, user_runtime_handle))
    }

    /// Get the non-cloneable read runtime handle.
    pub fn read(&self) -> &SingletonHandle {
        &self.inner.read_runtime_handle
    }

    /// Get the non-cloneable write runtime handle.
    pub fn write(&self) -> &SingletonHandle {
        &self.inner.write_runtime_handle
    }
}

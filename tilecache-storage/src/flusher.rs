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

use std::{
    fmt::Debug,
    future::Future,
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use bytes::Bytes;
use tilecache_common::{
    asyncify::asyncify_with_runtime,
    error::{Error, Result},
    statistics::Statistics,
};
use tokio::sync::oneshot;

use crate::{atlas::Atlas, keeper::Keeper, runtime::Runtime};

/// Max submissions handled by one blocking call of the runner.
const BATCH_SIZE: usize = 64;

/// A unit of disk work for the single writer of a persistent tier.
pub enum Submission {
    /// Write a payload file, creating parent directories.
    Write {
        /// Atlas key of the payload.
        key: String,
        /// Destination file.
        path: PathBuf,
        /// Payload.
        data: Bytes,
    },
    /// Delete payload files. Missing files are ignored.
    Delete {
        /// Files to delete.
        paths: Vec<PathBuf>,
    },
    /// Write the atlas.
    Save {
        /// Notified with the outcome if set.
        tx: Option<oneshot::Sender<Result<()>>>,
    },
    /// Remove everything under `dir` except `preserve`.
    Purge {
        /// Directory to empty.
        dir: PathBuf,
        /// Direct children of `dir` to keep.
        preserve: Vec<PathBuf>,
    },
    /// Notified once every earlier submission is done.
    Wait {
        /// Barrier notifier.
        tx: oneshot::Sender<()>,
    },
}

impl Debug for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { key, path, data } => f
                .debug_struct("Write")
                .field("key", key)
                .field("path", path)
                .field("len", &data.len())
                .finish(),
            Self::Delete { paths } => f.debug_struct("Delete").field("paths", paths).finish(),
            Self::Save { .. } => f.debug_struct("Save").finish(),
            Self::Purge { dir, preserve } => f
                .debug_struct("Purge")
                .field("dir", dir)
                .field("preserve", preserve)
                .finish(),
            Self::Wait { .. } => f.debug_struct("Wait").finish(),
        }
    }
}

/// The sending half of the I/O queue of a persistent tier.
///
/// One runner task per tier consumes the queue in order, so writes to the tier directory and to its atlas never
/// interleave.
#[derive(Debug, Clone)]
pub struct Flusher {
    name: Arc<str>,
    tx: flume::Sender<Submission>,
    atlas: Arc<Atlas>,
    statistics: Arc<Statistics>,
}

impl Flusher {
    /// Create the queue and spawn its runner on the write runtime.
    pub fn open(
        name: impl Into<Arc<str>>,
        submit_queue_size: usize,
        atlas: Arc<Atlas>,
        keeper: Arc<Keeper>,
        statistics: Arc<Statistics>,
        runtime: &Runtime,
    ) -> Self {
        let name = name.into();
        let (tx, rx) = flume::bounded(submit_queue_size);

        let runner = Runner {
            name: name.clone(),
            rx,
            atlas: atlas.clone(),
            keeper,
            statistics: statistics.clone(),
            runtime: runtime.clone(),
        };
        runtime.write().spawn(runner.run());

        Self {
            name,
            tx,
            atlas,
            statistics,
        }
    }

    /// Enqueue without waiting. Returns `false` if the submission was dropped because the queue is full or closed.
    pub fn submit(&self, submission: Submission) -> bool {
        tracing::trace!(name = %self.name, "[flusher]: submit task: {submission:?}");
        match self.tx.try_send(submission) {
            Ok(()) => true,
            Err(e) => {
                let reason = match &e {
                    flume::TrySendError::Full(_) => "queue full",
                    flume::TrySendError::Disconnected(_) => "queue closed",
                };
                let submission = e.into_inner();
                tracing::warn!(name = %self.name, reason, "[flusher]: submission dropped: {submission:?}");
                self.statistics.dropped_submissions.fetch_add(1, Ordering::Relaxed);
                if let Submission::Save { .. } = submission {
                    self.atlas.clear_save_pending();
                }
                false
            }
        }
    }

    /// Enqueue, waiting for room in the queue.
    pub async fn submit_async(&self, submission: Submission) -> Result<()> {
        tracing::trace!(name = %self.name, "[flusher]: submit task: {submission:?}");
        self.tx
            .send_async(submission)
            .await
            .map_err(|_| Error::channel_closed("flusher").with_context("name", &self.name))
    }

    /// Write the atlas now, after every earlier submission.
    pub async fn save(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit_async(Submission::Save { tx: Some(tx) }).await?;
        rx.await
            .map_err(|_| Error::channel_closed("flusher").with_context("name", &self.name))?
    }

    /// Resolves once every submission made before the call is done.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = self.tx.clone();
        async move {
            let (wtx, wrx) = oneshot::channel();
            if tx.send_async(Submission::Wait { tx: wtx }).await.is_ok() {
                let _ = wrx.await;
            }
        }
    }
}

struct Runner {
    name: Arc<str>,
    rx: flume::Receiver<Submission>,
    atlas: Arc<Atlas>,
    keeper: Arc<Keeper>,
    statistics: Arc<Statistics>,
    runtime: Runtime,
}

impl Runner {
    async fn run(self) {
        while let Ok(submission) = self.rx.recv_async().await {
            let mut batch = Vec::with_capacity(BATCH_SIZE);
            batch.push(submission);
            while batch.len() < BATCH_SIZE {
                match self.rx.try_recv() {
                    Ok(submission) => batch.push(submission),
                    Err(_) => break,
                }
            }

            let name = self.name.clone();
            let atlas = self.atlas.clone();
            let keeper = self.keeper.clone();
            let statistics = self.statistics.clone();
            asyncify_with_runtime(self.runtime.write(), move || {
                for submission in batch {
                    Self::handle(&name, &atlas, &keeper, &statistics, submission);
                }
            })
            .await;
        }
        tracing::debug!(name = %self.name, "[flusher]: queue closed, runner exits");
    }

    fn handle(name: &str, atlas: &Atlas, keeper: &Keeper, statistics: &Statistics, submission: Submission) {
        match submission {
            Submission::Write { key, path, data } => {
                if let Err(e) = write_file(&path, &data) {
                    tracing::warn!(name, key = %key, path = %path.display(), "[flusher]: write failed: {e}");
                }
                keeper.release(&key, &data);
            }
            Submission::Delete { paths } => {
                for path in paths {
                    match std::fs::remove_file(&path) {
                        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                            tracing::warn!(name, path = %path.display(), "[flusher]: delete failed, file orphaned: {e}");
                        }
                        _ => {}
                    }
                }
            }
            Submission::Save { tx } => {
                let res = atlas.save();
                match &res {
                    Ok(()) => {
                        statistics.atlas_saves.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::error!(name, path = %atlas.path().display(), "[flusher]: atlas save failed: {e}");
                    }
                }
                if let Some(tx) = tx {
                    let _ = tx.send(res);
                }
            }
            Submission::Purge { dir, preserve } => {
                if let Err(e) = purge(&dir, &preserve) {
                    tracing::warn!(name, dir = %dir.display(), "[flusher]: purge failed: {e}");
                }
            }
            Submission::Wait { tx } => {
                let _ = tx.send(());
            }
        }
    }
}

fn write_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)
}

fn purge(dir: &Path, preserve: &[PathBuf]) -> std::io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if preserve.iter().any(|p| p == &path) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Coalesces atlas saves: after the first mutation, one save is submitted once the debounce window elapsed, no
/// matter how many mutations happen in between.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    debounce: Duration,
    flusher: Flusher,
    runtime: Runtime,
}

impl FlushScheduler {
    /// Create a scheduler submitting to `flusher`.
    pub fn new(debounce: Duration, flusher: Flusher, runtime: Runtime) -> Self {
        Self {
            debounce,
            flusher,
            runtime,
        }
    }

    /// Schedule an atlas save unless one is already pending.
    pub fn schedule(&self) {
        if !self.flusher.atlas.mark_save_pending() {
            return;
        }
        let flusher = self.flusher.clone();
        let debounce = self.debounce;
        self.runtime.write().spawn(async move {
            tokio::time::sleep(debounce).await;
            flusher.submit(Submission::Save { tx: None });
        });
    }
}

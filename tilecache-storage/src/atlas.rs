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

//! The atlas: the persisted index of one persistent tier.
//!
//! # Format
//!
//! All integers are little-endian.
//!
//! ```text
//! | 'T' | 'C' | version (i16) | total size (i32) | entry | entry | ... EOF
//!
//! entry:
//! | key len (7-bit varint) | key (utf-8) | size (i32) | last touched (i64) |
//! ```
//!
//! Files written without the magic start directly with the total size and are still accepted.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use tilecache_common::{
    clock::{Clock, TICKS_PER_SECOND},
    error::{Error, Result},
    ledger::{CacheEntry, Ledger},
};

const MAGIC: [u8; 2] = *b"TC";
const VERSION: i16 = 1;
const HEADER_LEN: usize = 2 + 2 + 4;
/// How far past the wall clock a persisted timestamp may lie before the atlas is considered corrupt.
const MAX_CLOCK_SKEW: i64 = 24 * 3600 * TICKS_PER_SECOND;

/// The header of an atlas file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasHeader {
    /// `None` for files written without the magic.
    pub version: Option<i16>,
    /// The total size recorded when the file was written.
    pub total_size: i32,
}

impl AtlasHeader {
    fn read(buf: &mut impl Buf) -> Result<Self> {
        let version = if buf.chunk().starts_with(&MAGIC) {
            buf.advance(MAGIC.len());
            ensure(buf, 2, "version")?;
            Some(buf.get_i16_le())
        } else {
            None
        };
        ensure(buf, 4, "total size")?;
        let total_size = buf.get_i32_le();
        Ok(Self { version, total_size })
    }
}

fn ensure(buf: &impl Buf, len: usize, field: &'static str) -> Result<()> {
    if buf.remaining() < len {
        return Err(Error::parse("atlas truncated")
            .with_context("field", field)
            .with_context("need", len)
            .with_context("remaining", buf.remaining()));
    }
    Ok(())
}

fn put_varint(buf: &mut impl BufMut, mut v: u32) {
    while v >= 0x80 {
        buf.put_u8(v as u8 | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

fn get_varint(buf: &mut impl Buf) -> Result<u32> {
    let mut v = 0u32;
    for shift in (0..35).step_by(7) {
        ensure(buf, 1, "key len")?;
        let byte = buf.get_u8();
        v |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(v);
        }
    }
    Err(Error::parse("malformed 7-bit encoded length"))
}

fn saturate(v: usize) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

/// Serialize a ledger into the atlas format.
pub fn encode(ledger: &Ledger) -> Bytes {
    let estimated = HEADER_LEN + ledger.entries().iter().map(|e| e.key().len() + 1 + 4 + 8).sum::<usize>();
    let mut buf = BytesMut::with_capacity(estimated);

    buf.put_slice(&MAGIC);
    buf.put_i16_le(VERSION);
    buf.put_i32_le(saturate(ledger.total_size()));

    for entry in ledger.entries() {
        put_varint(&mut buf, entry.key().len() as u32);
        buf.put_slice(entry.key().as_bytes());
        buf.put_i32_le(saturate(entry.size()));
        buf.put_i64_le(entry.last_touched());
    }

    buf.freeze()
}

/// Deserialize an atlas.
///
/// The total size is recomputed from the entries, the one recorded in the header is only used by
/// [`Atlas::peek_total_size`]. An entry touched more than a day past the wall clock is rejected as corrupt.
pub fn decode(mut buf: impl Buf) -> Result<Ledger> {
    if !buf.has_remaining() {
        return Ok(Ledger::new());
    }

    let header = AtlasHeader::read(&mut buf)?;
    if header.version.is_some_and(|v| v != VERSION) {
        tracing::debug!(version = header.version, "[atlas]: unknown version, read as version {VERSION}");
    }

    let horizon = Clock::wall().saturating_add(MAX_CLOCK_SKEW);
    let mut entries = vec![];
    while buf.has_remaining() {
        let len = get_varint(&mut buf)? as usize;
        ensure(&buf, len, "key")?;
        let mut key = vec![0; len];
        buf.copy_to_slice(&mut key);
        let key = String::from_utf8(key).map_err(|e| Error::parse("atlas key is not utf-8").with_source(e))?;

        ensure(&buf, 4 + 8, "entry")?;
        let size = buf.get_i32_le();
        let last_touched = buf.get_i64_le();
        let size = usize::try_from(size)
            .map_err(|e| Error::parse("negative entry size").with_context("key", &key).with_source(e))?;
        if last_touched > horizon {
            return Err(Error::parse("entry timestamp lies in the future")
                .with_context("key", &key)
                .with_context("last_touched", last_touched));
        }

        entries.push(CacheEntry::new(key, size, last_touched));
    }

    Ok(Ledger::from_entries(entries))
}

/// The ledger of one persistent tier together with the file it is persisted to.
#[derive(Debug)]
pub struct Atlas {
    path: PathBuf,
    ledger: Mutex<Ledger>,
    save_pending: AtomicBool,
}

impl Atlas {
    /// Create an atlas with an empty ledger.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_ledger(path, Ledger::new())
    }

    /// Create an atlas with the given ledger.
    pub fn with_ledger(path: impl Into<PathBuf>, ledger: Ledger) -> Self {
        Self {
            path: path.into(),
            ledger: Mutex::new(ledger),
            save_pending: AtomicBool::new(false),
        }
    }

    /// Load the atlas at `path`. Blocking.
    ///
    /// A missing, unreadable or corrupt file results in an empty ledger: the tier starts cold and rebuilds its
    /// index as payloads are written again.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ledger = match std::fs::read(&path) {
            Ok(data) => match decode(&data[..]) {
                Ok(ledger) => {
                    tracing::info!(
                        path = %path.display(),
                        entries = ledger.len(),
                        total_size = ledger.total_size(),
                        "[atlas]: atlas loaded"
                    );
                    ledger
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "[atlas]: corrupt atlas, start empty: {e}");
                    Ledger::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "[atlas]: no atlas found, start empty");
                Ledger::new()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "[atlas]: failed to read atlas, start empty: {e}");
                Ledger::new()
            }
        };
        Self::with_ledger(path, ledger)
    }

    /// Path of the atlas file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the ledger.
    pub fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock()
    }

    /// Encode the current ledger.
    pub fn snapshot(&self) -> Bytes {
        encode(&self.ledger.lock())
    }

    /// Write the current ledger to the atlas file. Blocking.
    ///
    /// Clears the pending-save flag before taking the snapshot, so mutations made while writing schedule another
    /// save. The file is replaced atomically through a temporary sibling.
    pub fn save(&self) -> Result<()> {
        self.save_pending.store(false, Ordering::Release);
        let data = self.snapshot();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::trace!(path = %self.path.display(), bytes = data.len(), "[atlas]: atlas saved");
        Ok(())
    }

    /// Mark a save as pending. Returns `true` if no save was pending before.
    pub fn mark_save_pending(&self) -> bool {
        !self.save_pending.swap(true, Ordering::AcqRel)
    }

    /// Give up a pending save without writing, e.g. when its submission was dropped.
    pub fn clear_save_pending(&self) {
        self.save_pending.store(false, Ordering::Release);
    }

    /// Whether a save is pending.
    pub fn is_save_pending(&self) -> bool {
        self.save_pending.load(Ordering::Acquire)
    }

    /// Read the total size recorded in the header of the atlas at `path` without loading the entries. Blocking.
    ///
    /// Returns `0` if the file does not exist or is empty.
    pub fn peek_total_size(path: impl AsRef<Path>) -> Result<u64> {
        let file = match File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut header = Vec::with_capacity(HEADER_LEN);
        file.take(HEADER_LEN as u64).read_to_end(&mut header)?;
        if header.is_empty() {
            return Ok(0);
        }

        let header = AtlasHeader::read(&mut &header[..])?;
        u64::try_from(header.total_size).map_err(|e| {
            Error::parse("negative total size")
                .with_context("path", path.as_ref().display())
                .with_source(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn ledger(entries: &[(&str, usize, i64)]) -> Ledger {
        Ledger::from_entries(
            entries
                .iter()
                .map(|(key, size, last_touched)| CacheEntry::new(*key, *size, *last_touched)),
        )
    }

    fn sorted(ledger: &Ledger) -> Vec<(String, usize, i64)> {
        ledger
            .entries()
            .iter()
            .map(|e| (e.key().to_string(), e.size(), e.last_touched()))
            .sorted()
            .collect_vec()
    }

    #[test]
    fn test_layout() {
        let data = encode(&ledger(&[("ab", 3, 7)]));
        assert_eq!(
            &data[..],
            &[
                b'T', b'C', 1, 0, // magic, version
                3, 0, 0, 0, // total size
                2, b'a', b'b', // key
                3, 0, 0, 0, // size
                7, 0, 0, 0, 0, 0, 0, 0, // last touched
            ]
        );
    }

    #[test]
    fn test_round_trip() {
        let long = "k".repeat(300);
        let mut origin = ledger(&[("osm/1/0/0", 100, 30), ("osm/1/0/1", 200, 10), (long.as_str(), 0, 20)]);
        // Scramble the insertion order before writing.
        origin.add_or_refresh("osm/1/0/0", 150, 40);

        let decoded = decode(encode(&origin)).unwrap();
        assert_eq!(decoded.total_size(), origin.total_size());
        assert_eq!(decoded.total_size(), 350);
        assert_eq!(sorted(&decoded), sorted(&origin));
    }

    #[test]
    fn test_legacy_without_magic() {
        let mut buf = BytesMut::new();
        buf.put_i32_le(5);
        put_varint(&mut buf, 1);
        buf.put_slice(b"a");
        buf.put_i32_le(5);
        buf.put_i64_le(1);

        let decoded = decode(buf.freeze()).unwrap();
        assert_eq!(sorted(&decoded), vec![("a".to_string(), 5, 1)]);
    }

    #[test]
    fn test_header_total_is_recomputed() {
        let mut data = encode(&ledger(&[("a", 10, 1), ("b", 20, 2)])).to_vec();
        data[4..8].copy_from_slice(&999i32.to_le_bytes());
        assert_eq!(decode(&data[..]).unwrap().total_size(), 30);
    }

    #[test]
    fn test_unknown_version_is_tolerated() {
        let mut data = encode(&ledger(&[("a", 1, 1)])).to_vec();
        data[2..4].copy_from_slice(&7i16.to_le_bytes());
        assert_eq!(decode(&data[..]).unwrap().len(), 1);
    }

    #[test]
    fn test_corruption_is_rejected() {
        let data = encode(&ledger(&[("osm/1/0/0", 10, 1)]));

        let truncated = decode(&data[..data.len() - 3]).unwrap_err();
        assert_eq!(truncated.kind(), tilecache_common::error::ErrorKind::Parse);

        let mut negative = data.to_vec();
        let at = data.len() - 12;
        negative[at..at + 4].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(decode(&negative[..]).is_err());

        let mut garbled = data.to_vec();
        garbled[9] = 0xff;
        assert!(decode(&garbled[..]).is_err());

        assert!(decode(&b"TC\x01"[..]).is_err());
        assert!(decode(&[0u8; 0][..]).unwrap().is_empty());
    }

    #[test_log::test]
    fn test_open_save_peek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.atlas");

        let atlas = Atlas::open(&path);
        assert!(atlas.ledger().is_empty());
        assert_eq!(Atlas::peek_total_size(&path).unwrap(), 0);

        atlas.ledger().add_or_refresh("a", 10, 1);
        atlas.ledger().add_or_refresh("b", 32, 2);
        assert!(atlas.mark_save_pending());
        assert!(!atlas.mark_save_pending());
        atlas.save().unwrap();
        assert!(!atlas.is_save_pending());

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        assert!(!Path::new(&tmp).exists());

        assert_eq!(Atlas::peek_total_size(&path).unwrap(), 42);
        let reopened = Atlas::open(&path);
        assert_eq!(reopened.ledger().total_size(), 42);
        assert_eq!(sorted(&reopened.ledger()), sorted(&atlas.ledger()));
    }

    #[test]
    fn test_future_timestamp_is_rejected() {
        let err = decode(encode(&ledger(&[("a", 1, 1), ("b", 1, i64::MAX)]))).unwrap_err();
        assert_eq!(err.kind(), tilecache_common::error::ErrorKind::Parse);

        let now = Clock::wall();
        assert_eq!(decode(encode(&ledger(&[("a", 1, now)]))).unwrap().newest(), Some(now));
    }

    #[test_log::test]
    fn test_open_corrupt_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.atlas");
        std::fs::write(&path, b"TC\x01\x00\x05\x00\x00\x00\x09abc").unwrap();

        let atlas = Atlas::open(&path);
        assert!(atlas.ledger().is_empty());
        assert_eq!(atlas.ledger().total_size(), 0);
        // The header alone is still readable.
        assert_eq!(Atlas::peek_total_size(&path).unwrap(), 5);
    }
}

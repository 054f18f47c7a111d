// Copyright 2026 strata Project Authors
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
    collections::BTreeMap,
    fmt::Debug,
    fs::{self, File},
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use parking_lot::Mutex;
use strata_common::{
    error::{Error, ErrorKind, Result},
    strict_assert, strict_assert_within_budget,
};

const VERSION_FILE: &str = "strata.version";
const ENTRY_SUFFIX: &str = ".0";
const TMP_SUFFIX: &str = ".0.tmp";
const MAX_KEY_LEN: usize = 120;

/// Canonical directories currently owned by a [`DiskLruStore`] in this process.
static OPENED_DIRS: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

/// Exclusive ownership of a cache directory within the process, released on drop.
#[derive(Debug)]
struct DirClaim {
    dir: PathBuf,
}

impl DirClaim {
    fn claim(dir: PathBuf) -> Result<Self> {
        let mut opened = OPENED_DIRS.lock();
        if opened.contains(&dir) {
            return Err(Error::busy("cache directory is already opened by another store").with_context("dir", dir.display()));
        }
        opened.push(dir.clone());
        Ok(Self { dir })
    }
}

impl Drop for DirClaim {
    fn drop(&mut self) {
        OPENED_DIRS.lock().retain(|dir| dir != &self.dir);
    }
}

fn validate_key(key: &str) -> Result<()> {
    let legal = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-');
    if legal {
        Ok(())
    } else {
        Err(Error::config("keys must match [a-z0-9_-]{1,120}").with_context("key", key))
    }
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        res => res,
    }
}

/// A committed entry as it was when read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    data: Bytes,
    last_modified: SystemTime,
}

impl Snapshot {
    /// The entry value.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consume the snapshot and take the entry value.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// When the entry was last written.
    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }
}

#[derive(Debug)]
struct IndexEntry {
    size: u64,
    seq: u64,
}

/// In-memory view of the committed entries, ordered by `seq` from the least recently used.
#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, IndexEntry>,
    lru: BTreeMap<u64, String>,
    seq: u64,
    size: u64,
    editing: HashSet<String>,
}

impl Index {
    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn touch(&mut self, key: &str) -> bool {
        let seq = self.next_seq();
        match self.entries.get_mut(key) {
            Some(entry) => {
                let old = std::mem::replace(&mut entry.seq, seq);
                let key = self.lru.remove(&old);
                strict_assert!(key.is_some());
                if let Some(key) = key {
                    self.lru.insert(seq, key);
                }
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, key: String, size: u64) {
        self.remove(&key);
        let seq = self.next_seq();
        self.lru.insert(seq, key.clone());
        self.entries.insert(key, IndexEntry { size, seq });
        self.size += size;
    }

    fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(&entry.seq);
        strict_assert!(self.size >= entry.size);
        self.size -= entry.size;
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<String> {
        let (_, key) = self.lru.pop_first()?;
        if let Some(entry) = self.entries.remove(&key) {
            self.size -= entry.size;
        }
        Some(key)
    }
}

struct StoreInner {
    dir: PathBuf,
    app_version: u32,
    max_size: u64,
    index: Mutex<Index>,
    _claim: DirClaim,
}

impl StoreInner {
    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{ENTRY_SUFFIX}"))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{TMP_SUFFIX}"))
    }

    /// Evict least recently used entries until the size fits. Called with the index lock held.
    fn evict(&self, index: &mut Index) {
        while index.size > self.max_size {
            let Some(key) = index.pop_lru() else { break };
            tracing::debug!(key = %key, "[disk store]: evict entry");
            if let Err(e) = remove_file_if_exists(&self.entry_path(&key)) {
                tracing::warn!(key = %key, "[disk store]: remove evicted entry file failed, error: {e}");
            }
        }
        strict_assert_within_budget!(index.size, self.max_size);
    }

    fn finish_edit(&self, key: &str) {
        let removed = self.index.lock().editing.remove(key);
        strict_assert!(removed);
    }
}

/// A size bounded, journaled directory of blobs.
///
/// Every committed entry is one file named after its key. Writes go to a temporary file that is fsynced and then
/// renamed over the entry, so readers observe either the previous value or the new one in full. Entries are evicted
/// in least recently used order once the total size exceeds the max size.
///
/// Only one store may own a directory at a time within a process. A directory written with a different app version
/// is wiped on open.
#[derive(Clone)]
pub struct DiskLruStore {
    inner: Arc<StoreInner>,
}

impl Debug for DiskLruStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.inner.index.lock();
        f.debug_struct("DiskLruStore")
            .field("dir", &self.inner.dir)
            .field("app_version", &self.inner.app_version)
            .field("max_size", &self.inner.max_size)
            .field("size", &index.size)
            .field("len", &index.entries.len())
            .finish()
    }
}

impl DiskLruStore {
    /// Open or create a store in `dir`.
    ///
    /// Leftovers of interrupted writes are deleted and the index is rebuilt from the surviving entries, oldest
    /// modification first.
    pub fn open(dir: impl AsRef<Path>, app_version: u32, max_size: u64) -> Result<Self> {
        if max_size == 0 {
            return Err(Error::config("disk cache max size must be greater than zero"));
        }

        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let dir = dir.canonicalize()?;
        let claim = DirClaim::claim(dir.clone())?;

        let version_path = dir.join(VERSION_FILE);
        let stored = match fs::read_to_string(&version_path) {
            Ok(content) => content.trim().parse::<u32>().ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if stored != Some(app_version) {
            tracing::info!(
                dir = %dir.display(),
                ?stored,
                app_version,
                "[disk store]: app version mismatch, wipe directory"
            );
            Self::wipe(&dir)?;
            fs::write(&version_path, format!("{app_version}\n"))?;
        }

        let mut index = Index::default();
        for (key, size, _) in Self::scan(&dir)?
            .into_iter()
            .sorted_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)))
        {
            index.insert(key, size);
        }

        let inner = StoreInner {
            dir,
            app_version,
            max_size,
            index: Mutex::new(index),
            _claim: claim,
        };
        {
            let mut index = inner.index.lock();
            inner.evict(&mut index);
            tracing::info!(
                dir = %inner.dir.display(),
                entries = index.entries.len(),
                size = index.size,
                max_size,
                "[disk store]: opened"
            );
        }

        Ok(Self { inner: Arc::new(inner) })
    }

    /// Remove every file the store owns, leaving foreign files alone.
    fn wipe(dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == VERSION_FILE || name.ends_with(ENTRY_SUFFIX) || name.ends_with(TMP_SUFFIX) {
                remove_file_if_exists(&entry.path())?;
            }
        }
        Ok(())
    }

    fn scan(dir: &Path) -> Result<Vec<(String, u64, SystemTime)>> {
        let mut entries = vec![];
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };

            if name.ends_with(TMP_SUFFIX) {
                tracing::debug!(name, "[disk store]: remove leftover of an interrupted write");
                remove_file_if_exists(&entry.path())?;
                continue;
            }
            let Some(key) = name.strip_suffix(ENTRY_SUFFIX) else { continue };
            if validate_key(key).is_err() {
                continue;
            }
            let metadata = entry.metadata()?;
            entries.push((key.to_string(), metadata.len(), metadata.modified()?));
        }
        Ok(entries)
    }

    /// Read an entry and promote it to most recently used.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::storage::store::get"))]
    pub fn get(&self, key: &str) -> Result<Option<Snapshot>> {
        validate_key(key)?;
        if !self.inner.index.lock().touch(key) {
            return Ok(None);
        }

        let path = self.inner.entry_path(key);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // The file went away behind the index. Forget it unless it has been committed again meanwhile.
                let mut index = self.inner.index.lock();
                if !path.exists() {
                    tracing::warn!(key, "[disk store]: entry file is missing, drop it from the index");
                    index.remove(key);
                }
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = file.metadata()?;
        let mut buf = Vec::with_capacity(metadata.len() as usize);
        file.read_to_end(&mut buf)?;

        Ok(Some(Snapshot {
            data: Bytes::from(buf),
            last_modified: metadata.modified()?,
        }))
    }

    /// Start writing an entry.
    ///
    /// Fails with [`ErrorKind::Busy`] if the key already has an outstanding [`Editor`].
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::storage::store::edit"))]
    pub fn edit(&self, key: &str) -> Result<Editor> {
        validate_key(key)?;
        if !self.inner.index.lock().editing.insert(key.to_string()) {
            return Err(Error::busy("entry is being edited").with_context("key", key));
        }

        let tmp_path = self.inner.tmp_path(key);
        let file = match File::create(&tmp_path) {
            Ok(file) => file,
            Err(e) => {
                self.inner.finish_edit(key);
                return Err(e.into());
            }
        };

        Ok(Editor {
            inner: self.inner.clone(),
            key: key.to_string(),
            tmp_path,
            writer: Some(BufWriter::new(file)),
            closed: false,
        })
    }

    /// Remove a committed entry. Returns whether the entry existed.
    ///
    /// An outstanding editor of the key is not affected.
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut index = self.inner.index.lock();
        if index.remove(key).is_none() {
            return Ok(false);
        }
        remove_file_if_exists(&self.inner.entry_path(key))?;
        Ok(true)
    }

    /// Remove every committed entry.
    ///
    /// Outstanding editors are not affected and may still commit. Keeps removing after a failure and reports the
    /// first one.
    pub fn clear(&self) -> Result<()> {
        let mut index = self.inner.index.lock();
        let entries = std::mem::take(&mut index.entries);
        index.lru.clear();
        index.size = 0;

        let mut res = Ok(());
        for key in entries.keys() {
            if let Err(e) = remove_file_if_exists(&self.inner.entry_path(key)) {
                tracing::warn!(key = %key, "[disk store]: remove entry file on clear failed, error: {e}");
                if res.is_ok() {
                    res = Err(e.into());
                }
            }
        }
        res
    }

    /// Total size of the committed entries in bytes.
    pub fn size(&self) -> u64 {
        self.inner.index.lock().size
    }

    /// Max total size in bytes.
    pub fn max_size(&self) -> u64 {
        self.inner.max_size
    }

    /// Count of committed entries.
    pub fn len(&self) -> usize {
        self.inner.index.lock().entries.len()
    }

    /// Check if there is no committed entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The canonical directory of the store.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// The app version the directory is stamped with.
    pub fn app_version(&self) -> u32 {
        self.inner.app_version
    }
}

/// Writes one entry of a [`DiskLruStore`].
///
/// Nothing is visible to readers until [`Editor::commit`] succeeds. Dropping an editor without committing aborts it.
pub struct Editor {
    inner: Arc<StoreInner>,
    key: String,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    closed: bool,
}

impl Debug for Editor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("key", &self.key)
            .field("tmp_path", &self.tmp_path)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Write for Editor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer_mut()?.flush()
    }
}

impl Editor {
    /// The key being written.
    pub fn key(&self) -> &str {
        &self.key
    }

    fn writer_mut(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(|| io::Error::other("editor is closed"))
    }

    /// Make the written bytes the new value of the entry.
    ///
    /// The entry is evicted right away if it alone exceeds the max size. On failure the edit is aborted.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::storage::store::commit"))]
    pub fn commit(mut self) -> Result<()> {
        let res = self.try_commit();
        if res.is_err() {
            self.discard();
        }
        res
    }

    fn try_commit(&mut self) -> Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Closed, "editor is closed"))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        let size = file.metadata()?.len();
        drop(file);

        let mut index = self.inner.index.lock();
        fs::rename(&self.tmp_path, self.inner.entry_path(&self.key))?;
        let removed = index.editing.remove(&self.key);
        strict_assert!(removed);
        index.insert(self.key.clone(), size);
        self.inner.evict(&mut index);
        self.closed = true;

        tracing::trace!(key = %self.key, size, "[disk store]: entry committed");
        Ok(())
    }

    /// Drop the written bytes. The previous value of the entry, if any, stays.
    pub fn abort(mut self) -> Result<()> {
        self.closed = true;
        drop(self.writer.take());
        let res = remove_file_if_exists(&self.tmp_path);
        self.inner.finish_edit(&self.key);
        res.map_err(Error::from)
    }

    fn discard(&mut self) {
        self.closed = true;
        drop(self.writer.take());
        if let Err(e) = remove_file_if_exists(&self.tmp_path) {
            tracing::warn!(key = %self.key, "[disk store]: remove temporary file failed, error: {e}");
        }
        self.inner.finish_edit(&self.key);
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.closed {
            self.discard();
        }
    }
}

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
    fmt::Debug,
    io::{self, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strata_common::{
    code::CacheKey,
    error::{Error, Result},
};

use crate::{
    safe_key::SafeKeyGenerator,
    store::{DiskLruStore, Snapshot},
    write_lock::DiskCacheWriteLocker,
};

/// Produces the value of a disk cache entry.
///
/// Returns `Ok(true)` to commit what has been written to `sink`. `Ok(false)` or an error aborts the write and leaves
/// the previous value of the entry, if any, in place.
pub trait Writer {
    /// Write the value into `sink`.
    fn write(&mut self, sink: &mut dyn Write) -> io::Result<bool>;
}

impl<F> Writer for F
where
    F: FnMut(&mut dyn Write) -> io::Result<bool>,
{
    fn write(&mut self, sink: &mut dyn Write) -> io::Result<bool> {
        self(sink)
    }
}

/// A durable key to blob cache.
///
/// The disk tier is an optimization. Operations never fail: I/O errors are logged, reads degrade to a miss and writes
/// to a no-op.
pub trait DiskCache<K>: Debug + Send + Sync + 'static {
    /// Read the value of `key`.
    fn get(&self, key: &K) -> Option<Bytes>;

    /// Write the value of `key` with `writer`. Returns whether the value was committed.
    ///
    /// Writers of the same key are serialized; writers of different keys run concurrently.
    fn put(&self, key: &K, writer: &mut dyn Writer) -> bool;

    /// Remove the value of `key`.
    fn delete(&self, key: &K);

    /// Remove every value.
    ///
    /// Must not run concurrently with `put` for application level correctness, but does not break if it does.
    fn clear(&self);
}

/// Plain config of a disk cache, e.g. loaded from a config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    /// Directory owned by the cache.
    pub dir: PathBuf,
    /// Max total size in bytes.
    #[serde(default = "DiskCacheConfig::default_max_size")]
    pub max_size: u64,
    /// Bump to invalidate everything written by previous versions.
    #[serde(default = "DiskCacheConfig::default_app_version")]
    pub app_version: u32,
    /// Entries older than this are dropped on read.
    #[serde(default)]
    pub expiration: Option<Duration>,
}

impl DiskCacheConfig {
    /// Default max total size: 250 MiB.
    pub const DEFAULT_MAX_SIZE: u64 = 250 * 1024 * 1024;
    /// Default app version.
    pub const DEFAULT_APP_VERSION: u32 = 1;

    fn default_max_size() -> u64 {
        Self::DEFAULT_MAX_SIZE
    }

    fn default_app_version() -> u32 {
        Self::DEFAULT_APP_VERSION
    }
}

/// Builder of the disk cache.
#[derive(Debug, Clone)]
pub struct DiskCacheBuilder {
    config: DiskCacheConfig,
}

impl DiskCacheBuilder {
    /// Create a builder for a cache in `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            config: DiskCacheConfig {
                dir: dir.as_ref().to_path_buf(),
                max_size: DiskCacheConfig::DEFAULT_MAX_SIZE,
                app_version: DiskCacheConfig::DEFAULT_APP_VERSION,
                expiration: None,
            },
        }
    }

    /// Create a builder from a plain config.
    pub fn from_config(config: DiskCacheConfig) -> Self {
        Self { config }
    }

    /// Set the max total size in bytes.
    ///
    /// Default: 250 MiB.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Set the app version.
    ///
    /// Default: 1.
    pub fn with_app_version(mut self, app_version: u32) -> Self {
        self.config.app_version = app_version;
        self
    }

    /// Drop entries older than `expiration` when they are read.
    ///
    /// Default: entries never expire.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.config.expiration = Some(expiration);
        self
    }

    /// The config built so far.
    pub fn config(&self) -> &DiskCacheConfig {
        &self.config
    }

    /// Open the cache.
    ///
    /// Builds an [`ExpiringDiskCache`] if an expiration is set, an [`LruDiskCache`] otherwise.
    pub fn build<K>(self) -> Result<Box<dyn DiskCache<K>>>
    where
        K: CacheKey + Clone,
    {
        let cache = LruDiskCache::open(&self.config.dir, self.config.app_version, self.config.max_size)?;
        match self.config.expiration {
            Some(expiration) => Ok(Box::new(ExpiringDiskCache::new(cache, expiration)?)),
            None => Ok(Box::new(cache)),
        }
    }
}

/// [`DiskCache`] over a [`DiskLruStore`].
pub struct LruDiskCache<K> {
    store: DiskLruStore,
    safe_keys: SafeKeyGenerator<K>,
    locker: DiskCacheWriteLocker,
}

impl<K> Debug for LruDiskCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruDiskCache")
            .field("store", &self.store)
            .field("locker", &self.locker)
            .finish()
    }
}

impl<K> LruDiskCache<K>
where
    K: CacheKey + Clone,
{
    /// Open the cache in `dir`.
    ///
    /// Fails if the directory cannot be prepared or is already owned by another cache in this process.
    pub fn open(dir: impl AsRef<Path>, app_version: u32, max_size: u64) -> Result<Self> {
        let store = DiskLruStore::open(dir, app_version, max_size)?;
        Ok(Self {
            store,
            safe_keys: SafeKeyGenerator::new()?,
            locker: DiskCacheWriteLocker::default(),
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &DiskLruStore {
        &self.store
    }

    /// The per key write locker.
    pub fn locker(&self) -> &DiskCacheWriteLocker {
        &self.locker
    }

    /// The filesystem safe name of `key`.
    pub fn safe_key(&self, key: &K) -> String {
        self.safe_keys.safe_key(key)
    }

    fn snapshot(&self, safe_key: &str) -> Option<Snapshot> {
        match self.store.get(safe_key) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(safe_key = %safe_key, "[disk cache]: read failed, treat as miss, error: {e}");
                None
            }
        }
    }

    fn remove(&self, safe_key: &str) {
        if let Err(e) = self.store.remove(safe_key) {
            tracing::warn!(safe_key = %safe_key, "[disk cache]: delete failed, error: {e}");
        }
    }
}

impl<K> DiskCache<K> for LruDiskCache<K>
where
    K: CacheKey + Clone,
{
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::storage::disk::get"))]
    fn get(&self, key: &K) -> Option<Bytes> {
        let safe_key = self.safe_keys.safe_key(key);
        self.snapshot(&safe_key).map(Snapshot::into_data)
    }

    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::storage::disk::put"))]
    fn put(&self, key: &K, writer: &mut dyn Writer) -> bool {
        let safe_key = self.safe_keys.safe_key(key);
        let _guard = self.locker.lock(&safe_key);

        let mut editor = match self.store.edit(&safe_key) {
            Ok(editor) => editor,
            Err(e) => {
                tracing::warn!(safe_key = %safe_key, "[disk cache]: open editor failed, error: {e}");
                return false;
            }
        };

        let res = match writer.write(&mut editor) {
            Ok(true) => editor.commit(),
            Ok(false) => {
                tracing::debug!(safe_key = %safe_key, "[disk cache]: writer declined, abort");
                if let Err(e) = editor.abort() {
                    tracing::warn!(safe_key = %safe_key, "[disk cache]: abort failed, error: {e}");
                }
                return false;
            }
            Err(e) => {
                let e = Error::external(e);
                tracing::warn!(safe_key = %safe_key, "[disk cache]: writer failed, abort, error: {e}");
                if let Err(e) = editor.abort() {
                    tracing::warn!(safe_key = %safe_key, "[disk cache]: abort failed, error: {e}");
                }
                return false;
            }
        };

        match res {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(safe_key = %safe_key, "[disk cache]: commit failed, error: {e}");
                false
            }
        }
    }

    fn delete(&self, key: &K) {
        let safe_key = self.safe_keys.safe_key(key);
        self.remove(&safe_key);
    }

    fn clear(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("[disk cache]: clear failed, error: {e}");
        }
    }
}

/// [`LruDiskCache`] whose entries expire a fixed time after they are written.
///
/// Expired entries are deleted lazily by the read that finds them.
pub struct ExpiringDiskCache<K> {
    cache: LruDiskCache<K>,
    expiration: Duration,
}

impl<K> Debug for ExpiringDiskCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringDiskCache")
            .field("cache", &self.cache)
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl<K> ExpiringDiskCache<K>
where
    K: CacheKey + Clone,
{
    /// Wrap `cache` with the given time to live.
    ///
    /// Fails with a config error if `expiration` is zero.
    pub fn new(cache: LruDiskCache<K>, expiration: Duration) -> Result<Self> {
        if expiration.is_zero() {
            return Err(Error::config("expiration must be greater than zero"));
        }
        Ok(Self { cache, expiration })
    }

    /// The time to live of the entries.
    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    /// The wrapped cache.
    pub fn inner(&self) -> &LruDiskCache<K> {
        &self.cache
    }

    fn is_expired(&self, snapshot: &Snapshot) -> bool {
        // A modification time in the future counts as fresh.
        SystemTime::now()
            .duration_since(snapshot.last_modified())
            .map(|age| age > self.expiration)
            .unwrap_or(false)
    }
}

impl<K> DiskCache<K> for ExpiringDiskCache<K>
where
    K: CacheKey + Clone,
{
    fn get(&self, key: &K) -> Option<Bytes> {
        let safe_key = self.cache.safe_key(key);
        let snapshot = self.cache.snapshot(&safe_key)?;
        if !self.is_expired(&snapshot) {
            return Some(snapshot.into_data());
        }

        // A writer may commit a fresh value between the read and the delete.
        let _guard = self.cache.locker.lock(&safe_key);
        let snapshot = self.cache.snapshot(&safe_key)?;
        if !self.is_expired(&snapshot) {
            return Some(snapshot.into_data());
        }
        tracing::debug!(safe_key = %safe_key, "[disk cache]: entry expired, delete");
        self.cache.remove(&safe_key);
        None
    }

    fn put(&self, key: &K, writer: &mut dyn Writer) -> bool {
        self.cache.put(key, writer)
    }

    fn delete(&self, key: &K) {
        self.cache.delete(key)
    }

    fn clear(&self) {
        self.cache.clear()
    }
}

/// [`DiskCache`] that stores nothing. Writers are never invoked.
pub struct NoopDiskCache<K> {
    _marker: PhantomData<fn(K)>,
}

impl<K> Default for NoopDiskCache<K> {
    fn default() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<K> Debug for NoopDiskCache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoopDiskCache").finish()
    }
}

impl<K> DiskCache<K> for NoopDiskCache<K>
where
    K: 'static,
{
    fn get(&self, _: &K) -> Option<Bytes> {
        None
    }

    fn put(&self, _: &K, _: &mut dyn Writer) -> bool {
        false
    }

    fn delete(&self, _: &K) {}

    fn clear(&self) {}
}

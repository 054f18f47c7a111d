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

use std::{fmt::Debug, hash::Hash, marker::PhantomData, sync::Arc};

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use strata_common::error::Result;

use crate::lru::LruCache;

/// A decoded resource that can be held by a [`MemoryCache`].
pub trait Resource: Send + Sync + 'static {
    /// The cost of the resource, usually its footprint in bytes.
    fn size(&self) -> usize;
}

impl Resource for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }
}

impl Resource for String {
    fn size(&self) -> usize {
        self.len()
    }
}

/// Receives every resource evicted from a [`MemoryCache`].
///
/// This is the hook a recycling pool uses to take the memory back. Explicit removals are not reported.
pub trait ResourceRemovedListener<R>: Send + Sync + 'static {
    /// Called once per evicted resource, before the evicting call returns.
    fn on_resource_removed(&self, resource: Arc<R>);
}

impl<R, F> ResourceRemovedListener<R> for F
where
    F: Fn(Arc<R>) + Send + Sync + 'static,
{
    fn on_resource_removed(&self, resource: Arc<R>) {
        self(resource)
    }
}

type ListenerSlot<R> = Arc<ArcSwapOption<Box<dyn ResourceRemovedListener<R>>>>;

/// Platform style memory pressure signal.
///
/// The numeric codes follow the common platform convention, larger means more pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrimLevel {
    /// The process is running and the system is beginning to run low on memory.
    RunningModerate,
    /// The process is running and the system is running low on memory.
    RunningLow,
    /// The process is running and the system is about to kill background processes.
    RunningCritical,
    /// The user interface of the process is no longer visible.
    UiHidden,
    /// The process is in the background list.
    Background,
    /// The process is in the middle of the background list.
    Moderate,
    /// The process is the next one to be killed.
    Complete,
}

impl TrimLevel {
    /// The platform code of the level.
    pub fn code(&self) -> i32 {
        match self {
            TrimLevel::RunningModerate => 5,
            TrimLevel::RunningLow => 10,
            TrimLevel::RunningCritical => 15,
            TrimLevel::UiHidden => 20,
            TrimLevel::Background => 40,
            TrimLevel::Moderate => 60,
            TrimLevel::Complete => 80,
        }
    }

    /// Map a platform code to the highest level it reaches.
    ///
    /// Codes between two known levels map to the lower one. Codes below 5 carry no pressure and map to `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        let level = match code {
            80.. => TrimLevel::Complete,
            60..80 => TrimLevel::Moderate,
            40..60 => TrimLevel::Background,
            20..40 => TrimLevel::UiHidden,
            15..20 => TrimLevel::RunningCritical,
            10..15 => TrimLevel::RunningLow,
            5..10 => TrimLevel::RunningModerate,
            _ => return None,
        };
        Some(level)
    }
}

/// An in-memory cache of decoded resources.
pub trait MemoryCache<K, R>: Send + Sync + 'static {
    /// Get a resource and promote it.
    fn get(&self, key: &K) -> Option<Arc<R>>;

    /// Insert or replace a resource. Returns the replaced one.
    fn put(&self, key: K, resource: Arc<R>) -> Option<Arc<R>>;

    /// Remove a resource. The removed listener is not notified.
    fn remove(&self, key: &K) -> Option<Arc<R>>;

    /// Install the listener that receives every evicted resource, replacing the previous one.
    fn set_resource_removed_listener(&self, listener: Box<dyn ResourceRemovedListener<R>>);

    /// Rescale the budget, evicting synchronously if it shrinks.
    fn set_size_multiplier(&self, multiplier: f64) -> Result<()>;

    /// Sum of the costs of the cached resources.
    fn current_size(&self) -> usize;

    /// Current budget.
    fn max_size(&self) -> usize;

    /// Evict every resource.
    fn clear_memory(&self);

    /// Shrink according to a memory pressure signal.
    fn trim_memory(&self, level: TrimLevel);
}

/// [`MemoryCache`] backed by [`LruCache`], charging every resource its [`Resource::size`].
pub struct LruResourceCache<K, R> {
    cache: LruCache<K, Arc<R>>,
    listener: ListenerSlot<R>,
}

impl<K, R> Debug for LruResourceCache<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruResourceCache").field("cache", &self.cache).finish()
    }
}

impl<K, R> Clone for LruResourceCache<K, R> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            listener: self.listener.clone(),
        }
    }
}

impl<K, R> LruResourceCache<K, R>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    R: Resource,
{
    /// Create a resource cache with the given budget in bytes.
    ///
    /// Fails with a config error if the budget is zero.
    pub fn new(max_size: usize) -> Result<Self> {
        let listener: ListenerSlot<R> = Arc::new(ArcSwapOption::empty());
        let slot = listener.clone();
        let cache = LruCache::builder(max_size)
            .with_weighter(|resource: &Arc<R>| resource.size())
            .with_eviction_listener(move |_: K, resource: Arc<R>| {
                if let Some(listener) = slot.load_full() {
                    listener.on_resource_removed(resource);
                }
            })
            .build()?;
        Ok(Self { cache, listener })
    }

    /// Evict least recently used resources until the usage is no more than `size`.
    pub fn trim_to_size(&self, size: usize) {
        self.cache.trim_to_size(size);
    }

    /// Check if the cache holds the key, without promoting it.
    pub fn contains(&self, key: &K) -> bool {
        self.cache.contains(key)
    }

    /// Count of cached resources.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl<K, R> MemoryCache<K, R> for LruResourceCache<K, R>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    R: Resource,
{
    fn get(&self, key: &K) -> Option<Arc<R>> {
        self.cache.get(key)
    }

    fn put(&self, key: K, resource: Arc<R>) -> Option<Arc<R>> {
        self.cache.put(key, resource)
    }

    fn remove(&self, key: &K) -> Option<Arc<R>> {
        self.cache.remove(key)
    }

    fn set_resource_removed_listener(&self, listener: Box<dyn ResourceRemovedListener<R>>) {
        self.listener.store(Some(Arc::new(listener)));
    }

    fn set_size_multiplier(&self, multiplier: f64) -> Result<()> {
        self.cache.set_size_multiplier(multiplier)
    }

    fn current_size(&self) -> usize {
        self.cache.current_size()
    }

    fn max_size(&self) -> usize {
        self.cache.max_size()
    }

    fn clear_memory(&self) {
        self.cache.clear_memory();
    }

    fn trim_memory(&self, level: TrimLevel) {
        match level {
            TrimLevel::Moderate | TrimLevel::Complete => {
                tracing::debug!(?level, "[memory cache]: clear on trim");
                self.cache.clear_memory();
            }
            TrimLevel::Background => {
                let target = self.cache.current_size() / 2;
                tracing::debug!(?level, target, "[memory cache]: trim to half");
                self.cache.trim_to_size(target);
            }
            TrimLevel::RunningModerate | TrimLevel::RunningLow | TrimLevel::RunningCritical | TrimLevel::UiHidden => {}
        }
    }
}

/// [`MemoryCache`] that holds nothing.
///
/// Every put resource is handed straight to the removed listener, so a recycling pool behind it still sees every
/// resource exactly once.
pub struct NoopMemoryCache<K, R> {
    listener: ArcSwapOption<Box<dyn ResourceRemovedListener<R>>>,
    _marker: PhantomData<fn(K)>,
}

impl<K, R> Default for NoopMemoryCache<K, R> {
    fn default() -> Self {
        Self {
            listener: ArcSwapOption::empty(),
            _marker: PhantomData,
        }
    }
}

impl<K, R> Debug for NoopMemoryCache<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoopMemoryCache").finish()
    }
}

impl<K, R> MemoryCache<K, R> for NoopMemoryCache<K, R>
where
    K: Send + Sync + 'static,
    R: Resource,
{
    fn get(&self, _: &K) -> Option<Arc<R>> {
        None
    }

    fn put(&self, _: K, resource: Arc<R>) -> Option<Arc<R>> {
        if let Some(listener) = self.listener.load_full() {
            listener.on_resource_removed(resource);
        }
        None
    }

    fn remove(&self, _: &K) -> Option<Arc<R>> {
        None
    }

    fn set_resource_removed_listener(&self, listener: Box<dyn ResourceRemovedListener<R>>) {
        self.listener.store(Some(Arc::new(listener)));
    }

    fn set_size_multiplier(&self, _: f64) -> Result<()> {
        Ok(())
    }

    fn current_size(&self) -> usize {
        0
    }

    fn max_size(&self) -> usize {
        0
    }

    fn clear_memory(&self) {}

    fn trim_memory(&self, _: TrimLevel) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Bitmap {
        id: u64,
        bytes: usize,
    }

    impl Resource for Bitmap {
        fn size(&self) -> usize {
            self.bytes
        }
    }

    fn bitmap(id: u64, bytes: usize) -> Arc<Bitmap> {
        Arc::new(Bitmap { id, bytes })
    }

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<LruResourceCache<String, Bitmap>>();
        is_send_sync_static::<NoopMemoryCache<String, Bitmap>>();
    }

    fn recording(cache: &dyn MemoryCache<u64, Bitmap>) -> Arc<Mutex<Vec<u64>>> {
        let removed = Arc::new(Mutex::new(vec![]));
        let sink = removed.clone();
        cache.set_resource_removed_listener(Box::new(move |resource: Arc<Bitmap>| sink.lock().push(resource.id)));
        removed
    }

    #[test]
    fn test_trim_level_codes() {
        assert_eq!(TrimLevel::from_code(0), None);
        assert_eq!(TrimLevel::from_code(4), None);
        assert_eq!(TrimLevel::from_code(5), Some(TrimLevel::RunningModerate));
        assert_eq!(TrimLevel::from_code(15), Some(TrimLevel::RunningCritical));
        assert_eq!(TrimLevel::from_code(40), Some(TrimLevel::Background));
        assert_eq!(TrimLevel::from_code(59), Some(TrimLevel::Background));
        assert_eq!(TrimLevel::from_code(60), Some(TrimLevel::Moderate));
        assert_eq!(TrimLevel::from_code(200), Some(TrimLevel::Complete));

        for level in [
            TrimLevel::RunningModerate,
            TrimLevel::RunningLow,
            TrimLevel::RunningCritical,
            TrimLevel::UiHidden,
            TrimLevel::Background,
            TrimLevel::Moderate,
            TrimLevel::Complete,
        ] {
            assert_eq!(TrimLevel::from_code(level.code()), Some(level));
        }
        assert!(TrimLevel::Background < TrimLevel::Moderate);
    }

    #[test]
    fn test_zero_budget_is_rejected() {
        assert!(LruResourceCache::<u64, Bitmap>::new(0).is_err());
    }

    #[test]
    fn test_size_accounting_by_resource_size() {
        let cache = LruResourceCache::new(1000).unwrap();
        cache.put(1, bitmap(1, 400));
        cache.put(2, bitmap(2, 500));
        assert_eq!(cache.current_size(), 900);

        let removed = recording(&cache);
        cache.put(3, bitmap(3, 300));

        assert_eq!(removed.lock().as_slice(), &[1]);
        assert_eq!(cache.current_size(), 800);
        assert_eq!(cache.get(&3).unwrap().id, 3);
    }

    #[test_log::test]
    fn test_trim_memory_table() {
        let cache = LruResourceCache::new(1000).unwrap();
        let removed = recording(&cache);
        for id in 0..10 {
            cache.put(id, bitmap(id, 100));
        }

        for level in [
            TrimLevel::RunningModerate,
            TrimLevel::RunningLow,
            TrimLevel::RunningCritical,
            TrimLevel::UiHidden,
        ] {
            cache.trim_memory(level);
            assert_eq!(cache.current_size(), 1000);
        }
        assert!(removed.lock().is_empty());

        cache.trim_memory(TrimLevel::Background);
        assert_eq!(cache.current_size(), 500);
        assert_eq!(removed.lock().as_slice(), &[0, 1, 2, 3, 4]);
        assert_eq!(cache.max_size(), 1000);

        cache.trim_memory(TrimLevel::Background);
        assert_eq!(cache.current_size(), 200);

        cache.trim_memory(TrimLevel::Moderate);
        assert_eq!(cache.current_size(), 0);
        assert_eq!(removed.lock().len(), 10);

        cache.put(42, bitmap(42, 100));
        cache.trim_memory(TrimLevel::Complete);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_is_not_reported() {
        let cache = LruResourceCache::new(1000).unwrap();
        let removed = recording(&cache);
        cache.put(1, bitmap(1, 100));

        assert_eq!(cache.remove(&1).unwrap().id, 1);
        assert!(removed.lock().is_empty());
    }

    #[test]
    fn test_listener_can_be_replaced() {
        let cache = LruResourceCache::new(100).unwrap();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        cache.set_resource_removed_listener(Box::new(move |_: Arc<Bitmap>| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        cache.put(1, bitmap(1, 100));
        cache.put(2, bitmap(2, 100));

        let counter = second.clone();
        cache.set_resource_removed_listener(Box::new(move |_: Arc<Bitmap>| {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        cache.put(3, bitmap(3, 100));

        assert_eq!(first.load(Ordering::Relaxed), 1);
        assert_eq!(second.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_size_multiplier_through_facade() {
        let cache = LruResourceCache::new(1000).unwrap();
        let removed = recording(&cache);
        for id in 0..10 {
            cache.put(id, bitmap(id, 100));
        }

        cache.set_size_multiplier(0.5).unwrap();
        assert_eq!(cache.max_size(), 500);
        assert_eq!(removed.lock().len(), 5);
        assert!(cache.set_size_multiplier(-1.0).is_err());
    }

    #[test]
    fn test_noop_memory_cache_recycles_immediately() {
        let cache = NoopMemoryCache::<u64, Bitmap>::default();
        let removed = recording(&cache);

        assert!(cache.put(1, bitmap(1, 100)).is_none());
        assert!(cache.get(&1).is_none());
        assert_eq!(removed.lock().as_slice(), &[1]);
        assert_eq!(cache.current_size(), 0);
        cache.trim_memory(TrimLevel::Complete);
    }
}

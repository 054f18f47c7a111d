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

use std::{fmt::Debug, hash::Hash, sync::Arc};

use equivalent::Equivalent;
use hashbrown::HashMap;
use parking_lot::Mutex;
use strata_common::{
    error::{Error, Result},
    strict_assert, strict_assert_eq, strict_assert_within_budget,
};

/// The weighter for the in-memory cache.
///
/// The weighter calculates the cost of a value. It is called exactly once per insertion and the result is recorded
/// with the entry, so a value whose self-reported size drifts later never corrupts the accounting.
pub trait Weighter<V>: Fn(&V) -> usize + Send + Sync + 'static {}
impl<V, T> Weighter<V> for T where T: Fn(&V) -> usize + Send + Sync + 'static {}

/// Receives every entry evicted by the cache.
///
/// Called synchronously, once per entry, before the evicting call returns. The cache lock is not held while the
/// listener runs, so the listener may call back into the same cache.
///
/// Entries removed by [`LruCache::remove`] or replaced by [`LruCache::put`] are handed back to the caller instead and
/// never reach the listener.
pub trait EvictionListener<K, V>: Send + Sync + 'static {
    /// Called with the ownership of an evicted entry.
    fn on_evict(&self, key: K, value: V);
}

impl<K, V, F> EvictionListener<K, V> for F
where
    F: Fn(K, V) + Send + Sync + 'static,
{
    fn on_evict(&self, key: K, value: V) {
        self(key, value)
    }
}

type Token = usize;

struct Slot<K, V> {
    key: K,
    value: V,
    weight: usize,

    prev: Option<Token>,
    next: Option<Token>,
}

/// Entries live in a slab and are chained from the least recently used (`head`) to the most recently used (`tail`).
struct LruState<K, V> {
    indexer: HashMap<K, Token>,
    slots: Vec<Option<Slot<K, V>>>,
    vacants: Vec<Token>,

    head: Option<Token>,
    tail: Option<Token>,

    usage: usize,
    max_size: usize,
    multiplier: f64,
}

impl<K, V> LruState<K, V>
where
    K: Hash + Eq + Clone,
{
    fn new(max_size: usize) -> Self {
        Self {
            indexer: HashMap::new(),
            slots: vec![],
            vacants: vec![],
            head: None,
            tail: None,
            usage: 0,
            max_size,
            multiplier: 1.0,
        }
    }

    fn slot(&self, token: Token) -> &Slot<K, V> {
        match self.slots[token].as_ref() {
            Some(slot) => slot,
            None => unreachable!("token {token} points to a vacant slot"),
        }
    }

    fn slot_mut(&mut self, token: Token) -> &mut Slot<K, V> {
        match self.slots[token].as_mut() {
            Some(slot) => slot,
            None => unreachable!("token {token} points to a vacant slot"),
        }
    }

    fn unlink(&mut self, token: Token) {
        let (prev, next) = {
            let slot = self.slot(token);
            (slot.prev, slot.next)
        };
        match prev {
            Some(prev) => self.slot_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.slot_mut(next).prev = prev,
            None => self.tail = prev,
        }
        let slot = self.slot_mut(token);
        slot.prev = None;
        slot.next = None;
    }

    fn link_back(&mut self, token: Token) {
        let tail = self.tail;
        {
            let slot = self.slot_mut(token);
            slot.prev = tail;
            slot.next = None;
        }
        match tail {
            Some(tail) => self.slot_mut(tail).next = Some(token),
            None => self.head = Some(token),
        }
        self.tail = Some(token);
    }

    fn touch(&mut self, token: Token) {
        if self.tail == Some(token) {
            return;
        }
        self.unlink(token);
        self.link_back(token);
    }

    fn insert(&mut self, key: K, value: V, weight: usize) {
        let slot = Slot {
            key: key.clone(),
            value,
            weight,
            prev: None,
            next: None,
        };
        let token = match self.vacants.pop() {
            Some(token) => {
                strict_assert!(self.slots[token].is_none());
                self.slots[token] = Some(slot);
                token
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.link_back(token);
        let old = self.indexer.insert(key, token);
        strict_assert!(old.is_none());
        self.usage += weight;
    }

    /// Take the slot out of the list and the slab. The indexer is left to the caller.
    fn detach(&mut self, token: Token) -> Slot<K, V> {
        self.unlink(token);
        let slot = match self.slots[token].take() {
            Some(slot) => slot,
            None => unreachable!("token {token} points to a vacant slot"),
        };
        self.vacants.push(token);

        // Always subtract the recorded weight, never a recomputed one.
        strict_assert!(self.usage >= slot.weight);
        self.usage -= slot.weight;
        slot
    }

    fn remove<Q>(&mut self, key: &Q) -> Option<Slot<K, V>>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let token = self.indexer.remove(key)?;
        Some(self.detach(token))
    }

    fn pop_lru(&mut self) -> Option<Slot<K, V>> {
        let token = self.head?;
        let slot = self.detach(token);
        let indexed = self.indexer.remove(&slot.key);
        strict_assert_eq!(indexed, Some(token));
        Some(slot)
    }

    /// Evict from the least recently used end until usage fits the target.
    ///
    /// A zero target holds nothing, zero-weight entries included.
    fn evict(&mut self, target: usize, garbages: &mut Vec<(K, V)>) {
        while self.usage > target || (target == 0 && self.head.is_some()) {
            match self.pop_lru() {
                Some(slot) => garbages.push((slot.key, slot.value)),
                None => break,
            }
        }
    }
}

struct LruCacheInner<K, V> {
    state: Mutex<LruState<K, V>>,
    initial_max_size: usize,

    weighter: Arc<dyn Weighter<V>>,
    eviction_listener: Option<Arc<dyn EvictionListener<K, V>>>,
}

/// A size bounded in-memory cache with least-recently-used eviction.
///
/// Every entry is charged the cost reported by the [`Weighter`] at insertion time. After any call returns, the
/// accounted usage is the sum of the recorded costs of the live entries and never exceeds the current max size.
///
/// The max size can be rescaled at runtime with [`LruCache::set_size_multiplier`].
///
/// A cache that needs presence markers can use `Option<T>` as its value type. `None` entries are charged whatever the
/// weighter returns for them.
///
/// # Example
///
/// ```
/// use strata_memory::LruCache;
///
/// let cache: LruCache<u64, &'static str> = LruCache::builder(2)
///     .with_eviction_listener(|key: u64, value: &'static str| println!("evicted {key} => {value}"))
///     .build()
///     .unwrap();
///
/// cache.put(1, "a");
/// cache.put(2, "b");
/// assert_eq!(cache.get(&1), Some("a"));
///
/// // `2` is the least recently used entry and makes room for `3`.
/// cache.put(3, "c");
/// assert!(!cache.contains(&2));
/// ```
pub struct LruCache<K, V> {
    inner: Arc<LruCacheInner<K, V>>,
}

impl<K, V> Clone for LruCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("LruCache")
            .field("initial_max_size", &self.inner.initial_max_size)
            .field("max_size", &state.max_size)
            .field("usage", &state.usage)
            .field("len", &state.indexer.len())
            .finish()
    }
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Create an [`LruCache`] that charges every entry a cost of 1.
    pub fn new(max_size: usize) -> Result<Self> {
        LruCacheBuilder::new(max_size).build()
    }

    /// Start building an [`LruCache`] with the given max size.
    pub fn builder(max_size: usize) -> LruCacheBuilder<K, V> {
        LruCacheBuilder::new(max_size)
    }

    /// Insert or replace an entry.
    ///
    /// Returns the replaced value. The replaced value belongs to the caller and is not reported to the eviction
    /// listener.
    ///
    /// Least recently used entries are evicted until the usage fits the max size. A value whose cost alone exceeds
    /// the max size is not stored and goes straight to the eviction listener.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::lru::put"))]
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let weight = (self.inner.weighter)(&value);

        let mut garbages = vec![];
        let old = {
            let mut state = self.inner.state.lock();
            let old = state.remove(&key).map(|slot| slot.value);
            if weight > state.max_size {
                garbages.push((key, value));
            } else {
                state.insert(key, value, weight);
                let target = state.max_size;
                state.evict(target, &mut garbages);
            }
            strict_assert_within_budget!(state.usage, state.max_size);
            old
        };

        self.notify(garbages);
        old
    }

    /// Remove an entry without notifying the eviction listener.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::lru::remove"))]
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inner.state.lock().remove(key).map(|slot| slot.value)
    }

    /// Check if the cache holds the key, without promoting it.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        self.inner.state.lock().indexer.contains_key(key)
    }

    /// Get the recorded cost of an entry, without promoting it.
    pub fn weight<Q>(&self, key: &Q) -> Option<usize>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let state = self.inner.state.lock();
        state.indexer.get(key).map(|&token| state.slot(token).weight)
    }

    /// Rescale the max size to `round(initial max size * multiplier)`.
    ///
    /// Shrinking evicts least recently used entries synchronously until the usage fits.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::lru::set_size_multiplier"))]
    pub fn set_size_multiplier(&self, multiplier: f64) -> Result<()> {
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(Error::config("size multiplier must be a finite non-negative number")
                .with_context("multiplier", multiplier));
        }

        let max_size = (self.inner.initial_max_size as f64 * multiplier).round() as usize;

        let mut garbages = vec![];
        {
            let mut state = self.inner.state.lock();
            state.multiplier = multiplier;
            state.max_size = max_size;
            state.evict(max_size, &mut garbages);
            strict_assert_within_budget!(state.usage, state.max_size);
        }

        tracing::debug!(
            multiplier,
            max_size,
            evicted = garbages.len(),
            "[lru cache]: max size rescaled"
        );

        self.notify(garbages);
        Ok(())
    }

    /// Evict least recently used entries until the usage is no more than `size`.
    ///
    /// The max size is left unchanged.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::lru::trim_to_size"))]
    pub fn trim_to_size(&self, size: usize) {
        let mut garbages = vec![];
        self.inner.state.lock().evict(size, &mut garbages);
        self.notify(garbages);
    }

    /// Evict every entry.
    pub fn clear_memory(&self) {
        self.trim_to_size(0);
    }

    /// The max size after applying the size multiplier.
    pub fn max_size(&self) -> usize {
        self.inner.state.lock().max_size
    }

    /// The max size the cache was built with.
    pub fn initial_max_size(&self) -> usize {
        self.inner.initial_max_size
    }

    /// The current size multiplier.
    pub fn size_multiplier(&self) -> f64 {
        self.inner.state.lock().multiplier
    }

    /// Sum of the recorded costs of all live entries.
    pub fn current_size(&self) -> usize {
        self.inner.state.lock().usage
    }

    /// Count of live entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().indexer.len()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke the eviction listener out of the lock critical section.
    fn notify(&self, garbages: Vec<(K, V)>) {
        if let Some(listener) = self.inner.eviction_listener.as_ref() {
            for (key, value) in garbages {
                listener.on_evict(key, value);
            }
        }
    }
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Get a clone of the value and promote the entry to most recently used.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::memory::lru::get"))]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let mut state = self.inner.state.lock();
        let token = *state.indexer.get(key)?;
        state.touch(token);
        Some(state.slot(token).value.clone())
    }

    /// Get a clone of the value without promoting the entry.
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        Q: Hash + Equivalent<K> + ?Sized,
    {
        let state = self.inner.state.lock();
        let token = *state.indexer.get(key)?;
        Some(state.slot(token).value.clone())
    }

    /// Snapshot of the keys from the least recently used to the most recently used.
    pub fn keys(&self) -> Vec<K> {
        let state = self.inner.state.lock();
        let mut keys = Vec::with_capacity(state.indexer.len());
        let mut cursor = state.head;
        while let Some(token) = cursor {
            let slot = state.slot(token);
            keys.push(slot.key.clone());
            cursor = slot.next;
        }
        keys
    }
}

/// Builder for [`LruCache`].
pub struct LruCacheBuilder<K, V> {
    max_size: usize,
    weighter: Arc<dyn Weighter<V>>,
    eviction_listener: Option<Arc<dyn EvictionListener<K, V>>>,
}

impl<K, V> LruCacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Create a builder with the given max size.
    ///
    /// Every entry costs 1 unless a weighter is set.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            weighter: Arc::new(|_: &V| 1),
            eviction_listener: None,
        }
    }

    /// Set the cost function of the values.
    ///
    /// Default: every value costs 1.
    pub fn with_weighter<F>(mut self, weighter: F) -> Self
    where
        F: Fn(&V) -> usize + Send + Sync + 'static,
    {
        self.weighter = Arc::new(weighter);
        self
    }

    /// Set the eviction listener.
    ///
    /// Default: No eviction listener installed.
    pub fn with_eviction_listener(mut self, listener: impl EvictionListener<K, V>) -> Self {
        self.eviction_listener = Some(Arc::new(listener));
        self
    }

    /// Set a shared eviction listener.
    pub fn with_shared_eviction_listener(mut self, listener: Arc<dyn EvictionListener<K, V>>) -> Self {
        self.eviction_listener = Some(listener);
        self
    }

    /// Build the cache.
    ///
    /// Fails with a config error if the max size is zero.
    pub fn build(self) -> Result<LruCache<K, V>> {
        if self.max_size == 0 {
            return Err(Error::config("max size must be greater than zero"));
        }
        let inner = LruCacheInner {
            state: Mutex::new(LruState::new(self.max_size)),
            initial_max_size: self.max_size,
            weighter: self.weighter,
            eviction_listener: self.eviction_listener,
        };
        Ok(LruCache { inner: Arc::new(inner) })
    }
}

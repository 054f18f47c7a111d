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
    collections::VecDeque,
    fmt::Debug,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, ThreadId},
};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

/// A mutual exclusion lock that can be released by key rather than by guard, plus the count of threads interested in
/// it.
///
/// `interested_threads` is only modified while the locker's map lock is held. Only the owner thread may unlock.
#[derive(Debug, Default)]
pub struct WriteLock {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    interested_threads: AtomicUsize,
}

impl WriteLock {
    fn lock(&self) {
        let mut owner = self.owner.lock();
        while owner.is_some() {
            self.released.wait(&mut owner);
        }
        *owner = Some(thread::current().id());
    }

    fn unlock(&self, safe_key: &str) {
        let mut owner = self.owner.lock();
        assert_eq!(
            *owner,
            Some(thread::current().id()),
            "[write locker]: unlock a write lock that is not held by the current thread, safe key: {safe_key}"
        );
        *owner = None;
        drop(owner);
        self.released.notify_one();
    }

    /// Check if the lock is held by the calling thread.
    pub fn is_held_by_current_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Count of threads that hold or wait for the lock.
    pub fn interested_threads(&self) -> usize {
        self.interested_threads.load(Ordering::Relaxed)
    }
}

/// A bounded free list of [`WriteLock`]s.
#[derive(Debug)]
pub struct WriteLockPool {
    pool: Mutex<VecDeque<Arc<WriteLock>>>,
    capacity: usize,
}

impl Default for WriteLockPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl WriteLockPool {
    /// Default capacity of the free list.
    pub const DEFAULT_CAPACITY: usize = 10;

    /// Create a pool that keeps up to `capacity` idle locks.
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Reuse an idle lock, or allocate a new one.
    pub fn obtain(&self) -> Arc<WriteLock> {
        self.pool.lock().pop_front().unwrap_or_default()
    }

    /// Return an idle lock. Dropped if the pool is full.
    pub fn offer(&self, lock: Arc<WriteLock>) {
        assert_eq!(
            lock.interested_threads(),
            0,
            "[write locker]: offer a write lock that still has interested threads"
        );
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            pool.push_back(lock);
        }
    }

    /// Count of idle locks.
    pub fn len(&self) -> usize {
        self.pool.lock().len()
    }

    /// Check if there is no idle lock.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per key mutual exclusion for disk cache writers.
///
/// Writers of the same key are serialized. Writers of different keys never block each other. Only keys that are
/// currently locked or waited for own a [`WriteLock`]; idle locks are recycled through a [`WriteLockPool`].
///
/// [`DiskCacheWriteLocker::acquire`] and [`DiskCacheWriteLocker::release`] must be paired by the caller. Unbalanced
/// release panics. Prefer [`DiskCacheWriteLocker::lock`], which releases on drop.
#[derive(Debug, Default)]
pub struct DiskCacheWriteLocker {
    locks: Mutex<HashMap<String, Arc<WriteLock>>>,
    pool: WriteLockPool,
}

impl DiskCacheWriteLocker {
    /// Create a locker with a pool of the given capacity.
    pub fn with_pool_capacity(capacity: usize) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            pool: WriteLockPool::new(capacity),
        }
    }

    /// Block until the write lock of `safe_key` is held by the caller.
    pub fn acquire(&self, safe_key: &str) {
        let lock = {
            let mut locks = self.locks.lock();
            let lock = locks.entry_ref(safe_key).or_insert_with(|| self.pool.obtain()).clone();
            lock.interested_threads.fetch_add(1, Ordering::Relaxed);
            lock
        };
        // Block without the map lock so that other keys are not affected.
        lock.lock();
    }

    /// Release the write lock of `safe_key` held by the caller.
    ///
    /// # Panics
    ///
    /// Panics if the lock of `safe_key` is not held by the calling thread.
    pub fn release(&self, safe_key: &str) {
        let lock = {
            let mut locks = self.locks.lock();
            let lock = match locks.get(safe_key) {
                Some(lock) => lock.clone(),
                None => panic!("[write locker]: release a write lock that is not held, safe key: {safe_key}"),
            };
            assert!(
                lock.is_held_by_current_thread(),
                "[write locker]: release a write lock that is not held by the current thread, safe key: {safe_key}"
            );

            let interested_threads = lock.interested_threads();
            assert!(
                interested_threads >= 1,
                "[write locker]: release a write lock that is not held, safe key: {safe_key}, interested threads: {interested_threads}"
            );
            lock.interested_threads.fetch_sub(1, Ordering::Relaxed);

            if interested_threads == 1 {
                let removed = locks.remove(safe_key);
                match removed {
                    Some(removed) if Arc::ptr_eq(&removed, &lock) => {}
                    _ => panic!(
                        "[write locker]: removed a different write lock than the one released, safe key: {safe_key}"
                    ),
                }
                self.pool.offer(lock.clone());
            }
            lock
        };
        lock.unlock(safe_key);
    }

    /// Acquire the write lock of `safe_key`, released when the guard drops.
    pub fn lock<'a>(&'a self, safe_key: &'a str) -> WriteLockGuard<'a> {
        self.acquire(safe_key);
        WriteLockGuard { locker: self, safe_key }
    }

    /// Count of threads holding or waiting for the lock of `safe_key`.
    pub fn interested_threads(&self, safe_key: &str) -> usize {
        self.locks
            .lock()
            .get(safe_key)
            .map(|lock| lock.interested_threads())
            .unwrap_or_default()
    }

    /// Count of keys that currently own a write lock.
    pub fn active_locks(&self) -> usize {
        self.locks.lock().len()
    }

    /// The free list of idle locks.
    pub fn pool(&self) -> &WriteLockPool {
        &self.pool
    }
}

/// Holds a write lock of a [`DiskCacheWriteLocker`] until dropped.
#[must_use = "the write lock is released when the guard is dropped"]
pub struct WriteLockGuard<'a> {
    locker: &'a DiskCacheWriteLocker,
    safe_key: &'a str,
}

impl Debug for WriteLockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteLockGuard").field("safe_key", &self.safe_key).finish()
    }
}

impl Drop for WriteLockGuard<'_> {
    fn drop(&mut self) {
        self.locker.release(self.safe_key);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicBool, mpsc},
        time::Duration,
    };

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<DiskCacheWriteLocker>();
    }

    #[test]
    fn test_same_key_is_exclusive() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 200;

        let locker = Arc::new(DiskCacheWriteLocker::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(AtomicUsize::new(0));

        let handles = (0..THREADS)
            .map(|_| {
                let locker = locker.clone();
                let inside = inside.clone();
                let entered = entered.clone();
                std::thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        locker.acquire("k");
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        entered.fetch_add(1, Ordering::SeqCst);
                        std::thread::yield_now();
                        assert_eq!(inside.fetch_sub(1, Ordering::SeqCst), 1);
                        locker.release("k");
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(entered.load(Ordering::SeqCst), THREADS * ROUNDS);
        assert_eq!(locker.interested_threads("k"), 0);
        assert_eq!(locker.active_locks(), 0);

        // Must not block after the last release.
        locker.acquire("k");
        assert_eq!(locker.interested_threads("k"), 1);
        locker.release("k");
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let locker = Arc::new(DiskCacheWriteLocker::default());
        let guard = locker.lock("a");

        let (tx, rx) = mpsc::channel();
        let handle = {
            let locker = locker.clone();
            std::thread::spawn(move || {
                let _guard = locker.lock("b");
                tx.send(()).unwrap();
            })
        };

        rx.recv_timeout(Duration::from_secs(10)).unwrap();
        handle.join().unwrap();
        drop(guard);
        assert_eq!(locker.active_locks(), 0);
    }

    #[test]
    fn test_waiter_blocks_until_release() {
        let locker = Arc::new(DiskCacheWriteLocker::default());
        let acquired = Arc::new(AtomicBool::new(false));

        locker.acquire("k");
        let handle = {
            let locker = locker.clone();
            let acquired = acquired.clone();
            std::thread::spawn(move || {
                locker.acquire("k");
                acquired.store(true, Ordering::SeqCst);
                locker.release("k");
            })
        };

        while locker.interested_threads("k") < 2 {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        locker.release("k");
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pool_is_bounded() {
        let locker = DiskCacheWriteLocker::default();
        let keys = (0..20).map(|i| format!("key-{i}")).collect::<Vec<_>>();

        for key in keys.iter() {
            locker.acquire(key);
        }
        assert_eq!(locker.active_locks(), 20);
        assert!(locker.pool().is_empty());

        for key in keys.iter() {
            locker.release(key);
        }
        assert_eq!(locker.active_locks(), 0);
        assert_eq!(locker.pool().len(), WriteLockPool::DEFAULT_CAPACITY);

        // Idle locks are reused.
        locker.acquire("again");
        assert_eq!(locker.pool().len(), WriteLockPool::DEFAULT_CAPACITY - 1);
        locker.release("again");
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn test_release_without_acquire_panics() {
        let locker = DiskCacheWriteLocker::default();
        locker.release("k");
    }

    #[test]
    #[should_panic(expected = "not held")]
    fn test_double_release_panics() {
        let locker = DiskCacheWriteLocker::default();
        locker.acquire("k");
        locker.release("k");
        locker.release("k");
    }

    #[test]
    #[should_panic(expected = "not held by the current thread")]
    fn test_release_from_another_thread_panics() {
        let locker = Arc::new(DiskCacheWriteLocker::default());
        let (acquired_tx, acquired_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        {
            let locker = locker.clone();
            std::thread::spawn(move || {
                locker.acquire("k");
                acquired_tx.send(()).unwrap();
                // Returns once the sender is dropped.
                let _ = done_rx.recv();
                locker.release("k");
            });
        }
        acquired_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        let _done_tx = done_tx;
        locker.release("k");
    }

    #[test]
    fn test_release_from_another_thread_keeps_waiter_out() {
        let locker = Arc::new(DiskCacheWriteLocker::default());
        let inside = Arc::new(AtomicBool::new(false));
        let entered_while_held = Arc::new(AtomicBool::new(false));

        locker.acquire("k");
        inside.store(true, Ordering::SeqCst);

        let waiter = {
            let locker = locker.clone();
            let inside = inside.clone();
            let entered_while_held = entered_while_held.clone();
            std::thread::spawn(move || {
                locker.acquire("k");
                entered_while_held.store(inside.load(Ordering::SeqCst), Ordering::SeqCst);
                locker.release("k");
            })
        };
        while locker.interested_threads("k") < 2 {
            std::thread::yield_now();
        }

        let intruder = {
            let locker = locker.clone();
            std::thread::spawn(move || locker.release("k"))
        };
        assert!(intruder.join().is_err());
        assert_eq!(locker.interested_threads("k"), 2);

        std::thread::sleep(Duration::from_millis(50));
        inside.store(false, Ordering::SeqCst);
        locker.release("k");
        waiter.join().unwrap();

        assert!(!entered_while_held.load(Ordering::SeqCst));
        assert_eq!(locker.active_locks(), 0);
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let locker = Arc::new(DiskCacheWriteLocker::default());
        let result = {
            let locker = locker.clone();
            std::thread::spawn(move || {
                let _guard = locker.lock("k");
                panic!("writer failed");
            })
            .join()
        };
        assert!(result.is_err());
        assert_eq!(locker.active_locks(), 0);

        let _guard = locker.lock("k");
    }
}

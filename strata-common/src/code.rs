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

use std::{fmt::Display, hash::Hash, sync::Arc};

pub use sha2::{Digest, Sha256};

/// Identity of a cacheable resource.
///
/// `Hash` and `Eq` are used for in-memory lookups. [`CacheKey::update_disk_cache_key`] feeds the bytes that identify
/// the key on disk into a SHA-256 digest.
///
/// Two equal keys must contribute identical bytes. Variable length parts should be framed (the stock implementations
/// prefix them with their length) so that composite keys stay unambiguous.
pub trait CacheKey: Hash + Eq + Send + Sync + 'static {
    /// Feed the disk identity of the key into `digest`.
    fn update_disk_cache_key(&self, digest: &mut Sha256);
}

fn update_framed(digest: &mut Sha256, bytes: &[u8]) {
    digest.update((bytes.len() as u64).to_be_bytes());
    digest.update(bytes);
}

impl CacheKey for String {
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        update_framed(digest, self.as_bytes());
    }
}

impl CacheKey for &'static str {
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        update_framed(digest, self.as_bytes());
    }
}

impl CacheKey for Vec<u8> {
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        update_framed(digest, self);
    }
}

macro_rules! impl_cache_key_for_primitives {
    ($($type:ty),* $(,)?) => {
        $(
            impl CacheKey for $type {
                fn update_disk_cache_key(&self, digest: &mut Sha256) {
                    digest.update(self.to_be_bytes());
                }
            }
        )*
    };
}

impl_cache_key_for_primitives! { u8, u16, u32, u64, u128, i8, i16, i32, i64, i128 }

// Pointer sized integers are widened so that digests agree across platforms.
impl CacheKey for usize {
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        (*self as u64).update_disk_cache_key(digest)
    }
}

impl CacheKey for isize {
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        (*self as i64).update_disk_cache_key(digest)
    }
}

impl<K> CacheKey for Arc<K>
where
    K: CacheKey,
{
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        self.as_ref().update_disk_cache_key(digest)
    }
}

impl<K> CacheKey for Box<K>
where
    K: CacheKey,
{
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        self.as_ref().update_disk_cache_key(digest)
    }
}

/// Composite key, e.g. a source key paired with a signature.
impl<A, B> CacheKey for (A, B)
where
    A: CacheKey,
    B: CacheKey,
{
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        self.0.update_disk_cache_key(digest);
        self.1.update_disk_cache_key(digest);
    }
}

impl<A, B, C> CacheKey for (A, B, C)
where
    A: CacheKey,
    B: CacheKey,
    C: CacheKey,
{
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        self.0.update_disk_cache_key(digest);
        self.1.update_disk_cache_key(digest);
        self.2.update_disk_cache_key(digest);
    }
}

/// Wraps any displayable value as a cache key.
///
/// The disk identity is the `Display` rendering of the value, so it must be stable across process runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey<T>(pub T);

impl<T> CacheKey for ObjectKey<T>
where
    T: Display + Hash + Eq + Send + Sync + 'static,
{
    fn update_disk_cache_key(&self, digest: &mut Sha256) {
        update_framed(digest, self.0.to_string().as_bytes());
    }
}

/// A signature that contributes nothing.
///
/// Used when a resource has no version or variant information besides its source key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EmptySignature;

impl CacheKey for EmptySignature {
    fn update_disk_cache_key(&self, _: &mut Sha256) {}
}

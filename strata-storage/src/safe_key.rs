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

use std::fmt::Debug;

use parking_lot::Mutex;
use strata_common::{
    code::{CacheKey, Digest, Sha256},
    error::Result,
};
use strata_memory::LruCache;

/// Maps structured cache keys to fixed length, filesystem safe names.
///
/// The name is the lowercase hex SHA-256 of the bytes the key contributes through [`CacheKey`], so it is stable across
/// calls and across process runs. Recently used names are memoized in a small [`LruCache`].
///
/// Memo lookups only contend on the memo lock. Digest computation shares one hasher and is serialized behind its own
/// lock.
pub struct SafeKeyGenerator<K> {
    memo: LruCache<K, String>,
    digest: Mutex<Sha256>,
}

impl<K> Debug for SafeKeyGenerator<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeKeyGenerator").field("memo", &self.memo).finish()
    }
}

impl<K> SafeKeyGenerator<K>
where
    K: CacheKey + Clone,
{
    /// Default capacity of the memo.
    pub const DEFAULT_MEMO_CAPACITY: usize = 1000;

    /// Create a generator with the default memo capacity.
    pub fn new() -> Result<Self> {
        Self::with_memo_capacity(Self::DEFAULT_MEMO_CAPACITY)
    }

    /// Create a generator that memoizes up to `capacity` keys.
    pub fn with_memo_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            memo: LruCache::new(capacity)?,
            digest: Mutex::new(Sha256::new()),
        })
    }

    /// Get the safe name of a key.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "strata::storage::safe_key::safe_key"))]
    pub fn safe_key(&self, key: &K) -> String {
        if let Some(safe_key) = self.memo.get(key) {
            return safe_key;
        }

        let safe_key = {
            let mut digest = self.digest.lock();
            key.update_disk_cache_key(&mut digest);
            hex::encode(digest.finalize_reset())
        };

        self.memo.put(key.clone(), safe_key.clone());
        safe_key
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strata_common::code::{EmptySignature, ObjectKey};

    use super::*;

    fn is_safe(name: &str) -> bool {
        name.len() == 64 && name.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    #[test]
    fn test_safe_keys_are_lowercase_hex() {
        let generator = SafeKeyGenerator::<String>::new().unwrap();
        for i in 0..1000 {
            let safe_key = generator.safe_key(&format!("https://images.example.com/{i}.png"));
            assert!(is_safe(&safe_key), "unexpected safe key: {safe_key}");
        }
    }

    #[test]
    fn test_stable_across_calls_and_instances() {
        let a = SafeKeyGenerator::<(ObjectKey<String>, EmptySignature)>::new().unwrap();
        let b = SafeKeyGenerator::<(ObjectKey<String>, EmptySignature)>::new().unwrap();
        let key = (ObjectKey("https://a/b.png".to_string()), EmptySignature);

        let first = a.safe_key(&key);
        assert_eq!(a.safe_key(&key), first);
        assert_eq!(a.safe_key(&key.clone()), first);
        assert_eq!(b.safe_key(&key), first);
    }

    #[test]
    fn test_known_digest() {
        // SHA-256 over the big endian bytes of 1u64.
        let generator = SafeKeyGenerator::<u64>::new().unwrap();
        assert_eq!(
            generator.safe_key(&1),
            "cd2662154e6d76b2b2b92e70c0cac3ccf534f9b74eb5b89819ec509083d00a50"
        );
    }

    #[test]
    fn test_distinct_keys_distinct_names() {
        let generator = SafeKeyGenerator::<u64>::new().unwrap();
        let names = (0..1000u64).map(|i| generator.safe_key(&i)).collect::<std::collections::HashSet<_>>();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_memo_is_bounded() {
        let generator = SafeKeyGenerator::<u64>::with_memo_capacity(16).unwrap();
        let first = generator.safe_key(&0);
        for i in 0..100u64 {
            generator.safe_key(&i);
        }
        assert_eq!(generator.memo.len(), 16);
        assert_eq!(generator.safe_key(&0), first);
    }

    #[test]
    fn test_concurrent_generation_agrees() {
        let generator = Arc::new(SafeKeyGenerator::<u64>::with_memo_capacity(8).unwrap());
        let expected = (0..64u64).map(|i| generator.safe_key(&i)).collect::<Vec<_>>();
        let expected = Arc::new(expected);

        let handles = (0..8)
            .map(|_| {
                let generator = generator.clone();
                let expected = expected.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        for i in 0..64u64 {
                            assert_eq!(generator.safe_key(&i), expected[i as usize]);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

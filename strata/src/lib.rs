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

//! strata - a two-tier resource cache.
//!
//! Decoded resources live in a size bounded in-memory [`LruResourceCache`](crate::memory::LruResourceCache). Encoded
//! bytes live in a durable [`DiskCache`](crate::storage::DiskCache) whose entries are named by the SHA-256 of the
//! cache key. A client checks the memory tier first, falls back to the disk tier on a miss, and promotes what it reads
//! back into memory.
//!
//! ```
//! use std::{io::Write, sync::Arc};
//!
//! use strata::prelude::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let disk = DiskCacheBuilder::new(dir.path()).build::<String>().unwrap();
//! let memory = LruResourceCache::<String, Vec<u8>>::new(64 * 1024).unwrap();
//!
//! let key = "https://images.example.com/cat.png".to_string();
//! disk.put(&key, &mut |sink: &mut dyn Write| -> std::io::Result<bool> {
//!     sink.write_all(b"encoded cat")?;
//!     Ok(true)
//! });
//!
//! if memory.get(&key).is_none() {
//!     let bytes = disk.get(&key).unwrap();
//!     memory.put(key.clone(), Arc::new(bytes.to_vec()));
//! }
//! assert_eq!(memory.get(&key).unwrap().as_slice(), b"encoded cat");
//! ```

/// Shared components: errors, assertions and cache keys.
pub mod common {
    pub use strata_common::*;
}

/// The in-memory tier.
pub mod memory {
    pub use strata_memory::*;
}

/// The disk tier.
pub mod storage {
    pub use strata_storage::*;
}

/// Re-export of the commonly used types.
pub mod prelude;

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

//! Disk tier for strata.
//!
//! [`DiskCache`] is the key to blob cache used by clients. [`LruDiskCache`] implements it over a size bounded
//! [`DiskLruStore`], naming entries with a [`SafeKeyGenerator`] and serializing writers of the same key with a
//! [`DiskCacheWriteLocker`].

mod disk;
mod safe_key;
mod store;
mod write_lock;

/// Re-export of the commonly used types.
pub mod prelude;

pub use prelude::*;

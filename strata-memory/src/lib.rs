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

//! In-memory tier for strata.
//!
//! [`LruCache`] is the generic size bounded engine. [`LruResourceCache`] specializes it for decoded resources and
//! maps memory pressure signals to eviction. [`MemorySizeCalculator`] derives default budgets from the device.

mod cache;
mod calculator;
mod lru;

/// Re-export of the commonly used types.
pub mod prelude;

pub use prelude::*;

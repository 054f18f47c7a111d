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

use serde::{Deserialize, Serialize};
use strata_common::error::{Error, Result};

const MIB: usize = 1024 * 1024;
const BYTES_PER_PIXEL: usize = 4;
const LOW_MEMORY_ARRAY_POOL_DIVISOR: usize = 2;

/// What the platform reports about the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Screen width in pixels.
    pub screen_width: usize,
    /// Screen height in pixels.
    pub screen_height: usize,
    /// Per process memory ceiling in MiB.
    pub memory_class_mb: usize,
    /// Whether the platform flags the device as low on memory.
    pub low_memory: bool,
}

/// Tunables of [`MemorySizeCalculator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySizeOptions {
    /// How many full screens of pixels the memory cache should hold.
    pub memory_cache_screens: f32,
    /// How many full screens of pixels the bitmap pool should hold. Ignored on low memory devices.
    pub bitmap_pool_screens: f32,
    /// Fraction of the memory class all budgets may use together.
    pub max_size_multiplier: f32,
    /// Same as `max_size_multiplier`, on low memory devices.
    pub low_memory_max_size_multiplier: f32,
    /// Byte array pool budget. Halved on low memory devices.
    pub array_pool_size: usize,
}

impl Default for MemorySizeOptions {
    fn default() -> Self {
        Self {
            memory_cache_screens: 2.0,
            bitmap_pool_screens: 4.0,
            max_size_multiplier: 0.4,
            low_memory_max_size_multiplier: 0.33,
            array_pool_size: 4 * MIB,
        }
    }
}

/// Default byte budgets for the memory cache and its companion pools.
///
/// The budgets are derived from the screen size, so that a fixed number of full screen images fit, and bounded by a
/// fraction of the memory class of the process. When the screen based targets do not fit, the space left over by the
/// array pool is split between the memory cache and the bitmap pool in proportion to their screen counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySizeCalculator {
    memory_cache_size: usize,
    bitmap_pool_size: usize,
    array_pool_size: usize,
}

impl MemorySizeCalculator {
    /// Start building with the default options.
    pub fn builder(profile: DeviceProfile) -> MemorySizeCalculatorBuilder {
        MemorySizeCalculatorBuilder::new(profile)
    }

    /// Budget of the memory cache in bytes.
    pub fn memory_cache_size(&self) -> usize {
        self.memory_cache_size
    }

    /// Budget of the bitmap pool in bytes.
    pub fn bitmap_pool_size(&self) -> usize {
        self.bitmap_pool_size
    }

    /// Budget of the byte array pool in bytes.
    pub fn array_pool_size(&self) -> usize {
        self.array_pool_size
    }
}

/// Builder for [`MemorySizeCalculator`].
#[derive(Debug, Clone)]
pub struct MemorySizeCalculatorBuilder {
    profile: DeviceProfile,
    options: MemorySizeOptions,
}

impl MemorySizeCalculatorBuilder {
    /// Create a builder for the device, with the default options.
    pub fn new(profile: DeviceProfile) -> Self {
        Self {
            profile,
            options: MemorySizeOptions::default(),
        }
    }

    /// Replace all options at once, e.g. with options loaded from a config file.
    pub fn with_options(mut self, options: MemorySizeOptions) -> Self {
        self.options = options;
        self
    }

    /// Set how many screens the memory cache should hold.
    ///
    /// Default: 2.
    pub fn with_memory_cache_screens(mut self, screens: f32) -> Self {
        self.options.memory_cache_screens = screens;
        self
    }

    /// Set how many screens the bitmap pool should hold.
    ///
    /// Default: 4.
    pub fn with_bitmap_pool_screens(mut self, screens: f32) -> Self {
        self.options.bitmap_pool_screens = screens;
        self
    }

    /// Set the fraction of the memory class all budgets may use.
    ///
    /// Default: 0.4.
    pub fn with_max_size_multiplier(mut self, multiplier: f32) -> Self {
        self.options.max_size_multiplier = multiplier;
        self
    }

    /// Set the fraction of the memory class all budgets may use on low memory devices.
    ///
    /// Default: 0.33.
    pub fn with_low_memory_max_size_multiplier(mut self, multiplier: f32) -> Self {
        self.options.low_memory_max_size_multiplier = multiplier;
        self
    }

    /// Set the byte array pool budget.
    ///
    /// Default: 4 MiB.
    pub fn with_array_pool_size(mut self, bytes: usize) -> Self {
        self.options.array_pool_size = bytes;
        self
    }

    fn validate(&self) -> Result<()> {
        let options = &self.options;
        for (name, screens) in [
            ("memory_cache_screens", options.memory_cache_screens),
            ("bitmap_pool_screens", options.bitmap_pool_screens),
        ] {
            if !screens.is_finite() || screens < 0.0 {
                return Err(Error::config("screen count must be a finite non-negative number").with_context(name, screens));
            }
        }
        for (name, multiplier) in [
            ("max_size_multiplier", options.max_size_multiplier),
            ("low_memory_max_size_multiplier", options.low_memory_max_size_multiplier),
        ] {
            if !(0.0..=1.0).contains(&multiplier) {
                return Err(Error::config("size multiplier must be within [0, 1]").with_context(name, multiplier));
            }
        }
        Ok(())
    }

    /// Compute the budgets.
    pub fn build(self) -> Result<MemorySizeCalculator> {
        self.validate()?;

        let Self { profile, options } = self;

        let array_pool_size = if profile.low_memory {
            options.array_pool_size / LOW_MEMORY_ARRAY_POOL_DIVISOR
        } else {
            options.array_pool_size
        };

        let multiplier = if profile.low_memory {
            options.low_memory_max_size_multiplier
        } else {
            options.max_size_multiplier
        };
        let max_size = (profile.memory_class_mb as f64 * MIB as f64 * multiplier as f64).round() as usize;

        let screen_size = profile.screen_width * profile.screen_height * BYTES_PER_PIXEL;
        let bitmap_pool_screens = if profile.low_memory {
            0.0
        } else {
            options.bitmap_pool_screens
        };
        let memory_cache_screens = options.memory_cache_screens;

        let target_bitmap_pool_size = (screen_size as f64 * bitmap_pool_screens as f64).round() as usize;
        let target_memory_cache_size = (screen_size as f64 * memory_cache_screens as f64).round() as usize;
        let available_size = max_size.saturating_sub(array_pool_size);

        let (memory_cache_size, bitmap_pool_size) =
            if target_memory_cache_size + target_bitmap_pool_size <= available_size {
                (target_memory_cache_size, target_bitmap_pool_size)
            } else {
                let screens = (bitmap_pool_screens + memory_cache_screens) as f64;
                if screens > 0.0 {
                    let part = available_size as f64 / screens;
                    (
                        (part * memory_cache_screens as f64).round() as usize,
                        (part * bitmap_pool_screens as f64).round() as usize,
                    )
                } else {
                    (0, 0)
                }
            };

        tracing::debug!(
            memory_cache_size,
            bitmap_pool_size,
            array_pool_size,
            max_size,
            screen_size,
            low_memory = profile.low_memory,
            fits = target_memory_cache_size + target_bitmap_pool_size <= available_size,
            "[memory size calculator]: budgets calculated"
        );

        Ok(MemorySizeCalculator {
            memory_cache_size,
            bitmap_pool_size,
            array_pool_size,
        })
    }
}

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

/// Checks an internal invariant.
///
/// Compiles to `debug_assert!` unless feature "strict_assertions" is enabled, in which case it is a hard `assert!`.
#[macro_export]
macro_rules! strict_assert {
    ($($arg:tt)*) => {
        #[cfg(feature = "strict_assertions")]
        assert!($($arg)*);
        #[cfg(not(feature = "strict_assertions"))]
        debug_assert!($($arg)*);
    }
}

/// Equality flavor of [`strict_assert!`].
#[macro_export]
macro_rules! strict_assert_eq {
    ($($arg:tt)*) => {
        #[cfg(feature = "strict_assertions")]
        assert_eq!($($arg)*);
        #[cfg(not(feature = "strict_assertions"))]
        debug_assert_eq!($($arg)*);
    }
}

/// Checks that an accounted usage stays within its budget.
///
/// Used after every mutating cache operation: `usage <= budget` must hold once the call returns.
#[macro_export]
macro_rules! strict_assert_within_budget {
    ($usage:expr, $budget:expr) => {
        $crate::strict_assert!(
            $usage <= $budget,
            "usage {} exceeds budget {}",
            $usage,
            $budget
        )
    };
}

// Copyright 2026 tilecache Project Authors
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

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Proportion of live entries removed by one eviction pass, in `(0, 1]`.
///
/// Out-of-range values are rejected on construction instead of being clamped, so a bad configuration can neither
/// evict everything nor nothing.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct UnloadRate(f64);

impl UnloadRate {
    /// Create an unload rate. Returns a config error unless `0 < rate <= 1`.
    pub fn new(rate: f64) -> Result<Self> {
        if rate.is_nan() || rate <= 0.0 || rate > 1.0 {
            return Err(Error::config("unload rate must be in (0, 1]").with_context("rate", rate));
        }
        Ok(Self(rate))
    }

    /// The rate as a float.
    pub fn get(&self) -> f64 {
        self.0
    }

    /// Number of entries to unload out of `live`, rounded half to even.
    ///
    /// Returns at least 1 when `live > 0`, so a pass over a non-empty tier always makes progress, and never more
    /// than `live`.
    pub fn unload_count(&self, live: usize) -> usize {
        if live == 0 {
            return 0;
        }
        let count = (live as f64 * self.0).round_ties_even() as usize;
        count.clamp(1, live)
    }
}

impl Default for UnloadRate {
    fn default() -> Self {
        Self(0.3)
    }
}

impl Display for UnloadRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<f64> for UnloadRate {
    type Error = Error;

    fn try_from(rate: f64) -> Result<Self> {
        Self::new(rate)
    }
}

impl From<UnloadRate> for f64 {
    fn from(rate: UnloadRate) -> Self {
        rate.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_reject_out_of_range() {
        for rate in [0.0, -0.5, 1.5, f64::NAN, f64::INFINITY] {
            let err = UnloadRate::new(rate).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }
        assert!(UnloadRate::new(1.0).is_ok());
        assert!(UnloadRate::new(f64::MIN_POSITIVE).is_ok());
    }

    #[test]
    fn test_unload_count() {
        let half = UnloadRate::new(0.5).unwrap();
        assert_eq!(half.unload_count(0), 0);
        assert_eq!(half.unload_count(1), 1);
        assert_eq!(half.unload_count(4), 2);
        // 2.5 rounds to even
        assert_eq!(half.unload_count(5), 2);
        assert_eq!(half.unload_count(7), 4);

        let tiny = UnloadRate::new(0.01).unwrap();
        assert_eq!(tiny.unload_count(10), 1);

        let all = UnloadRate::new(1.0).unwrap();
        assert_eq!(all.unload_count(7), 7);
    }
}

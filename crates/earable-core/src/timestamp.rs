//! Host-side wall clock timestamps
//!
//! Device ticks are carried as raw `u32` values next to the host receipt time;
//! only the host clock is used to place event markers.

use core::fmt;
use core::ops::Sub;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, as observed by the receiving host
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostTimestamp(f64);

impl HostTimestamp {
    /// Current host time
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(elapsed.as_secs_f64())
    }

    /// Create from fractional seconds since the epoch
    #[inline]
    pub const fn from_secs_f64(secs: f64) -> Self {
        Self(secs)
    }

    /// Fractional seconds since the epoch
    #[inline]
    pub const fn as_secs_f64(&self) -> f64 {
        self.0
    }

    /// Shift by a number of seconds (may be negative)
    #[inline]
    pub fn offset(&self, secs: f64) -> Self {
        Self(self.0 + secs)
    }
}

impl Sub for HostTimestamp {
    type Output = f64;

    fn sub(self, rhs: Self) -> f64 {
        self.0 - rhs.0
    }
}

impl fmt::Display for HostTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_epoch() {
        assert!(HostTimestamp::now().as_secs_f64() > 1_600_000_000.0);
    }

    #[test]
    fn test_difference_and_offset() {
        let a = HostTimestamp::from_secs_f64(10.0);
        let b = a.offset(2.5);
        assert_eq!(b - a, 2.5);
        assert!(b > a);
    }
}

//! Virtual time used for watermarks, processing time and time columns.

use std::fmt;
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Nanoseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Time(i64);

impl Time {
    /// The smallest representable time. Initial watermark of every dataset.
    pub const MIN: Self = Self(i64::MIN);
    /// The largest representable time. Sources advance to it when exhausted.
    pub const MAX: Self = Self(i64::MAX);
    /// The Unix epoch.
    pub const ZERO: Self = Self(0);

    /// Create a time from nanoseconds since the epoch.
    pub const fn new(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Nanoseconds since the epoch.
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Add a duration, saturating at [`Time::MAX`].
    pub fn saturating_add(self, delta: Duration) -> Self {
        let nanos = i64::try_from(delta.as_nanos()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        self.saturating_add(rhs)
    }
}

impl From<SystemTime> for Time {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)),
            Err(e) => Self(-i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX)),
        }
    }
}

impl From<i64> for Time {
    fn from(nanos: i64) -> Self {
        Self(nanos)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MIN => f.write_str("-inf"),
            Self::MAX => f.write_str("+inf"),
            Self(n) => write!(f, "{n}ns"),
        }
    }
}

//! Microsecond-precision timestamps for replicated records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
///
/// Replicated records order their writes by this value; the store guarantees
/// it is strictly increasing per record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch itself; sorts before every real timestamp.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Returns the current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_micros() as u64;
        Self(micros)
    }

    /// Constructs a timestamp from raw microseconds.
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Returns the raw microsecond value.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Returns the next representable instant.
    pub fn succ(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

//! Block timestamps for escrow deadlines, maturities and dispute windows.
//!
//! Every temporal guard in the protocol compares a [`UnixTimestamp`] taken
//! from the ledger clock against a stored timestamp plus one of the duration
//! constants below. Timestamps are trusted within normal consensus tolerance,
//! not to the second.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::SystemTime;

/// One hour, in seconds.
pub const HOUR: u64 = 60 * 60;

/// One day, in seconds.
pub const DAY: u64 = 24 * HOUR;

/// A Unix timestamp representing seconds since the Unix epoch (1970-01-01T00:00:00Z).
///
/// Used for `depositTime`, `maturityTime`, `disputeStartTime` and for the
/// `deadline` carried in every signed authorization.
///
/// # Serialization
///
/// Serialized as a stringified integer to avoid loss of precision in JSON, since
/// `JavaScript`'s `Number` type cannot safely represent all 64-bit integers.
///
/// ```json
/// "1699999999"
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(Self(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    /// Saturates at `u64::MAX` so far-future deadlines never wrap.
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0.saturating_add(rhs))
    }
}

impl UnixTimestamp {
    /// Creates a new [`UnixTimestamp`] from a raw seconds value.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current system time as a [`UnixTimestamp`].
    ///
    /// A clock set before the Unix epoch reads as zero.
    #[must_use]
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self(now)
    }

    /// Returns the timestamp as raw seconds since the Unix epoch.
    #[must_use]
    pub const fn as_secs(&self) -> u64 {
        self.0
    }

    /// Returns `true` once strictly more than `window` seconds have passed since `start`.
    #[must_use]
    pub const fn is_past(&self, start: Self, window: u64) -> bool {
        self.0 > start.0.saturating_add(window)
    }

    /// Returns `true` once at least `window` seconds have passed since `start`.
    #[must_use]
    pub const fn has_elapsed(&self, start: Self, window: u64) -> bool {
        self.0 >= start.0.saturating_add(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_string() {
        let ts = UnixTimestamp::from_secs(1_699_999_999);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"1699999999\"");
        let back: UnixTimestamp = serde_json::from_str("\"1699999999\"").unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn rejects_negative_strings() {
        let result: Result<UnixTimestamp, _> = serde_json::from_str("\"-5\"");
        assert!(result.is_err());
    }

    #[test]
    fn strict_and_inclusive_windows() {
        let start = UnixTimestamp::from_secs(1_000);
        let at = UnixTimestamp::from_secs(1_000 + HOUR);
        assert!(at.has_elapsed(start, HOUR));
        assert!(!at.is_past(start, HOUR));
        assert!((at + 1).is_past(start, HOUR));
    }

    #[test]
    fn addition_saturates() {
        let ts = UnixTimestamp::from_secs(u64::MAX - 1);
        assert_eq!((ts + 10).as_secs(), u64::MAX);
    }
}

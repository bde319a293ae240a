//! Time handling utilities for TickDB
//!
//! Write payloads carry timestamps either as epoch integers scaled by a
//! precision unit or as RFC3339 / RFC3339-nano strings.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

use crate::error::{TickError, TickResult};

/// Epoch precision unit for integer timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
}

impl Precision {
    /// Parse a wire precision code. An empty string selects the default.
    pub fn parse(s: &str) -> TickResult<Self> {
        match s {
            "" | "n" => Ok(Precision::Nanosecond),
            "u" => Ok(Precision::Microsecond),
            "ms" => Ok(Precision::Millisecond),
            "s" => Ok(Precision::Second),
            "m" => Ok(Precision::Minute),
            "h" => Ok(Precision::Hour),
            other => Err(TickError::InvalidTimestamp(format!(
                "invalid precision {:?}",
                other
            ))),
        }
    }

    /// Nanoseconds per unit of this precision.
    pub fn nanos_per_unit(&self) -> i64 {
        match self {
            Precision::Nanosecond => 1,
            Precision::Microsecond => 1_000,
            Precision::Millisecond => 1_000_000,
            Precision::Second => 1_000_000_000,
            Precision::Minute => 60 * 1_000_000_000,
            Precision::Hour => 3_600 * 1_000_000_000,
        }
    }

    /// Interpret an epoch count in this precision as an instant.
    pub fn epoch_to_timestamp(&self, epoch: i64) -> TickResult<DateTime<Utc>> {
        let nanos = epoch.checked_mul(self.nanos_per_unit()).ok_or_else(|| {
            TickError::InvalidTimestamp(format!("timestamp {} out of range", epoch))
        })?;
        Ok(Utc.timestamp_nanos(nanos))
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Precision::Nanosecond => "n",
            Precision::Microsecond => "u",
            Precision::Millisecond => "ms",
            Precision::Second => "s",
            Precision::Minute => "m",
            Precision::Hour => "h",
        };
        write!(f, "{}", s)
    }
}

/// Parse an RFC3339 or RFC3339-nano timestamp string.
pub fn parse_rfc3339(s: &str) -> TickResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TickError::InvalidTimestamp(format!("invalid timestamp {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_codes() {
        for (code, expected) in [
            ("n", Precision::Nanosecond),
            ("u", Precision::Microsecond),
            ("ms", Precision::Millisecond),
            ("s", Precision::Second),
            ("m", Precision::Minute),
            ("h", Precision::Hour),
            ("", Precision::Nanosecond),
        ] {
            assert_eq!(Precision::parse(code).unwrap(), expected);
        }
        assert!(Precision::parse("d").is_err());
    }

    #[test]
    fn test_epoch_resolution() {
        let now = Utc::now();

        let cases: [(Precision, i64); 6] = [
            (Precision::Nanosecond, now.timestamp_nanos_opt().unwrap()),
            (
                Precision::Microsecond,
                now.timestamp_nanos_opt().unwrap() / 1_000,
            ),
            (Precision::Millisecond, now.timestamp_millis()),
            (Precision::Second, now.timestamp()),
            (Precision::Minute, now.timestamp() / 60),
            (Precision::Hour, now.timestamp() / 3_600),
        ];

        for (precision, epoch) in cases {
            let ts = precision.epoch_to_timestamp(epoch).unwrap();
            assert_eq!(
                ts.timestamp_nanos_opt().unwrap(),
                epoch * precision.nanos_per_unit(),
                "precision {}",
                precision
            );
        }
    }

    #[test]
    fn test_epoch_max_nanoseconds() {
        let ts = Precision::Nanosecond
            .epoch_to_timestamp(i64::MAX)
            .unwrap();
        assert_eq!(ts.timestamp_nanos_opt().unwrap(), i64::MAX);
    }

    #[test]
    fn test_epoch_overflow_is_an_error() {
        assert!(Precision::Hour.epoch_to_timestamp(i64::MAX).is_err());
    }

    #[test]
    fn test_rfc3339_roundtrip() {
        let ts = parse_rfc3339("2009-11-10T23:00:00Z").unwrap();
        assert_eq!(ts.timestamp(), 1257894000);

        let nano = parse_rfc3339("2009-11-10T23:00:00.000000001Z").unwrap();
        assert_eq!(nano.timestamp_nanos_opt().unwrap(), 1257894000000000001);

        assert!(parse_rfc3339("not a time").is_err());
    }
}

//! Time handling for forcing valid times.

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{ForcingError, ForcingResult};

/// Layout of the `model_output_valid_time` attribute in NWM files.
pub const NWM_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Layout of the `time` column in written catchment tables.
pub const OUTPUT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Layout of profiling log timestamps.
pub const PROFILE_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Valid time of one forcing frame (UTC, second resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidTime(pub NaiveDateTime);

impl ValidTime {
    pub fn new(datetime: NaiveDateTime) -> Self {
        Self(datetime)
    }

    /// Parse the raw `model_output_valid_time` attribute, e.g.
    /// `2023-01-01_01:00:00`.
    ///
    /// The date and clock tokens are split on the first underscore and
    /// rejoined with a space before parsing.
    pub fn from_nwm_attribute(raw: &str) -> ForcingResult<Self> {
        let raw = raw.trim().trim_end_matches('\0');
        let (date, clock) = raw
            .split_once('_')
            .ok_or_else(|| ForcingError::InvalidData(format!("valid time '{}' has no '_'", raw)))?;
        Self::parse(&format!("{} {}", date, clock))
    }

    /// Parse a time in the output table layout (`YYYY-MM-DD HH:MM:SS`).
    pub fn parse(s: &str) -> ForcingResult<Self> {
        NaiveDateTime::parse_from_str(s.trim(), OUTPUT_TIME_FORMAT)
            .map(Self)
            .map_err(|e| ForcingError::InvalidData(format!("invalid time '{}': {}", s, e)))
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.0.and_utc().timestamp()
    }

    pub fn from_timestamp(secs: i64) -> ForcingResult<Self> {
        DateTime::from_timestamp(secs, 0)
            .map(|dt| Self(dt.naive_utc()))
            .ok_or_else(|| ForcingError::InvalidData(format!("timestamp {} out of range", secs)))
    }
}

impl fmt::Display for ValidTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(OUTPUT_TIME_FORMAT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_nwm_attribute() {
        let t = ValidTime::from_nwm_attribute("2023-01-01_01:00:00").unwrap();
        assert_eq!(t.to_string(), "2023-01-01 01:00:00");
    }

    #[test]
    fn test_from_nwm_attribute_trailing_nul() {
        let t = ValidTime::from_nwm_attribute("2023-06-15_23:00:00\0").unwrap();
        assert_eq!(t.to_string(), "2023-06-15 23:00:00");
    }

    #[test]
    fn test_from_nwm_attribute_rejects_missing_separator() {
        assert!(ValidTime::from_nwm_attribute("2023-01-01 01:00:00").is_err());
        assert!(ValidTime::from_nwm_attribute("garbage").is_err());
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let t = ValidTime::parse("2020-02-29 12:00:00").unwrap();
        let back = ValidTime::from_timestamp(t.timestamp()).unwrap();
        assert_eq!(t, back);
        assert_eq!(ValidTime::parse("1970-01-01 00:00:00").unwrap().timestamp(), 0);
    }

    #[test]
    fn test_ordering_follows_time() {
        let a = ValidTime::parse("2023-01-01 01:00:00").unwrap();
        let b = ValidTime::parse("2023-01-01 02:00:00").unwrap();
        assert!(a < b);
    }
}

//! Simulation dates and date ranges.
//!
//! Model control files use the fixed format `YYYY-MM-DD HH:MM:SS`; a bare
//! date is accepted on input and taken as midnight.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::error::{CstarError, Result};

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A point in simulation time (no timezone; model time is naive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimDate(NaiveDateTime);

impl SimDate {
    pub fn new(inner: NaiveDateTime) -> Self {
        SimDate(inner)
    }

    /// Parse `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (midnight).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, DATE_TIME_FORMAT) {
            return Ok(SimDate(dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(SimDate(d.and_hms_opt(0, 0, 0).expect("midnight is valid")));
        }
        Err(CstarError::Validation(format!(
            "invalid date {s:?}: expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"
        )))
    }

    pub fn inner(&self) -> NaiveDateTime {
        self.0
    }

    /// Seconds from `self` to `other` (negative when `other` is earlier).
    pub fn seconds_until(&self, other: &SimDate) -> i64 {
        (other.0 - self.0).num_seconds()
    }
}

impl std::fmt::Display for SimDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format(DATE_TIME_FORMAT))
    }
}

impl Serialize for SimDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SimDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SimDate::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An inclusive date range with `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: SimDate,
    pub end: SimDate,
}

impl DateRange {
    pub fn new(start: SimDate, end: SimDate) -> Result<Self> {
        if start > end {
            return Err(CstarError::Validation(format!(
                "date range start {start} is after end {end}"
            )));
        }
        Ok(DateRange { start, end })
    }

    pub fn parse(start: &str, end: &str) -> Result<Self> {
        DateRange::new(SimDate::parse(start)?, SimDate::parse(end)?)
    }

    pub fn contains(&self, date: &SimDate) -> bool {
        self.start <= *date && *date <= self.end
    }

    pub fn is_subset_of(&self, other: &DateRange) -> bool {
        other.start <= self.start && self.end <= other.end
    }

    /// Intersection of two ranges, when non-empty.
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start <= end {
            Some(DateRange { start, end })
        } else {
            None
        }
    }

    /// Whole-range duration in seconds.
    pub fn duration_seconds(&self) -> i64 {
        self.start.seconds_until(&self.end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_and_bare_date() {
        let full = SimDate::parse("2012-01-01 12:00:00").unwrap();
        assert_eq!(full.to_string(), "2012-01-01 12:00:00");

        let bare = SimDate::parse("2012-01-01").unwrap();
        assert_eq!(bare.to_string(), "2012-01-01 00:00:00");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SimDate::parse("Jan 1 2012").is_err());
        assert!(SimDate::parse("2012-13-01").is_err());
    }

    #[test]
    fn range_ordering_enforced() {
        assert!(DateRange::parse("2012-02-01", "2012-01-01").is_err());
        let r = DateRange::parse("2012-01-01", "2012-02-01").unwrap();
        assert!(r.contains(&SimDate::parse("2012-01-15").unwrap()));
        assert!(!r.contains(&SimDate::parse("2012-02-02").unwrap()));
    }

    #[test]
    fn subset_and_intersection() {
        let outer = DateRange::parse("2012-01-01 12:00:00", "2012-12-31 12:00:00").unwrap();
        let inner = DateRange::parse("2012-02-01", "2012-03-01").unwrap();
        assert!(inner.is_subset_of(&outer));
        assert!(!outer.is_subset_of(&inner));

        let left = DateRange::parse("2012-01-01", "2012-06-01").unwrap();
        let right = DateRange::parse("2012-03-01", "2012-09-01").unwrap();
        let both = left.intersect(&right).unwrap();
        assert_eq!(both.start, SimDate::parse("2012-03-01").unwrap());
        assert_eq!(both.end, SimDate::parse("2012-06-01").unwrap());

        let disjoint = DateRange::parse("2013-01-01", "2013-02-01").unwrap();
        assert!(left.intersect(&disjoint).is_none());
    }

    #[test]
    fn serde_uses_canonical_format() {
        let r = DateRange::parse("2012-01-01 12:00:00", "2012-12-31 12:00:00").unwrap();
        let yaml = serde_yaml::to_string(&r).unwrap();
        assert!(yaml.contains("2012-01-01 12:00:00"));
        let back: DateRange = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, r);
    }
}

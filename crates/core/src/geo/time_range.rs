use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive acquisition period. `end` is always strictly after `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimeRange")]
pub struct TimeRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawTimeRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawTimeRange> for TimeRange {
    type Error = Error;

    fn try_from(raw: RawTimeRange) -> Result<Self> {
        TimeRange::new(raw.start, raw.end)
    }
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidTimeRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` dates
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Length of the period in days
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| Error::InvalidDate {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let range = TimeRange::parse("2023-06-01", "2023-06-30").unwrap();
        assert_eq!(range.days(), 29);
        assert_eq!(range.start().to_string(), "2023-06-01");
    }

    #[test]
    fn test_end_must_follow_start() {
        assert!(matches!(
            TimeRange::parse("2023-06-30", "2023-06-01"),
            Err(Error::InvalidTimeRange { .. })
        ));
        assert!(TimeRange::parse("2023-06-01", "2023-06-01").is_err());
    }

    #[test]
    fn test_bad_date() {
        assert!(matches!(
            TimeRange::parse("2023-13-01", "2023-12-31"),
            Err(Error::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_serde() {
        let range = TimeRange::parse("2024-01-01", "2024-02-01").unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, r#"{"start":"2024-01-01","end":"2024-02-01"}"#);

        let back: TimeRange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, range);

        let inverted = r#"{"start":"2024-02-01","end":"2024-01-01"}"#;
        assert!(serde_json::from_str::<TimeRange>(inverted).is_err());
    }
}

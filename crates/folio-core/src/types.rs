use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Enums
// =============================================================================

/// Recurring cadence of the autonomous loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub const ALL: [Cadence; 3] = [Cadence::Daily, Cadence::Weekly, Cadence::Monthly];
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            _ => Err(format!("Unknown cadence: {}", s)),
        }
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in seconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    pub fn age_days(&self) -> u32 {
        let elapsed = Timestamp::now().0 - self.0;
        (elapsed.max(0) / 86400) as u32
    }

    /// The timestamp `days` days before this one.
    pub fn minus_days(&self, days: u32) -> Self {
        Self(self.0 - i64::from(days) * 86400)
    }
}

// =============================================================================
// Time zones and calendar keys
// =============================================================================

/// Parse an IANA time zone name, falling back to UTC.
pub fn parse_timezone(name: &str) -> Tz {
    match name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            if !name.is_empty() {
                warn!(timezone = %name, "Unknown time zone, using UTC");
            }
            Tz::UTC
        }
    }
}

/// Calendar date of `at` in the given zone.
pub fn local_date(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// ISO week key such as `2026-W42`.
pub fn week_key(date: NaiveDate) -> String {
    let week = date.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Month key such as `2026-10`.
pub fn month_key(date: NaiveDate) -> String {
    format!("{}-{:02}", date.year(), date.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cadence_display_and_parse() {
        for cadence in Cadence::ALL {
            assert_eq!(cadence.to_string().parse::<Cadence>().unwrap(), cadence);
        }
        assert!("hourly".parse::<Cadence>().is_err());
    }

    #[test]
    fn test_timestamp_now_and_age() {
        let ts = Timestamp::now();
        assert_eq!(ts.age_days(), 0);
        assert_eq!(ts.minus_days(3).age_days(), 3);
    }

    #[test]
    fn test_timestamp_to_datetime_roundtrip() {
        let now = Utc::now();
        let ts = Timestamp::from_datetime(now);
        assert_eq!(ts.to_datetime().timestamp(), now.timestamp());
    }

    #[test]
    fn test_parse_timezone_fallback() {
        assert_eq!(parse_timezone("Europe/Berlin"), Tz::Europe__Berlin);
        assert_eq!(parse_timezone("Mars/Olympus"), Tz::UTC);
        assert_eq!(parse_timezone(""), Tz::UTC);
    }

    #[test]
    fn test_local_date_crosses_midnight() {
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 23, 30, 0).unwrap();
        let tokyo = local_date(at, Tz::Asia__Tokyo);
        assert_eq!(tokyo, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
        assert_eq!(local_date(at, Tz::UTC), NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
    }

    #[test]
    fn test_week_and_month_keys() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(week_key(date), "2026-W42");
        assert_eq!(month_key(date), "2026-10");

        // ISO week-year differs from the calendar year at the boundary.
        let new_year = NaiveDate::from_ymd_opt(2027, 1, 1).unwrap();
        assert_eq!(week_key(new_year), "2026-W53");
    }
}

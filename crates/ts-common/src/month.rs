//! Calendar month keys used to name month-sharded tables.
//!
//! A [`MonthKey`] is the `YYYYMM` number of a calendar month in the local
//! time zone, e.g. `202311`. Record months come from the record's logtime;
//! only the migration pass looks at the wall clock.

use chrono::{DateTime, Datelike, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `YYYYMM` calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonthKey(u32);

impl MonthKey {
    /// Build a key from a year and a 1-based month.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return None;
        }
        Some(MonthKey(year as u32 * 100 + month))
    }

    /// Month of a Unix timestamp (seconds), in local time.
    ///
    /// Returns `None` for timestamps chrono cannot represent and for years
    /// outside `0..=9999`.
    pub fn from_logtime(secs: i64) -> Option<Self> {
        let dt = Local.timestamp_opt(secs, 0).single()?;
        Self::from_datetime(&dt)
    }

    /// Month of an arbitrary zoned timestamp, `None` outside years `0..=9999`.
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Option<Self> {
        Self::new(dt.year(), dt.month())
    }

    /// The current wall-clock month.
    pub fn current() -> Self {
        let now = Local::now();
        // The wall clock is always within 0..=9999.
        MonthKey(now.year().clamp(0, 9999) as u32 * 100 + now.month())
    }

    /// The calendar month following this one.
    pub fn next(self) -> Self {
        let (year, month) = (self.year(), self.month());
        if month == 12 {
            MonthKey((year + 1) * 100 + 1)
        } else {
            MonthKey(year * 100 + month + 1)
        }
    }

    pub fn year(self) -> u32 {
        self.0 / 100
    }

    pub fn month(self) -> u32 {
        self.0 % 100
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("expected YYYYMM, got {:?}", s));
        }
        let n: u32 = s.parse().map_err(|e| format!("{}: {}", s, e))?;
        MonthKey::new((n / 100) as i32, n % 100).ok_or_else(|| format!("month out of range: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn next_rolls_over_december() {
        let dec = MonthKey::new(2023, 12).unwrap();
        assert_eq!(dec.next(), MonthKey::new(2024, 1).unwrap());
        let nov = MonthKey::new(2023, 11).unwrap();
        assert_eq!(nov.next(), dec);
    }

    #[test]
    fn from_datetime_uses_calendar_month() {
        let dt = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 20).unwrap();
        assert_eq!(MonthKey::from_datetime(&dt).unwrap().as_u32(), 202311);
    }

    #[test]
    fn out_of_range_years_have_no_key() {
        let bc = Utc.with_ymd_and_hms(-5, 3, 1, 0, 0, 0).unwrap();
        assert!(MonthKey::from_datetime(&bc).is_none());
        assert!(MonthKey::from_logtime(-100_000_000_000).is_none());
        assert!(MonthKey::from_logtime(300_000_000_000).is_none());
    }

    #[test]
    fn mid_month_logtime_is_stable_across_zones() {
        // 2023-11-14T22:13:20Z is mid-November in every zone.
        assert_eq!(MonthKey::from_logtime(1_700_000_000).unwrap().as_u32(), 202311);
        // 2023-12-08T00:26:40Z
        assert_eq!(MonthKey::from_logtime(1_702_000_000).unwrap().as_u32(), 202312);
    }

    #[test]
    fn display_and_parse() {
        let key: MonthKey = "202401".parse().unwrap();
        assert_eq!(key.to_string(), "202401");
        assert_eq!(key.year(), 2024);
        assert_eq!(key.month(), 1);
        assert!("202413".parse::<MonthKey>().is_err());
        assert!("2024-1".parse::<MonthKey>().is_err());
    }

    #[test]
    fn rejects_invalid_month() {
        assert!(MonthKey::new(2024, 0).is_none());
        assert!(MonthKey::new(2024, 13).is_none());
        assert!(MonthKey::new(-1, 6).is_none());
        assert!(MonthKey::new(10_000, 6).is_none());
    }
}

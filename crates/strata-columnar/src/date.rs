//! `Date32` helpers: dates are stored as days since 1970-01-01.

use chrono::{Datelike, NaiveDate};

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub fn days_from_date(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

/// Parses an ISO `YYYY-MM-DD` date into days since the epoch.
pub fn parse_date(text: &str) -> Result<i32, chrono::ParseError> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map(days_from_date)
}

/// Calendar year of a `Date32` value.
pub fn year_of(days: i32) -> Option<i32> {
    date_from_days(days).map(|d| d.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_day_zero() {
        assert_eq!(parse_date("1970-01-01").unwrap(), 0);
        assert_eq!(parse_date("1969-12-31").unwrap(), -1);
        assert_eq!(parse_date("1994-01-01").unwrap(), 8766);
    }

    #[test]
    fn year_extraction() {
        let days = parse_date("1995-12-31").unwrap();
        assert_eq!(year_of(days), Some(1995));
        assert_eq!(year_of(days + 1), Some(1996));
    }

    #[test]
    fn rejects_malformed_dates() {
        assert!(parse_date("1994-13-01").is_err());
        assert!(parse_date("yesterday").is_err());
    }
}

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::NaiveDate;

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exporter;
pub mod gdrive;
pub mod index;
pub mod layout;
pub mod mrkdwn;
pub mod resolver;
pub mod slack;

pub use error::{AppError, Result};

/// Progress messages may be reported from concurrent conversation workers.
pub type ProgressCallback = Option<Arc<dyn Fn(&str) + Send + Sync>>;

/// Parse the integer seconds part of a Slack timestamp ("1706745603.000100").
pub fn ts_seconds(ts: &str) -> i64 {
    ts.split('.')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Numeric comparison of two Slack timestamps.
///
/// The fractional part is compared as microseconds so that "...1603.2" and
/// "...1603.000100" order correctly regardless of digit count.
pub fn ts_cmp(a: &str, b: &str) -> Ordering {
    match ts_seconds(a).cmp(&ts_seconds(b)) {
        Ordering::Equal => ts_micros(a).cmp(&ts_micros(b)),
        other => other,
    }
}

/// Whether timestamp `a` is strictly newer than `b`. An empty `b` means
/// "no recorded progress", so any real timestamp is newer.
pub fn ts_newer(a: &str, b: &str) -> bool {
    if a.is_empty() {
        return false;
    }
    if b.is_empty() {
        return true;
    }
    ts_cmp(a, b) == Ordering::Greater
}

fn ts_micros(ts: &str) -> i64 {
    let frac = ts.split('.').nth(1).unwrap_or("");
    let mut padded = String::with_capacity(6);
    for c in frac.chars().take(6) {
        if c.is_ascii_digit() {
            padded.push(c);
        }
    }
    while padded.len() < 6 {
        padded.push('0');
    }
    padded.parse().unwrap_or(0)
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| AppError::InvalidDate(s.to_string()))
}

/// Convert a calendar date to the Slack timestamp of its UTC midnight.
pub fn date_to_slack_ts(date: NaiveDate) -> String {
    let secs = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0);
    format!("{}.000000", secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_seconds() {
        assert_eq!(ts_seconds("1706745603.000100"), 1706745603);
        assert_eq!(ts_seconds("1706745603"), 1706745603);
        assert_eq!(ts_seconds(""), 0);
        assert_eq!(ts_seconds("garbage"), 0);
    }

    #[test]
    fn test_ts_cmp_orders_by_seconds_then_micros() {
        assert_eq!(
            ts_cmp("1706745603.000100", "1706745999.000200"),
            Ordering::Less
        );
        assert_eq!(
            ts_cmp("1706745603.000200", "1706745603.000100"),
            Ordering::Greater
        );
        assert_eq!(
            ts_cmp("1706745603.000100", "1706745603.000100"),
            Ordering::Equal
        );
    }

    #[test]
    fn test_ts_cmp_handles_short_fractions() {
        // ".2" reads as 200000 microseconds, newer than ".000100"
        assert_eq!(ts_cmp("1.2", "1.000100"), Ordering::Greater);
    }

    #[test]
    fn test_ts_newer_empty_baseline() {
        assert!(ts_newer("1706745603.000100", ""));
        assert!(!ts_newer("", "1706745603.000100"));
        assert!(!ts_newer("", ""));
    }

    #[test]
    fn test_ts_newer_strict() {
        assert!(ts_newer("1706745604.000000", "1706745603.999999"));
        assert!(!ts_newer("1706745603.000100", "1706745603.000100"));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-01-31").unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
        );
        assert!(parse_date("31/01/2024").is_err());
    }

    #[test]
    fn test_date_to_slack_ts() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(date_to_slack_ts(date), "1706659200.000000");
    }
}

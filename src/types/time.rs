//! Timestamp normalization.
//!
//! Exchange klines are always in milliseconds. Dashboard order records are
//! not: they mix epoch seconds, epoch milliseconds, fractional seconds and
//! date strings, so their unit is guessed. Values above `1e12` are taken as
//! milliseconds and everything else as seconds. That threshold misreads
//! millisecond timestamps before 2001-09-09 and second timestamps after the
//! year 33658; both are outside the data this chart shows.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

const MILLIS_THRESHOLD: f64 = 1e12;

pub fn exchange_millis_to_secs(millis: f64) -> i64 {
    (millis / 1000.0).floor() as i64
}

/// Parses a loosely typed timestamp into epoch milliseconds.
pub fn parse_timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => numeric_to_millis(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            match s.parse::<f64>() {
                Ok(n) => numeric_to_millis(n),
                Err(_) => parse_date_string(s),
            }
        }
        _ => None,
    }
}

/// Floors epoch milliseconds to the chart's whole-second axis.
pub fn millis_to_secs(millis: i64) -> i64 {
    millis.div_euclid(1000)
}

fn numeric_to_millis(n: f64) -> Option<i64> {
    if !n.is_finite() {
        return None;
    }
    if n > MILLIS_THRESHOLD {
        Some(n.floor() as i64)
    } else {
        Some((n * 1000.0).floor() as i64)
    }
}

fn parse_date_string(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    // Zone-less timestamps are read as UTC.
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

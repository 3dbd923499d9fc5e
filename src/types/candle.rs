use serde::{Deserialize, Serialize};

use super::time::exchange_millis_to_secs;

/// One OHLC bar. `time` is the bar open time in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
        }
    }

    /// Builds a candle from an exchange kline tuple
    /// `[openTime(ms), open, high, low, close, ...]`. Trailing fields are
    /// ignored; prices may be strings or numbers.
    pub fn from_kline_row(row: &[serde_json::Value]) -> Option<Self> {
        if row.len() < 5 {
            return None;
        }
        let open_time = json_number(&row[0])?;
        Some(Candle {
            time: exchange_millis_to_secs(open_time),
            open: json_number(&row[1])?,
            high: json_number(&row[2])?,
            low: json_number(&row[3])?,
            close: json_number(&row[4])?,
        })
    }
}

/// Numeric coercion for exchange and dashboard payloads, which mix JSON
/// numbers and numeric strings.
pub fn json_number(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

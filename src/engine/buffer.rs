use serde::{Deserialize, Serialize};

use crate::types::Candle;

/// Where the candles in a buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesOrigin {
    #[default]
    Exchange,
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpsertOutcome {
    Replaced(Candle),
    Appended(Candle),
    /// Older than the last bar; the buffer is unchanged.
    Stale,
}

impl UpsertOutcome {
    pub fn changed(&self) -> Option<Candle> {
        match self {
            UpsertOutcome::Replaced(c) | UpsertOutcome::Appended(c) => Some(*c),
            UpsertOutcome::Stale => None,
        }
    }
}

/// Candles for one symbol/interval, strictly ascending by `time`.
#[derive(Debug, Clone, Default)]
pub struct SeriesBuffer {
    candles: Vec<Candle>,
    origin: SeriesOrigin,
}

impl SeriesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole buffer. Input is sorted and de-duplicated by time,
    /// keeping the first candle seen for a given time.
    pub fn replace(&mut self, mut candles: Vec<Candle>, origin: SeriesOrigin) {
        candles.sort_by_key(|c| c.time);
        candles.dedup_by_key(|c| c.time);
        self.candles = candles;
        self.origin = origin;
    }

    pub fn upsert(&mut self, candle: Candle) -> UpsertOutcome {
        match self.candles.last_mut() {
            Some(last) if candle.time == last.time => {
                *last = candle;
                UpsertOutcome::Replaced(candle)
            }
            Some(last) if candle.time < last.time => UpsertOutcome::Stale,
            _ => {
                self.candles.push(candle);
                UpsertOutcome::Appended(candle)
            }
        }
    }

    /// Prepends the candles strictly older than the current first bar and
    /// returns how many were added.
    pub fn prepend_older(&mut self, older: Vec<Candle>) -> usize {
        let mut older: Vec<Candle> = match self.earliest_time() {
            Some(first) => older.into_iter().filter(|c| c.time < first).collect(),
            None => older,
        };
        if older.is_empty() {
            return 0;
        }
        older.sort_by_key(|c| c.time);
        older.dedup_by_key(|c| c.time);

        let added = older.len();
        older.append(&mut self.candles);
        self.candles = older;
        added
    }

    pub fn clear(&mut self) {
        self.candles.clear();
        self.origin = SeriesOrigin::Exchange;
    }

    pub fn earliest_time(&self) -> Option<i64> {
        self.candles.first().map(|c| c.time)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn origin(&self) -> SeriesOrigin {
        self.origin
    }

    pub fn is_placeholder(&self) -> bool {
        self.origin == SeriesOrigin::Placeholder
    }

    #[cfg(test)]
    fn is_strictly_ascending(&self) -> bool {
        self.candles.windows(2).all(|w| w[0].time < w[1].time)
    }
}

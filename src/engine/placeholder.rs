//! Synthetic random-walk series shown when the first history load fails and
//! there is nothing else to draw. Buffers seeded from here are flagged
//! [`SeriesOrigin::Placeholder`](super::SeriesOrigin) and never backfilled.

use rand::Rng;

use crate::config::FallbackSettings;
use crate::types::{Candle, Interval};

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// `bars` candles spaced one interval apart, the last one opening at the
/// interval boundary at or before `now_secs`. Each close moves at most 1%
/// from its open and the wicks extend at most 1% beyond the body.
pub fn random_walk<R: Rng + ?Sized>(
    rng: &mut R,
    interval: Interval,
    now_secs: i64,
    bars: usize,
    start_price: f64,
) -> Vec<Candle> {
    let step = interval.to_seconds();
    let last_open = now_secs - now_secs.rem_euclid(step);

    let mut candles = Vec::with_capacity(bars);
    let mut last_close = start_price;
    for i in (0..bars as i64).rev() {
        let open = last_close;
        let close = open * (1.0 + (rng.random::<f64>() - 0.5) * 0.02);
        let high = open.max(close) * (1.0 + rng.random::<f64>() * 0.01);
        let low = open.min(close) * (1.0 - rng.random::<f64>() * 0.01);
        candles.push(Candle::new(
            last_open - i * step,
            round4(open),
            round4(high),
            round4(low),
            round4(close),
        ));
        last_close = close;
    }
    candles
}

pub fn placeholder_series(settings: &FallbackSettings, interval: Interval) -> Vec<Candle> {
    random_walk(
        &mut rand::rng(),
        interval,
        chrono::Utc::now().timestamp(),
        settings.placeholder_bars,
        settings.placeholder_start_price,
    )
}

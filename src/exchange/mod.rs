pub mod binance;
pub mod websocket;
pub mod subscription;

pub use binance::*;
pub use websocket::*;
pub use subscription::*;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::error::ChartError;
use crate::types::{Candle, Interval, Symbol};

/// Historical kline pages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// One page of candles, ascending, the newest opening at or before
    /// `end_time_ms` when given.
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        interval: Interval,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>, ChartError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(Candle),
    Error(String),
    Closed,
}

pub type FeedCallback = Box<dyn Fn(FeedEvent) + Send + Sync>;

/// Live kline stream. Errors are reported through the callback; the feed
/// never reconnects on its own.
pub trait LiveFeed: Send + Sync {
    fn subscribe(&self, symbol: &Symbol, interval: Interval, on_event: FeedCallback)
        -> SubscriptionHandle;
}

pub fn kline_stream_name(symbol: &Symbol, interval: Interval) -> String {
    format!("{}@kline_{}", symbol.stream_name(), interval.as_str())
}

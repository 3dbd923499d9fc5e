use futures_util::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{kline_stream_name, FeedCallback, FeedEmitter, FeedEvent, LiveFeed, SubscriptionHandle};
use crate::config::ChartConfig;
use crate::types::time::exchange_millis_to_secs;
use crate::types::{json_number, Candle, Interval, Symbol};

pub const BINANCE_WS: &str = "wss://stream.binance.com:9443";

/// One socket per kline stream. A dropped connection is reported once and
/// the task ends; resubscribing is the caller's decision.
#[derive(Debug, Clone)]
pub struct BinanceKlineFeed {
    base_url: String,
}

impl BinanceKlineFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ChartConfig) -> Self {
        Self::new(&config.endpoints.ws_base_url)
    }

    fn stream_url(&self, stream: &str) -> String {
        format!("{}/ws/{}", self.base_url, stream)
    }

    async fn run_connection(url: String, emitter: FeedEmitter) {
        let mut ws_stream = match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                warn!("WebSocket connect to {} failed: {}", url, e);
                emitter.emit(FeedEvent::Error(e.to_string()));
                return;
            }
        };
        info!("WebSocket connected: {}", url);

        while let Some(msg) = ws_stream.next().await {
            if emitter.is_closed() {
                return;
            }
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(candle) = parse_kline_message(&text) {
                        emitter.emit(FeedEvent::Tick(candle));
                    } else {
                        debug!("Ignoring message: {}", text);
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket closed by server: {}", url);
                    emitter.emit(FeedEvent::Closed);
                    return;
                }
                Err(e) => {
                    warn!("WebSocket error on {}: {}", url, e);
                    emitter.emit(FeedEvent::Error(e.to_string()));
                    return;
                }
                _ => {}
            }
        }

        emitter.emit(FeedEvent::Closed);
    }
}

impl Default for BinanceKlineFeed {
    fn default() -> Self {
        Self::new(BINANCE_WS)
    }
}

impl LiveFeed for BinanceKlineFeed {
    fn subscribe(&self, symbol: &Symbol, interval: Interval, on_event: FeedCallback) -> SubscriptionHandle {
        let stream = kline_stream_name(symbol, interval);
        let url = self.stream_url(&stream);
        let (mut handle, emitter) = SubscriptionHandle::open(stream, on_event);

        debug!("Subscribing to {}", url);
        handle.attach_task(tokio::spawn(Self::run_connection(url, emitter)));
        handle
    }
}

#[derive(Debug, Deserialize)]
struct WsKlineMessage {
    #[serde(rename = "k")]
    kline: WsKlineData,
}

#[derive(Debug, Deserialize)]
struct WsKlineData {
    #[serde(rename = "t")]
    start_time: serde_json::Value,
    #[serde(rename = "o")]
    open: serde_json::Value,
    #[serde(rename = "h")]
    high: serde_json::Value,
    #[serde(rename = "l")]
    low: serde_json::Value,
    #[serde(rename = "c")]
    close: serde_json::Value,
}

/// Accepts both raw stream payloads and combined-stream envelopes
/// (`{"stream": ..., "data": {...}}`).
pub fn parse_kline_message(text: &str) -> Option<Candle> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let payload = if value.get("stream").is_some() && value.get("data").is_some() {
        value["data"].clone()
    } else {
        value
    };
    let msg: WsKlineMessage = serde_json::from_value(payload).ok()?;
    let k = msg.kline;

    Some(Candle {
        time: exchange_millis_to_secs(json_number(&k.start_time)?),
        open: json_number(&k.open)?,
        high: json_number(&k.high)?,
        low: json_number(&k.low)?,
        close: json_number(&k.close)?,
    })
}

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::CandleSource;
use crate::config::ChartConfig;
use crate::error::ChartError;
use crate::types::{Candle, Interval, Symbol};

pub const BINANCE_API: &str = "https://api.binance.com";
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Public market-data client for the kline endpoint.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    page_size: u32,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, page_size: u32) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn from_config(config: &ChartConfig) -> Self {
        Self::new(&config.endpoints.rest_base_url, config.history.page_size)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    fn klines_url(&self, symbol: &Symbol, interval: Interval, end_time_ms: Option<i64>) -> String {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.as_str(),
            interval.as_str(),
            self.page_size
        );
        if let Some(end) = end_time_ms {
            url.push_str(&format!("&endTime={}", end));
        }
        url
    }

    pub async fn get_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>, ChartError> {
        let url = self.klines_url(symbol, interval, end_time_ms);
        debug!("Fetching klines: {}", url);

        let resp = self.client.get(&url).send().await.map_err(|e| {
            warn!("Kline request for {} {} failed: {}", symbol, interval, e);
            ChartError::from(e)
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Kline request for {} {} returned {}: {}", symbol, interval, status, body);
            return Err(ChartError::fetch(Some(status.as_u16()), body));
        }

        let body: serde_json::Value = resp.json().await?;
        let candles = parse_klines(&body);
        debug!("Fetched {} candles for {} {}", candles.len(), symbol, interval);
        Ok(candles)
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_history(
        &self,
        symbol: &Symbol,
        interval: Interval,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>, ChartError> {
        self.get_candles(symbol, interval, end_time_ms).await
    }
}

/// Normalizes a kline response body. A body that is not an array is an
/// empty page; malformed rows are skipped.
pub fn parse_klines(body: &serde_json::Value) -> Vec<Candle> {
    let Some(rows) = body.as_array() else {
        return Vec::new();
    };

    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| row.as_array())
        .filter_map(|row| Candle::from_kline_row(row))
        .collect();

    candles.sort_by_key(|c| c.time);
    candles.dedup_by_key(|c| c.time);
    candles
}

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ChartError;
use crate::exchange::{BINANCE_API, BINANCE_WS};
use crate::types::{Interval, Symbol};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub endpoints: EndpointSettings,
    pub history: HistorySettings,
    pub render: RenderSettings,
    pub fallback: FallbackSettings,
    pub defaults: DefaultSettings,
}

impl ChartConfig {
    /// Reads `path` if it exists, otherwise returns the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ChartError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| ChartError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ChartError> {
        let config: ChartConfig =
            toml::from_str(text).map_err(|e| ChartError::Config(e.to_string()))?;
        config
            .validate()
            .map_err(|errors| ChartError::Config(errors.join(", ")))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.endpoints.rest_base_url.trim().is_empty() {
            errors.push("endpoints.rest_base_url must not be empty".to_string());
        }
        if !self.endpoints.ws_base_url.starts_with("ws") {
            errors.push("endpoints.ws_base_url must be a ws:// or wss:// url".to_string());
        }

        if self.history.page_size == 0 || self.history.page_size > 1000 {
            errors.push("history.page_size must be between 1 and 1000".to_string());
        }
        if self.history.backfill_threshold_bars < 0.0 {
            errors.push("history.backfill_threshold_bars must be >= 0".to_string());
        }

        if self.render.init_retries > 20 {
            errors.push("render.init_retries must be <= 20".to_string());
        }
        if self.render.horizontal_line_secs <= 0 {
            errors.push("render.horizontal_line_secs must be > 0".to_string());
        }

        if self.fallback.placeholder_bars == 0 {
            errors.push("fallback.placeholder_bars must be > 0".to_string());
        }
        if self.fallback.placeholder_start_price <= 0.0 {
            errors.push("fallback.placeholder_start_price must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub rest_base_url: String,
    pub ws_base_url: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            rest_base_url: BINANCE_API.to_string(),
            ws_base_url: BINANCE_WS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub page_size: u32,
    /// Backfill starts once the visible range begins within this many bars
    /// of the buffer start.
    pub backfill_threshold_bars: f64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            backfill_threshold_bars: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Retries after the first failed surface creation.
    pub init_retries: u32,
    pub init_backoff_ms: u64,
    pub max_horizontal_lines: usize,
    pub horizontal_line_secs: i64,
}

impl RenderSettings {
    pub fn init_backoff(&self) -> Duration {
        Duration::from_millis(self.init_backoff_ms)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            init_retries: 5,
            init_backoff_ms: 200,
            max_horizontal_lines: 100,
            horizontal_line_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// When the first history load fails with nothing to show, seed a
    /// synthetic series (flagged as placeholder) instead of leaving the
    /// chart empty.
    pub placeholder_on_failure: bool,
    pub placeholder_bars: usize,
    pub placeholder_start_price: f64,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            placeholder_on_failure: true,
            placeholder_bars: 60,
            placeholder_start_price: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSettings {
    pub symbol: Symbol,
    pub interval: Interval,
}

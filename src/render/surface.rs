use serde::{Deserialize, Serialize};

use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceLineId(pub u64);

/// Series factories a surface may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesKind {
    Candlestick,
    Area,
    Line,
    Baseline,
}

impl SeriesKind {
    /// Primary-series preference, best first.
    pub const PREFERENCE: [SeriesKind; 4] = [
        SeriesKind::Candlestick,
        SeriesKind::Area,
        SeriesKind::Line,
        SeriesKind::Baseline,
    ];

    pub fn is_ohlc(&self) -> bool {
        matches!(self, SeriesKind::Candlestick)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceCapabilities {
    pub candlestick: bool,
    pub area: bool,
    pub line: bool,
    pub baseline: bool,
}

impl SurfaceCapabilities {
    pub fn all() -> Self {
        Self {
            candlestick: true,
            area: true,
            line: true,
            baseline: true,
        }
    }

    pub fn only(kind: SeriesKind) -> Self {
        let mut caps = Self::default();
        match kind {
            SeriesKind::Candlestick => caps.candlestick = true,
            SeriesKind::Area => caps.area = true,
            SeriesKind::Line => caps.line = true,
            SeriesKind::Baseline => caps.baseline = true,
        }
        caps
    }

    pub fn supports(&self, kind: SeriesKind) -> bool {
        match kind {
            SeriesKind::Candlestick => self.candlestick,
            SeriesKind::Area => self.area,
            SeriesKind::Line => self.line,
            SeriesKind::Baseline => self.baseline,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.primary_kind().is_some()
    }

    pub fn primary_kind(&self) -> Option<SeriesKind> {
        SeriesKind::PREFERENCE.into_iter().find(|k| self.supports(*k))
    }
}

/// A point as the primary series consumes it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesPoint {
    Ohlc(Candle),
    Value { time: i64, value: f64 },
}

impl SeriesPoint {
    /// Non-OHLC series plot the close.
    pub fn for_kind(kind: SeriesKind, candle: &Candle) -> Self {
        if kind.is_ohlc() {
            SeriesPoint::Ohlc(*candle)
        } else {
            SeriesPoint::Value {
                time: candle.time,
                value: candle.close,
            }
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            SeriesPoint::Ohlc(c) => c.time,
            SeriesPoint::Value { time, .. } => *time,
        }
    }

    pub fn value(&self) -> f64 {
        match self {
            SeriesPoint::Ohlc(c) => c.close,
            SeriesPoint::Value { value, .. } => *value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    #[default]
    Solid,
    Dotted,
    Dashed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSeriesOptions {
    pub color: String,
    pub line_width: u32,
    pub line_style: LineStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLine {
    pub price: f64,
    pub color: String,
    pub line_width: u32,
    pub line_style: LineStyle,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerPosition {
    AboveBar,
    BelowBar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkerShape {
    ArrowUp,
    ArrowDown,
    Circle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub time: i64,
    pub position: MarkerPosition,
    pub color: String,
    pub shape: MarkerShape,
    pub text: String,
}

/// Visible logical range in bar indices; `from` below zero means the view
/// is scrolled past the first loaded bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalRange {
    pub from: f64,
    pub to: f64,
}

pub type RangeCallback = Box<dyn Fn(LogicalRange) + Send + Sync>;

/// Drawing API of the charting widget. The surface owns no domain state,
/// only the primitives it was handed.
pub trait RenderingSurface: Send {
    fn capabilities(&self) -> SurfaceCapabilities;

    fn create_series(&mut self, kind: SeriesKind) -> Option<SeriesId>;

    fn set_data(&mut self, series: SeriesId, data: Vec<SeriesPoint>);

    fn update_point(&mut self, series: SeriesId, point: SeriesPoint);

    fn add_line_series(&mut self, options: LineSeriesOptions) -> SeriesId;

    fn remove_series(&mut self, series: SeriesId);

    fn create_price_line(&mut self, series: SeriesId, line: PriceLine) -> PriceLineId;

    fn remove_price_line(&mut self, series: SeriesId, line: PriceLineId);

    fn set_markers(&mut self, series: SeriesId, markers: Vec<Marker>);

    fn subscribe_visible_range(&mut self, callback: RangeCallback);

    fn unsubscribe_visible_range(&mut self);

    /// Frees the widget. Safe to call more than once.
    fn release(&mut self);
}

use std::sync::Arc;
use tracing::debug;

use super::decorations::{compute_line_decorations, compute_trade_decorations, LineDecoration, TradeDecoration};
use crate::config::RenderSettings;
use crate::render::*;
use crate::types::{OrderRecord, Side};

const BUY_COLOR: &str = "#26a69a";
const SELL_COLOR: &str = "#ef5350";
const PROFIT_COLOR: &str = "#00ff00";
const LOSS_COLOR: &str = "#ff4444";
const LINE_BUY_COLOR: &str = "#00aaff";
const LINE_SELL_COLOR: &str = "#ff88cc";

/// Draws order overlays on a surface. Each redraw removes every primitive
/// from the previous one first; nothing is diffed.
#[derive(Debug)]
pub struct OverlayDecorator {
    max_lines: usize,
    line_secs: i64,
    drawn_for: Option<Arc<Vec<OrderRecord>>>,
    price_lines: Vec<PriceLineId>,
    series: Vec<SeriesId>,
    has_markers: bool,
}

impl OverlayDecorator {
    pub fn new(max_lines: usize, line_secs: i64) -> Self {
        Self {
            max_lines,
            line_secs,
            drawn_for: None,
            price_lines: Vec::new(),
            series: Vec::new(),
            has_markers: false,
        }
    }

    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self::new(settings.max_horizontal_lines, settings.horizontal_line_secs)
    }

    pub fn price_line_count(&self) -> usize {
        self.price_lines.len()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Redraws when `orders` is a different list than last time, or when
    /// `force` is set. Returns whether anything was redrawn.
    pub fn sync<S: RenderingSurface>(
        &mut self,
        surface: &mut S,
        primary: SeriesId,
        orders: &Arc<Vec<OrderRecord>>,
        force: bool,
    ) -> bool {
        let unchanged = self
            .drawn_for
            .as_ref()
            .is_some_and(|previous| Arc::ptr_eq(previous, orders));
        if unchanged && !force {
            return false;
        }

        self.apply(surface, primary, orders);
        self.drawn_for = Some(Arc::clone(orders));
        true
    }

    pub fn apply<S: RenderingSurface>(&mut self, surface: &mut S, primary: SeriesId, orders: &[OrderRecord]) {
        let trades = compute_trade_decorations(orders);
        let lines = compute_line_decorations(orders);
        self.draw(surface, primary, &trades, &lines);
    }

    pub fn draw<S: RenderingSurface>(
        &mut self,
        surface: &mut S,
        primary: SeriesId,
        trades: &[TradeDecoration],
        lines: &[LineDecoration],
    ) {
        self.remove_primitives(surface, primary);

        let mut markers = Vec::new();
        for trade in trades {
            self.draw_trade(surface, primary, trade, &mut markers);
        }
        markers.sort_by_key(|m| m.time);
        self.has_markers = !markers.is_empty();
        surface.set_markers(primary, markers);

        let skip = lines.len().saturating_sub(self.max_lines);
        for line in &lines[skip..] {
            self.draw_line(surface, line);
        }

        debug!(
            "Overlay drawn: {} trades, {} lines, {} price lines",
            trades.len(),
            lines.len() - skip,
            self.price_lines.len()
        );
    }

    /// Removes every primitive this decorator created.
    pub fn clear<S: RenderingSurface>(&mut self, surface: &mut S, primary: SeriesId) {
        self.remove_primitives(surface, primary);
        if self.has_markers {
            surface.set_markers(primary, Vec::new());
            self.has_markers = false;
        }
        self.drawn_for = None;
    }

    fn remove_primitives<S: RenderingSurface>(&mut self, surface: &mut S, primary: SeriesId) {
        for line in self.price_lines.drain(..) {
            surface.remove_price_line(primary, line);
        }
        for series in self.series.drain(..) {
            surface.remove_series(series);
        }
    }

    fn draw_trade<S: RenderingSurface>(
        &mut self,
        surface: &mut S,
        primary: SeriesId,
        trade: &TradeDecoration,
        markers: &mut Vec<Marker>,
    ) {
        let label = format!("{} {}", trade.side, trade.entry_price);
        let (color, position, shape) = match trade.side {
            Side::Buy => (BUY_COLOR, MarkerPosition::BelowBar, MarkerShape::ArrowUp),
            Side::Sell => (SELL_COLOR, MarkerPosition::AboveBar, MarkerShape::ArrowDown),
        };

        markers.push(Marker {
            time: trade.entry_time,
            position,
            color: color.to_string(),
            shape,
            text: label.clone(),
        });
        self.add_price_line(surface, primary, trade.entry_price, color, 2, LineStyle::Solid, label);

        if let Some(tp) = trade.take_profit {
            self.add_price_line(surface, primary, tp, PROFIT_COLOR, 1, LineStyle::Dashed, "TP".to_string());
        }
        if let Some(sl) = trade.stop_loss {
            self.add_price_line(surface, primary, sl, LOSS_COLOR, 1, LineStyle::Dashed, "SL".to_string());
        }

        let (Some(exit_time), Some(exit_price), Some(pnl)) =
            (trade.exit_time, trade.exit_price, trade.pnl_percent())
        else {
            return;
        };
        let color = if pnl >= 0.0 { PROFIT_COLOR } else { LOSS_COLOR };
        let sign = if pnl >= 0.0 { "+" } else { "" };

        markers.push(Marker {
            time: exit_time,
            position: MarkerPosition::AboveBar,
            color: color.to_string(),
            shape: MarkerShape::Circle,
            text: format!("PNL {}{:.2}%", sign, pnl),
        });

        let connector = surface.add_line_series(LineSeriesOptions {
            color: color.to_string(),
            line_width: 2,
            line_style: LineStyle::Solid,
        });
        surface.set_data(
            connector,
            vec![
                SeriesPoint::Value {
                    time: trade.entry_time,
                    value: trade.entry_price,
                },
                SeriesPoint::Value {
                    time: exit_time,
                    value: exit_price,
                },
            ],
        );
        self.series.push(connector);
    }

    fn draw_line<S: RenderingSurface>(&mut self, surface: &mut S, line: &LineDecoration) {
        let color = match line.side {
            Side::Buy => LINE_BUY_COLOR,
            Side::Sell => LINE_SELL_COLOR,
        };
        let series = surface.add_line_series(LineSeriesOptions {
            color: color.to_string(),
            line_width: 2,
            line_style: line.style,
        });
        surface.set_data(
            series,
            vec![
                SeriesPoint::Value {
                    time: line.timestamp,
                    value: line.price,
                },
                SeriesPoint::Value {
                    time: line.timestamp + self.line_secs,
                    value: line.price,
                },
            ],
        );
        self.series.push(series);
    }

    #[allow(clippy::too_many_arguments)]
    fn add_price_line<S: RenderingSurface>(
        &mut self,
        surface: &mut S,
        primary: SeriesId,
        price: f64,
        color: &str,
        line_width: u32,
        line_style: LineStyle,
        title: String,
    ) {
        let id = surface.create_price_line(
            primary,
            PriceLine {
                price,
                color: color.to_string(),
                line_width,
                line_style,
                title,
            },
        );
        self.price_lines.push(id);
    }
}

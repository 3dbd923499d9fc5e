use serde::Serialize;

use crate::render::LineStyle;
use crate::types::time::{millis_to_secs, now_millis};
use crate::types::{OrderRecord, Side};

/// A trade as drawn on the chart. Times are chart seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeDecoration {
    pub id: String,
    pub entry_time: i64,
    pub entry_price: f64,
    pub side: Side,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub exit_time: Option<i64>,
    pub exit_price: Option<f64>,
}

impl TradeDecoration {
    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some() && self.exit_price.is_some()
    }

    /// Percent gain in the trade's direction, once closed.
    pub fn pnl_percent(&self) -> Option<f64> {
        if self.exit_time.is_none() {
            return None;
        }
        let exit = self.exit_price?;
        let pnl = match self.side {
            Side::Buy => (exit - self.entry_price) / self.entry_price,
            Side::Sell => (self.entry_price - exit) / self.entry_price,
        };
        Some(pnl * 100.0)
    }
}

/// Pending-sell target drawn as a short horizontal segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineDecoration {
    pub timestamp: i64,
    pub price: f64,
    pub side: Side,
    pub style: LineStyle,
}

/// Orders without an entry time or a positive entry price are skipped.
pub fn compute_trade_decorations(orders: &[OrderRecord]) -> Vec<TradeDecoration> {
    orders.iter().filter_map(trade_decoration).collect()
}

fn trade_decoration(order: &OrderRecord) -> Option<TradeDecoration> {
    let entry_ms = order.entry_time_millis()?;
    let entry_price = order.entry_price().filter(|p| *p > 0.0)?;

    let id = order.id().unwrap_or_else(|| {
        format!("{}-{}", order.symbol().as_deref().unwrap_or("ORD"), entry_ms)
    });

    Some(TradeDecoration {
        id,
        entry_time: millis_to_secs(entry_ms),
        entry_price,
        side: order.side(),
        take_profit: order.take_profit(),
        stop_loss: order.stop_loss(),
        exit_time: order.exit_time_millis().map(millis_to_secs),
        exit_price: order.exit_price(),
    })
}

pub fn compute_line_decorations(orders: &[OrderRecord]) -> Vec<LineDecoration> {
    compute_line_decorations_at(orders, now_millis())
}

/// Same as [`compute_line_decorations`]; orders without a usable
/// timestamp are placed at `now_ms`.
pub fn compute_line_decorations_at(orders: &[OrderRecord], now_ms: i64) -> Vec<LineDecoration> {
    orders
        .iter()
        .filter_map(|order| {
            let price = order.wait_sell_price()?;
            let timestamp = order.line_time_millis().unwrap_or(now_ms);
            Some(LineDecoration {
                timestamp: millis_to_secs(timestamp),
                price,
                side: order.side(),
                style: if order.is_waiting_sell() {
                    LineStyle::Dashed
                } else {
                    LineStyle::Dotted
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn orders(value: Value) -> Vec<OrderRecord> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_waiting_sell_order() {
        let list = orders(json!([{
            "priceBuy": 50,
            "priceWaitSell": 55,
            "status": "WAITING_SELL",
            "dateBuy": "2024-03-01T10:00:00Z"
        }]));

        let trades = compute_trade_decorations(&list);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].side, Side::Buy);
        assert_eq!(trades[0].entry_price, 50.0);
        assert_eq!(trades[0].entry_time, 1_709_287_200);
        assert_eq!(trades[0].take_profit, Some(55.0));
        assert_eq!(trades[0].id, "ORD-1709287200000");
        assert!(!trades[0].is_closed());

        let lines = compute_line_decorations(&list);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].price, 55.0);
        assert_eq!(lines[0].style, LineStyle::Dashed);
        assert_eq!(lines[0].timestamp, 1_709_287_200);
    }

    #[test]
    fn test_orders_without_entry_are_skipped() {
        let list = orders(json!([
            {"priceBuy": 50},
            {"dateBuy": 1_700_000_000, "priceBuy": 0},
            {"dateBuy": 1_700_000_000, "priceBuy": "n/a"},
            {"createTime": 1_700_000_000_000i64, "entryPrice": "1.25", "symbol": "XRPUSDT"}
        ]));
        let trades = compute_trade_decorations(&list);
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].entry_price, 1.25);
        assert_eq!(trades[0].id, "XRPUSDT-1700000000000");
    }

    #[test]
    fn test_closed_trade_pnl() {
        let list = orders(json!([
            {"id": 1, "buyTime": 1_700_000_000, "priceBuy": 100, "sellTime": 1_700_003_600, "priceSellActual": 110},
            {"id": 2, "buyTime": 1_700_000_000, "priceBuy": 100, "side": "SELL", "doneTime": 1_700_003_600, "exitPrice": 110}
        ]));
        let trades = compute_trade_decorations(&list);
        assert_eq!(trades[0].exit_time, Some(1_700_003_600));
        assert!((trades[0].pnl_percent().unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(trades[1].side, Side::Sell);
        assert!((trades[1].pnl_percent().unwrap() + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_line_defaults() {
        let list = orders(json!([
            {"priceWaitSell": 3.5, "status": "DONE"},
            {"priceWaitSell": 0, "status": "WAITING_SELL"},
            {"priceBuy": 2.0}
        ]));
        let lines = compute_line_decorations_at(&list, 1_700_000_000_500);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].timestamp, 1_700_000_000);
        assert_eq!(lines[0].style, LineStyle::Dotted);
        assert_eq!(lines[0].side, Side::Buy);
    }
}

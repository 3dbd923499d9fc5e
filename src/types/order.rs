use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::candle::json_number;
use super::time::parse_timestamp_millis;
use super::Side;

const ENTRY_TIME_FIELDS: [&str; 5] = ["dateBuy", "buyTime", "timeBuy", "createTime", "timestamp"];
const EXIT_TIME_FIELDS: [&str; 4] = ["dateSell", "sellTime", "doneTime", "updateTime"];
const LINE_TIME_FIELDS: [&str; 3] = ["dateBuy", "buyTime", "createTime"];
const ENTRY_PRICE_FIELDS: [&str; 3] = ["priceBuy", "entryPrice", "price"];
const EXIT_PRICE_FIELDS: [&str; 3] = ["priceSellActual", "exitPrice", "sellPrice"];
const TAKE_PROFIT_FIELDS: [&str; 3] = ["priceWaitSell", "takeProfit", "tp"];
const STOP_LOSS_FIELDS: [&str; 4] = ["priceCutloss", "cutLossPrice", "stopLoss", "sl"];
const SIDE_FIELDS: [&str; 2] = ["side", "orderSide"];
const ID_FIELDS: [&str; 3] = ["id", "orderId", "orderBuyID"];

pub const STATUS_WAITING_SELL: &str = "WAITING_SELL";

/// An order as the bot backend reports it. Field names vary between
/// backend versions (`priceBuy` vs `entryPrice`, `dateBuy` vs `buyTime`, ...),
/// so the record keeps the raw object and resolves aliases on access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderRecord(Map<String, Value>);

impl OrderRecord {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(OrderRecord(map)),
            _ => None,
        }
    }

    fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    /// First alias that is present, coerced to a number. A present but
    /// non-numeric field does not fall through to the next alias.
    fn first_number(&self, names: &[&str]) -> Option<f64> {
        names
            .iter()
            .find_map(|name| self.field(name))
            .and_then(json_number)
    }

    fn first_positive(&self, names: &[&str]) -> Option<f64> {
        self.first_number(names).filter(|p| *p > 0.0)
    }

    /// First alias that parses as a timestamp.
    fn first_timestamp(&self, names: &[&str]) -> Option<i64> {
        names
            .iter()
            .filter_map(|name| self.field(name))
            .find_map(parse_timestamp_millis)
            .filter(|ms| *ms != 0)
    }

    fn text(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn entry_time_millis(&self) -> Option<i64> {
        self.first_timestamp(&ENTRY_TIME_FIELDS)
    }

    pub fn exit_time_millis(&self) -> Option<i64> {
        self.first_timestamp(&EXIT_TIME_FIELDS)
    }

    pub fn line_time_millis(&self) -> Option<i64> {
        self.first_timestamp(&LINE_TIME_FIELDS)
    }

    pub fn entry_price(&self) -> Option<f64> {
        self.first_number(&ENTRY_PRICE_FIELDS)
    }

    pub fn exit_price(&self) -> Option<f64> {
        self.first_positive(&EXIT_PRICE_FIELDS)
    }

    pub fn take_profit(&self) -> Option<f64> {
        self.first_positive(&TAKE_PROFIT_FIELDS)
    }

    pub fn stop_loss(&self) -> Option<f64> {
        self.first_positive(&STOP_LOSS_FIELDS)
    }

    /// Pending sell target; only `priceWaitSell` counts here.
    pub fn wait_sell_price(&self) -> Option<f64> {
        self.first_positive(&["priceWaitSell"])
    }

    /// Side is taken only from explicit side fields; a status such as
    /// `WAITING_SELL` describes the exit, not the entry direction.
    pub fn side(&self) -> Side {
        SIDE_FIELDS
            .iter()
            .find_map(|name| self.text(name))
            .map(|label| Side::from_label(&label))
            .unwrap_or(Side::Buy)
    }

    pub fn status(&self) -> Option<String> {
        self.text("status")
    }

    pub fn is_waiting_sell(&self) -> bool {
        self.status().as_deref() == Some(STATUS_WAITING_SELL)
    }

    pub fn symbol(&self) -> Option<String> {
        self.text("symbol").filter(|s| !s.is_empty())
    }

    pub fn id(&self) -> Option<String> {
        ID_FIELDS.iter().find_map(|name| self.text(name))
    }
}

impl From<Map<String, Value>> for OrderRecord {
    fn from(map: Map<String, Value>) -> Self {
        OrderRecord(map)
    }
}

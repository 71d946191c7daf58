//! Typed request/response schemas for the exchange REST API.
//!
//! The exchange encodes most numbers as strings, so numeric fields go
//! through [`de_f64`] / [`de_opt_f64`] which accept either form.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{Candle, OrderStatus, Ticker};

/// Envelope shared by every endpoint. `code == 0` means success.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
}

/// `result.data` list used by the public endpoints
#[derive(Debug, Deserialize)]
pub struct DataList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct OrderList {
    #[serde(default)]
    pub order_list: Vec<OrderDetail>,
}

#[derive(Debug, Deserialize)]
pub struct TradeList {
    #[serde(default)]
    pub trade_list: Vec<TradeRecord>,
}

#[derive(Debug, Deserialize)]
pub struct AccountSummary {
    #[serde(default)]
    pub accounts: Vec<Balance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NumberOrString::Number(n) => Some(*n),
            NumberOrString::Text(s) => s.trim().parse().ok(),
        }
    }
}

pub fn de_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = NumberOrString::deserialize(deserializer)?;
    value
        .as_f64()
        .ok_or_else(|| serde::de::Error::custom(format!("not a number: {:?}", value)))
}

pub fn de_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()))
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// `public/get-ticker` entry
#[derive(Debug, Clone, Deserialize)]
pub struct TickerData {
    #[serde(rename = "i")]
    pub instrument_name: String,
    #[serde(rename = "a", deserialize_with = "de_f64")]
    pub last_price: f64,
    #[serde(rename = "b", default, deserialize_with = "de_opt_f64")]
    pub best_bid: Option<f64>,
    #[serde(rename = "k", default, deserialize_with = "de_opt_f64")]
    pub best_ask: Option<f64>,
    #[serde(rename = "h", default, deserialize_with = "de_opt_f64")]
    pub high_24h: Option<f64>,
    #[serde(rename = "l", default, deserialize_with = "de_opt_f64")]
    pub low_24h: Option<f64>,
    #[serde(rename = "v", default, deserialize_with = "de_opt_f64")]
    pub volume_24h: Option<f64>,
    #[serde(rename = "t", default)]
    pub timestamp: Option<i64>,
}

impl From<TickerData> for Ticker {
    fn from(data: TickerData) -> Self {
        Ticker {
            instrument_name: data.instrument_name,
            last_price: data.last_price,
            best_bid: data.best_bid,
            best_ask: data.best_ask,
            high_24h: data.high_24h,
            low_24h: data.low_24h,
            volume_24h: data.volume_24h,
            timestamp: data.timestamp.map(millis_to_datetime).unwrap_or_else(Utc::now),
        }
    }
}

/// `public/get-candlestick` entry
#[derive(Debug, Clone, Deserialize)]
pub struct CandleData {
    pub t: i64,
    #[serde(deserialize_with = "de_f64")]
    pub o: f64,
    #[serde(deserialize_with = "de_f64")]
    pub h: f64,
    #[serde(deserialize_with = "de_f64")]
    pub l: f64,
    #[serde(deserialize_with = "de_f64")]
    pub c: f64,
    #[serde(deserialize_with = "de_f64")]
    pub v: f64,
}

impl From<CandleData> for Candle {
    fn from(data: CandleData) -> Self {
        Candle {
            timestamp: millis_to_datetime(data.t),
            open: data.o,
            high: data.h,
            low: data.l,
            close: data.c,
            volume: data.v,
        }
    }
}

/// One side of the order book: price and quantity
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "Vec<NumberOrString>")]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

impl TryFrom<Vec<NumberOrString>> for BookLevel {
    type Error = String;

    fn try_from(values: Vec<NumberOrString>) -> Result<Self, Self::Error> {
        match (
            values.first().and_then(|v| v.as_f64()),
            values.get(1).and_then(|v| v.as_f64()),
        ) {
            (Some(price), Some(quantity)) => Ok(BookLevel { price, quantity }),
            _ => Err(format!("invalid book level: {:?}", values)),
        }
    }
}

/// `public/get-book` entry
#[derive(Debug, Clone, Deserialize)]
pub struct Orderbook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    #[serde(default)]
    pub t: Option<i64>,
}

impl Orderbook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }
}

/// `public/get-instruments` entry, the fields used for order formatting
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentSpec {
    #[serde(alias = "symbol")]
    pub instrument_name: String,
    #[serde(default)]
    pub base_currency: Option<String>,
    #[serde(default)]
    pub quote_currency: Option<String>,
    #[serde(default = "default_price_decimals")]
    pub price_decimals: u32,
    #[serde(default = "default_quantity_decimals")]
    pub quantity_decimals: u32,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub min_quantity: Option<f64>,
}

fn default_price_decimals() -> u32 {
    2
}

fn default_quantity_decimals() -> u32 {
    6
}

/// `private/create-order` result
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderAck {
    #[serde(deserialize_with = "de_id")]
    pub order_id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
}

/// Order ids are strings on some endpoints and integers on others
fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Int(i64),
        Text(String),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Int(n) => n.to_string(),
        Id::Text(s) => s,
    })
}

/// Order state as reported by the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOrderStatus {
    Open,
    Filled,
    Cancelled,
    Rejected,
    Unknown(String),
}

impl ExchangeOrderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "ACTIVE" | "NEW" | "PENDING" => ExchangeOrderStatus::Open,
            "FILLED" => ExchangeOrderStatus::Filled,
            "CANCELED" | "CANCELLED" | "EXPIRED" => ExchangeOrderStatus::Cancelled,
            "REJECTED" => ExchangeOrderStatus::Rejected,
            _ => ExchangeOrderStatus::Unknown(raw.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for ExchangeOrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ExchangeOrderStatus::parse(&raw))
    }
}

/// `private/get-order-detail` result and `order_list` entries
#[derive(Debug, Clone, Deserialize)]
pub struct OrderDetail {
    #[serde(deserialize_with = "de_id")]
    pub order_id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
    #[serde(default)]
    pub instrument_name: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    pub status: ExchangeOrderStatus,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub cumulative_quantity: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub avg_price: Option<f64>,
}

/// What reconciliation needs to know about one exchange order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusReport {
    pub exchange_order_id: String,
    pub status: ExchangeOrderStatus,
    pub cumulative_quantity: f64,
    pub avg_price: Option<f64>,
}

impl OrderStatusReport {
    /// Local status for this report, given the ordered quantity.
    ///
    /// An open order with partial fills is PARTIALLY_FILLED. Unknown states
    /// yield None so the order is left alone.
    pub fn local_status(&self, ordered_quantity: f64) -> Option<OrderStatus> {
        match &self.status {
            ExchangeOrderStatus::Filled => Some(OrderStatus::Filled),
            ExchangeOrderStatus::Cancelled => Some(OrderStatus::Cancelled),
            ExchangeOrderStatus::Rejected => Some(OrderStatus::Rejected),
            ExchangeOrderStatus::Open => {
                if self.cumulative_quantity > 0.0 && self.cumulative_quantity < ordered_quantity {
                    Some(OrderStatus::PartiallyFilled)
                } else {
                    Some(OrderStatus::Pending)
                }
            }
            ExchangeOrderStatus::Unknown(_) => None,
        }
    }
}

impl From<OrderDetail> for OrderStatusReport {
    fn from(detail: OrderDetail) -> Self {
        OrderStatusReport {
            exchange_order_id: detail.order_id,
            status: detail.status,
            cumulative_quantity: detail.cumulative_quantity.unwrap_or(0.0),
            avg_price: detail.avg_price.filter(|p| *p > 0.0),
        }
    }
}

/// `private/get-account-summary` account entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Balance {
    pub currency: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub balance: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub available: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub order: Option<f64>, // reserved by open orders
}

impl Balance {
    pub fn available_amount(&self) -> f64 {
        self.available.unwrap_or(0.0)
    }
}

/// `private/get-trades` entry
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRecord {
    #[serde(default)]
    pub trade_id: Option<String>,
    #[serde(deserialize_with = "de_id")]
    pub order_id: String,
    pub instrument_name: String,
    pub side: String,
    #[serde(deserialize_with = "de_f64")]
    pub traded_price: f64,
    #[serde(deserialize_with = "de_f64")]
    pub traded_quantity: f64,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub fees: Option<f64>,
    #[serde(default)]
    pub create_time: Option<i64>,
}

/// Paging and time-range filter for order history and trades
#[derive(Debug, Clone, Serialize)]
pub struct HistoryFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ts: Option<i64>,
    pub page_size: u32,
    pub page: u32,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            instrument_name: None,
            start_ts: None,
            end_ts: None,
            page_size: 100,
            page: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ticker_parses_string_numbers() {
        let data: TickerData = serde_json::from_value(json!({
            "i": "BTC_USDT", "a": "43250.5", "b": "43250.1", "k": 43251.0,
            "h": "44000", "l": "42000", "v": "1234.5", "t": 1700000000000i64
        }))
        .unwrap();

        let ticker: Ticker = data.into();
        assert_eq!(ticker.instrument_name, "BTC_USDT");
        assert_eq!(ticker.last_price, 43250.5);
        assert_eq!(ticker.best_ask, Some(43251.0));
        assert_eq!(ticker.timestamp.timestamp_millis(), 1700000000000);
    }

    #[test]
    fn test_ticker_requires_price() {
        let result: Result<TickerData, _> =
            serde_json::from_value(json!({ "i": "BTC_USDT", "a": "n/a" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_order_status_mapping() {
        assert_eq!(ExchangeOrderStatus::parse("ACTIVE"), ExchangeOrderStatus::Open);
        assert_eq!(ExchangeOrderStatus::parse("NEW"), ExchangeOrderStatus::Open);
        assert_eq!(ExchangeOrderStatus::parse("PENDING"), ExchangeOrderStatus::Open);
        assert_eq!(ExchangeOrderStatus::parse("FILLED"), ExchangeOrderStatus::Filled);
        assert_eq!(ExchangeOrderStatus::parse("CANCELED"), ExchangeOrderStatus::Cancelled);
        assert_eq!(ExchangeOrderStatus::parse("EXPIRED"), ExchangeOrderStatus::Cancelled);
        assert_eq!(ExchangeOrderStatus::parse("REJECTED"), ExchangeOrderStatus::Rejected);
        assert!(matches!(
            ExchangeOrderStatus::parse("SOMETHING"),
            ExchangeOrderStatus::Unknown(_)
        ));
    }

    #[test]
    fn test_partial_fill_is_local_partially_filled() {
        let report = OrderStatusReport {
            exchange_order_id: "1".to_string(),
            status: ExchangeOrderStatus::Open,
            cumulative_quantity: 0.4,
            avg_price: Some(100.0),
        };
        assert_eq!(report.local_status(1.0), Some(OrderStatus::PartiallyFilled));

        let untouched = OrderStatusReport {
            cumulative_quantity: 0.0,
            ..report.clone()
        };
        assert_eq!(untouched.local_status(1.0), Some(OrderStatus::Pending));

        let unknown = OrderStatusReport {
            status: ExchangeOrderStatus::Unknown("X".to_string()),
            ..report
        };
        assert_eq!(unknown.local_status(1.0), None);
    }

    #[test]
    fn test_order_detail_numeric_id() {
        let detail: OrderDetail = serde_json::from_value(json!({
            "order_id": 1234567890123i64,
            "status": "FILLED",
            "cumulative_quantity": "0.5",
            "avg_price": "0"
        }))
        .unwrap();

        let report: OrderStatusReport = detail.into();
        assert_eq!(report.exchange_order_id, "1234567890123");
        assert_eq!(report.cumulative_quantity, 0.5);
        assert_eq!(report.avg_price, None); // zero means no fills priced yet
    }

    #[test]
    fn test_book_levels() {
        let book: Orderbook = serde_json::from_value(json!({
            "bids": [["100.5", "2", "3"]],
            "asks": [["101.0", "1.5", "1"]]
        }))
        .unwrap();

        assert_eq!(book.best_bid(), Some(100.5));
        assert_eq!(book.best_ask(), Some(101.0));
        assert_eq!(book.spread(), Some(0.5));
    }

    #[test]
    fn test_history_filter_skips_unset_fields() {
        let body = serde_json::to_value(HistoryFilter::default()).unwrap();
        assert_eq!(body, json!({ "page_size": 100, "page": 0 }));
    }
}

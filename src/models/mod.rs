use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TradingError;

/// A tradable base/quote pair tracked by the bot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instrument {
    pub id: i64,
    pub symbol: String, // e.g. BTC_USDT
    pub base_currency: String,
    pub quote_currency: String,
    pub is_active: bool,
    pub is_trading_enabled: bool,
    pub min_order_size: f64, // in quote currency
    pub max_order_size: f64, // in quote currency
}

impl Instrument {
    /// Exchange instrument name (`BASE_QUOTE`)
    pub fn instrument_name(&self) -> String {
        format!("{}_{}", self.base_currency, self.quote_currency)
    }
}

/// Data for registering an instrument (import/admin path)
#[derive(Debug, Clone)]
pub struct NewInstrument {
    pub base_currency: String,
    pub quote_currency: String,
    pub is_trading_enabled: bool,
    pub min_order_size: f64,
    pub max_order_size: f64,
}

impl NewInstrument {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base_currency: base.to_string(),
            quote_currency: quote.to_string(),
            is_trading_enabled: true,
            min_order_size: 10.0,
            max_order_size: 1000.0,
        }
    }
}

/// OHLCV candlestick data, oldest first when in a series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest market summary for one instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticker {
    pub instrument_name: String,
    pub last_price: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Decision emitted by the signal engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Wait,
}

/// Indicator values and trading decision for the latest bar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketAnalysis {
    pub last_price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    pub volume_ratio: f64,
    pub rsi: f64,
    pub sma50: f64,
    pub sma200: f64,
    pub ema10: f64,
    pub atr: f64,
    pub support_level: f64,
    pub resistance_level: f64,
    pub buy_signal: bool,
    pub sell_signal: bool,
    pub action: SignalAction,
    pub take_profit: f64,
    pub stop_loss: f64,
    pub risk_reward_ratio: f64,
    pub ma50_valid: bool,
    pub ma200_valid: bool,
    pub ema10_valid: bool,
    pub signal_strength: u8,
}

impl MarketAnalysis {
    pub fn ma_valid_count(&self) -> usize {
        [self.ma50_valid, self.ma200_valid, self.ema10_valid]
            .iter()
            .filter(|v| **v)
            .count()
    }
}

/// Persisted analysis row. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSnapshot {
    pub id: i64,
    pub instrument_id: i64,
    pub timestamp: DateTime<Utc>,
    pub analysis: MarketAnalysis,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// FILLED, CANCELLED and REJECTED never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// One exchange order intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub instrument_id: i64,
    pub position_id: Option<i64>,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>, // None for market orders
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub average_fill_price: Option<f64>,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub notes: Option<String>,
    pub is_manual: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>, // set for CANCELLED and REJECTED
}

impl Order {
    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }
}

/// Data for recording a new order as PENDING
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub instrument_id: i64,
    pub position_id: Option<i64>,
    pub order_type: OrderType,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub exchange_order_id: Option<String>,
    pub client_order_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

/// One open (or historical) exposure on an instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: i64,
    pub instrument_id: i64,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: Option<f64>,
    pub price_updated_at: Option<DateTime<Utc>>,
    pub entry_date: DateTime<Utc>,
    pub entry_order_id: Option<i64>,
    pub exit_order_id: Option<i64>,
    pub exit_price: Option<f64>,
    pub exit_date: Option<DateTime<Utc>>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_stop: Option<f64>, // percent below current price
    pub status: PositionStatus,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn unrealized_pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity
    }

    pub fn is_in_profit(&self, price: f64) -> bool {
        price > self.entry_price
    }

    /// True when there is no price yet or the last refresh is older than `max_age`
    pub fn is_price_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match (self.current_price, self.price_updated_at) {
            (Some(price), Some(updated)) if price > 0.0 => now - updated > max_age,
            _ => true,
        }
    }
}

/// Data for opening a position from a filled buy order
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub instrument_id: i64,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_order_id: Option<i64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_stop: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogCategory {
    Trading,
    Analysis,
    System,
    Api,
}

/// Audit record headed for the log sink
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub instrument_id: Option<i64>,
    pub order_id: Option<i64>,
    pub position_id: Option<i64>,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            level,
            category,
            message: message.into(),
            details: None,
            instrument_id: None,
            order_id: None,
            position_id: None,
        }
    }

    pub fn info(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, category, message)
    }

    pub fn error(category: LogCategory, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, category, message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn for_instrument(mut self, id: i64) -> Self {
        self.instrument_id = Some(id);
        self
    }

    pub fn for_order(mut self, id: i64) -> Self {
        self.order_id = Some(id);
        self
    }

    pub fn for_position(mut self, id: i64) -> Self {
        self.position_id = Some(id);
        self
    }
}

/// Stored audit record
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub entry: NewLogEntry,
}

// ============== String mapping for persistence ==============

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = TradingError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(TradingError::Persistence(format!(
                        "invalid {} value: {}",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(SignalAction { Buy => "BUY", Sell => "SELL", Wait => "WAIT" });
string_enum!(OrderType {
    Market => "MARKET",
    Limit => "LIMIT",
    StopLoss => "STOP_LOSS",
    TakeProfit => "TAKE_PROFIT",
});
string_enum!(OrderSide { Buy => "BUY", Sell => "SELL" });
string_enum!(OrderStatus {
    Pending => "PENDING",
    PartiallyFilled => "PARTIALLY_FILLED",
    Filled => "FILLED",
    Cancelled => "CANCELLED",
    Rejected => "REJECTED",
});
string_enum!(PositionStatus { Open => "open", Closing => "closing", Closed => "closed" });
string_enum!(LogLevel {
    Info => "INFO",
    Warning => "WARNING",
    Error => "ERROR",
    Critical => "CRITICAL",
});
string_enum!(LogCategory {
    Trading => "TRADING",
    Analysis => "ANALYSIS",
    System => "SYSTEM",
    Api => "API",
});

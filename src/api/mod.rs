pub mod exchange;
pub mod signing;
pub mod types;

pub use exchange::ExchangeClient;
pub use types::{
    Balance, ExchangeOrderStatus, HistoryFilter, InstrumentSpec, OrderAck, OrderDetail,
    OrderStatusReport, Orderbook, TradeRecord,
};

use async_trait::async_trait;

use crate::models::{Candle, OrderSide, OrderType, Ticker};

/// Exchange operations the orchestrators depend on.
///
/// Failures are soft: implementations log them and return `None`, an empty
/// list or `false`, so callers skip the affected item for this cycle.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_ticker(&self, instrument_name: &str) -> Option<Ticker>;

    /// Candles oldest first
    async fn get_candles(&self, instrument_name: &str, timeframe: &str, count: usize)
        -> Vec<Candle>;

    async fn place_order(
        &self,
        instrument_name: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Option<OrderAck>;

    async fn cancel_order(&self, exchange_order_id: &str) -> bool;

    async fn get_order_status(&self, exchange_order_id: &str) -> Option<OrderStatusReport>;

    async fn get_balance(&self, currency: Option<&str>) -> Vec<Balance>;
}

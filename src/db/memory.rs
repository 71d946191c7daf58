use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{AuditSink, Store};
use crate::error::TradingError;
use crate::models::{
    AnalysisSnapshot, Instrument, LogEntry, MarketAnalysis, NewInstrument, NewLogEntry, NewOrder,
    NewPosition, Order, OrderSide, OrderStatus, Position, PositionStatus,
};
use crate::Result;

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    instruments: BTreeMap<i64, Instrument>,
    analyses: BTreeMap<i64, AnalysisSnapshot>,
    orders: BTreeMap<i64, Order>,
    positions: BTreeMap<i64, Position>,
    logs: Vec<LogEntry>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn position_mut(&mut self, id: i64) -> Result<&mut Position> {
        self.positions
            .get_mut(&id)
            .ok_or_else(|| TradingError::NotFound(format!("position {}", id)))
    }
}

/// In-process store for tests and dry runs
///
/// One lock guards every table, so each trait call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit entries in insertion order
    pub async fn logs(&self) -> Vec<LogEntry> {
        self.tables.read().await.logs.clone()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.tables.read().await.orders.values().cloned().collect()
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.tables.read().await.positions.values().cloned().collect()
    }
}

#[async_trait]
impl AuditSink for MemoryStore {
    async fn record(&self, entry: NewLogEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        tables.logs.push(LogEntry {
            id,
            timestamp: Utc::now(),
            entry,
        });
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_instrument(&self, new: &NewInstrument) -> Result<Instrument> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        let instrument = Instrument {
            id,
            symbol: format!("{}_{}", new.base_currency, new.quote_currency),
            base_currency: new.base_currency.clone(),
            quote_currency: new.quote_currency.clone(),
            is_active: true,
            is_trading_enabled: new.is_trading_enabled,
            min_order_size: new.min_order_size,
            max_order_size: new.max_order_size,
        };
        tables.instruments.insert(id, instrument.clone());
        Ok(instrument)
    }

    async fn active_instruments(&self) -> Result<Vec<Instrument>> {
        Ok(self
            .tables
            .read()
            .await
            .instruments
            .values()
            .filter(|i| i.is_active && i.is_trading_enabled)
            .cloned()
            .collect())
    }

    async fn instrument(&self, id: i64) -> Result<Instrument> {
        self.tables
            .read()
            .await
            .instruments
            .get(&id)
            .cloned()
            .ok_or_else(|| TradingError::NotFound(format!("instrument {}", id)))
    }

    async fn insert_analysis(
        &self,
        instrument_id: i64,
        timestamp: DateTime<Utc>,
        analysis: &MarketAnalysis,
    ) -> Result<AnalysisSnapshot> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        let snapshot = AnalysisSnapshot {
            id,
            instrument_id,
            timestamp,
            analysis: analysis.clone(),
        };
        tables.analyses.insert(id, snapshot.clone());
        Ok(snapshot)
    }

    async fn latest_analysis(&self, instrument_id: i64) -> Result<Option<AnalysisSnapshot>> {
        Ok(self
            .tables
            .read()
            .await
            .analyses
            .values()
            .filter(|s| s.instrument_id == instrument_id)
            .max_by_key(|s| (s.timestamp, s.id))
            .cloned())
    }

    async fn analysis(&self, id: i64) -> Result<AnalysisSnapshot> {
        self.tables
            .read()
            .await
            .analyses
            .get(&id)
            .cloned()
            .ok_or_else(|| TradingError::NotFound(format!("analysis {}", id)))
    }

    async fn insert_order(&self, new: &NewOrder) -> Result<Order> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        let now = Utc::now();
        let order = Order {
            id,
            instrument_id: new.instrument_id,
            position_id: new.position_id,
            order_type: new.order_type,
            side: new.side,
            quantity: new.quantity,
            price: new.price,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            average_fill_price: None,
            exchange_order_id: new.exchange_order_id.clone(),
            client_order_id: new.client_order_id.clone(),
            notes: new.notes.clone(),
            is_manual: false,
            created_at: now,
            updated_at: now,
            filled_at: None,
            cancelled_at: None,
        };
        tables.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn order(&self, id: i64) -> Result<Order> {
        self.tables
            .read()
            .await
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| TradingError::NotFound(format!("order {}", id)))
    }

    async fn open_orders(&self) -> Result<Vec<Order>> {
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn has_pending_buy(&self, instrument_id: i64) -> Result<bool> {
        Ok(self.tables.read().await.orders.values().any(|o| {
            o.instrument_id == instrument_id
                && o.side == OrderSide::Buy
                && !o.status.is_terminal()
        }))
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| TradingError::NotFound(format!("order {}", order.id)))?;
        stored.status = order.status;
        stored.filled_quantity = order.filled_quantity;
        stored.average_fill_price = order.average_fill_price;
        stored.filled_at = order.filled_at;
        stored.cancelled_at = order.cancelled_at;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        Ok(self
            .tables
            .read()
            .await
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }

    async fn has_open_position(&self, instrument_id: i64) -> Result<bool> {
        Ok(self.tables.read().await.positions.values().any(|p| {
            p.instrument_id == instrument_id && p.status != PositionStatus::Closed
        }))
    }

    async fn position(&self, id: i64) -> Result<Position> {
        self.tables
            .read()
            .await
            .positions
            .get(&id)
            .cloned()
            .ok_or_else(|| TradingError::NotFound(format!("position {}", id)))
    }

    async fn position_for_entry_order(&self, order_id: i64) -> Result<Option<Position>> {
        Ok(self
            .tables
            .read()
            .await
            .positions
            .values()
            .find(|p| p.entry_order_id == Some(order_id))
            .cloned())
    }

    async fn insert_position(&self, new: &NewPosition) -> Result<Position> {
        let mut tables = self.tables.write().await;
        if let Some(order_id) = new.entry_order_id {
            if tables
                .positions
                .values()
                .any(|p| p.entry_order_id == Some(order_id))
            {
                return Err(TradingError::Persistence(format!(
                    "position for entry order {} already exists",
                    order_id
                )));
            }
        }

        let id = tables.next_id();
        let position = Position {
            id,
            instrument_id: new.instrument_id,
            quantity: new.quantity,
            entry_price: new.entry_price,
            current_price: Some(new.entry_price),
            price_updated_at: Some(Utc::now()),
            entry_date: Utc::now(),
            entry_order_id: new.entry_order_id,
            exit_order_id: None,
            exit_price: None,
            exit_date: None,
            stop_loss: new.stop_loss,
            take_profit: new.take_profit,
            trailing_stop: new.trailing_stop,
            status: PositionStatus::Open,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        };
        tables.positions.insert(id, position.clone());
        Ok(position)
    }

    async fn refresh_position_price(
        &self,
        position_id: i64,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let position = tables.position_mut(position_id)?;
        position.current_price = Some(price);
        position.price_updated_at = Some(at);
        position.unrealized_pnl = position.unrealized_pnl_at(price);
        Ok(())
    }

    async fn raise_stop_loss(&self, position_id: i64, stop_loss: f64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let position = tables.position_mut(position_id)?;
        if position.stop_loss.map_or(true, |current| stop_loss > current) {
            position.stop_loss = Some(stop_loss);
        }
        Ok(())
    }

    async fn record_exit(&self, position_id: i64, exit: &NewOrder) -> Result<Option<Order>> {
        let mut tables = self.tables.write().await;
        if tables.position_mut(position_id)?.status != PositionStatus::Open {
            return Ok(None);
        }

        let id = tables.next_id();
        let now = Utc::now();
        let order = Order {
            id,
            instrument_id: exit.instrument_id,
            position_id: Some(position_id),
            order_type: exit.order_type,
            side: exit.side,
            quantity: exit.quantity,
            price: exit.price,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            average_fill_price: None,
            exchange_order_id: exit.exchange_order_id.clone(),
            client_order_id: exit.client_order_id.clone(),
            notes: exit.notes.clone(),
            is_manual: false,
            created_at: now,
            updated_at: now,
            filled_at: None,
            cancelled_at: None,
        };
        tables.orders.insert(id, order.clone());

        let position = tables.position_mut(position_id)?;
        position.status = PositionStatus::Closing;
        position.exit_order_id = Some(id);
        Ok(Some(order))
    }

    async fn close_position(
        &self,
        position_id: i64,
        exit_price: f64,
        exit_date: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let position = tables.position_mut(position_id)?;
        if position.status != PositionStatus::Closing {
            return Ok(());
        }
        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.exit_date = Some(exit_date);
        position.current_price = Some(exit_price);
        position.realized_pnl = position.unrealized_pnl_at(exit_price);
        position.unrealized_pnl = 0.0;
        Ok(())
    }

    async fn reopen_position(&self, position_id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let position = tables.position_mut(position_id)?;
        if position.status == PositionStatus::Closing {
            position.status = PositionStatus::Open;
            position.exit_order_id = None;
        }
        Ok(())
    }
}

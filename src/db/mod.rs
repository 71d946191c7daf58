// Persistence collaborator: Postgres for production, in-memory for tests and dry runs
pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    AnalysisSnapshot, Instrument, MarketAnalysis, NewInstrument, NewLogEntry, NewOrder,
    NewPosition, Order, Position,
};
use crate::Result;

/// Append-only audit trail (`system_logs`)
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: NewLogEntry) -> Result<()>;

    /// Record an entry; failures only reach the process log
    async fn log(&self, entry: NewLogEntry) {
        let message = entry.message.clone();
        if let Err(e) = self.record(entry).await {
            tracing::warn!(error = %e, "Failed to write audit entry: {}", message);
        }
    }
}

/// Read/write access to instruments, analyses, orders and positions.
///
/// Position writes are field-scoped: price refresh, stop-loss ratchet and
/// exit transitions each touch their own columns, so the analysis and risk
/// loops can update the same row without clobbering each other.
#[async_trait]
pub trait Store: AuditSink {
    // ============== Instruments ==============

    async fn insert_instrument(&self, new: &NewInstrument) -> Result<Instrument>;

    /// Active instruments with trading enabled
    async fn active_instruments(&self) -> Result<Vec<Instrument>>;

    async fn instrument(&self, id: i64) -> Result<Instrument>;

    // ============== Analysis ==============

    async fn insert_analysis(
        &self,
        instrument_id: i64,
        timestamp: DateTime<Utc>,
        analysis: &MarketAnalysis,
    ) -> Result<AnalysisSnapshot>;

    async fn latest_analysis(&self, instrument_id: i64) -> Result<Option<AnalysisSnapshot>>;

    async fn analysis(&self, id: i64) -> Result<AnalysisSnapshot>;

    // ============== Orders ==============

    /// Record a new order as PENDING
    async fn insert_order(&self, new: &NewOrder) -> Result<Order>;

    async fn order(&self, id: i64) -> Result<Order>;

    /// Orders in PENDING or PARTIALLY_FILLED
    async fn open_orders(&self) -> Result<Vec<Order>>;

    async fn has_pending_buy(&self, instrument_id: i64) -> Result<bool>;

    /// Persist status and fill fields of a reconciled order
    async fn update_order(&self, order: &Order) -> Result<()>;

    // ============== Positions ==============

    /// Positions with status `open`
    async fn open_positions(&self) -> Result<Vec<Position>>;

    /// True while an `open` or `closing` position exists for the instrument
    async fn has_open_position(&self, instrument_id: i64) -> Result<bool>;

    async fn position(&self, id: i64) -> Result<Position>;

    async fn position_for_entry_order(&self, order_id: i64) -> Result<Option<Position>>;

    async fn insert_position(&self, new: &NewPosition) -> Result<Position>;

    /// Set current price and recompute unrealized P&L
    async fn refresh_position_price(
        &self,
        position_id: i64,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Raise the stop-loss; a lower value is ignored
    async fn raise_stop_loss(&self, position_id: i64, stop_loss: f64) -> Result<()>;

    /// Insert the exit order and move the position to `closing` atomically.
    ///
    /// Returns None, writing nothing, when the position is no longer `open`.
    async fn record_exit(&self, position_id: i64, exit: &NewOrder) -> Result<Option<Order>>;

    /// `closing` -> `closed` with realized P&L
    async fn close_position(
        &self,
        position_id: i64,
        exit_price: f64,
        exit_date: DateTime<Utc>,
    ) -> Result<()>;

    /// `closing` -> `open`, clearing the exit order
    async fn reopen_position(&self, position_id: i64) -> Result<()>;
}

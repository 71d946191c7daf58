use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use super::{AuditSink, Store};
use crate::error::TradingError;
use crate::models::{
    AnalysisSnapshot, Instrument, MarketAnalysis, NewInstrument, NewLogEntry, NewOrder,
    NewPosition, Order, OrderStatus, Position, PositionStatus,
};
use crate::Result;

const ORDER_COLUMNS: &str = "id, instrument_id, position_id, order_type, side, quantity, price, \
    status, filled_quantity, average_fill_price, exchange_order_id, client_order_id, notes, \
    is_manual, created_at, updated_at, filled_at, cancelled_at";

const POSITION_COLUMNS: &str = "id, instrument_id, quantity, entry_price, current_price, \
    price_updated_at, entry_date, entry_order_id, exit_order_id, exit_price, exit_date, \
    stop_loss, take_profit, trailing_stop, status, unrealized_pnl, realized_pnl";

const INSTRUMENT_COLUMNS: &str = "id, symbol, base_currency, quote_currency, is_active, \
    is_trading_enabled, min_order_size, max_order_size";

/// Postgres persistence for the trading core
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============== Column conversions ==============

fn dec(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| TradingError::Persistence(format!("{} is not representable as NUMERIC", value)))
}

fn opt_dec(value: Option<f64>) -> Result<Option<Decimal>> {
    value.map(dec).transpose()
}

fn num(row: &PgRow, column: &str) -> Result<f64> {
    let value: Decimal = row.try_get(column)?;
    Ok(value.to_f64().unwrap_or(0.0))
}

fn opt_num(row: &PgRow, column: &str) -> Result<Option<f64>> {
    let value: Option<Decimal> = row.try_get(column)?;
    Ok(value.and_then(|v| v.to_f64()))
}

fn parse<T: std::str::FromStr<Err = TradingError>>(row: &PgRow, column: &str) -> Result<T> {
    let text: String = row.try_get(column)?;
    text.parse()
}

fn instrument_from_row(row: &PgRow) -> Result<Instrument> {
    Ok(Instrument {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        base_currency: row.try_get("base_currency")?,
        quote_currency: row.try_get("quote_currency")?,
        is_active: row.try_get("is_active")?,
        is_trading_enabled: row.try_get("is_trading_enabled")?,
        min_order_size: num(row, "min_order_size")?,
        max_order_size: num(row, "max_order_size")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<AnalysisSnapshot> {
    let strength: i16 = row.try_get("signal_strength")?;
    Ok(AnalysisSnapshot {
        id: row.try_get("id")?,
        instrument_id: row.try_get("instrument_id")?,
        timestamp: row.try_get("timestamp")?,
        analysis: MarketAnalysis {
            last_price: num(row, "last_price")?,
            high_24h: num(row, "high_24h")?,
            low_24h: num(row, "low_24h")?,
            volume_24h: num(row, "volume_24h")?,
            volume_ratio: row.try_get("volume_ratio")?,
            rsi: row.try_get("rsi")?,
            sma50: num(row, "sma50")?,
            sma200: num(row, "sma200")?,
            ema10: num(row, "ema10")?,
            atr: num(row, "atr")?,
            support_level: num(row, "support_level")?,
            resistance_level: num(row, "resistance_level")?,
            buy_signal: row.try_get("buy_signal")?,
            sell_signal: row.try_get("sell_signal")?,
            action: parse(row, "action")?,
            take_profit: num(row, "take_profit")?,
            stop_loss: num(row, "stop_loss")?,
            risk_reward_ratio: row.try_get("risk_reward_ratio")?,
            ma50_valid: row.try_get("ma50_valid")?,
            ma200_valid: row.try_get("ma200_valid")?,
            ema10_valid: row.try_get("ema10_valid")?,
            signal_strength: strength.clamp(0, 5) as u8,
        },
    })
}

fn order_from_row(row: &PgRow) -> Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        instrument_id: row.try_get("instrument_id")?,
        position_id: row.try_get("position_id")?,
        order_type: parse(row, "order_type")?,
        side: parse(row, "side")?,
        quantity: num(row, "quantity")?,
        price: opt_num(row, "price")?,
        status: parse(row, "status")?,
        filled_quantity: num(row, "filled_quantity")?,
        average_fill_price: opt_num(row, "average_fill_price")?,
        exchange_order_id: row.try_get("exchange_order_id")?,
        client_order_id: row.try_get("client_order_id")?,
        notes: row.try_get("notes")?,
        is_manual: row.try_get("is_manual")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        filled_at: row.try_get("filled_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

fn position_from_row(row: &PgRow) -> Result<Position> {
    Ok(Position {
        id: row.try_get("id")?,
        instrument_id: row.try_get("instrument_id")?,
        quantity: num(row, "quantity")?,
        entry_price: num(row, "entry_price")?,
        current_price: opt_num(row, "current_price")?,
        price_updated_at: row.try_get("price_updated_at")?,
        entry_date: row.try_get("entry_date")?,
        entry_order_id: row.try_get("entry_order_id")?,
        exit_order_id: row.try_get("exit_order_id")?,
        exit_price: opt_num(row, "exit_price")?,
        exit_date: row.try_get("exit_date")?,
        stop_loss: opt_num(row, "stop_loss")?,
        take_profit: opt_num(row, "take_profit")?,
        trailing_stop: opt_num(row, "trailing_stop")?,
        status: parse(row, "status")?,
        unrealized_pnl: num(row, "unrealized_pnl")?,
        realized_pnl: num(row, "realized_pnl")?,
    })
}

#[async_trait]
impl AuditSink for PostgresStore {
    async fn record(&self, entry: NewLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_logs (level, category, message, details, instrument_id, order_id, position_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.level.as_str())
        .bind(entry.category.as_str())
        .bind(&entry.message)
        .bind(&entry.details)
        .bind(entry.instrument_id)
        .bind(entry.order_id)
        .bind(entry.position_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_instrument(&self, new: &NewInstrument) -> Result<Instrument> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO instruments (symbol, base_currency, quote_currency, is_trading_enabled, min_order_size, max_order_size)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (symbol) DO UPDATE SET
                is_active = TRUE,
                is_trading_enabled = EXCLUDED.is_trading_enabled,
                min_order_size = EXCLUDED.min_order_size,
                max_order_size = EXCLUDED.max_order_size
            RETURNING {}
            "#,
            INSTRUMENT_COLUMNS
        ))
        .bind(format!("{}_{}", new.base_currency, new.quote_currency))
        .bind(&new.base_currency)
        .bind(&new.quote_currency)
        .bind(new.is_trading_enabled)
        .bind(dec(new.min_order_size)?)
        .bind(dec(new.max_order_size)?)
        .fetch_one(&self.pool)
        .await?;

        instrument_from_row(&row)
    }

    async fn active_instruments(&self) -> Result<Vec<Instrument>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM instruments WHERE is_active AND is_trading_enabled ORDER BY id",
            INSTRUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(instrument_from_row).collect()
    }

    async fn instrument(&self, id: i64) -> Result<Instrument> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM instruments WHERE id = $1",
            INSTRUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TradingError::NotFound(format!("instrument {}", id)))?;

        instrument_from_row(&row)
    }

    async fn insert_analysis(
        &self,
        instrument_id: i64,
        timestamp: DateTime<Utc>,
        analysis: &MarketAnalysis,
    ) -> Result<AnalysisSnapshot> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO analysis_snapshots (
                instrument_id, timestamp, last_price, high_24h, low_24h, volume_24h,
                volume_ratio, rsi, sma50, sma200, ema10, atr, support_level, resistance_level,
                buy_signal, sell_signal, action, take_profit, stop_loss, risk_reward_ratio,
                ma50_valid, ma200_valid, ema10_valid, signal_strength
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            RETURNING id
            "#,
        )
        .bind(instrument_id)
        .bind(timestamp)
        .bind(dec(analysis.last_price)?)
        .bind(dec(analysis.high_24h)?)
        .bind(dec(analysis.low_24h)?)
        .bind(dec(analysis.volume_24h)?)
        .bind(analysis.volume_ratio)
        .bind(analysis.rsi)
        .bind(dec(analysis.sma50)?)
        .bind(dec(analysis.sma200)?)
        .bind(dec(analysis.ema10)?)
        .bind(dec(analysis.atr)?)
        .bind(dec(analysis.support_level)?)
        .bind(dec(analysis.resistance_level)?)
        .bind(analysis.buy_signal)
        .bind(analysis.sell_signal)
        .bind(analysis.action.as_str())
        .bind(dec(analysis.take_profit)?)
        .bind(dec(analysis.stop_loss)?)
        .bind(analysis.risk_reward_ratio)
        .bind(analysis.ma50_valid)
        .bind(analysis.ma200_valid)
        .bind(analysis.ema10_valid)
        .bind(analysis.signal_strength as i16)
        .fetch_one(&self.pool)
        .await?;

        Ok(AnalysisSnapshot {
            id,
            instrument_id,
            timestamp,
            analysis: analysis.clone(),
        })
    }

    async fn latest_analysis(&self, instrument_id: i64) -> Result<Option<AnalysisSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM analysis_snapshots
            WHERE instrument_id = $1
            ORDER BY timestamp DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(instrument_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn analysis(&self, id: i64) -> Result<AnalysisSnapshot> {
        let row = sqlx::query("SELECT * FROM analysis_snapshots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| TradingError::NotFound(format!("analysis {}", id)))?;

        snapshot_from_row(&row)
    }

    async fn insert_order(&self, new: &NewOrder) -> Result<Order> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (
                instrument_id, position_id, order_type, side, quantity, price,
                status, exchange_order_id, client_order_id, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(new.instrument_id)
        .bind(new.position_id)
        .bind(new.order_type.as_str())
        .bind(new.side.as_str())
        .bind(dec(new.quantity)?)
        .bind(opt_dec(new.price)?)
        .bind(OrderStatus::Pending.as_str())
        .bind(&new.exchange_order_id)
        .bind(&new.client_order_id)
        .bind(&new.notes)
        .fetch_one(&self.pool)
        .await?;

        order_from_row(&row)
    }

    async fn order(&self, id: i64) -> Result<Order> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| TradingError::NotFound(format!("order {}", id)))?;

        order_from_row(&row)
    }

    async fn open_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE status IN ('PENDING', 'PARTIALLY_FILLED') ORDER BY id",
            ORDER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn has_pending_buy(&self, instrument_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM orders
                WHERE instrument_id = $1 AND side = 'BUY'
                  AND status IN ('PENDING', 'PARTIALLY_FILLED')
            )
            "#,
        )
        .bind(instrument_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = $2,
                filled_quantity = $3,
                average_fill_price = $4,
                filled_at = $5,
                cancelled_at = $6,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(dec(order.filled_quantity)?)
        .bind(opt_dec(order.average_fill_price)?)
        .bind(order.filled_at)
        .bind(order.cancelled_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TradingError::NotFound(format!("order {}", order.id)));
        }
        Ok(())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE status = 'open' ORDER BY id",
            POSITION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(position_from_row).collect()
    }

    async fn has_open_position(&self, instrument_id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM positions WHERE instrument_id = $1 AND status IN ('open', 'closing'))",
        )
        .bind(instrument_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn position(&self, id: i64) -> Result<Position> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE id = $1",
            POSITION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TradingError::NotFound(format!("position {}", id)))?;

        position_from_row(&row)
    }

    async fn position_for_entry_order(&self, order_id: i64) -> Result<Option<Position>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE entry_order_id = $1",
            POSITION_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(position_from_row).transpose()
    }

    async fn insert_position(&self, new: &NewPosition) -> Result<Position> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO positions (
                instrument_id, quantity, entry_price, current_price, price_updated_at,
                entry_order_id, stop_loss, take_profit, trailing_stop, status
            )
            VALUES ($1, $2, $3, $3, NOW(), $4, $5, $6, $7, 'open')
            RETURNING {}
            "#,
            POSITION_COLUMNS
        ))
        .bind(new.instrument_id)
        .bind(dec(new.quantity)?)
        .bind(dec(new.entry_price)?)
        .bind(new.entry_order_id)
        .bind(opt_dec(new.stop_loss)?)
        .bind(opt_dec(new.take_profit)?)
        .bind(opt_dec(new.trailing_stop)?)
        .fetch_one(&self.pool)
        .await?;

        position_from_row(&row)
    }

    async fn refresh_position_price(
        &self,
        position_id: i64,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                current_price = $2,
                price_updated_at = $3,
                unrealized_pnl = ($2 - entry_price) * quantity
            WHERE id = $1
            "#,
        )
        .bind(position_id)
        .bind(dec(price)?)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn raise_stop_loss(&self, position_id: i64, stop_loss: f64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET stop_loss = $2
            WHERE id = $1 AND (stop_loss IS NULL OR stop_loss < $2)
            "#,
        )
        .bind(position_id)
        .bind(dec(stop_loss)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_exit(&self, position_id: i64, exit: &NewOrder) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;

        // Lock the row so a concurrent exit sees `closing`
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM positions WHERE id = $1 FOR UPDATE")
                .bind(position_id)
                .fetch_optional(&mut *tx)
                .await?;

        match status.as_deref().map(str::parse::<PositionStatus>).transpose()? {
            None => return Err(TradingError::NotFound(format!("position {}", position_id))),
            Some(PositionStatus::Open) => {}
            Some(_) => return Ok(None),
        }

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (
                instrument_id, position_id, order_type, side, quantity, price,
                status, exchange_order_id, client_order_id, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7, $8, $9)
            RETURNING {}
            "#,
            ORDER_COLUMNS
        ))
        .bind(exit.instrument_id)
        .bind(position_id)
        .bind(exit.order_type.as_str())
        .bind(exit.side.as_str())
        .bind(dec(exit.quantity)?)
        .bind(opt_dec(exit.price)?)
        .bind(&exit.exchange_order_id)
        .bind(&exit.client_order_id)
        .bind(&exit.notes)
        .fetch_one(&mut *tx)
        .await?;
        let order = order_from_row(&row)?;

        sqlx::query("UPDATE positions SET status = 'closing', exit_order_id = $2 WHERE id = $1")
            .bind(position_id)
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(order))
    }

    async fn close_position(
        &self,
        position_id: i64,
        exit_price: f64,
        exit_date: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                status = 'closed',
                exit_price = $2,
                exit_date = $3,
                current_price = $2,
                realized_pnl = ($2 - entry_price) * quantity,
                unrealized_pnl = 0
            WHERE id = $1 AND status = 'closing'
            "#,
        )
        .bind(position_id)
        .bind(dec(exit_price)?)
        .bind(exit_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reopen_position(&self, position_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET status = 'open', exit_order_id = NULL WHERE id = $1 AND status = 'closing'",
        )
        .bind(position_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogCategory, OrderSide, OrderType, SignalAction};

    async fn get_test_db() -> PostgresStore {
        dotenvy::dotenv().ok();
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/cryptotrader_test".to_string());
        PostgresStore::new(&database_url).await.unwrap()
    }

    fn analysis() -> MarketAnalysis {
        MarketAnalysis {
            last_price: 100.0,
            high_24h: 105.0,
            low_24h: 95.0,
            volume_24h: 1234.5,
            volume_ratio: 1.6,
            rsi: 28.5,
            sma50: 98.0,
            sma200: 97.0,
            ema10: 99.0,
            atr: 2.0,
            support_level: 90.0,
            resistance_level: 110.0,
            buy_signal: true,
            sell_signal: false,
            action: SignalAction::Buy,
            take_profit: 110.0,
            stop_loss: 89.1,
            risk_reward_ratio: 0.917,
            ma50_valid: true,
            ma200_valid: true,
            ema10_valid: true,
            signal_strength: 5,
        }
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_analysis_roundtrip_and_latest() {
        let db = get_test_db().await;
        let instrument = db
            .insert_instrument(&NewInstrument::new("PGT", "USDT"))
            .await
            .unwrap();

        let older = Utc::now() - chrono::Duration::minutes(15);
        db.insert_analysis(instrument.id, older, &analysis()).await.unwrap();
        let newest = db
            .insert_analysis(instrument.id, Utc::now(), &analysis())
            .await
            .unwrap();

        let latest = db.latest_analysis(instrument.id).await.unwrap().unwrap();
        assert_eq!(latest.id, newest.id);
        assert_eq!(latest.analysis.action, SignalAction::Buy);
        assert_eq!(latest.analysis.stop_loss, 89.1);
        assert_eq!(latest.analysis.signal_strength, 5);
    }

    #[tokio::test]
    #[ignore] // Requires Postgres running
    async fn test_exit_is_transactional_and_single() {
        let db = get_test_db().await;
        let instrument = db
            .insert_instrument(&NewInstrument::new("PGX", "USDT"))
            .await
            .unwrap();
        let position = db
            .insert_position(&NewPosition {
                instrument_id: instrument.id,
                quantity: 1.5,
                entry_price: 100.0,
                entry_order_id: None,
                stop_loss: Some(95.0),
                take_profit: None,
                trailing_stop: None,
            })
            .await
            .unwrap();

        let exit = NewOrder {
            instrument_id: instrument.id,
            position_id: Some(position.id),
            order_type: OrderType::Market,
            side: OrderSide::Sell,
            quantity: 1.5,
            price: None,
            exchange_order_id: Some("pg-exit".to_string()),
            client_order_id: None,
            notes: Some("Stop Loss Triggered".to_string()),
        };

        let order = db.record_exit(position.id, &exit).await.unwrap().unwrap();
        assert!(db.record_exit(position.id, &exit).await.unwrap().is_none());

        let closing = db.position(position.id).await.unwrap();
        assert_eq!(closing.status, PositionStatus::Closing);
        assert_eq!(closing.exit_order_id, Some(order.id));

        db.close_position(position.id, 90.0, Utc::now()).await.unwrap();
        let closed = db.position(position.id).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.realized_pnl, -15.0);

        db.log(NewLogEntry::info(LogCategory::Trading, "pg exit test").for_position(position.id))
            .await;
    }
}

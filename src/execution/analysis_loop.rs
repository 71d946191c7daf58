use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::executor::{ExecutionAction, Executor};
use super::position_manager::{
    apply_status_report, new_position_from_fill, position_effect, OrderTransition, PositionEffect,
};
use super::price_feed::PriceFeed;
use super::scheduler::{spawn_loop, LoopHandle, PollingLoop, Shutdown};
use crate::api::ExchangeGateway;
use crate::config::Settings;
use crate::db::Store;
use crate::models::{
    Instrument, LogCategory, LogLevel, NewLogEntry, Order, PositionStatus, SignalAction,
};
use crate::strategy::Strategy;
use crate::Result;

/// Counters for one analysis cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub analyzed: usize,
    pub skipped: usize,
    pub buy_signals: usize,
    pub orders_placed: usize,
    pub orders_checked: usize,
    pub orders_updated: usize,
    pub positions_opened: usize,
    pub positions_closed: usize,
    pub positions_reopened: usize,
    pub positions_refreshed: usize,
    pub errors: usize,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "analyzed {}, skipped {}, buy signals {}, orders {}/{} updated, positions +{} -{}, reopened {}, prices refreshed {}, errors {}",
            self.analyzed,
            self.skipped,
            self.buy_signals,
            self.orders_updated,
            self.orders_checked,
            self.positions_opened,
            self.positions_closed,
            self.positions_reopened,
            self.positions_refreshed,
            self.errors
        )
    }
}

enum EntryOutcome {
    Created,
    Existing,
    /// Neither the exchange nor the ticker gave a fill price
    NoPrice,
}

/// Periodic market analysis, order reconciliation and position price refresh
pub struct AnalysisOrchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ExchangeGateway>,
    strategy: Arc<dyn Strategy>,
    executor: Executor,
    price_feed: PriceFeed,
    timeframe: String,
    candle_count: usize,
    interval: Duration,
    instrument_delay: Duration,
    item_delay: Duration,
    error_backoff: Duration,
    trailing_stop_pct: Option<f64>,
}

impl AnalysisOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn ExchangeGateway>,
        strategy: Arc<dyn Strategy>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            gateway,
            strategy,
            executor: Executor::new(settings.trading.auto_buy_quote_amount),
            price_feed: PriceFeed::new(settings.monitor.price_max_age()),
            timeframe: settings.signals.timeframe.clone(),
            candle_count: settings.signals.candle_count,
            interval: settings.monitor.analysis_interval(),
            instrument_delay: settings.monitor.instrument_delay(),
            item_delay: settings.monitor.item_delay(),
            error_backoff: settings.monitor.analysis_error_backoff(),
            trailing_stop_pct: settings.trading.trailing_stop_pct,
        }
    }

    /// Run one full cycle outside the scheduler
    pub async fn run_cycle(&self) -> Result<AnalysisReport> {
        self.cycle(&mut Shutdown::never()).await
    }

    pub fn spawn(self: Arc<Self>) -> LoopHandle {
        spawn_loop(self)
    }

    async fn cycle(&self, shutdown: &mut Shutdown) -> Result<AnalysisReport> {
        let mut report = AnalysisReport::default();

        let instruments = self.store.active_instruments().await?;
        if instruments.is_empty() {
            tracing::debug!("No active instruments to analyze");
        }

        for (i, instrument) in instruments.iter().enumerate() {
            if i > 0 && shutdown.sleep(self.instrument_delay).await {
                return Ok(report);
            }

            match self.analyze_instrument(instrument, &mut report).await {
                Ok(true) => report.analyzed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(instrument = %instrument.symbol, error = %e, "Analysis failed");
                    self.store
                        .log(
                            NewLogEntry::error(
                                LogCategory::Analysis,
                                format!("Analysis failed for {}: {}", instrument.symbol, e),
                            )
                            .for_instrument(instrument.id),
                        )
                        .await;
                }
            }
        }

        if shutdown.is_triggered() {
            return Ok(report);
        }
        self.reconcile_orders(&mut report, shutdown).await?;

        if shutdown.is_triggered() {
            return Ok(report);
        }
        self.refresh_positions(&mut report, shutdown).await?;

        Ok(report)
    }

    /// Returns false when the instrument was skipped for this cycle
    async fn analyze_instrument(
        &self,
        instrument: &Instrument,
        report: &mut AnalysisReport,
    ) -> Result<bool> {
        let name = instrument.instrument_name();
        let candles = self
            .gateway
            .get_candles(&name, &self.timeframe, self.candle_count)
            .await;

        let analysis = match self.strategy.analyze(&candles) {
            Ok(analysis) => analysis,
            Err(e) if e.is_insufficient_data() => {
                tracing::debug!(instrument = %name, "Skipping: {}", e);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let snapshot = self
            .store
            .insert_analysis(instrument.id, Utc::now(), &analysis)
            .await?;

        tracing::info!(
            instrument = %name,
            price = analysis.last_price,
            rsi = analysis.rsi,
            action = ?analysis.action,
            strength = analysis.signal_strength,
            "📊 Analysis complete"
        );

        if analysis.action == SignalAction::Buy {
            report.buy_signals += 1;
            let decision = self
                .executor
                .handle_buy_signal(self.store.as_ref(), self.gateway.as_ref(), instrument, &snapshot)
                .await?;
            if matches!(decision.action, ExecutionAction::Execute { .. }) {
                report.orders_placed += 1;
            }
        }

        Ok(true)
    }

    // ============== Order reconciliation ==============

    async fn reconcile_orders(
        &self,
        report: &mut AnalysisReport,
        shutdown: &mut Shutdown,
    ) -> Result<()> {
        let orders = self.store.open_orders().await?;

        for (i, order) in orders.into_iter().enumerate() {
            if i > 0 && shutdown.sleep(self.item_delay).await {
                break;
            }

            let order_id = order.id;
            report.orders_checked += 1;
            if let Err(e) = self.reconcile_order(order, report).await {
                report.errors += 1;
                tracing::error!(order_id, error = %e, "Order reconciliation failed");
                self.store
                    .log(
                        NewLogEntry::error(
                            LogCategory::Trading,
                            format!("Order reconciliation failed: {}", e),
                        )
                        .for_order(order_id),
                    )
                    .await;
            }
        }

        Ok(())
    }

    async fn reconcile_order(&self, mut order: Order, report: &mut AnalysisReport) -> Result<()> {
        // Manual orders without an exchange id have nothing to poll
        let Some(exchange_order_id) = order.exchange_order_id.clone() else {
            return Ok(());
        };
        let Some(status) = self.gateway.get_order_status(&exchange_order_id).await else {
            return Ok(());
        };

        let transition = apply_status_report(&mut order, &status, Utc::now());
        if transition == OrderTransition::Unchanged {
            return Ok(());
        }

        if order.filled_quantity > 0.0 && order.average_fill_price.is_none() {
            order.average_fill_price = self.last_price(order.instrument_id).await?;
        }

        // Position effects land before the order row, and each is a no-op when repeated
        match position_effect(&order, transition) {
            PositionEffect::None => {}
            PositionEffect::Open => match self.open_position(&order).await? {
                EntryOutcome::Created => report.positions_opened += 1,
                EntryOutcome::Existing => {}
                EntryOutcome::NoPrice => {
                    tracing::warn!(
                        order_id = order.id,
                        "Filled order has no usable price yet, retrying next cycle"
                    );
                    return Ok(());
                }
            },
            PositionEffect::Close { position_id } => {
                if self.close_position(position_id, &order).await? {
                    report.positions_closed += 1;
                }
            }
            PositionEffect::Reopen { position_id } => {
                if self.reopen_position(position_id, &order).await? {
                    report.positions_reopened += 1;
                }
            }
        }

        self.store.update_order(&order).await?;
        report.orders_updated += 1;

        tracing::info!(
            order_id = order.id,
            side = %order.side,
            status = %order.status,
            filled = order.filled_quantity,
            "🔄 Order updated"
        );
        self.store
            .log(
                NewLogEntry::info(
                    LogCategory::Trading,
                    format!("Order updated: {} {}", order.id, order.status),
                )
                .with_details(json!({
                    "exchange_order_id": exchange_order_id,
                    "side": order.side.as_str(),
                    "filled_quantity": order.filled_quantity,
                    "average_fill_price": order.average_fill_price,
                }))
                .for_instrument(order.instrument_id)
                .for_order(order.id),
            )
            .await;

        Ok(())
    }

    /// Create the position for a filled BUY unless one already exists
    async fn open_position(&self, order: &Order) -> Result<EntryOutcome> {
        if let Some(existing) = self.store.position_for_entry_order(order.id).await? {
            tracing::debug!(order_id = order.id, position_id = existing.id, "Position already exists");
            return Ok(EntryOutcome::Existing);
        }

        let latest = self.store.latest_analysis(order.instrument_id).await?;
        let Some(new_position) =
            new_position_from_fill(order, latest.as_ref(), self.trailing_stop_pct)
        else {
            return Ok(EntryOutcome::NoPrice);
        };

        let position = self.store.insert_position(&new_position).await?;

        tracing::info!(
            position_id = position.id,
            quantity = position.quantity,
            entry = position.entry_price,
            "✅ Position created"
        );
        self.store
            .log(
                NewLogEntry::info(
                    LogCategory::Trading,
                    format!(
                        "Position created: {} {} @ {}",
                        position.id, position.quantity, position.entry_price
                    ),
                )
                .with_details(json!({
                    "stop_loss": position.stop_loss,
                    "take_profit": position.take_profit,
                    "trailing_stop": position.trailing_stop,
                    "analysis_id": latest.as_ref().map(|s| s.id),
                }))
                .for_instrument(position.instrument_id)
                .for_order(order.id)
                .for_position(position.id),
            )
            .await;

        Ok(EntryOutcome::Created)
    }

    async fn reopen_position(&self, position_id: i64, order: &Order) -> Result<bool> {
        let position = self.store.position(position_id).await?;
        if position.status != PositionStatus::Closing {
            return Ok(false);
        }

        self.store.reopen_position(position_id).await?;

        tracing::warn!(position_id, order_id = order.id, "Exit order {}, position reopened", order.status);
        self.store
            .log(
                NewLogEntry::new(
                    LogLevel::Warning,
                    LogCategory::Trading,
                    format!("Exit order {} {}, position reopened", order.id, order.status),
                )
                .for_order(order.id)
                .for_position(position_id),
            )
            .await;

        Ok(true)
    }

    async fn close_position(&self, position_id: i64, order: &Order) -> Result<bool> {
        let position = self.store.position(position_id).await?;
        if position.status != PositionStatus::Closing {
            return Ok(false);
        }

        let exit_price = order
            .average_fill_price
            .or(position.current_price)
            .unwrap_or(position.entry_price);
        let exit_date = order.filled_at.unwrap_or_else(Utc::now);

        self.store
            .close_position(position_id, exit_price, exit_date)
            .await?;

        let realized = (exit_price - position.entry_price) * position.quantity;
        tracing::info!(position_id, exit_price, realized, "🏁 Position closed");
        self.store
            .log(
                NewLogEntry::info(
                    LogCategory::Trading,
                    format!("Position closed: {} @ {}", position_id, exit_price),
                )
                .with_details(json!({
                    "entry_price": position.entry_price,
                    "exit_price": exit_price,
                    "realized_pnl": realized,
                }))
                .for_instrument(position.instrument_id)
                .for_order(order.id)
                .for_position(position_id),
            )
            .await;

        Ok(true)
    }

    async fn last_price(&self, instrument_id: i64) -> Result<Option<f64>> {
        let instrument = self.store.instrument(instrument_id).await?;
        Ok(self
            .gateway
            .get_ticker(&instrument.instrument_name())
            .await
            .map(|t| t.last_price)
            .filter(|p| *p > 0.0))
    }

    // ============== Position prices ==============

    async fn refresh_positions(
        &self,
        report: &mut AnalysisReport,
        shutdown: &mut Shutdown,
    ) -> Result<()> {
        let positions = self.store.open_positions().await?;
        let mut names: HashMap<i64, String> = HashMap::new();

        for (i, mut position) in positions.into_iter().enumerate() {
            if i > 0 && shutdown.sleep(self.item_delay).await {
                break;
            }

            let name = match names.get(&position.instrument_id) {
                Some(name) => name.clone(),
                None => match self.store.instrument(position.instrument_id).await {
                    Ok(instrument) => {
                        let name = instrument.instrument_name();
                        names.insert(position.instrument_id, name.clone());
                        name
                    }
                    Err(e) => {
                        report.errors += 1;
                        tracing::error!(position_id = position.id, error = %e, "Instrument lookup failed");
                        continue;
                    }
                },
            };

            match self
                .price_feed
                .refresh(self.store.as_ref(), self.gateway.as_ref(), &name, &mut position, true)
                .await
            {
                Ok(Some(_)) => report.positions_refreshed += 1,
                Ok(None) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(position_id = position.id, error = %e, "Price refresh failed");
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl PollingLoop for AnalysisOrchestrator {
    fn name(&self) -> &'static str {
        "analysis"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn error_backoff(&self) -> Duration {
        self.error_backoff
    }

    async fn tick(&self, shutdown: &mut Shutdown) -> Result<()> {
        let report = self.cycle(shutdown).await?;
        tracing::info!("Analysis cycle: {}", report);
        Ok(())
    }
}

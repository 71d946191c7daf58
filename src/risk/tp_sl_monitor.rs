use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

use super::ExitFailureTracker;
use crate::api::ExchangeGateway;
use crate::config::Settings;
use crate::db::Store;
use crate::execution::position_manager::{evaluate_position, profit_pct, ExitReason, RiskDecision};
use crate::execution::price_feed::PriceFeed;
use crate::execution::scheduler::{spawn_loop, LoopHandle, PollingLoop, Shutdown};
use crate::models::{LogCategory, LogLevel, NewLogEntry, NewOrder, OrderSide, OrderType, Position};
use crate::Result;

/// Counters for one risk cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskReport {
    pub checked: usize,
    pub exits_placed: usize,
    pub exit_failures: usize,
    pub stops_raised: usize,
    pub no_price: usize,
    pub errors: usize,
}

impl fmt::Display for RiskReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked {}, exits {}, failed exits {}, stops raised {}, errors {}",
            self.checked, self.exits_placed, self.exit_failures, self.stops_raised, self.errors
        )
    }
}

/// Watches open positions and exits them on stop-loss, take-profit or trailing stop
pub struct RiskOrchestrator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ExchangeGateway>,
    price_feed: PriceFeed,
    failures: Mutex<ExitFailureTracker>,
    interval: Duration,
    item_delay: Duration,
    error_backoff: Duration,
}

impl RiskOrchestrator {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn ExchangeGateway>, settings: &Settings) -> Self {
        Self {
            store,
            gateway,
            price_feed: PriceFeed::new(settings.monitor.price_max_age()),
            failures: Mutex::new(ExitFailureTracker::new(
                settings.monitor.exit_failure_alert_threshold,
            )),
            interval: settings.monitor.tp_sl_check_interval(),
            item_delay: settings.monitor.item_delay(),
            error_backoff: settings.monitor.risk_error_backoff(),
        }
    }

    pub async fn run_cycle(&self) -> Result<RiskReport> {
        self.cycle(&mut Shutdown::never()).await
    }

    pub fn spawn(self: Arc<Self>) -> LoopHandle {
        spawn_loop(self)
    }

    /// Current failed-exit streak for a position
    pub async fn exit_failures(&self, position_id: i64) -> u32 {
        self.failures.lock().await.failures(position_id)
    }

    async fn cycle(&self, shutdown: &mut Shutdown) -> Result<RiskReport> {
        let mut report = RiskReport::default();
        let positions = self.store.open_positions().await?;

        let open_ids: Vec<i64> = positions.iter().map(|p| p.id).collect();
        self.failures.lock().await.retain(&open_ids);

        let mut names: HashMap<i64, String> = HashMap::new();
        for (i, mut position) in positions.into_iter().enumerate() {
            if i > 0 && shutdown.sleep(self.item_delay).await {
                break;
            }

            report.checked += 1;
            let position_id = position.id;
            if let Err(e) = self.check_position(&mut position, &mut names, &mut report).await {
                report.errors += 1;
                tracing::error!(position_id, error = %e, "Risk check failed");
                self.store
                    .log(
                        NewLogEntry::error(LogCategory::Trading, format!("Risk check failed: {}", e))
                            .for_position(position_id),
                    )
                    .await;
            }
        }

        Ok(report)
    }

    async fn check_position(
        &self,
        position: &mut Position,
        names: &mut HashMap<i64, String>,
        report: &mut RiskReport,
    ) -> Result<()> {
        let name = match names.get(&position.instrument_id) {
            Some(name) => name.clone(),
            None => {
                let name = self.store.instrument(position.instrument_id).await?.instrument_name();
                names.insert(position.instrument_id, name.clone());
                name
            }
        };

        let Some(price) = self
            .price_feed
            .refresh(self.store.as_ref(), self.gateway.as_ref(), &name, position, false)
            .await?
        else {
            report.no_price += 1;
            return Ok(());
        };

        match evaluate_position(position, price) {
            RiskDecision::Hold => {}
            RiskDecision::RaiseStopLoss { from, to } => {
                self.store.raise_stop_loss(position.id, to).await?;
                position.stop_loss = Some(to);
                report.stops_raised += 1;

                tracing::info!(
                    instrument = %name,
                    position_id = position.id,
                    "📈 Trailing stop raised: {:?} -> {:.8}",
                    from,
                    to
                );
                self.store
                    .log(
                        NewLogEntry::info(
                            LogCategory::Trading,
                            format!("Trailing stop updated for position {}", position.id),
                        )
                        .with_details(json!({
                            "previous_stop_loss": from,
                            "stop_loss": to,
                            "price": price,
                        }))
                        .for_instrument(position.instrument_id)
                        .for_position(position.id),
                    )
                    .await;
            }
            RiskDecision::Exit(reason) => {
                if self.trigger_exit(position, &name, price, reason).await? {
                    report.exits_placed += 1;
                } else {
                    report.exit_failures += 1;
                }
            }
        }

        Ok(())
    }

    /// Place the market exit. Returns false when the exchange did not accept it.
    async fn trigger_exit(
        &self,
        position: &Position,
        name: &str,
        price: f64,
        reason: ExitReason,
    ) -> Result<bool> {
        tracing::warn!(
            instrument = name,
            position_id = position.id,
            price,
            pnl_pct = profit_pct(position.entry_price, price),
            "🛑 {} hit",
            reason
        );

        let Some(ack) = self
            .gateway
            .place_order(name, OrderSide::Sell, OrderType::Market, position.quantity, None)
            .await
        else {
            self.exit_failed(position, reason).await;
            return Ok(false);
        };

        let exit = NewOrder {
            instrument_id: position.instrument_id,
            position_id: Some(position.id),
            order_type: OrderType::Market,
            side: OrderSide::Sell,
            quantity: position.quantity,
            price: None,
            exchange_order_id: Some(ack.order_id.clone()),
            client_order_id: ack.client_oid.clone(),
            notes: Some(reason.order_note().to_string()),
        };

        let Some(order) = self.store.record_exit(position.id, &exit).await? else {
            // Keep the live SELL visible to reconciliation, detached from the position
            let orphan = self
                .store
                .insert_order(&NewOrder {
                    position_id: None,
                    notes: Some(format!(
                        "{} (position {} no longer open)",
                        reason.order_note(),
                        position.id
                    )),
                    ..exit
                })
                .await?;

            tracing::error!(
                position_id = position.id,
                order_id = orphan.id,
                exchange_order_id = %ack.order_id,
                "Position left `open` before the exit was recorded"
            );
            self.store
                .log(
                    NewLogEntry::error(
                        LogCategory::Trading,
                        format!(
                            "Exit order {} placed but position {} is no longer open",
                            ack.order_id, position.id
                        ),
                    )
                    .for_instrument(position.instrument_id)
                    .for_order(orphan.id)
                    .for_position(position.id),
                )
                .await;
            return Ok(true);
        };

        self.failures.lock().await.record_success(position.id);

        tracing::info!(
            position_id = position.id,
            order_id = order.id,
            "💸 Exit order placed, position closing"
        );
        self.store
            .log(
                NewLogEntry::info(
                    LogCategory::Trading,
                    format!("{} triggered for position {} at {}", reason, position.id, price),
                )
                .with_details(json!({
                    "entry_price": position.entry_price,
                    "price": price,
                    "quantity": position.quantity,
                    "stop_loss": position.stop_loss,
                    "take_profit": position.take_profit,
                    "exchange_order_id": ack.order_id,
                }))
                .for_instrument(position.instrument_id)
                .for_order(order.id)
                .for_position(position.id),
            )
            .await;

        Ok(true)
    }

    async fn exit_failed(&self, position: &Position, reason: ExitReason) {
        let (count, alert) = {
            let mut failures = self.failures.lock().await;
            let count = failures.record_failure(position.id);
            (count, failures.should_alert(count))
        };

        tracing::error!(position_id = position.id, attempts = count, "Exit order rejected");
        self.store
            .log(
                NewLogEntry::error(
                    LogCategory::Trading,
                    format!("Failed to place {} exit for position {}", reason, position.id),
                )
                .with_details(json!({ "attempts": count }))
                .for_instrument(position.instrument_id)
                .for_position(position.id),
            )
            .await;

        if alert {
            tracing::error!(position_id = position.id, "🚨 Exit failed {} times in a row", count);
            self.store
                .log(
                    NewLogEntry::new(
                        LogLevel::Critical,
                        LogCategory::Trading,
                        format!(
                            "Exit for position {} failed {} consecutive times",
                            position.id, count
                        ),
                    )
                    .with_details(json!({ "reason": reason.to_string(), "attempts": count }))
                    .for_instrument(position.instrument_id)
                    .for_position(position.id),
                )
                .await;
        }
    }
}

#[async_trait]
impl PollingLoop for RiskOrchestrator {
    fn name(&self) -> &'static str {
        "tp/sl monitor"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn error_backoff(&self) -> Duration {
        self.error_backoff
    }

    async fn tick(&self, shutdown: &mut Shutdown) -> Result<()> {
        let report = self.cycle(shutdown).await?;
        if report.checked > 0 {
            tracing::info!("Risk cycle: {}", report);
        }
        Ok(())
    }
}

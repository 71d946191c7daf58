use serde_json::json;

use crate::api::ExchangeGateway;
use crate::db::Store;
use crate::models::{
    AnalysisSnapshot, Instrument, LogCategory, NewLogEntry, NewOrder, OrderSide, OrderType,
};
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    /// Place a market BUY for `quantity` base units
    Execute { quantity: f64, quote_amount: f64 },
    /// Record the signal only
    LogSignal,
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
}

impl ExecutionDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Skip,
            reason: reason.into(),
        }
    }
}

/// Turns deduplicated BUY signals into signal logs or auto-buy orders
#[derive(Debug, Clone, Default)]
pub struct Executor {
    auto_buy_quote_amount: Option<f64>,
}

impl Executor {
    pub fn new(auto_buy_quote_amount: Option<f64>) -> Self {
        Self {
            auto_buy_quote_amount,
        }
    }

    /// Decide what to do with a BUY signal
    pub fn process_buy_signal(
        &self,
        instrument: &Instrument,
        price: f64,
        has_open_position: bool,
        has_pending_buy: bool,
    ) -> ExecutionDecision {
        // Check 1: one position per instrument
        if has_open_position {
            return ExecutionDecision::skip("open position exists");
        }

        // Check 2: an earlier BUY is still working
        if has_pending_buy {
            return ExecutionDecision::skip("pending buy order exists");
        }

        let Some(amount) = self.auto_buy_quote_amount else {
            return ExecutionDecision {
                action: ExecutionAction::LogSignal,
                reason: "auto-buy disabled".to_string(),
            };
        };

        if price <= 0.0 {
            return ExecutionDecision::skip("no valid price");
        }

        // Check 3: size within the instrument's order bounds
        let quote_amount = clamp_quote_amount(
            amount,
            instrument.min_order_size,
            instrument.max_order_size,
        );

        ExecutionDecision {
            action: ExecutionAction::Execute {
                quantity: quote_amount / price,
                quote_amount,
            },
            reason: format!("Buy signal, {:.2} {}", quote_amount, instrument.quote_currency),
        }
    }

    /// Dedup against the store, then log the signal or place the order
    pub async fn handle_buy_signal(
        &self,
        store: &dyn Store,
        gateway: &dyn ExchangeGateway,
        instrument: &Instrument,
        snapshot: &AnalysisSnapshot,
    ) -> Result<ExecutionDecision> {
        let analysis = &snapshot.analysis;
        let has_position = store.has_open_position(instrument.id).await?;
        let has_pending = store.has_pending_buy(instrument.id).await?;

        let decision =
            self.process_buy_signal(instrument, analysis.last_price, has_position, has_pending);

        match &decision.action {
            ExecutionAction::Skip => {
                tracing::info!(
                    instrument = %instrument.symbol,
                    "Skipping buy signal: {}",
                    decision.reason
                );
            }
            ExecutionAction::LogSignal => {
                tracing::info!(
                    instrument = %instrument.symbol,
                    "🟢 Buy signal: RSI {:.2}, price {}",
                    analysis.rsi,
                    analysis.last_price
                );
                store
                    .log(
                        NewLogEntry::info(
                            LogCategory::Trading,
                            format!(
                                "Buy signal detected for {} - RSI: {:.2}, Price: {}",
                                instrument.symbol, analysis.rsi, analysis.last_price
                            ),
                        )
                        .with_details(json!({
                            "rsi": analysis.rsi,
                            "price": analysis.last_price,
                            "volume_ratio": analysis.volume_ratio,
                            "signal_strength": analysis.signal_strength,
                            "take_profit": analysis.take_profit,
                            "stop_loss": analysis.stop_loss,
                        }))
                        .for_instrument(instrument.id),
                    )
                    .await;
            }
            ExecutionAction::Execute {
                quantity,
                quote_amount,
            } => {
                let Some(ack) = gateway
                    .place_order(
                        &instrument.instrument_name(),
                        OrderSide::Buy,
                        OrderType::Market,
                        *quantity,
                        None,
                    )
                    .await
                else {
                    tracing::warn!(instrument = %instrument.symbol, "Auto-buy order was not accepted");
                    return Ok(ExecutionDecision::skip("order placement failed"));
                };

                let order = store
                    .insert_order(&NewOrder {
                        instrument_id: instrument.id,
                        position_id: None,
                        order_type: OrderType::Market,
                        side: OrderSide::Buy,
                        quantity: *quantity,
                        price: None,
                        exchange_order_id: Some(ack.order_id.clone()),
                        client_order_id: ack.client_oid.clone(),
                        notes: Some(format!("Auto-buy on signal (strength {})", analysis.signal_strength)),
                    })
                    .await?;

                tracing::info!(
                    instrument = %instrument.symbol,
                    order_id = order.id,
                    "💰 Auto-buy placed: {:.6} for {:.2} {}",
                    quantity,
                    quote_amount,
                    instrument.quote_currency
                );
                store
                    .log(
                        NewLogEntry::info(
                            LogCategory::Trading,
                            format!("Auto-buy order placed for {}", instrument.symbol),
                        )
                        .with_details(json!({
                            "quantity": quantity,
                            "quote_amount": quote_amount,
                            "price": analysis.last_price,
                            "exchange_order_id": ack.order_id,
                        }))
                        .for_instrument(instrument.id)
                        .for_order(order.id),
                    )
                    .await;
            }
        }

        Ok(decision)
    }
}

/// Clamp a quote amount into `[min, max]`; a non-positive max means no upper bound
pub fn clamp_quote_amount(amount: f64, min_order_size: f64, max_order_size: f64) -> f64 {
    let lower = amount.max(min_order_size);
    if max_order_size > 0.0 {
        lower.min(max_order_size)
    } else {
        lower
    }
}

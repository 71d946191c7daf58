//! Order and position lifecycle transitions.
//!
//! Everything here is pure: the orchestrators load rows, ask these functions
//! what changed, and persist the result through the store.

use chrono::{DateTime, Utc};

use crate::api::OrderStatusReport;
use crate::models::{
    AnalysisSnapshot, NewPosition, Order, OrderSide, OrderStatus, Position,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

impl ExitReason {
    /// Note stored on the exit order
    pub fn order_note(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "Stop Loss Triggered",
            ExitReason::TakeProfit => "Take Profit Triggered",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "Stop Loss"),
            ExitReason::TakeProfit => write!(f, "Take Profit"),
        }
    }
}

/// What the risk loop should do with one open position at `price`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskDecision {
    Exit(ExitReason),
    RaiseStopLoss { from: Option<f64>, to: f64 },
    Hold,
}

/// Stop-loss first, then take-profit, then the trailing-stop ratchet
pub fn evaluate_position(position: &Position, price: f64) -> RiskDecision {
    if let Some(stop_loss) = position.stop_loss {
        if price <= stop_loss {
            return RiskDecision::Exit(ExitReason::StopLoss);
        }
    }

    if let Some(take_profit) = position.take_profit {
        if price >= take_profit {
            return RiskDecision::Exit(ExitReason::TakeProfit);
        }
    }

    match trailing_stop_level(position, price) {
        Some(to) => RiskDecision::RaiseStopLoss {
            from: position.stop_loss,
            to,
        },
        None => RiskDecision::Hold,
    }
}

/// New stop-loss from the trailing percentage, only when in profit and only upward
pub fn trailing_stop_level(position: &Position, price: f64) -> Option<f64> {
    let trailing_pct = position.trailing_stop.filter(|pct| *pct > 0.0)?;
    if !position.is_in_profit(price) {
        return None;
    }

    let candidate = price * (1.0 - trailing_pct / 100.0);
    match position.stop_loss {
        Some(current) if candidate <= current => None,
        _ => Some(candidate),
    }
}

/// Profit as a percentage of the entry price
pub fn profit_pct(entry_price: f64, price: f64) -> f64 {
    if entry_price > 0.0 {
        (price - entry_price) / entry_price * 100.0
    } else {
        0.0
    }
}

/// Result of applying an exchange status report to a local order
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderTransition {
    Unchanged,
    /// Fill progress or a status change that keeps the order open
    Progress,
    Filled,
    Cancelled,
    Rejected,
}

/// Apply an exchange report to `order` in place.
///
/// Orders already in a terminal state never change, so reprocessing a
/// FILLED order is a no-op.
pub fn apply_status_report(
    order: &mut Order,
    report: &OrderStatusReport,
    now: DateTime<Utc>,
) -> OrderTransition {
    if order.status.is_terminal() {
        return OrderTransition::Unchanged;
    }

    let Some(mut status) = report.local_status(order.quantity) else {
        return OrderTransition::Unchanged;
    };

    // An open order whose cumulative fill covers the quantity is done
    if matches!(status, OrderStatus::Pending | OrderStatus::PartiallyFilled)
        && report.cumulative_quantity > 0.0
        && report.cumulative_quantity >= order.quantity
    {
        status = OrderStatus::Filled;
    }

    let mut changed = false;
    if report.cumulative_quantity > order.filled_quantity {
        order.filled_quantity = report.cumulative_quantity;
        changed = true;
    }
    if report.avg_price.is_some() && report.avg_price != order.average_fill_price {
        order.average_fill_price = report.avg_price;
        changed = true;
    }

    match status {
        OrderStatus::Filled => {
            // Some fills are reported without a cumulative quantity
            if order.filled_quantity <= 0.0 {
                order.filled_quantity = order.quantity;
            }
            if order.average_fill_price.is_none() {
                order.average_fill_price = order.price;
            }
            order.status = OrderStatus::Filled;
            order.filled_at = Some(now);
            OrderTransition::Filled
        }
        OrderStatus::Cancelled | OrderStatus::Rejected => {
            order.status = status;
            order.cancelled_at = Some(now);
            if status == OrderStatus::Cancelled {
                OrderTransition::Cancelled
            } else {
                OrderTransition::Rejected
            }
        }
        OrderStatus::PartiallyFilled | OrderStatus::Pending => {
            if order.status != status {
                order.status = status;
                changed = true;
            }
            if changed {
                OrderTransition::Progress
            } else {
                OrderTransition::Unchanged
            }
        }
    }
}

/// Effect of an order transition on positions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionEffect {
    None,
    /// A BUY filled (fully, or partly before cancellation)
    Open,
    /// The exit SELL of this position filled
    Close { position_id: i64 },
    /// The exit SELL of this position died; the position goes back to `open`
    Reopen { position_id: i64 },
}

pub fn position_effect(order: &Order, transition: OrderTransition) -> PositionEffect {
    match (order.side, transition) {
        (OrderSide::Buy, OrderTransition::Filled) => PositionEffect::Open,
        (OrderSide::Buy, OrderTransition::Cancelled | OrderTransition::Rejected)
            if order.filled_quantity > 0.0 =>
        {
            PositionEffect::Open
        }
        (OrderSide::Sell, OrderTransition::Filled) => match order.position_id {
            Some(position_id) => PositionEffect::Close { position_id },
            None => PositionEffect::None,
        },
        (OrderSide::Sell, OrderTransition::Cancelled | OrderTransition::Rejected) => {
            match order.position_id {
                Some(position_id) => PositionEffect::Reopen { position_id },
                None => PositionEffect::None,
            }
        }
        _ => PositionEffect::None,
    }
}

/// Position for a filled BUY, seeded with TP/SL from the latest analysis
pub fn new_position_from_fill(
    order: &Order,
    latest_analysis: Option<&AnalysisSnapshot>,
    trailing_stop_pct: Option<f64>,
) -> Option<NewPosition> {
    let entry_price = order.average_fill_price.or(order.price)?;
    if order.filled_quantity <= 0.0 || entry_price <= 0.0 {
        return None;
    }

    Some(NewPosition {
        instrument_id: order.instrument_id,
        quantity: order.filled_quantity,
        entry_price,
        entry_order_id: Some(order.id),
        stop_loss: latest_analysis.map(|s| s.analysis.stop_loss),
        take_profit: latest_analysis.map(|s| s.analysis.take_profit),
        trailing_stop: trailing_stop_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ExchangeOrderStatus;
    use crate::models::{OrderType, PositionStatus};

    fn position(stop_loss: Option<f64>, take_profit: Option<f64>, trailing: Option<f64>) -> Position {
        Position {
            id: 1,
            instrument_id: 1,
            quantity: 2.0,
            entry_price: 100.0,
            current_price: Some(100.0),
            price_updated_at: Some(Utc::now()),
            entry_date: Utc::now(),
            entry_order_id: Some(10),
            exit_order_id: None,
            exit_price: None,
            exit_date: None,
            stop_loss,
            take_profit,
            trailing_stop: trailing,
            status: PositionStatus::Open,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
        }
    }

    fn order(side: OrderSide, quantity: f64) -> Order {
        Order {
            id: 10,
            instrument_id: 1,
            position_id: None,
            order_type: OrderType::Market,
            side,
            quantity,
            price: None,
            status: OrderStatus::Pending,
            filled_quantity: 0.0,
            average_fill_price: None,
            exchange_order_id: Some("ex-10".to_string()),
            client_order_id: None,
            notes: None,
            is_manual: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            filled_at: None,
            cancelled_at: None,
        }
    }

    fn report(status: ExchangeOrderStatus, cumulative: f64, avg: Option<f64>) -> OrderStatusReport {
        OrderStatusReport {
            exchange_order_id: "ex-10".to_string(),
            status,
            cumulative_quantity: cumulative,
            avg_price: avg,
        }
    }

    #[test]
    fn test_stop_loss_triggered() {
        let pos = position(Some(95.0), Some(120.0), None);
        assert_eq!(evaluate_position(&pos, 95.0), RiskDecision::Exit(ExitReason::StopLoss));
        assert_eq!(evaluate_position(&pos, 80.0), RiskDecision::Exit(ExitReason::StopLoss));
    }

    #[test]
    fn test_take_profit_triggered() {
        let pos = position(Some(95.0), Some(120.0), None);
        assert_eq!(evaluate_position(&pos, 120.0), RiskDecision::Exit(ExitReason::TakeProfit));
        assert_eq!(evaluate_position(&pos, 110.0), RiskDecision::Hold);
    }

    #[test]
    fn test_no_levels_holds() {
        let pos = position(None, None, None);
        assert_eq!(evaluate_position(&pos, 1.0), RiskDecision::Hold);
    }

    #[test]
    fn test_trailing_stop_ratchets_up_only() {
        let mut pos = position(Some(90.0), None, Some(5.0));

        // In profit: 110 * 0.95 = 104.5
        let RiskDecision::RaiseStopLoss { from, to } = evaluate_position(&pos, 110.0) else {
            panic!("expected a stop-loss raise");
        };
        assert_eq!(from, Some(90.0));
        assert!((to - 104.5).abs() < 1e-9);
        pos.stop_loss = Some(to);

        // Flat price: no change
        assert_eq!(evaluate_position(&pos, 110.0), RiskDecision::Hold);
        // Pullback above the stop: no change
        assert_eq!(evaluate_position(&pos, 108.0), RiskDecision::Hold);
    }

    #[test]
    fn test_trailing_stop_needs_profit() {
        let pos = position(None, None, Some(5.0));
        assert_eq!(trailing_stop_level(&pos, 100.0), None);
        assert_eq!(trailing_stop_level(&pos, 99.0), None);
        assert!(trailing_stop_level(&pos, 101.0).is_some());
    }

    #[test]
    fn test_full_fill() {
        let mut buy = order(OrderSide::Buy, 1.0);
        let transition = apply_status_report(
            &mut buy,
            &report(ExchangeOrderStatus::Filled, 1.0, Some(101.5)),
            Utc::now(),
        );

        assert_eq!(transition, OrderTransition::Filled);
        assert_eq!(buy.status, OrderStatus::Filled);
        assert_eq!(buy.average_fill_price, Some(101.5));
        assert!(buy.filled_at.is_some());
        assert_eq!(position_effect(&buy, transition), PositionEffect::Open);
    }

    #[test]
    fn test_reprocessing_filled_order_is_noop() {
        let mut buy = order(OrderSide::Buy, 1.0);
        let filled = report(ExchangeOrderStatus::Filled, 1.0, Some(101.5));
        apply_status_report(&mut buy, &filled, Utc::now());
        let snapshot = buy.clone();

        let transition = apply_status_report(&mut buy, &filled, Utc::now());
        assert_eq!(transition, OrderTransition::Unchanged);
        assert_eq!(buy, snapshot);
        assert_eq!(position_effect(&buy, transition), PositionEffect::None);
    }

    #[test]
    fn test_partial_fill_then_complete() {
        let mut buy = order(OrderSide::Buy, 2.0);

        let transition = apply_status_report(
            &mut buy,
            &report(ExchangeOrderStatus::Open, 0.5, Some(100.0)),
            Utc::now(),
        );
        assert_eq!(transition, OrderTransition::Progress);
        assert_eq!(buy.status, OrderStatus::PartiallyFilled);
        assert_eq!(buy.filled_quantity, 0.5);

        // Same report again changes nothing
        let transition = apply_status_report(
            &mut buy,
            &report(ExchangeOrderStatus::Open, 0.5, Some(100.0)),
            Utc::now(),
        );
        assert_eq!(transition, OrderTransition::Unchanged);

        // Open but fully filled counts as filled
        let transition = apply_status_report(
            &mut buy,
            &report(ExchangeOrderStatus::Open, 2.0, Some(100.2)),
            Utc::now(),
        );
        assert_eq!(transition, OrderTransition::Filled);
    }

    #[test]
    fn test_cancel_stamps_terminal_time() {
        let mut buy = order(OrderSide::Buy, 1.0);
        let transition = apply_status_report(
            &mut buy,
            &report(ExchangeOrderStatus::Cancelled, 0.0, None),
            Utc::now(),
        );

        assert_eq!(transition, OrderTransition::Cancelled);
        assert_eq!(buy.status, OrderStatus::Cancelled);
        assert!(buy.cancelled_at.is_some());
        assert_eq!(position_effect(&buy, transition), PositionEffect::None);
    }

    #[test]
    fn test_rejected_exit_reopens_position() {
        let mut sell = order(OrderSide::Sell, 2.0);
        sell.position_id = Some(1);
        let transition = apply_status_report(
            &mut sell,
            &report(ExchangeOrderStatus::Rejected, 0.0, None),
            Utc::now(),
        );

        assert_eq!(transition, OrderTransition::Rejected);
        assert_eq!(
            position_effect(&sell, transition),
            PositionEffect::Reopen { position_id: 1 }
        );
    }

    #[test]
    fn test_filled_exit_closes_position() {
        let mut sell = order(OrderSide::Sell, 2.0);
        sell.position_id = Some(1);
        let transition = apply_status_report(
            &mut sell,
            &report(ExchangeOrderStatus::Filled, 2.0, Some(96.0)),
            Utc::now(),
        );
        assert_eq!(
            position_effect(&sell, transition),
            PositionEffect::Close { position_id: 1 }
        );
    }

    #[test]
    fn test_new_position_seeded_from_analysis() {
        let mut buy = order(OrderSide::Buy, 1.0);
        buy.filled_quantity = 1.0;
        buy.average_fill_price = Some(100.0);

        let without = new_position_from_fill(&buy, None, Some(3.0)).unwrap();
        assert_eq!(without.stop_loss, None);
        assert_eq!(without.take_profit, None);
        assert_eq!(without.trailing_stop, Some(3.0));
        assert_eq!(without.entry_order_id, Some(10));

        buy.average_fill_price = None;
        assert!(new_position_from_fill(&buy, None, None).is_none());
    }

    #[test]
    fn test_profit_pct() {
        assert_eq!(profit_pct(100.0, 110.0), 10.0);
        assert_eq!(profit_pct(0.0, 110.0), 0.0);
    }
}

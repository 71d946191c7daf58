#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use cryptotrader::api::{Balance, ExchangeGateway, ExchangeOrderStatus, OrderAck, OrderStatusReport};
use cryptotrader::{
    Candle, Instrument, MemoryStore, NewInstrument, NewOrder, NewPosition, OrderSide, OrderType,
    Position, Settings, Store, Ticker,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub instrument_name: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub exchange_order_id: String,
}

/// Scripted exchange: answers from in-memory tables and records placed orders
#[derive(Default)]
pub struct FakeGateway {
    prices: Mutex<HashMap<String, f64>>,
    candles: Mutex<HashMap<String, Vec<Candle>>>,
    statuses: Mutex<HashMap<String, OrderStatusReport>>,
    placed: Mutex<Vec<PlacedOrder>>,
    reject_orders: AtomicBool,
    next_id: AtomicU64,
    exit_race: Mutex<Option<(Arc<MemoryStore>, i64)>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, instrument_name: &str, price: f64) {
        self.prices
            .lock()
            .unwrap()
            .insert(instrument_name.to_string(), price);
    }

    pub fn set_candles(&self, instrument_name: &str, candles: Vec<Candle>) {
        self.candles
            .lock()
            .unwrap()
            .insert(instrument_name.to_string(), candles);
    }

    pub fn set_order_status(
        &self,
        exchange_order_id: &str,
        status: ExchangeOrderStatus,
        cumulative_quantity: f64,
        avg_price: Option<f64>,
    ) {
        self.statuses.lock().unwrap().insert(
            exchange_order_id.to_string(),
            OrderStatusReport {
                exchange_order_id: exchange_order_id.to_string(),
                status,
                cumulative_quantity,
                avg_price,
            },
        );
    }

    /// Make `place_order` fail like a non-zero exchange code would
    pub fn reject_orders(&self, reject: bool) {
        self.reject_orders.store(reject, Ordering::SeqCst);
    }

    /// On the next `place_order`, move the position to `closing` through another
    /// exit first, as a concurrent worker would
    pub fn race_next_exit(&self, store: Arc<MemoryStore>, position_id: i64) {
        *self.exit_race.lock().unwrap() = Some((store, position_id));
    }

    pub fn placed(&self) -> Vec<PlacedOrder> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for FakeGateway {
    async fn get_ticker(&self, instrument_name: &str) -> Option<Ticker> {
        let price = *self.prices.lock().unwrap().get(instrument_name)?;
        Some(Ticker {
            instrument_name: instrument_name.to_string(),
            last_price: price,
            best_bid: None,
            best_ask: None,
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            timestamp: Utc::now(),
        })
    }

    async fn get_candles(&self, instrument_name: &str, _timeframe: &str, _count: usize) -> Vec<Candle> {
        self.candles
            .lock()
            .unwrap()
            .get(instrument_name)
            .cloned()
            .unwrap_or_default()
    }

    async fn place_order(
        &self,
        instrument_name: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        _price: Option<f64>,
    ) -> Option<OrderAck> {
        if self.reject_orders.load(Ordering::SeqCst) {
            return None;
        }

        let race = self.exit_race.lock().unwrap().take();
        if let Some((store, position_id)) = race {
            let position = store.position(position_id).await.unwrap();
            let other = NewOrder {
                instrument_id: position.instrument_id,
                position_id: Some(position_id),
                order_type: OrderType::Market,
                side: OrderSide::Sell,
                quantity: position.quantity,
                price: None,
                exchange_order_id: Some("ex-other".to_string()),
                client_order_id: None,
                notes: None,
            };
            store.record_exit(position_id, &other).await.unwrap().unwrap();
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let exchange_order_id = format!("ex-{}", n);
        self.placed.lock().unwrap().push(PlacedOrder {
            instrument_name: instrument_name.to_string(),
            side,
            order_type,
            quantity,
            exchange_order_id: exchange_order_id.clone(),
        });

        Some(OrderAck {
            order_id: exchange_order_id,
            client_oid: Some(format!("client-{}", n)),
        })
    }

    async fn cancel_order(&self, _exchange_order_id: &str) -> bool {
        true
    }

    async fn get_order_status(&self, exchange_order_id: &str) -> Option<OrderStatusReport> {
        self.statuses.lock().unwrap().get(exchange_order_id).cloned()
    }

    async fn get_balance(&self, _currency: Option<&str>) -> Vec<Balance> {
        Vec::new()
    }
}

/// Settings with all pacing delays removed
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.monitor.instrument_delay_ms = 0;
    settings.monitor.item_delay_ms = 0;
    settings
}

fn candle_at(i: i64, close: f64, volume: f64) -> Candle {
    Candle {
        timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(15 * i),
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume,
    }
}

/// 50 falling bars then a high-volume bounce to 110: analyses as BUY
pub fn buy_series() -> Vec<Candle> {
    let mut candles: Vec<Candle> = (0..50)
        .map(|i| candle_at(i, 150.0 - i as f64, 100.0))
        .collect();
    candles.push(Candle {
        timestamp: candle_at(50, 110.0, 0.0).timestamp,
        open: 101.0,
        high: 110.5,
        low: 100.5,
        close: 110.0,
        volume: 300.0,
    });
    candles
}

/// Steady rally: RSI pinned at 100, analyses as WAIT
pub fn rally_series() -> Vec<Candle> {
    (0..40).map(|i| candle_at(i, 100.0 + i as f64, 100.0)).collect()
}

pub async fn seed_instrument(store: &MemoryStore, base: &str, quote: &str) -> Instrument {
    store
        .insert_instrument(&NewInstrument::new(base, quote))
        .await
        .unwrap()
}

pub async fn seed_position(
    store: &MemoryStore,
    instrument_id: i64,
    entry_price: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    trailing_stop: Option<f64>,
) -> Position {
    store
        .insert_position(&NewPosition {
            instrument_id,
            quantity: 2.0,
            entry_price,
            entry_order_id: None,
            stop_loss,
            take_profit,
            trailing_stop,
        })
        .await
        .unwrap()
}

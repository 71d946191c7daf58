use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Method};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::signing::{key_fingerprint, sign, signature_payload, NonceGenerator};
use super::types::{
    AccountSummary, ApiResponse, Balance, CandleData, DataList, HistoryFilter, InstrumentSpec,
    OrderAck, OrderDetail, OrderList, OrderStatusReport, Orderbook, TickerData, TradeList,
    TradeRecord,
};
use super::ExchangeGateway;
use crate::config::ExchangeSettings;
use crate::db::AuditSink;
use crate::error::TradingError;
use crate::models::{Candle, LogCategory, LogLevel, NewLogEntry, OrderSide, OrderType, Ticker};
use crate::Result;

const DEFAULT_PRICE_DECIMALS: u32 = 2;
const DEFAULT_QUANTITY_DECIMALS: u32 = 6;

/// Private endpoints that change exchange state
const MUTATING_PATHS: &[&str] = &["/private/create-order", "/private/cancel-order"];

// Type alias for the rate limiter to simplify signatures
type ExchangeRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Signed REST client for the Crypto.com Exchange v1 API
///
/// Cloneable; clones share the rate limiter, nonce generator and the
/// instrument precision cache.
#[derive(Clone)]
pub struct ExchangeClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    rate_limiter: Arc<ExchangeRateLimiter>,
    nonces: Arc<NonceGenerator>,
    audit: Option<Arc<dyn AuditSink>>,
    audit_requests: bool,
    instrument_cache: Arc<RwLock<HashMap<String, InstrumentSpec>>>,
}

impl ExchangeClient {
    pub fn new(settings: &ExchangeSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("cryptotrader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TradingError::Config(format!("failed to build HTTP client: {}", e)))?;

        // One request per interval, no bursts
        let interval = settings.min_request_interval().max(Duration::from_millis(1));
        let quota = Quota::with_period(interval).ok_or_else(|| {
            TradingError::Config(format!("invalid request interval: {:?}", interval))
        })?;

        let base_url = settings.base_url();
        tracing::info!(
            base_url = %base_url,
            sandbox = settings.sandbox,
            key = %settings.api_secret.as_deref().map(key_fingerprint).unwrap_or_else(|| "none".to_string()),
            "Exchange client initialized"
        );

        Ok(Self {
            client,
            base_url,
            api_key: settings.api_key.clone(),
            api_secret: settings.api_secret.clone(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            nonces: Arc::new(NonceGenerator::new()),
            audit: None,
            audit_requests: settings.audit_requests,
            instrument_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Attach the audit trail
    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    async fn audit(&self, entry: NewLogEntry) {
        if let Some(sink) = &self.audit {
            sink.log(entry).await;
        }
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            _ => Err(TradingError::Config(
                "API credentials are required for authenticated requests".to_string(),
            )),
        }
    }

    /// Send one request and unwrap the response envelope
    async fn dispatch<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        params: &BTreeMap<String, String>,
        body: &Value,
        authenticated: bool,
    ) -> Result<T> {
        // Callers wait here rather than burst
        self.rate_limiter.until_ready().await;

        let body_text = match body {
            Value::Null => String::new(),
            Value::Object(map) if map.is_empty() => String::new(),
            other => serde_json::to_string(other)?,
        };

        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("Content-Type", "application/json");

        if !params.is_empty() {
            request = request.query(params);
        }

        if authenticated {
            let (key, secret) = self.credentials()?;
            let nonce = self.nonces.next();
            let payload = signature_payload(method.as_str(), path, params, &body_text, nonce);
            request = request
                .header("api-key", key)
                .header("signature", sign(secret, &payload)?)
                .header("nonce", nonce.to_string());
        }

        if !body_text.is_empty() {
            request = request.body(body_text);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let envelope: ApiResponse<Value> = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(TradingError::Gateway(format!(
                    "HTTP {} from {} {}: {}",
                    status,
                    method,
                    path,
                    text.chars().take(200).collect::<String>()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if envelope.code != 0 {
            return Err(TradingError::ExchangeRejected {
                method: method.to_string(),
                path: path.to_string(),
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }

        if !status.is_success() {
            return Err(TradingError::Gateway(format!(
                "HTTP {} from {} {}",
                status, method, path
            )));
        }

        Ok(serde_json::from_value(envelope.result.unwrap_or(Value::Null))?)
    }

    /// Dispatch plus process logging and the request audit trail
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: BTreeMap<String, String>,
        body: Value,
        authenticated: bool,
    ) -> Result<T> {
        let result = self
            .dispatch(&method, path, &params, &body, authenticated)
            .await;

        match &result {
            Ok(_) => {
                tracing::debug!(method = %method, path, "API request ok");
                if self.audit_requests && MUTATING_PATHS.contains(&path) {
                    self.audit(
                        NewLogEntry::info(
                            LogCategory::Api,
                            format!("API Request: {} {}", method, path),
                        )
                        .with_details(json!({
                            "code": 0,
                            "authenticated": authenticated,
                            "params": params,
                            "data": body,
                        })),
                    )
                    .await;
                }
            }
            Err(e) => {
                tracing::error!(method = %method, path, error = %e, "API request failed");
                let code = match e {
                    TradingError::ExchangeRejected { code, .. } => Some(*code),
                    _ => None,
                };
                self.audit(
                    NewLogEntry::error(
                        LogCategory::Api,
                        format!("API request failed: {} {} - {}", method, path, e),
                    )
                    .with_details(json!({
                        "method": method.as_str(),
                        "endpoint": path,
                        "code": code,
                        "error": e.to_string(),
                        "params": params,
                        "data": body,
                    })),
                )
                .await;
            }
        }

        result
    }

    async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: BTreeMap<String, String>,
    ) -> Result<T> {
        self.call(Method::GET, path, params, Value::Null, false)
            .await
    }

    async fn private<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        self.call(Method::POST, path, BTreeMap::new(), body, true)
            .await
    }

    // ============== Extras ==============

    pub async fn test_connection(&self) -> bool {
        self.public::<Value>("/public/get-instruments", BTreeMap::new())
            .await
            .is_ok()
    }

    /// Tradable instruments; refreshes the precision cache
    pub async fn get_instruments(&self) -> Vec<InstrumentSpec> {
        match self
            .public::<DataList<InstrumentSpec>>("/public/get-instruments", BTreeMap::new())
            .await
        {
            Ok(list) => {
                let mut cache = self.instrument_cache.write().await;
                for spec in &list.data {
                    cache.insert(spec.instrument_name.clone(), spec.clone());
                }
                list.data
            }
            Err(_) => Vec::new(),
        }
    }

    pub async fn get_orderbook(&self, instrument_name: &str, depth: u32) -> Option<Orderbook> {
        let params = BTreeMap::from([
            ("instrument_name".to_string(), instrument_name.to_string()),
            ("depth".to_string(), depth.to_string()),
        ]);
        self.public::<DataList<Orderbook>>("/public/get-book", params)
            .await
            .ok()
            .and_then(|list| list.data.into_iter().next())
    }

    pub async fn get_account_summary(&self) -> Vec<Balance> {
        self.private::<AccountSummary>("/private/get-account-summary", json!({}))
            .await
            .map(|summary| summary.accounts)
            .unwrap_or_default()
    }

    pub async fn get_open_orders(&self, instrument_name: Option<&str>) -> Vec<OrderDetail> {
        let body = match instrument_name {
            Some(name) => json!({ "instrument_name": name }),
            None => json!({}),
        };
        self.private::<OrderList>("/private/get-open-orders", body)
            .await
            .map(|list| list.order_list)
            .unwrap_or_default()
    }

    pub async fn get_order_history(&self, filter: &HistoryFilter) -> Vec<OrderDetail> {
        let body = match serde_json::to_value(filter) {
            Ok(body) => body,
            Err(_) => return Vec::new(),
        };
        self.private::<OrderList>("/private/get-order-history", body)
            .await
            .map(|list| list.order_list)
            .unwrap_or_default()
    }

    pub async fn get_trades(&self, filter: &HistoryFilter) -> Vec<TradeRecord> {
        let body = match serde_json::to_value(filter) {
            Ok(body) => body,
            Err(_) => return Vec::new(),
        };
        self.private::<TradeList>("/private/get-trades", body)
            .await
            .map(|list| list.trade_list)
            .unwrap_or_default()
    }

    /// Cached instrument spec, loading the instrument list on a miss
    pub async fn instrument_spec(&self, instrument_name: &str) -> Option<InstrumentSpec> {
        if let Some(spec) = self.instrument_cache.read().await.get(instrument_name) {
            return Some(spec.clone());
        }
        self.get_instruments()
            .await
            .into_iter()
            .find(|spec| spec.instrument_name == instrument_name)
    }

    pub async fn minimum_order_size(&self, instrument_name: &str) -> f64 {
        self.instrument_spec(instrument_name)
            .await
            .and_then(|spec| spec.min_quantity)
            .unwrap_or(0.0)
    }

    pub async fn format_price(&self, price: f64, instrument_name: &str) -> String {
        let decimals = self
            .instrument_spec(instrument_name)
            .await
            .map(|spec| spec.price_decimals)
            .unwrap_or(DEFAULT_PRICE_DECIMALS);
        format_decimal(price, decimals, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Quantities are truncated so a full-position sell never exceeds holdings
    pub async fn format_quantity(&self, quantity: f64, instrument_name: &str) -> String {
        let decimals = self
            .instrument_spec(instrument_name)
            .await
            .map(|spec| spec.quantity_decimals)
            .unwrap_or(DEFAULT_QUANTITY_DECIMALS);
        format_decimal(quantity, decimals, RoundingStrategy::ToZero)
    }

    pub async fn is_sufficient_balance(&self, currency: &str, required_amount: f64) -> bool {
        self.get_balance(Some(currency))
            .await
            .first()
            .map(|balance| balance.available_amount() >= required_amount)
            .unwrap_or(false)
    }
}

/// Fixed-point rendering with exactly `decimals` places
pub fn format_decimal(value: f64, decimals: u32, strategy: RoundingStrategy) -> String {
    match Decimal::from_f64(value) {
        Some(decimal) => {
            let mut rounded = decimal.round_dp_with_strategy(decimals, strategy);
            rounded.rescale(decimals);
            rounded.to_string()
        }
        None => format!("{:.*}", decimals as usize, value),
    }
}

#[async_trait]
impl ExchangeGateway for ExchangeClient {
    async fn get_ticker(&self, instrument_name: &str) -> Option<Ticker> {
        let params = BTreeMap::from([(
            "instrument_name".to_string(),
            instrument_name.to_string(),
        )]);
        self.public::<DataList<TickerData>>("/public/get-ticker", params)
            .await
            .ok()
            .and_then(|list| list.data.into_iter().next())
            .map(Ticker::from)
    }

    async fn get_candles(
        &self,
        instrument_name: &str,
        timeframe: &str,
        count: usize,
    ) -> Vec<Candle> {
        let params = BTreeMap::from([
            ("instrument_name".to_string(), instrument_name.to_string()),
            ("timeframe".to_string(), timeframe.to_string()),
            ("count".to_string(), count.to_string()),
        ]);

        let mut candles: Vec<Candle> = match self
            .public::<DataList<CandleData>>("/public/get-candlestick", params)
            .await
        {
            Ok(list) => list.data.into_iter().map(Candle::from).collect(),
            Err(_) => return Vec::new(),
        };

        candles.sort_by_key(|c| c.timestamp);
        candles
    }

    async fn place_order(
        &self,
        instrument_name: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Option<OrderAck> {
        let quantity_text = self.format_quantity(quantity, instrument_name).await;
        let mut body = json!({
            "instrument_name": instrument_name,
            "side": side.as_str(),
            "type": order_type.as_str(),
            "quantity": quantity_text,
            "client_oid": Uuid::new_v4().to_string(),
        });
        if order_type != OrderType::Market {
            body["time_in_force"] = json!("GTC");
        }
        if let Some(price) = price {
            body["price"] = json!(self.format_price(price, instrument_name).await);
        }

        match self
            .private::<OrderAck>("/private/create-order", body)
            .await
        {
            Ok(ack) => {
                tracing::info!(
                    "📝 Order placed: {} {} {} (order_id={})",
                    side,
                    quantity_text,
                    instrument_name,
                    ack.order_id
                );
                self.audit(
                    NewLogEntry::info(
                        LogCategory::Trading,
                        format!("Order placed: {} {} {}", side, quantity_text, instrument_name),
                    )
                    .with_details(json!({
                        "order_id": ack.order_id,
                        "client_oid": ack.client_oid,
                        "type": order_type.as_str(),
                        "price": price,
                    })),
                )
                .await;
                Some(ack)
            }
            Err(e) => {
                self.audit(
                    NewLogEntry::new(
                        LogLevel::Error,
                        LogCategory::Trading,
                        format!("Failed to place order: {}", e),
                    )
                    .with_details(json!({
                        "instrument_name": instrument_name,
                        "side": side.as_str(),
                        "type": order_type.as_str(),
                        "quantity": quantity,
                        "price": price,
                    })),
                )
                .await;
                None
            }
        }
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> bool {
        let result = self
            .private::<Value>(
                "/private/cancel-order",
                json!({ "order_id": exchange_order_id }),
            )
            .await;

        if result.is_ok() {
            self.audit(NewLogEntry::info(
                LogCategory::Trading,
                format!("Order cancelled: {}", exchange_order_id),
            ))
            .await;
        }
        result.is_ok()
    }

    async fn get_order_status(&self, exchange_order_id: &str) -> Option<OrderStatusReport> {
        self.private::<OrderDetail>(
            "/private/get-order-detail",
            json!({ "order_id": exchange_order_id }),
        )
        .await
        .ok()
        .map(OrderStatusReport::from)
    }

    async fn get_balance(&self, currency: Option<&str>) -> Vec<Balance> {
        let body = match currency {
            Some(currency) => json!({ "currency": currency }),
            None => json!({}),
        };

        let accounts = self
            .private::<AccountSummary>("/private/get-account-summary", body)
            .await
            .map(|summary| summary.accounts)
            .unwrap_or_default();

        match currency {
            Some(currency) => accounts
                .into_iter()
                .filter(|account| account.currency == currency)
                .collect(),
            None => accounts,
        }
    }
}

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::error::TradingError;
use crate::Result;

const CONFIG_FILE: &str = "cryptotrader";
pub const SANDBOX_URL: &str = "https://uat-api.3ona.co/exchange/v1";
pub const PRODUCTION_URL: &str = "https://api.crypto.com/exchange/v1";

/// Runtime settings for both orchestrators and the exchange client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub exchange: ExchangeSettings,
    pub database_url: String,
    pub signals: SignalSettings,
    pub monitor: MonitorSettings,
    pub trading: TradingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exchange: ExchangeSettings::default(),
            database_url: "postgres://localhost/cryptotrader".to_string(),
            signals: SignalSettings::default(),
            monitor: MonitorSettings::default(),
            trading: TradingSettings::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub sandbox: bool,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub min_request_interval_ms: u64,
    pub audit_requests: bool,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            sandbox: true,
            base_url: None,
            request_timeout_secs: 30,
            min_request_interval_ms: 100,
            audit_requests: true,
        }
    }
}

impl ExchangeSettings {
    /// Explicit override first, then sandbox or production
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if self.sandbox => SANDBOX_URL.to_string(),
            None => PRODUCTION_URL.to_string(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

// Keep the secret out of logs
impl fmt::Debug for ExchangeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "***"))
            .field("sandbox", &self.sandbox)
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .field("audit_requests", &self.audit_requests)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub timeframe: String,
    pub candle_count: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub atr_multiplier: f64,
    pub volume_threshold: f64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            timeframe: "15m".to_string(),
            candle_count: 200,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            atr_multiplier: 2.0,
            volume_threshold: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub analysis_interval_secs: u64,
    pub tp_sl_check_interval_secs: u64,
    pub instrument_delay_ms: u64,
    pub item_delay_ms: u64,
    pub analysis_error_backoff_secs: u64,
    pub risk_error_backoff_secs: u64,
    pub price_max_age_secs: i64,
    pub exit_failure_alert_threshold: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            analysis_interval_secs: 30,
            tp_sl_check_interval_secs: 10,
            instrument_delay_ms: 1000,
            item_delay_ms: 100,
            analysis_error_backoff_secs: 10,
            risk_error_backoff_secs: 5,
            price_max_age_secs: 15,
            exit_failure_alert_threshold: 5,
        }
    }
}

impl MonitorSettings {
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_secs)
    }

    pub fn tp_sl_check_interval(&self) -> Duration {
        Duration::from_secs(self.tp_sl_check_interval_secs)
    }

    pub fn instrument_delay(&self) -> Duration {
        Duration::from_millis(self.instrument_delay_ms)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn analysis_error_backoff(&self) -> Duration {
        Duration::from_secs(self.analysis_error_backoff_secs)
    }

    pub fn risk_error_backoff(&self) -> Duration {
        Duration::from_secs(self.risk_error_backoff_secs)
    }

    pub fn price_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.price_max_age_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    /// Quote amount per automatic BUY. Unset means signals are only logged.
    pub auto_buy_quote_amount: Option<f64>,
    /// Trailing stop percent applied to new positions
    pub trailing_stop_pct: Option<f64>,
}

impl Settings {
    /// Load settings from `cryptotrader.toml` (optional) and `TRADER_*` env vars
    ///
    /// `CRYPTO_API_KEY`, `CRYPTO_API_SECRET` and `DATABASE_URL` win over both.
    pub fn load() -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix("TRADER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("exchange.api_key", std::env::var("CRYPTO_API_KEY").ok())?
            .set_override_option(
                "exchange.api_secret",
                std::env::var("CRYPTO_API_SECRET").ok(),
            )?
            .set_override_option("database_url", std::env::var("DATABASE_URL").ok())?;

        Self::build(builder)
    }

    /// Parse settings from TOML text, defaults filling the gaps
    pub fn from_toml(text: &str) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(text, FileFormat::Toml)))
    }

    fn build(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let monitor = &self.monitor;
        if monitor.analysis_interval_secs == 0 || monitor.tp_sl_check_interval_secs == 0 {
            return Err(TradingError::Config(
                "loop intervals must be at least one second".to_string(),
            ));
        }
        if self.signals.rsi_oversold >= self.signals.rsi_overbought {
            return Err(TradingError::Config(format!(
                "rsi_oversold ({}) must be below rsi_overbought ({})",
                self.signals.rsi_oversold, self.signals.rsi_overbought
            )));
        }
        if self.signals.atr_multiplier <= 0.0 {
            return Err(TradingError::Config(
                "atr_multiplier must be positive".to_string(),
            ));
        }
        if let Some(amount) = self.trading.auto_buy_quote_amount {
            if amount <= 0.0 {
                return Err(TradingError::Config(
                    "auto_buy_quote_amount must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Whether private endpoints can be called
    pub fn has_credentials(&self) -> bool {
        self.exchange.api_key.is_some() && self.exchange.api_secret.is_some()
    }
}

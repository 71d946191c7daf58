use thiserror::Error;

/// Errors raised inside the trading core.
///
/// None of these are fatal to the process. Orchestrators catch them per
/// instrument, order or position and move on to the next item.
#[derive(Debug, Error)]
pub enum TradingError {
    /// Network, HTTP, signing or decoding failure talking to the exchange
    #[error("gateway error: {0}")]
    Gateway(String),

    /// The exchange answered, but with a non-zero response code
    #[error("exchange rejected {method} {path}: code {code} ({message})")]
    ExchangeRejected {
        method: String,
        path: String,
        code: i64,
        message: String,
    },

    /// Not enough candles to run the indicator set
    #[error("insufficient data: got {got} candles, need {need}")]
    InsufficientData { got: usize, need: usize },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl TradingError {
    /// Insufficient data is an expected skip, not something to alert on
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, TradingError::InsufficientData { .. })
    }
}

impl From<sqlx::Error> for TradingError {
    fn from(e: sqlx::Error) -> Self {
        TradingError::Persistence(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for TradingError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        TradingError::Persistence(format!("migration failed: {}", e))
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(e: reqwest::Error) -> Self {
        TradingError::Gateway(e.to_string())
    }
}

impl From<serde_json::Error> for TradingError {
    fn from(e: serde_json::Error) -> Self {
        TradingError::Gateway(format!("malformed payload: {}", e))
    }
}

impl From<config::ConfigError> for TradingError {
    fn from(e: config::ConfigError) -> Self {
        TradingError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_is_flagged() {
        let err = TradingError::InsufficientData { got: 5, need: 20 };
        assert!(err.is_insufficient_data());
        assert_eq!(err.to_string(), "insufficient data: got 5 candles, need 20");
    }

    #[test]
    fn test_exchange_rejected_message() {
        let err = TradingError::ExchangeRejected {
            method: "POST".to_string(),
            path: "/private/create-order".to_string(),
            code: 306,
            message: "INSUFFICIENT_AVAILABLE_BALANCE".to_string(),
        };
        assert!(!err.is_insufficient_data());
        assert!(err.to_string().contains("code 306"));
    }
}

// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use api::{ExchangeClient, ExchangeGateway};
pub use config::Settings;
pub use db::{AuditSink, MemoryStore, PostgresStore, Store};
pub use error::TradingError;
pub use models::*;
pub use strategy::{SignalEngine, Strategy};

// Error handling
pub type Result<T> = std::result::Result<T, TradingError>;

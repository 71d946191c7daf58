// Stop-loss / take-profit monitoring
pub mod exit_failures;
pub mod tp_sl_monitor;

pub use exit_failures::ExitFailureTracker;
pub use tp_sl_monitor::{RiskOrchestrator, RiskReport};

// Analysis loop, order/position lifecycle and buy execution
pub mod analysis_loop;
pub mod executor;
pub mod position_manager;
pub mod price_feed;
pub mod scheduler;

pub use analysis_loop::{AnalysisOrchestrator, AnalysisReport};
pub use executor::{ExecutionAction, ExecutionDecision, Executor};
pub use position_manager::{ExitReason, OrderTransition, PositionEffect, RiskDecision};
pub use price_feed::PriceFeed;
pub use scheduler::{LoopHandle, PollingLoop, Shutdown};

// Trading strategy module
pub mod signals;

pub use signals::{SignalConfig, SignalEngine};

use crate::models::{Candle, MarketAnalysis};
use crate::Result;

/// Base trait for strategies that turn a candle series into a decision
pub trait Strategy: Send + Sync {
    /// Analyze an oldest-first candle series and decide on the latest bar
    fn analyze(&self, candles: &[Candle]) -> Result<MarketAnalysis>;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;
}

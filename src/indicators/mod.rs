// Technical indicators module
// Series-form RSI, SMA/EMA, ATR plus volume ratio and support/resistance levels

pub mod atr;
pub mod levels;
pub mod moving_average;
pub mod rsi;
pub mod volume;

pub use atr::{calculate_atr, calculate_atr_series, true_range_series};
pub use levels::{support_resistance, SupportResistance};
pub use moving_average::{calculate_ema, calculate_sma, ema_series, sma_series};
pub use rsi::{calculate_rsi, rsi_series};
pub use volume::calculate_volume_ratio;

/// Average True Range (ATR) indicator
///
/// Measures market volatility by averaging true ranges over a period.
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The first bar has no previous close, so its true range is High - Low.
/// ATR is the simple moving average of the true range series.

use super::moving_average::sma_series;
use crate::models::Candle;

/// True range per candle, aligned with `candles`
pub fn true_range_series(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let range = candle.high - candle.low;
            if i == 0 {
                return range;
            }
            let prev_close = candles[i - 1].close;
            range
                .max((candle.high - prev_close).abs())
                .max((candle.low - prev_close).abs())
        })
        .collect()
}

/// ATR series aligned with `candles`
///
/// Returns zeros when there are fewer than `period` candles.
pub fn calculate_atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if candles.len() < period {
        return vec![0.0; candles.len()];
    }
    sma_series(&true_range_series(candles), period)
}

/// Latest ATR value
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    calculate_atr_series(candles, period).last().copied()
}

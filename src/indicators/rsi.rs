/// Neutral value reported before enough deltas exist
const NEUTRAL_RSI: f64 = 50.0;

/// Calculate the Relative Strength Index series (Wilder's smoothing)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// The first average gain/loss is the simple mean of the first `period`
/// deltas; every later value is smoothed as
/// `avg = (avg * (period - 1) + current) / period`.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
/// - RSI = 100 when the average loss is zero
///
/// The output is aligned with `prices`. Indices before `period` hold 50.
pub fn rsi_series(prices: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![NEUTRAL_RSI; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return result;
    }

    // Calculate price changes
    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);
    for window in prices.windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-change);
        }
    }

    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;
    result[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
        result[i + 1] = rsi_from_averages(avg_gain, avg_loss);
    }

    result
}

/// Latest RSI value, or None if there are fewer than `period + 1` prices
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }
    rsi_series(prices, period).last().copied()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

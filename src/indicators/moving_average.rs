/// Simple Moving Average series aligned with `prices`
///
/// Indices before `period - 1` use an expanding mean over everything seen so far.
pub fn sma_series(prices: &[f64], period: usize) -> Vec<f64> {
    let period = period.max(1);
    let mut result = Vec::with_capacity(prices.len());
    let mut window_sum = 0.0;

    for (i, price) in prices.iter().enumerate() {
        window_sum += price;
        if i >= period {
            window_sum -= prices[i - period];
        }
        let count = (i + 1).min(period);
        result.push(window_sum / count as f64);
    }

    result
}

/// Exponential Moving Average series, seeded with the first price
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(prices.len());

    let mut iter = prices.iter();
    let Some(&first) = iter.next() else {
        return result;
    };

    let mut ema = first;
    result.push(ema);
    for price in iter {
        ema = (price - ema) * multiplier + ema;
        result.push(ema);
    }

    result
}

/// Latest SMA value
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    sma_series(prices, period).last().copied()
}

/// Latest EMA value
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(calculate_sma(&prices, 5), Some(104.0));
    }

    #[test]
    fn test_sma_expanding_prefix() {
        let prices = vec![2.0, 4.0, 6.0, 8.0];
        let sma = sma_series(&prices, 3);
        assert_eq!(sma, vec![2.0, 3.0, 4.0, 6.0]);
    }

    #[test]
    fn test_sma_constant_series() {
        let prices = vec![42.5; 60];
        for period in [1, 10, 50, 200] {
            assert!(sma_series(&prices, period).iter().all(|v| (*v - 42.5).abs() < 1e-9));
        }
    }

    #[test]
    fn test_sma_empty() {
        assert!(calculate_sma(&[], 5).is_none());
    }

    #[test]
    fn test_ema_seeded_with_first_price() {
        let prices = vec![100.0, 110.0];
        let ema = ema_series(&prices, 10);
        assert_eq!(ema[0], 100.0);
        // multiplier 2/11
        assert!((ema[1] - (100.0 + 10.0 * 2.0 / 11.0)).abs() < 1e-9);
    }

    #[test]
    fn test_ema_step_converges_without_overshoot() {
        let mut prices = vec![100.0; 10];
        prices.extend(vec![120.0; 40]);

        let ema = ema_series(&prices, 10);
        for window in ema[9..].windows(2) {
            assert!(window[1] >= window[0]);
            assert!(window[1] <= 120.0);
        }
        assert!(ema.last().unwrap() > &119.0);
    }
}

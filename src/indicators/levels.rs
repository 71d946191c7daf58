use crate::models::Candle;

/// Support sits 2% below the trailing low, resistance 2% above the trailing high
const SUPPORT_FACTOR: f64 = 0.98;
const RESISTANCE_FACTOR: f64 = 1.02;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportResistance {
    pub support: f64,
    pub resistance: f64,
}

/// Support/resistance over the trailing `lookback` candles
///
/// Returns None for an empty slice.
pub fn support_resistance(candles: &[Candle], lookback: usize) -> Option<SupportResistance> {
    let start = candles.len().saturating_sub(lookback);
    let recent = &candles[start..];
    if recent.is_empty() {
        return None;
    }

    let min_low = recent.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let max_high = recent.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);

    Some(SupportResistance {
        support: min_low * SUPPORT_FACTOR,
        resistance: max_high * RESISTANCE_FACTOR,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(high: f64, low: f64) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: low,
            high,
            low,
            close: high,
            volume: 1.0,
        }
    }

    #[test]
    fn test_levels_use_trailing_window_only() {
        let mut candles = vec![candle(500.0, 1.0)]; // falls outside the window
        candles.extend((0..20).map(|i| candle(110.0 + i as f64, 90.0 + i as f64)));

        let levels = support_resistance(&candles, 20).unwrap();
        assert!((levels.support - 90.0 * 0.98).abs() < 1e-9);
        assert!((levels.resistance - 129.0 * 1.02).abs() < 1e-9);
    }

    #[test]
    fn test_levels_empty() {
        assert!(support_resistance(&[], 20).is_none());
    }
}

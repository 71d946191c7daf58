use chrono::Duration;

use super::Strategy;
use crate::config::SignalSettings;
use crate::error::TradingError;
use crate::indicators::{
    calculate_atr_series, calculate_volume_ratio, ema_series, rsi_series, sma_series,
    support_resistance,
};
use crate::models::{Candle, MarketAnalysis, SignalAction};
use crate::Result;

/// Configuration for signal generation
#[derive(Debug, Clone)]
pub struct SignalConfig {
    pub rsi_period: usize,
    pub ma50_period: usize,
    pub ma200_period: usize,
    pub ema10_period: usize,
    pub atr_period: usize,
    pub volume_period: usize,
    pub level_lookback: usize, // candles used for support/resistance
    pub min_candles: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub rsi_buy_ceiling: f64,        // RSI bound for the two-MA entry
    pub rsi_volume_buy_ceiling: f64, // RSI bound for the volume-confirmed entry
    pub volume_threshold: f64,       // Multiple of average volume
    pub atr_multiplier: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ma50_period: 50,
            ma200_period: 200,
            ema10_period: 10,
            atr_period: 14,
            volume_period: 14,
            level_lookback: 20,
            min_candles: 20,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            rsi_buy_ceiling: 40.0,
            rsi_volume_buy_ceiling: 45.0,
            volume_threshold: 1.5,
            atr_multiplier: 2.0,
        }
    }
}

impl From<&SignalSettings> for SignalConfig {
    fn from(settings: &SignalSettings) -> Self {
        Self {
            rsi_oversold: settings.rsi_oversold,
            rsi_overbought: settings.rsi_overbought,
            volume_threshold: settings.volume_threshold,
            atr_multiplier: settings.atr_multiplier,
            ..Self::default()
        }
    }
}

/// Take-profit / stop-loss pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TpSl {
    pub take_profit: f64,
    pub stop_loss: f64,
}

/// BUY if any of:
/// 1. RSI < 40 and at least 2 MA conditions
/// 2. RSI < 30 and at least 1 MA condition
/// 3. RSI < 45 and at least 1 MA condition and volume ratio >= 1.5
pub fn is_buy_signal(config: &SignalConfig, rsi: f64, ma_valid_count: usize, volume_ratio: f64) -> bool {
    let two_ma_entry = rsi < config.rsi_buy_ceiling && ma_valid_count >= 2;
    let oversold_entry = rsi < config.rsi_oversold && ma_valid_count >= 1;
    let volume_entry = rsi < config.rsi_volume_buy_ceiling
        && ma_valid_count >= 1
        && volume_ratio >= config.volume_threshold;

    two_ma_entry || oversold_entry || volume_entry
}

/// SELL when overbought and price broke through resistance
pub fn is_sell_signal(config: &SignalConfig, rsi: f64, price: f64, resistance: f64) -> bool {
    rsi > config.rsi_overbought && price > resistance
}

/// BUY wins over SELL, SELL over WAIT
pub fn decide_action(buy_signal: bool, sell_signal: bool) -> SignalAction {
    if buy_signal {
        SignalAction::Buy
    } else if sell_signal {
        SignalAction::Sell
    } else {
        SignalAction::Wait
    }
}

/// ATR-based exit levels, tightened by support and widened by resistance
pub fn calculate_tp_sl(
    price: f64,
    atr: f64,
    support: f64,
    resistance: f64,
    atr_multiplier: f64,
) -> TpSl {
    if atr <= 0.0 {
        // Percentage fallback when volatility is unknown
        return TpSl {
            take_profit: price * 1.10,
            stop_loss: price * 0.95,
        };
    }

    let atr_stop_loss = price - atr * atr_multiplier;
    let stop_loss = if support > 0.0 && support < price {
        atr_stop_loss.min(support * 0.99) // 1% buffer below support
    } else {
        atr_stop_loss
    };

    let atr_take_profit = price + atr * atr_multiplier;
    let take_profit = resistance.max(atr_take_profit);

    TpSl {
        take_profit,
        stop_loss,
    }
}

/// Reward over risk, or 0 when there is no downside distance
pub fn risk_reward_ratio(price: f64, levels: TpSl) -> f64 {
    let risk = price - levels.stop_loss;
    if risk > 0.0 {
        (levels.take_profit - price) / risk
    } else {
        0.0
    }
}

/// Signal strength on a 0-5 scale
///
/// One point per valid moving average, one for a volume spike and one for
/// an oversold RSI. A full score needs every confirmation at once.
pub fn signal_strength(config: &SignalConfig, ma_valid_count: usize, volume_ratio: f64, rsi: f64) -> u8 {
    let mut strength = ma_valid_count.min(3) as u8;
    if volume_ratio >= config.volume_threshold {
        strength += 1;
    }
    if rsi < config.rsi_oversold {
        strength += 1;
    }
    strength.min(5)
}

/// Converts candles into indicators and a BUY/SELL/WAIT decision
#[derive(Debug, Clone, Default)]
pub struct SignalEngine {
    config: SignalConfig,
}

impl SignalEngine {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    fn evaluate(&self, candles: &[Candle]) -> Result<MarketAnalysis> {
        let config = &self.config;
        if candles.len() < config.min_candles {
            return Err(TradingError::InsufficientData {
                got: candles.len(),
                need: config.min_candles,
            });
        }

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let rsi = latest(&rsi_series(&closes, config.rsi_period));
        let sma50 = latest(&sma_series(&closes, config.ma50_period));
        let sma200 = latest(&sma_series(&closes, config.ma200_period));
        let ema10 = latest(&ema_series(&closes, config.ema10_period));
        let atr = latest(&calculate_atr_series(candles, config.atr_period));

        let latest_candle = &candles[candles.len() - 1];
        let price = latest_candle.close;
        let volume_ratio = calculate_volume_ratio(&volumes, config.volume_period);

        let levels = support_resistance(candles, config.level_lookback).ok_or(
            TradingError::InsufficientData {
                got: candles.len(),
                need: config.min_candles,
            },
        )?;

        // Rolling 24h window ending at the latest candle
        let day_start = latest_candle.timestamp - Duration::hours(24);
        let day: Vec<&Candle> = candles.iter().filter(|c| c.timestamp > day_start).collect();
        let high_24h = day.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let low_24h = day.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let volume_24h: f64 = day.iter().map(|c| c.volume).sum();

        let ma50_valid = price > sma50;
        let ma200_valid = price > sma200;
        let ema10_valid = price > ema10;
        let ma_valid_count = [ma50_valid, ma200_valid, ema10_valid]
            .iter()
            .filter(|v| **v)
            .count();

        let buy_signal = is_buy_signal(config, rsi, ma_valid_count, volume_ratio);
        let sell_signal = is_sell_signal(config, rsi, price, levels.resistance);
        let action = decide_action(buy_signal, sell_signal);

        let exits = calculate_tp_sl(
            price,
            atr,
            levels.support,
            levels.resistance,
            config.atr_multiplier,
        );

        tracing::debug!(
            "Indicators: RSI={:.1}, SMA50={:.4}, SMA200={:.4}, EMA10={:.4}, ATR={:.4}, Vol Ratio={:.2}x, MAs valid={}/3",
            rsi,
            sma50,
            sma200,
            ema10,
            atr,
            volume_ratio,
            ma_valid_count
        );

        Ok(MarketAnalysis {
            last_price: price,
            high_24h,
            low_24h,
            volume_24h,
            volume_ratio,
            rsi,
            sma50,
            sma200,
            ema10,
            atr,
            support_level: levels.support,
            resistance_level: levels.resistance,
            buy_signal,
            sell_signal,
            action,
            take_profit: exits.take_profit,
            stop_loss: exits.stop_loss,
            risk_reward_ratio: risk_reward_ratio(price, exits),
            ma50_valid,
            ma200_valid,
            ema10_valid,
            signal_strength: signal_strength(config, ma_valid_count, volume_ratio, rsi),
        })
    }
}

impl Strategy for SignalEngine {
    fn analyze(&self, candles: &[Candle]) -> Result<MarketAnalysis> {
        self.evaluate(candles)
    }

    fn name(&self) -> &str {
        "rsi_ma_atr"
    }

    fn min_candles_required(&self) -> usize {
        self.config.min_candles
    }
}

fn latest(series: &[f64]) -> f64 {
    series.last().copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle_at(i: i64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::minutes(15 * i),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume,
        }
    }

    /// 50 bars falling by 1.0 then a sharp bounce to 110
    fn bounce_series(bounce_volume: f64) -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..50)
            .map(|i| candle_at(i, 150.0 - i as f64, 100.0))
            .collect();
        candles.push(Candle {
            timestamp: candle_at(50, 110.0, 0.0).timestamp,
            open: 101.0,
            high: 110.5,
            low: 100.5,
            close: 110.0,
            volume: bounce_volume,
        });
        candles
    }

    #[test]
    fn test_insufficient_data() {
        let engine = SignalEngine::default();
        let candles: Vec<Candle> = (0..19).map(|i| candle_at(i, 100.0, 1.0)).collect();

        let err = engine.analyze(&candles).unwrap_err();
        assert!(err.is_insufficient_data());
    }

    #[test]
    fn test_buy_branches() {
        let config = SignalConfig::default();

        assert!(is_buy_signal(&config, 39.0, 2, 1.0));
        assert!(is_buy_signal(&config, 29.0, 1, 1.0));
        assert!(is_buy_signal(&config, 44.0, 1, 1.5)); // volume-confirmed entry
        assert!(!is_buy_signal(&config, 44.0, 1, 1.49));
        assert!(!is_buy_signal(&config, 35.0, 1, 1.0));
        assert!(!is_buy_signal(&config, 25.0, 0, 3.0));
        assert!(!is_buy_signal(&config, 45.0, 3, 2.0));
    }

    #[test]
    fn test_sell_and_action_priority() {
        let config = SignalConfig::default();

        assert!(is_sell_signal(&config, 75.0, 111.0, 110.0));
        assert!(!is_sell_signal(&config, 75.0, 109.0, 110.0));
        assert!(!is_sell_signal(&config, 70.0, 111.0, 110.0));

        assert_eq!(decide_action(true, true), SignalAction::Buy);
        assert_eq!(decide_action(false, true), SignalAction::Sell);
        assert_eq!(decide_action(false, false), SignalAction::Wait);
    }

    #[test]
    fn test_tp_sl_with_support_and_resistance() {
        let levels = calculate_tp_sl(100.0, 2.0, 90.0, 110.0, 2.0);
        assert!((levels.stop_loss - 89.1).abs() < 1e-9);
        assert!((levels.take_profit - 110.0).abs() < 1e-9);

        let rr = risk_reward_ratio(100.0, levels);
        assert!((rr - 10.0 / 10.9).abs() < 1e-9);
        assert!((rr - 0.917).abs() < 1e-3);
    }

    #[test]
    fn test_tp_sl_atr_dominates() {
        // Support above price is ignored, ATR target beats resistance
        let levels = calculate_tp_sl(100.0, 5.0, 101.0, 105.0, 2.0);
        assert_eq!(levels.stop_loss, 90.0);
        assert_eq!(levels.take_profit, 110.0);
    }

    #[test]
    fn test_tp_sl_fallback_without_atr() {
        let levels = calculate_tp_sl(100.0, 0.0, 90.0, 120.0, 2.0);
        assert!((levels.stop_loss - 95.0).abs() < 1e-9);
        assert!((levels.take_profit - 110.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_reward_zero_when_no_risk() {
        let levels = TpSl {
            take_profit: 110.0,
            stop_loss: 100.0,
        };
        assert_eq!(risk_reward_ratio(100.0, levels), 0.0);
    }

    #[test]
    fn test_signal_strength_bounds() {
        let config = SignalConfig::default();

        for ma in 0..=3 {
            for volume_ratio in [0.5, 1.5, 3.0] {
                for rsi in [10.0, 29.9, 35.0, 60.0, 95.0] {
                    let strength = signal_strength(&config, ma, volume_ratio, rsi);
                    assert!(strength <= 5);
                    if strength == 5 {
                        assert_eq!(ma, 3);
                        assert!(volume_ratio >= 1.5);
                        assert!(rsi < 30.0);
                    }
                }
            }
        }

        assert_eq!(signal_strength(&config, 3, 2.0, 20.0), 5);
        assert_eq!(signal_strength(&config, 0, 1.0, 50.0), 0);
    }

    #[test]
    fn test_rsi_only_counts_below_oversold() {
        let config = SignalConfig::default();
        // RSI between oversold and 40 earns nothing
        assert_eq!(signal_strength(&config, 3, 2.0, 35.0), 4);
        assert_eq!(signal_strength(&config, 3, 2.0, 29.0), 5);
        assert_eq!(signal_strength(&config, 1, 1.0, 29.0), 2);
    }

    #[test]
    fn test_volume_confirmed_bounce_is_buy() {
        let engine = SignalEngine::default();
        let analysis = engine.analyze(&bounce_series(300.0)).unwrap();

        // RSI lands between 40 and 45, only EMA10 is below price
        assert!(analysis.rsi > 40.0 && analysis.rsi < 45.0, "rsi {}", analysis.rsi);
        assert!(analysis.ema10_valid);
        assert!(!analysis.ma50_valid);
        assert!(!analysis.ma200_valid);
        assert_eq!(analysis.ma_valid_count(), 1);
        assert!((analysis.volume_ratio - 3.0).abs() < 1e-9);

        assert!(analysis.buy_signal);
        assert_eq!(analysis.action, SignalAction::Buy);
        assert!(analysis.stop_loss < analysis.last_price);
        assert!(analysis.take_profit > analysis.last_price);
        assert!(analysis.risk_reward_ratio > 0.0);
        assert_eq!(analysis.signal_strength, 2);
    }

    #[test]
    fn test_bounce_without_volume_waits() {
        let engine = SignalEngine::default();
        let analysis = engine.analyze(&bounce_series(100.0)).unwrap();

        assert!(!analysis.buy_signal);
        assert_eq!(analysis.action, SignalAction::Wait);
    }

    #[test]
    fn test_steady_rally_never_sells_below_resistance() {
        let engine = SignalEngine::default();
        let candles: Vec<Candle> = (0..60)
            .map(|i| candle_at(i, 100.0 + i as f64, 100.0))
            .collect();

        let analysis = engine.analyze(&candles).unwrap();
        assert_eq!(analysis.rsi, 100.0);
        assert_eq!(analysis.ma_valid_count(), 3);
        assert!(!analysis.sell_signal); // close never clears 2% above the high
        assert_eq!(analysis.action, SignalAction::Wait);
    }

    #[test]
    fn test_24h_aggregates_cover_last_day() {
        let engine = SignalEngine::default();
        // 15m candles: only the last 96 fall inside 24h
        let candles: Vec<Candle> = (0..120)
            .map(|i| candle_at(i, 100.0, if i < 24 { 1000.0 } else { 1.0 }))
            .collect();

        let analysis = engine.analyze(&candles).unwrap();
        assert!((analysis.volume_24h - 96.0).abs() < 1e-9);
        assert_eq!(analysis.high_24h, 100.5);
        assert_eq!(analysis.low_24h, 99.5);
    }
}

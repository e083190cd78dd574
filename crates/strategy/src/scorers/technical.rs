use std::collections::BTreeMap;

use common::models::{Candle, Direction, TechnicalSnapshot};
use market_data::traits::MIN_CANDLES;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, FastStochastic,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::{Close, High, Low, Next};
use tracing::{debug, warn};

/// Bars needed before the full indicator set is trusted.
pub const FULL_ANALYSIS_CANDLES: usize = 20;

const SR_WINDOW: usize = 20;
const MOMENTUM_LOOKBACK: usize = 5;
const MOMENTUM_TRIGGER_PCT: f64 = 0.5;

/// Technical scorer capability. Pure over its input.
pub trait TechnicalScorer: Send + Sync {
    /// `None` only when the series is too short to say anything.
    fn score(&self, candles: &[Candle]) -> Option<TechnicalSnapshot>;
}

/// Rules-based scorer over the usual oscillator and trend indicators.
#[derive(Debug, Clone, Default)]
pub struct IndicatorScorer;

struct Bar<'a>(&'a Candle);

impl High for Bar<'_> {
    fn high(&self) -> f64 {
        self.0.high
    }
}

impl Low for Bar<'_> {
    fn low(&self) -> f64 {
        self.0.low
    }
}

impl Close for Bar<'_> {
    fn close(&self) -> f64 {
        self.0.close
    }
}

#[derive(Debug, Default)]
struct Readings {
    rsi: f64,
    macd_diff: f64,
    stoch_k: f64,
    stoch_d: f64,
    sma_20: f64,
    sma_50: f64,
    ema_12: f64,
    ema_26: f64,
    bb_upper: f64,
    bb_lower: f64,
    bb_middle: f64,
    atr: f64,
}

impl Readings {
    fn compute(candles: &[Candle]) -> Result<Self, ta::errors::TaError> {
        let mut sma_20 = SimpleMovingAverage::new(20)?;
        let mut sma_50 = SimpleMovingAverage::new(50)?;
        let mut ema_12 = ExponentialMovingAverage::new(12)?;
        let mut ema_26 = ExponentialMovingAverage::new(26)?;
        let mut rsi = RelativeStrengthIndex::new(14)?;
        let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9)?;
        let mut stoch = FastStochastic::new(14)?;
        let mut stoch_signal = SimpleMovingAverage::new(3)?;
        let mut bb = BollingerBands::new(20, 2.0)?;
        let mut atr = AverageTrueRange::new(14)?;

        let mut out = Readings::default();
        for candle in candles {
            let bar = Bar(candle);
            let close = candle.close;
            out.sma_20 = sma_20.next(close);
            out.sma_50 = sma_50.next(close);
            out.ema_12 = ema_12.next(close);
            out.ema_26 = ema_26.next(close);
            out.rsi = rsi.next(close);
            out.macd_diff = macd.next(close).histogram;
            out.stoch_k = stoch.next(&bar);
            out.stoch_d = stoch_signal.next(out.stoch_k);
            let bands = bb.next(close);
            out.bb_upper = bands.upper;
            out.bb_lower = bands.lower;
            out.bb_middle = bands.average;
            out.atr = atr.next(&bar);
        }
        Ok(out)
    }

    fn is_finite(&self) -> bool {
        [
            self.rsi,
            self.macd_diff,
            self.stoch_k,
            self.stoch_d,
            self.sma_20,
            self.sma_50,
            self.ema_12,
            self.ema_26,
            self.bb_upper,
            self.bb_lower,
            self.bb_middle,
            self.atr,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// Buy and sell votes for the latest `price`.
    fn votes(&self, price: f64) -> (u32, u32) {
        let mut buy = 0;
        let mut sell = 0;

        match self.rsi {
            r if r < 30.0 => buy += 2,
            r if r > 70.0 => sell += 2,
            r if r < 45.0 => buy += 1,
            r if r > 55.0 => sell += 1,
            _ => {}
        }

        if self.macd_diff > 0.0 {
            buy += 1;
        } else if self.macd_diff < 0.0 {
            sell += 1;
        }

        match self.stoch_k {
            k if k < 20.0 => buy += 2,
            k if k > 80.0 => sell += 2,
            k if k < 50.0 => buy += 1,
            k if k > 50.0 => sell += 1,
            _ => {}
        }

        for average in [self.sma_20, self.sma_50] {
            if price > average {
                buy += 1;
            } else {
                sell += 1;
            }
        }

        if price < self.bb_lower {
            buy += 2;
        } else if price > self.bb_upper {
            sell += 2;
        }

        if self.ema_12 > self.ema_26 {
            buy += 1;
        } else {
            sell += 1;
        }

        (buy, sell)
    }

    fn into_map(self, price: f64) -> BTreeMap<String, f64> {
        let bb_width = if self.bb_middle != 0.0 {
            (self.bb_upper - self.bb_lower) / self.bb_middle
        } else {
            0.0
        };
        let atr_percent = if price > 0.0 {
            self.atr / price * 100.0
        } else {
            0.0
        };

        BTreeMap::from([
            ("rsi".to_string(), self.rsi),
            ("macd_diff".to_string(), self.macd_diff),
            ("stochastic_k".to_string(), self.stoch_k),
            ("stochastic_d".to_string(), self.stoch_d),
            ("sma_20".to_string(), self.sma_20),
            ("sma_50".to_string(), self.sma_50),
            ("ema_12".to_string(), self.ema_12),
            ("ema_26".to_string(), self.ema_26),
            ("bb_upper".to_string(), self.bb_upper),
            ("bb_lower".to_string(), self.bb_lower),
            ("bb_middle".to_string(), self.bb_middle),
            ("bb_width".to_string(), bb_width),
            ("atr".to_string(), self.atr),
            ("atr_percent".to_string(), atr_percent),
        ])
    }
}

/// Maps vote counts onto a direction and confidence.
pub fn classify_votes(buy: u32, sell: u32) -> (Direction, f64) {
    let lead = |a: u32, b: u32| f64::from(a) - f64::from(b);
    if buy >= 7 && sell <= 2 {
        (Direction::StrongBuy, (50.0 + lead(buy, sell) * 5.0).min(95.0))
    } else if buy > sell + 2 {
        (Direction::Buy, (50.0 + lead(buy, sell) * 4.0).min(85.0))
    } else if sell >= 7 && buy <= 2 {
        (Direction::StrongSell, (50.0 + lead(sell, buy) * 5.0).min(95.0))
    } else if sell > buy + 2 {
        (Direction::Sell, (50.0 + lead(sell, buy) * 4.0).min(85.0))
    } else {
        (Direction::Neutral, 50.0)
    }
}

fn support_resistance(closes: &[f64], price: f64) -> (f64, f64) {
    if closes.len() < SR_WINDOW {
        return (price * 0.99, price * 1.01);
    }
    closes[closes.len() - SR_WINDOW..]
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &c| {
            (lo.min(c), hi.max(c))
        })
}

impl IndicatorScorer {
    /// Momentum estimate used for short series or when indicators misbehave.
    pub fn momentum(&self, candles: &[Candle]) -> Option<TechnicalSnapshot> {
        if candles.len() < MIN_CANDLES {
            return None;
        }
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let price = *closes.last()?;
        let reference = closes[closes.len() - MOMENTUM_LOOKBACK];
        let change_pct = if reference != 0.0 {
            (price - reference) / reference * 100.0
        } else {
            0.0
        };

        let (direction, confidence) = if change_pct > MOMENTUM_TRIGGER_PCT {
            (Direction::Buy, 60.0)
        } else if change_pct < -MOMENTUM_TRIGGER_PCT {
            (Direction::Sell, 60.0)
        } else {
            (Direction::Neutral, 50.0)
        };

        let mean_of_last = |n: usize| {
            if closes.len() >= n {
                closes[closes.len() - n..].iter().sum::<f64>() / n as f64
            } else {
                price
            }
        };
        let (support, resistance) = support_resistance(&closes, price);

        Some(TechnicalSnapshot {
            direction,
            confidence,
            price,
            support,
            resistance,
            buy_votes: u32::from(direction.is_buy()),
            sell_votes: u32::from(direction.is_sell()),
            degraded: true,
            indicators: BTreeMap::from([
                ("sma_5".to_string(), mean_of_last(5)),
                ("sma_10".to_string(), mean_of_last(10)),
                ("price_change".to_string(), change_pct),
            ]),
        })
    }
}

impl TechnicalScorer for IndicatorScorer {
    fn score(&self, candles: &[Candle]) -> Option<TechnicalSnapshot> {
        if candles.len() < FULL_ANALYSIS_CANDLES {
            debug!("Insufficient data for full analysis: {} rows", candles.len());
            return self.momentum(candles);
        }

        let readings = match Readings::compute(candles) {
            Ok(r) if r.is_finite() => r,
            Ok(_) => {
                warn!("Indicator produced a non-finite value, using momentum estimate");
                return self.momentum(candles);
            }
            Err(e) => {
                warn!("Technical analysis error: {}", e);
                return self.momentum(candles);
            }
        };

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let price = *closes.last()?;
        let (buy_votes, sell_votes) = readings.votes(price);
        let (direction, confidence) = classify_votes(buy_votes, sell_votes);
        let (support, resistance) = support_resistance(&closes, price);

        Some(TechnicalSnapshot {
            direction,
            confidence,
            price,
            support,
            resistance,
            buy_votes,
            sell_votes,
            degraded: false,
            indicators: readings.into_map(price),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn series(closes: &[f64]) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(5 * closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open_time: start + Duration::minutes(5 * i as i64),
                open: close,
                high: close * 1.0005,
                low: close * 0.9995,
                close,
                volume: 0.0,
            })
            .collect()
    }

    #[test]
    fn too_short_is_absent() {
        assert!(IndicatorScorer.score(&series(&[1.1, 1.1, 1.1, 1.1])).is_none());
    }

    #[test]
    fn short_series_uses_momentum() {
        let snap = IndicatorScorer
            .score(&series(&[1.00, 1.00, 1.00, 1.00, 1.00, 1.00, 1.01]))
            .unwrap();
        assert!(snap.degraded);
        assert_eq!(snap.direction, Direction::Buy);
        assert_eq!(snap.confidence, 60.0);
        assert_eq!(snap.buy_votes, 1);

        let flat = IndicatorScorer.score(&series(&[1.0; 8])).unwrap();
        assert_eq!(flat.direction, Direction::Neutral);
        assert_eq!(flat.confidence, 50.0);
    }

    #[test]
    fn full_series_runs_every_indicator() {
        let closes: Vec<f64> = (0..60).map(|i| 1.2 - i as f64 * 0.002).collect();
        let snap = IndicatorScorer.score(&series(&closes)).unwrap();
        assert!(!snap.degraded);
        // Both moving averages and the EMA cross always vote.
        assert!(snap.buy_votes + snap.sell_votes >= 3);
        assert_eq!(
            (snap.direction, snap.confidence),
            classify_votes(snap.buy_votes, snap.sell_votes)
        );
        assert!(snap.support <= snap.price && snap.price <= snap.resistance);
        assert!(snap.indicators["rsi"] < 30.0);
        assert!(snap.indicators["ema_12"] < snap.indicators["ema_26"]);
    }

    #[test]
    fn vote_mapping() {
        assert_eq!(classify_votes(9, 1), (Direction::StrongBuy, 90.0));
        assert_eq!(classify_votes(11, 0), (Direction::StrongBuy, 95.0));
        assert_eq!(classify_votes(6, 3), (Direction::Buy, 62.0));
        assert_eq!(classify_votes(5, 3), (Direction::Neutral, 50.0));
        assert_eq!(classify_votes(3, 5), (Direction::Neutral, 50.0));
        assert_eq!(classify_votes(6, 2), (Direction::Buy, 66.0));
        assert_eq!(classify_votes(2, 8), (Direction::StrongSell, 80.0));
        assert_eq!(classify_votes(3, 7), (Direction::Sell, 66.0));
    }
}

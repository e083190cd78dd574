use common::models::{Direction, Instrument};
use common::settings::Settings;

/// Stop-loss and take-profit prices for an entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

/// Buys place the stop below the entry, sells mirror that. A neutral
/// direction gets a symmetric half-percent band.
pub fn price_levels(
    entry: f64,
    direction: Direction,
    stop_loss_pips: f64,
    take_profit_pips: f64,
    pip_scale: f64,
) -> PriceLevels {
    let (stop_loss, take_profit) = if direction.is_buy() {
        (
            entry - stop_loss_pips / pip_scale,
            entry + take_profit_pips / pip_scale,
        )
    } else if direction.is_sell() {
        (
            entry + stop_loss_pips / pip_scale,
            entry - take_profit_pips / pip_scale,
        )
    } else {
        (entry * 0.995, entry * 1.005)
    };

    PriceLevels {
        stop_loss: round5(stop_loss),
        take_profit: round5(take_profit),
    }
}

/// Take-profit distance in pips for `instrument` under `settings`.
pub fn take_profit_pips(instrument: &Instrument, settings: &Settings) -> f64 {
    if instrument.is_metal() {
        settings.special_instrument_take_profit_pips
    } else {
        settings.take_profit_pips
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_on_major() {
        let levels = price_levels(1.10000, Direction::Buy, 5.0, 15.0, 10_000.0);
        assert_eq!(levels.stop_loss, 1.0995);
        assert_eq!(levels.take_profit, 1.1015);
    }

    #[test]
    fn sell_on_yen_pair() {
        let levels = price_levels(151.200, Direction::Sell, 5.0, 15.0, 100.0);
        assert_eq!(levels.stop_loss, 151.25);
        assert_eq!(levels.take_profit, 151.05);
    }

    #[test]
    fn strong_directions_follow_their_side() {
        let buy = price_levels(1.2, Direction::StrongBuy, 10.0, 20.0, 10_000.0);
        assert!(buy.stop_loss < 1.2 && buy.take_profit > 1.2);
        let sell = price_levels(1.2, Direction::StrongSell, 10.0, 20.0, 10_000.0);
        assert!(sell.stop_loss > 1.2 && sell.take_profit < 1.2);
    }

    #[test]
    fn neutral_uses_symmetric_band() {
        let levels = price_levels(2000.0, Direction::Neutral, 5.0, 15.0, 100.0);
        assert_eq!(levels.stop_loss, 1990.0);
        assert_eq!(levels.take_profit, 2010.0);
    }

    #[test]
    fn metal_uses_special_take_profit() {
        let settings = Settings::default();
        assert_eq!(take_profit_pips(&Instrument::new("XAU/USD"), &settings), 20.0);
        assert_eq!(take_profit_pips(&Instrument::new("EUR/USD"), &settings), 15.0);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar of a price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Flat bar at `price`, handy for synthetic series.
    pub fn flat(open_time: DateTime<Utc>, price: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

use chrono::{DateTime, Utc};
use common::models::Candle;
use serde::Deserialize;

use crate::traits::{FeedError, RemoteResponse};

#[derive(Deserialize, Debug)]
pub struct ChartEnvelope {
    pub chart: Chart,
}

#[derive(Deserialize, Debug)]
pub struct Chart {
    #[serde(default)]
    pub result: Option<Vec<ChartResult>>,
    #[serde(default)]
    pub error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
pub struct ChartError {
    pub code: String,
    pub description: String,
}

#[derive(Deserialize, Debug)]
pub struct ChartResult {
    #[serde(default)]
    pub timestamp: Vec<i64>,
    pub indicators: Indicators,
}

#[derive(Deserialize, Debug)]
pub struct Indicators {
    pub quote: Vec<Quote>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Quote {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<f64>>,
}

impl RemoteResponse<Vec<Candle>> for ChartEnvelope {
    fn to_domain(&self) -> Result<Vec<Candle>, FeedError> {
        if let Some(err) = &self.chart.error {
            return Err(FeedError::Malformed(format!("{}: {}", err.code, err.description)));
        }
        let result = self
            .chart
            .result
            .as_ref()
            .and_then(|r| r.first())
            .ok_or_else(|| FeedError::Malformed("empty chart result".to_string()))?;
        let quote = result
            .indicators
            .quote
            .first()
            .ok_or_else(|| FeedError::Malformed("missing quote block".to_string()))?;

        // Bars with any missing OHLC value are skipped.
        let candles = result
            .timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, &ts)| {
                let at = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
                Some(Candle {
                    open_time: DateTime::<Utc>::from_timestamp(ts, 0)?,
                    open: at(&quote.open)?,
                    high: at(&quote.high)?,
                    low: at(&quote.low)?,
                    close: at(&quote.close)?,
                    volume: at(&quote.volume).unwrap_or(0.0),
                })
            })
            .collect();
        Ok(candles)
    }
}

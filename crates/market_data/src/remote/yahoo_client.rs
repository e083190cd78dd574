use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use common::models::{Candle, Instrument};
use reqwest::Client;
use tracing::{debug, warn};

use crate::remote::{ChartEnvelope, get_chart_base_url};
use crate::traits::{FeedError, PriceFeed, RemoteResponse};

const SYMBOLS: &[(&str, &str)] = &[
    ("EUR/USD", "EURUSD=X"),
    ("USD/JPY", "JPY=X"),
    ("GBP/USD", "GBPUSD=X"),
    ("AUD/USD", "AUDUSD=X"),
    ("USD/CAD", "CAD=X"),
    ("USD/CHF", "CHF=X"),
    ("XAU/USD", "GC=F"),
    ("NZD/USD", "NZDUSD=X"),
    ("EUR/JPY", "EURJPY=X"),
    ("GBP/JPY", "GBPJPY=X"),
];

/// Two days of five-minute bars from the public chart endpoint.
#[derive(Clone)]
pub struct YahooFeed {
    client: Client,
    base_url: String,
    symbols: HashMap<Instrument, String>,
}

impl YahooFeed {
    pub fn new() -> Result<Self, FeedError> {
        let client = Client::builder()
            .user_agent("fx_signal_bot/0.1.0")
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: get_chart_base_url(),
            symbols: SYMBOLS
                .iter()
                .map(|(pair, symbol)| (Instrument::new(*pair), symbol.to_string()))
                .collect(),
        })
    }

    pub fn symbol_for(&self, instrument: &Instrument) -> Option<&str> {
        self.symbols.get(instrument).map(String::as_str)
    }
}

#[async_trait]
impl PriceFeed for YahooFeed {
    async fn candles(&self, instrument: &Instrument) -> Result<Vec<Candle>, FeedError> {
        let symbol = self
            .symbol_for(instrument)
            .ok_or_else(|| FeedError::UnknownInstrument(instrument.clone()))?;
        let url = format!("{}/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("range", "2d"), ("interval", "5m")])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            warn!("Chart endpoint rate limited us on {}", instrument);
            return Err(FeedError::RateLimited);
        }
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let envelope = response.json::<ChartEnvelope>().await?;
        let candles = envelope.to_domain()?;
        debug!("{} ({}): {} bars", instrument, symbol, candles.len());
        Ok(candles)
    }
}

use async_trait::async_trait;
use common::models::{Candle, Instrument};
use thiserror::Error;

/// Minimum bars a series needs before any scorer will look at it.
pub const MIN_CANDLES: usize = 5;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("no symbol mapping for {0}")]
    UnknownInstrument(Instrument),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("HTTP 429: Too Many Requests")]
    RateLimited,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("only {rows} candles returned")]
    Insufficient { rows: usize },
}

/// Source of recent price bars for an instrument.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn candles(&self, instrument: &Instrument) -> Result<Vec<Candle>, FeedError>;
}

/// Conversion of a raw remote payload into domain values.
pub trait RemoteResponse<T> {
    fn to_domain(&self) -> Result<T, FeedError>;
}

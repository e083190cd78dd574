use std::time::Duration;

use common::models::{Candle, Instrument};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::traits::{FeedError, MIN_CANDLES, PriceFeed};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Fetches a series, retrying failures and short series with a fixed backoff.
/// The last error is returned once every attempt is spent.
pub async fn fetch_with_retry(
    feed: &dyn PriceFeed,
    instrument: &Instrument,
    policy: &RetryPolicy,
) -> Result<Vec<Candle>, FeedError> {
    let attempts = policy.attempts.max(1);
    let mut last_err = FeedError::Insufficient { rows: 0 };

    for attempt in 1..=attempts {
        match feed.candles(instrument).await {
            Ok(candles) if candles.len() >= MIN_CANDLES => {
                debug!("Data fetched for {}: {} rows", instrument, candles.len());
                return Ok(candles);
            }
            Ok(candles) => {
                last_err = FeedError::Insufficient {
                    rows: candles.len(),
                };
            }
            Err(e @ FeedError::UnknownInstrument(_)) => return Err(e),
            Err(e) => {
                warn!("Fetch {} attempt {}/{} failed: {}", instrument, attempt, attempts, e);
                last_err = e;
            }
        }

        if attempt < attempts {
            sleep(policy.backoff).await;
        }
    }

    error!("Failed to fetch data for {}: {}", instrument, last_err);
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<usize, u16>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<usize, u16>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl PriceFeed for Scripted {
        async fn candles(&self, _instrument: &Instrument) -> Result<Vec<Candle>, FeedError> {
            *self.calls.lock().unwrap() += 1;
            match self.replies.lock().unwrap().pop() {
                Some(Ok(rows)) => Ok((0..rows).map(|_| Candle::flat(Utc::now(), 1.1)).collect()),
                Some(Err(code)) => Err(FeedError::Status(code)),
                None => Err(FeedError::Status(500)),
            }
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let feed = Scripted::new(vec![Err(502), Ok(2), Ok(40)]);
        let candles = fetch_with_retry(&feed, &Instrument::new("EUR/USD"), &fast())
            .await
            .unwrap();
        assert_eq!(candles.len(), 40);
        assert_eq!(feed.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let feed = Scripted::new(vec![Err(500), Err(500), Err(503), Ok(40)]);
        let err = fetch_with_retry(&feed, &Instrument::new("EUR/USD"), &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Status(503)));
        assert_eq!(feed.calls(), 3);
    }
}

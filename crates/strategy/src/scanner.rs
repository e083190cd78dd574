use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::models::{AiVerdict, AnalysisDepth, Direction, Instrument, ScanMode, Signal, TechnicalSnapshot};
use common::pool::BlockingPool;
use common::settings::Settings;
use futures_util::future::join_all;
use market_data::{PriceFeed, RetryPolicy, fetch_with_retry};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::levels::{price_levels, take_profit_pips};
use crate::scorers::{AiScorer, TechnicalScorer};

const TECHNICAL_WEIGHT: f64 = 0.7;
const AI_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
    /// Technical confidence below this is dropped before the AI pass.
    pub baseline: f64,
    pub retry: RetryPolicy,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            batch_pause: Duration::from_secs(1),
            baseline: 30.0,
            retry: RetryPolicy::default(),
        }
    }
}

/// Scored instrument, alive for one scan cycle.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub instrument: Instrument,
    pub direction: Direction,
    pub confidence: f64,
    pub price: f64,
    pub analyzed_at: DateTime<Utc>,
    pub technical: TechnicalSnapshot,
    pub ai: Option<AiVerdict>,
}

#[derive(Debug, Clone)]
pub enum ScanOutcome {
    Selected(Signal),
    NoActiveInstruments,
    NoCandidate {
        evaluated: usize,
        best_confidence: Option<f64>,
    },
}

/// Weighted blend of the two scorers, kept inside `[0, 100]`.
pub fn blend(technical: f64, ai: Option<f64>) -> f64 {
    let ai = ai.unwrap_or(AiVerdict::NEUTRAL_CONFIDENCE);
    (technical * TECHNICAL_WEIGHT + ai * AI_WEIGHT).clamp(0.0, 100.0)
}

pub fn partition_batches(instruments: &[Instrument], size: usize) -> Vec<&[Instrument]> {
    instruments.chunks(size.max(1)).collect()
}

pub fn passing(pool: &[Candidate], threshold: f64) -> impl Iterator<Item = &Candidate> {
    pool.iter().filter(move |c| c.confidence >= threshold)
}

/// Highest passing candidate. On equal confidence the earlier one in `pool`
/// wins, so the result does not depend on completion order.
pub fn select(pool: &[Candidate], threshold: f64) -> Option<&Candidate> {
    passing(pool, threshold).fold(None, |best: Option<&Candidate>, c| match best {
        Some(b) if b.confidence >= c.confidence => Some(b),
        _ => Some(c),
    })
}

pub struct PairScanner {
    feed: Arc<dyn PriceFeed>,
    technical: Arc<dyn TechnicalScorer>,
    ai: Arc<dyn AiScorer>,
    pool: BlockingPool,
    config: ScannerConfig,
}

impl PairScanner {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        technical: Arc<dyn TechnicalScorer>,
        ai: Arc<dyn AiScorer>,
        pool: BlockingPool,
        config: ScannerConfig,
    ) -> Self {
        Self {
            feed,
            technical,
            ai,
            pool,
            config,
        }
    }

    pub fn ai_available(&self) -> bool {
        self.ai.is_available()
    }

    /// Scans `instruments` and turns the best candidate at or above
    /// `threshold` into a signal.
    pub async fn scan(
        &self,
        instruments: &[Instrument],
        threshold: f64,
        mode: ScanMode,
        settings: &Settings,
    ) -> ScanOutcome {
        if instruments.is_empty() {
            return ScanOutcome::NoActiveInstruments;
        }

        info!(
            "Scanning {} instruments, threshold {:.0}%, mode {:?}",
            instruments.len(),
            threshold,
            mode
        );
        let pool = self.evaluate(instruments, mode.depth()).await;

        match select(&pool, threshold) {
            Some(best) => {
                let signal = build_signal(best, mode, settings);
                info!("Best candidate: {}", signal.summary());
                ScanOutcome::Selected(signal)
            }
            None => {
                let best_confidence = pool.iter().map(|c| c.confidence).reduce(f64::max);
                info!(
                    "No candidate reached {:.0}% ({} evaluated, best {:?})",
                    threshold,
                    pool.len(),
                    best_confidence
                );
                ScanOutcome::NoCandidate {
                    evaluated: pool.len(),
                    best_confidence,
                }
            }
        }
    }

    /// Scores every instrument, batch by batch. The result keeps input order;
    /// instruments that failed or fell under the baseline are absent.
    pub async fn evaluate(&self, instruments: &[Instrument], depth: AnalysisDepth) -> Vec<Candidate> {
        let batches = partition_batches(instruments, self.config.batch_size);
        let total = batches.len();
        let mut pool = Vec::with_capacity(instruments.len());

        for (i, batch) in batches.into_iter().enumerate() {
            if i > 0 {
                sleep(self.config.batch_pause).await;
            }
            debug!("Batch {}/{}: {:?}", i + 1, total, batch);

            let results = join_all(
                batch
                    .iter()
                    .map(|instrument| self.candidate(instrument, depth, Some(self.config.baseline))),
            )
            .await;
            pool.extend(results.into_iter().flatten());
        }
        pool
    }

    /// Full analysis of one instrument without any threshold.
    pub async fn analyze_one(
        &self,
        instrument: &Instrument,
        mode: ScanMode,
        settings: &Settings,
    ) -> Option<Signal> {
        let candidate = self.candidate(instrument, mode.depth(), None).await?;
        Some(build_signal(&candidate, mode, settings))
    }

    /// Technical-only overview, best first.
    pub async fn quick_rank(
        &self,
        instruments: &[Instrument],
        limit: usize,
    ) -> Vec<(Instrument, TechnicalSnapshot)> {
        let mut ranked = Vec::new();
        for (i, batch) in partition_batches(instruments, self.config.batch_size)
            .into_iter()
            .enumerate()
        {
            if i > 0 {
                sleep(self.config.batch_pause).await;
            }
            let results = join_all(batch.iter().map(|instrument| async move {
                let snapshot = self.technical_for(instrument).await?;
                Some((instrument.clone(), snapshot))
            }))
            .await;
            ranked.extend(results.into_iter().flatten());
        }

        ranked.sort_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
        ranked.truncate(limit);
        ranked
    }

    async fn technical_for(&self, instrument: &Instrument) -> Option<TechnicalSnapshot> {
        let candles = match fetch_with_retry(self.feed.as_ref(), instrument, &self.config.retry).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!("Skipping {}: {}", instrument, e);
                return None;
            }
        };

        let technical = self.technical.clone();
        match self.pool.run(move || technical.score(&candles)).await {
            Ok(Some(snapshot)) => Some(snapshot),
            Ok(None) => {
                debug!("No technical read for {}", instrument);
                None
            }
            Err(e) => {
                warn!("Technical scorer failed for {}: {}", instrument, e);
                None
            }
        }
    }

    async fn candidate(
        &self,
        instrument: &Instrument,
        depth: AnalysisDepth,
        baseline: Option<f64>,
    ) -> Option<Candidate> {
        let technical = self.technical_for(instrument).await?;

        if let Some(baseline) = baseline
            && technical.confidence < baseline
        {
            debug!(
                "{} below baseline ({:.0}% < {:.0}%), skipping AI",
                instrument, technical.confidence, baseline
            );
            return None;
        }

        let ai = if self.ai.is_available() {
            match self.ai.analyze(instrument, &technical, depth).await {
                Ok(verdict) => Some(verdict),
                Err(e) => {
                    warn!("AI analysis error for {}: {}", instrument, e);
                    None
                }
            }
        } else {
            None
        };

        let confidence = blend(technical.confidence, ai.as_ref().map(|v| v.confidence));
        let direction = match &ai {
            Some(verdict) if !verdict.direction.is_neutral() => verdict.direction,
            _ => technical.direction,
        };

        Some(Candidate {
            instrument: instrument.clone(),
            direction,
            confidence,
            price: technical.price,
            analyzed_at: Utc::now(),
            technical,
            ai,
        })
    }
}

pub fn build_signal(candidate: &Candidate, mode: ScanMode, settings: &Settings) -> Signal {
    let instrument = &candidate.instrument;
    let tp_pips = take_profit_pips(instrument, settings);
    let levels = price_levels(
        candidate.price,
        candidate.direction,
        settings.stop_loss_pips,
        tp_pips,
        instrument.pip_scale(),
    );

    Signal {
        instrument: instrument.clone(),
        direction: candidate.direction,
        confidence: candidate.confidence,
        entry_price: candidate.price,
        entry_time: candidate.analyzed_at,
        stop_loss: levels.stop_loss,
        take_profit: levels.take_profit,
        stop_loss_distance: settings.stop_loss_pips,
        take_profit_distance: tp_pips,
        lot_size: settings.lot_size,
        escalation_schedule: Signal::escalation_from(candidate.analyzed_at),
        technical_snapshot: candidate.technical.clone(),
        ai_snapshot: candidate.ai.clone(),
        forced: mode.forced(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scorers::ai::MockAiScorer;
    use crate::scorers::{NeutralAiScorer, ScorerError};
    use async_trait::async_trait;
    use common::models::Candle;
    use market_data::FeedError;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Serves flat series whose close is the technical confidence to report.
    pub(crate) struct FakeFeed {
        scores: HashMap<Instrument, f64>,
        pub calls: Mutex<Vec<(Instrument, Instant)>>,
    }

    impl FakeFeed {
        pub(crate) fn new(scores: &[(&str, f64)]) -> Self {
            Self {
                scores: scores.iter().map(|(i, s)| (Instrument::new(*i), *s)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PriceFeed for FakeFeed {
        async fn candles(&self, instrument: &Instrument) -> Result<Vec<Candle>, FeedError> {
            self.calls
                .lock()
                .unwrap()
                .push((instrument.clone(), Instant::now()));
            match self.scores.get(instrument) {
                Some(score) => Ok((0..30).map(|_| Candle::flat(Utc::now(), *score)).collect()),
                None => Err(FeedError::Status(503)),
            }
        }
    }

    pub(crate) struct EchoScorer;

    impl TechnicalScorer for EchoScorer {
        fn score(&self, candles: &[Candle]) -> Option<TechnicalSnapshot> {
            let close = candles.last()?.close;
            Some(TechnicalSnapshot {
                direction: Direction::Buy,
                confidence: close,
                price: close,
                support: close,
                resistance: close,
                buy_votes: 4,
                sell_votes: 1,
                degraded: false,
                indicators: BTreeMap::new(),
            })
        }
    }

    pub(crate) fn fast_config() -> ScannerConfig {
        ScannerConfig {
            retry: RetryPolicy {
                attempts: 1,
                backoff: Duration::ZERO,
            },
            ..ScannerConfig::default()
        }
    }

    pub(crate) fn scanner_with(feed: Arc<FakeFeed>, ai: Arc<dyn AiScorer>) -> PairScanner {
        PairScanner::new(feed, Arc::new(EchoScorer), ai, BlockingPool::new(4), fast_config())
    }

    fn close_to(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-9
    }

    fn instruments(names: &[&str]) -> Vec<Instrument> {
        names.iter().map(|n| Instrument::new(*n)).collect()
    }

    #[test]
    fn blend_stays_in_range() {
        for tech in [0.0, 12.5, 50.0, 99.0, 100.0] {
            for ai in [None, Some(0.0), Some(33.0), Some(100.0)] {
                let value = blend(tech, ai);
                assert!((0.0..=100.0).contains(&value));
            }
        }
        assert!(close_to(blend(80.0, None), 71.0));
        assert!(close_to(blend(100.0, Some(100.0)), 100.0));
    }

    #[test]
    fn batches_of_three() {
        let list = instruments(&["A/B", "C/D", "E/F", "G/H"]);
        let batches = partition_batches(&list, 3);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[1], &list[3..]);
    }

    #[tokio::test]
    async fn empty_list_is_no_active_instruments() {
        let scanner = scanner_with(Arc::new(FakeFeed::new(&[])), Arc::new(NeutralAiScorer));
        let outcome = scanner
            .scan(&[], 0.0, ScanMode::Auto, &Settings::default())
            .await;
        assert!(matches!(outcome, ScanOutcome::NoActiveInstruments));
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_paced() {
        let feed = Arc::new(FakeFeed::new(&[
            ("EUR/USD", 80.0),
            ("GBP/USD", 80.0),
            ("USD/CHF", 80.0),
            ("XAU/USD", 80.0),
        ]));
        let scanner = scanner_with(feed.clone(), Arc::new(NeutralAiScorer));
        let list = instruments(&["EUR/USD", "GBP/USD", "USD/CHF", "XAU/USD"]);
        let pool = scanner.evaluate(&list, AnalysisDepth::Detailed).await;
        assert_eq!(pool.len(), 4);

        let calls = feed.calls.lock().unwrap();
        let first_batch_latest = calls[..3].iter().map(|(_, at)| *at).max().unwrap();
        let (last, last_at) = &calls[3];
        assert_eq!(last.as_str(), "XAU/USD");
        assert!(*last_at - first_batch_latest >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn ties_go_to_the_earliest_instrument() {
        let feed = Arc::new(FakeFeed::new(&[
            ("EUR/USD", 60.0),
            ("GBP/USD", 90.0),
            ("USD/CHF", 70.0),
            ("XAU/USD", 90.0),
        ]));
        let scanner = scanner_with(feed, Arc::new(NeutralAiScorer));
        let list = instruments(&["EUR/USD", "GBP/USD", "USD/CHF", "XAU/USD"]);
        let outcome = scanner
            .scan(&list, 50.0, ScanMode::Auto, &Settings::default())
            .await;
        match outcome {
            ScanOutcome::Selected(signal) => {
                assert_eq!(signal.instrument.as_str(), "GBP/USD");
                assert!(!signal.forced);
                assert_eq!(signal.escalation_schedule, Signal::escalation_from(signal.entry_time));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_fetch_does_not_sink_the_batch() {
        let feed = Arc::new(FakeFeed::new(&[("GBP/USD", 80.0)]));
        let scanner = scanner_with(feed, Arc::new(NeutralAiScorer));
        let list = instruments(&["EUR/USD", "GBP/USD", "USD/CHF"]);
        let pool = scanner.evaluate(&list, AnalysisDepth::Detailed).await;
        assert_eq!(pool.len(), 1);
        assert_eq!(pool[0].instrument.as_str(), "GBP/USD");
    }

    #[tokio::test]
    async fn below_baseline_never_reaches_ai() {
        let mut ai = MockAiScorer::new();
        ai.expect_analyze().times(0);
        let feed = Arc::new(FakeFeed::new(&[("EUR/USD", 20.0)]));
        let scanner = scanner_with(feed, Arc::new(ai));
        let outcome = scanner
            .scan(&instruments(&["EUR/USD"]), 0.0, ScanMode::Override, &Settings::default())
            .await;
        assert!(matches!(
            outcome,
            ScanOutcome::NoCandidate { evaluated: 0, best_confidence: None }
        ));
    }

    #[tokio::test]
    async fn ai_error_degrades_to_neutral_weight() {
        let mut ai = MockAiScorer::new();
        ai.expect_is_available().return_const(true);
        ai.expect_analyze()
            .times(1)
            .returning(|_, _, _| Err(ScorerError::Status(500)));
        let feed = Arc::new(FakeFeed::new(&[("EUR/USD", 80.0)]));
        let scanner = scanner_with(feed, Arc::new(ai));
        let pool = scanner
            .evaluate(&instruments(&["EUR/USD"]), AnalysisDepth::Detailed)
            .await;
        assert!(close_to(pool[0].confidence, 71.0));
        assert!(pool[0].ai.is_none());
        assert_eq!(pool[0].direction, Direction::Buy);
    }

    #[tokio::test]
    async fn non_neutral_ai_direction_wins() {
        let mut ai = MockAiScorer::new();
        ai.expect_is_available().return_const(true);
        ai.expect_analyze()
            .withf(|_, _, depth| *depth == AnalysisDepth::Fast)
            .returning(|_, _, _| {
                Ok(AiVerdict {
                    direction: Direction::StrongSell,
                    confidence: 90.0,
                    model: "m".to_string(),
                })
            });
        let feed = Arc::new(FakeFeed::new(&[("USD/JPY", 80.0)]));
        let scanner = scanner_with(feed, Arc::new(ai));
        let outcome = scanner
            .scan(&instruments(&["USD/JPY"]), 50.0, ScanMode::OverrideFast, &Settings::default())
            .await;
        let ScanOutcome::Selected(signal) = outcome else {
            panic!("expected a signal");
        };
        assert_eq!(signal.direction, Direction::StrongSell);
        assert!(close_to(signal.confidence, 83.0));
        assert!(signal.forced);
        assert!(signal.stop_loss > signal.entry_price);
    }

    #[tokio::test]
    async fn lower_threshold_admits_at_least_as_many() {
        let feed = Arc::new(FakeFeed::new(&[
            ("EUR/USD", 40.0),
            ("GBP/USD", 70.0),
            ("USD/CHF", 95.0),
            ("XAU/USD", 60.0),
        ]));
        let scanner = scanner_with(feed, Arc::new(NeutralAiScorer));
        let list = instruments(&["EUR/USD", "GBP/USD", "USD/CHF", "XAU/USD"]);
        let pool = scanner.evaluate(&list, AnalysisDepth::Detailed).await;

        let auto = passing(&pool, 70.0).count();
        let manual = passing(&pool, 50.0).count();
        assert!(manual >= auto);
        assert_eq!((auto, manual), (1, 3));
    }

    #[tokio::test]
    async fn quick_rank_sorts_and_limits() {
        let feed = Arc::new(FakeFeed::new(&[
            ("EUR/USD", 40.0),
            ("GBP/USD", 70.0),
            ("USD/CHF", 95.0),
        ]));
        let scanner = scanner_with(feed, Arc::new(NeutralAiScorer));
        let list = instruments(&["EUR/USD", "GBP/USD", "USD/CHF"]);
        let ranked = scanner.quick_rank(&list, 2).await;
        let names: Vec<&str> = ranked.iter().map(|(i, _)| i.as_str()).collect();
        assert_eq!(names, vec!["USD/CHF", "GBP/USD"]);
    }

    #[tokio::test]
    async fn analyze_one_ignores_thresholds() {
        let feed = Arc::new(FakeFeed::new(&[("EUR/USD", 10.0)]));
        let scanner = scanner_with(feed, Arc::new(NeutralAiScorer));
        let signal = scanner
            .analyze_one(&Instrument::new("EUR/USD"), ScanMode::Override, &Settings::default())
            .await
            .unwrap();
        assert!(close_to(signal.confidence, 22.0));
        assert!(signal.ai_snapshot.is_none());
    }
}

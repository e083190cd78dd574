pub mod desk;
pub mod levels;
pub mod registry;
pub mod remote;
pub mod scanner;
pub mod scorers;

pub use desk::{SignalDesk, SignalOutcome};
pub use registry::SignalRegistry;
pub use scanner::{PairScanner, ScanOutcome, ScannerConfig};
pub use scorers::{AiScorer, IndicatorScorer, NeutralAiScorer, ScorerError, TechnicalScorer};

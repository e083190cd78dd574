use thiserror::Error;

pub mod ai;
pub mod technical;

pub use ai::{AiScorer, NeutralAiScorer};
pub use technical::{IndicatorScorer, TechnicalScorer};

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("AI endpoint returned HTTP {0}")]
    Status(u16),
    #[error("AI reply had no content")]
    EmptyReply,
}

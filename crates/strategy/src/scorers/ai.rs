use async_trait::async_trait;
use common::models::{AiVerdict, AnalysisDepth, Instrument, TechnicalSnapshot};

use super::ScorerError;

/// Optional AI opinion on an instrument. Callers treat an error as the
/// neutral verdict.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiScorer: Send + Sync {
    /// Whether a real backend is configured.
    fn is_available(&self) -> bool {
        true
    }

    async fn analyze(
        &self,
        instrument: &Instrument,
        technical: &TechnicalSnapshot,
        depth: AnalysisDepth,
    ) -> Result<AiVerdict, ScorerError>;
}

/// Stand-in used when no AI credential is configured.
#[derive(Debug, Clone, Default)]
pub struct NeutralAiScorer;

impl NeutralAiScorer {
    pub const MODEL: &'static str = "none";
}

#[async_trait]
impl AiScorer for NeutralAiScorer {
    fn is_available(&self) -> bool {
        false
    }

    async fn analyze(
        &self,
        _instrument: &Instrument,
        _technical: &TechnicalSnapshot,
        _depth: AnalysisDepth,
    ) -> Result<AiVerdict, ScorerError> {
        Ok(AiVerdict::neutral(Self::MODEL))
    }
}

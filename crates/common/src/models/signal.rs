use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::Instrument;

/// How long a signal stays actionable after its entry time.
pub const SIGNAL_LIFETIME_MINUTES: i64 = 5;

/// Offsets of the three escalation steps from the entry time.
pub const ESCALATION_STEPS_MINUTES: [i64; 3] = [5, 10, 15];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    StrongBuy,
    Buy,
    Neutral,
    Sell,
    StrongSell,
}

impl Direction {
    /// Lenient parse for upstream text; anything unrecognised is `Neutral`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "STRONG_BUY" => Self::StrongBuy,
            "BUY" => Self::Buy,
            "SELL" => Self::Sell,
            "STRONG_SELL" => Self::StrongSell,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Neutral => "NEUTRAL",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG_SELL",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Self::Buy | Self::StrongBuy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Self::Sell | Self::StrongSell)
    }

    pub fn is_neutral(&self) -> bool {
        matches!(self, Self::Neutral)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Depth of the optional AI pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    Detailed,
    Fast,
}

/// Which pipeline asked for a scan. Determines the threshold source and the
/// `forced` flag of the resulting signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    Auto,
    Override,
    OverrideFast,
}

impl ScanMode {
    pub fn forced(&self) -> bool {
        !matches!(self, Self::Auto)
    }

    pub fn depth(&self) -> AnalysisDepth {
        match self {
            Self::OverrideFast => AnalysisDepth::Fast,
            Self::Auto | Self::Override => AnalysisDepth::Detailed,
        }
    }
}

/// Output of the technical scorer for one price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub direction: Direction,
    pub confidence: f64,
    pub price: f64,
    pub support: f64,
    pub resistance: f64,
    pub buy_votes: u32,
    pub sell_votes: u32,
    /// Whether the full indicator set ran or the momentum fallback was used.
    pub degraded: bool,
    pub indicators: BTreeMap<String, f64>,
}

/// Output of the AI scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiVerdict {
    pub direction: Direction,
    pub confidence: f64,
    pub model: String,
}

impl AiVerdict {
    pub const NEUTRAL_CONFIDENCE: f64 = 50.0;

    pub fn neutral(model: impl Into<String>) -> Self {
        Self {
            direction: Direction::Neutral,
            confidence: Self::NEUTRAL_CONFIDENCE,
            model: model.into(),
        }
    }
}

/// A live trade recommendation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub instrument: Instrument,
    pub direction: Direction,
    pub confidence: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Stop distance in pips, as configured when the signal was built.
    pub stop_loss_distance: f64,
    pub take_profit_distance: f64,
    pub lot_size: f64,
    pub escalation_schedule: [DateTime<Utc>; 3],
    pub technical_snapshot: TechnicalSnapshot,
    pub ai_snapshot: Option<AiVerdict>,
    pub forced: bool,
}

impl Signal {
    pub fn escalation_from(entry_time: DateTime<Utc>) -> [DateTime<Utc>; 3] {
        ESCALATION_STEPS_MINUTES.map(|minutes| entry_time + Duration::minutes(minutes))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.entry_time + Duration::minutes(SIGNAL_LIFETIME_MINUTES)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} {} @ {:.5} ({:.0}%) SL {:.5} TP {:.5} lot {}{}",
            self.instrument,
            self.direction,
            self.entry_price,
            self.confidence,
            self.stop_loss,
            self.take_profit,
            self.lot_size,
            if self.forced { " [forced]" } else { "" }
        )
    }
}

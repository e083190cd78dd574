use std::time::Duration;

use async_trait::async_trait;
use common::models::{AiVerdict, AnalysisDepth, Direction, Instrument, TechnicalSnapshot};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::remote::get_groq_base_url;
use crate::scorers::{AiScorer, ScorerError};

const FAST_MODEL: &str = "llama-3.1-8b-instant";
const DETAILED_MODEL: &str = "llama-3.3-70b-versatile";
const TEMPERATURE: f32 = 0.3;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// AI scorer backed by an OpenAI-compatible chat completion endpoint.
#[derive(Clone)]
pub struct GroqScorer {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GroqScorer {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ScorerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: get_groq_base_url(),
            api_key: api_key.into(),
        })
    }

    fn model_for(depth: AnalysisDepth) -> (&'static str, u32) {
        match depth {
            AnalysisDepth::Fast => (FAST_MODEL, 300),
            AnalysisDepth::Detailed => (DETAILED_MODEL, 500),
        }
    }
}

fn prompt(instrument: &Instrument, t: &TechnicalSnapshot) -> String {
    let reading = |key: &str, default: f64| t.indicators.get(key).copied().unwrap_or(default);
    let side = |above: bool| if above { "Above" } else { "Below" };
    let rsi = reading("rsi", 50.0);
    let rsi_note = if rsi < 30.0 {
        "Oversold"
    } else if rsi > 70.0 {
        "Overbought"
    } else {
        "Neutral"
    };

    format!(
        "Forex Pair: {instrument}\n\
         Technical Analysis:\n\
         - Current Price: {price:.5}\n\
         - RSI: {rsi:.1} ({rsi_note})\n\
         - MACD histogram: {macd:.4}\n\
         - Stochastic K/D: {k:.1}/{d:.1}\n\
         - Price vs SMA20: {sma20}\n\
         - Price vs SMA50: {sma50}\n\
         - ATR: {atr:.5} ({atr_pct:.2}%)\n\
         - Support: {support:.5}\n\
         - Resistance: {resistance:.5}\n\
         - Buy Signals: {buy}\n\
         - Sell Signals: {sell}\n\
         Trading context: 5-minute binary options, three escalation steps at 5, 10 and 15 minutes. \
         Pure technical analysis only.\n\
         Reply in JSON: {{\"signal\": \"STRONG_BUY|BUY|NEUTRAL|SELL|STRONG_SELL\", \"confidence\": 0-100, \"reason\": \"...\"}}",
        price = t.price,
        macd = reading("macd_diff", 0.0),
        k = reading("stochastic_k", 50.0),
        d = reading("stochastic_d", 50.0),
        sma20 = side(t.price > reading("sma_20", t.price)),
        sma50 = side(t.price > reading("sma_50", t.price)),
        atr = reading("atr", 0.0),
        atr_pct = reading("atr_percent", 0.0),
        support = t.support,
        resistance = t.resistance,
        buy = t.buy_votes,
        sell = t.sell_votes,
    )
}

/// Extracts a verdict from free-form model output. Anything unparsable is the
/// neutral verdict.
pub fn parse_verdict(content: &str, model: &str) -> AiVerdict {
    let block = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => return AiVerdict::neutral(model),
    };
    let Ok(value) = serde_json::from_str::<Value>(block) else {
        debug!("AI reply was not valid JSON: {}", block);
        return AiVerdict::neutral(model);
    };

    let direction = value
        .get("signal")
        .and_then(Value::as_str)
        .map(Direction::parse_lenient)
        .unwrap_or(Direction::Neutral);
    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
    .filter(|c: &f64| c.is_finite())
    .map(|c| c.clamp(0.0, 100.0))
    .unwrap_or(AiVerdict::NEUTRAL_CONFIDENCE);

    AiVerdict {
        direction,
        confidence,
        model: model.to_string(),
    }
}

#[async_trait]
impl AiScorer for GroqScorer {
    async fn analyze(
        &self,
        instrument: &Instrument,
        technical: &TechnicalSnapshot,
        depth: AnalysisDepth,
    ) -> Result<AiVerdict, ScorerError> {
        let (model, max_tokens) = Self::model_for(depth);
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: format!(
                        "You are an expert forex trading analyst. Give a clear, actionable signal for {} from technical analysis only.",
                        instrument
                    ),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt(instrument, technical),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("AI analysis for {} returned HTTP {}", instrument, status);
            return Err(ScorerError::Status(status.as_u16()));
        }

        let body = response.json::<ChatResponse>().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(ScorerError::EmptyReply)?;

        Ok(parse_verdict(&content, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_embedded_json() {
        let reply = "Sure.\n```json\n{\"signal\": \"strong_sell\", \"confidence\": 82, \"reason\": \"x\"}\n```";
        let verdict = parse_verdict(reply, FAST_MODEL);
        assert_eq!(verdict.direction, Direction::StrongSell);
        assert_eq!(verdict.confidence, 82.0);
        assert_eq!(verdict.model, FAST_MODEL);
    }

    #[test]
    fn malformed_reply_is_neutral() {
        for reply in ["no json here", "{\"signal\": BUY}", "} backwards {"] {
            let verdict = parse_verdict(reply, DETAILED_MODEL);
            assert_eq!(verdict, AiVerdict::neutral(DETAILED_MODEL));
        }
    }

    #[test]
    fn confidence_is_clamped_and_lenient() {
        let verdict = parse_verdict(r#"{"signal":"BUY","confidence":"140%"}"#, "m");
        assert_eq!(verdict.direction, Direction::Buy);
        assert_eq!(verdict.confidence, 100.0);

        let missing = parse_verdict(r#"{"signal":"SELL"}"#, "m");
        assert_eq!(missing.confidence, 50.0);
    }

    #[test]
    fn depth_selects_model() {
        assert_eq!(GroqScorer::model_for(AnalysisDepth::Fast), (FAST_MODEL, 300));
        assert_eq!(GroqScorer::model_for(AnalysisDepth::Detailed), (DETAILED_MODEL, 500));
    }
}

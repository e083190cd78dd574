use async_trait::async_trait;
use common::models::Signal;
use teloxide::prelude::*;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::actors::{Actor, ActorType, ControlMessage};
use crate::config::TelegramConfig;

/// Forwards published signals to the admin chat.
pub struct TelegramService {
    id: Uuid,
    bot: Bot,
    chat_id: ChatId,
    signals: broadcast::Receiver<Signal>,
}

impl TelegramService {
    pub fn new(config: &TelegramConfig, signals: broadcast::Receiver<Signal>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot: Bot::new(&config.token),
            chat_id: ChatId(config.chat_id),
            signals,
        }
    }
}

pub fn format_signal(signal: &Signal) -> String {
    let steps = signal
        .escalation_schedule
        .iter()
        .map(|at| at.format("%H:%M").to_string())
        .collect::<Vec<_>>()
        .join(" / ");
    format!(
        "{} signal{}\n{} {} @ {:.5}\nConfidence: {:.0}%\nSL {:.5} ({} pips) | TP {:.5} ({} pips)\nLot: {}\nEscalation (UTC): {}",
        if signal.forced { "Forced" } else { "Auto" },
        signal
            .ai_snapshot
            .as_ref()
            .map(|ai| format!(" [{}]", ai.model))
            .unwrap_or_default(),
        signal.instrument,
        signal.direction,
        signal.entry_price,
        signal.confidence,
        signal.stop_loss,
        signal.stop_loss_distance,
        signal.take_profit,
        signal.take_profit_distance,
        signal.lot_size,
        steps,
    )
}

#[async_trait]
impl Actor for TelegramService {
    fn name(&self) -> ActorType {
        ActorType::Notifier
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        self.report_started(&supervisor_tx).await;
        info!("Starting Telegram Notification Service");

        loop {
            match self.signals.recv().await {
                Ok(signal) => {
                    // Delivery failures are logged, never fatal.
                    if let Err(e) = self.bot.send_message(self.chat_id, format_signal(&signal)).await {
                        error!("Failed to send Telegram message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Telegram service lagged behind. Missed {} signals.", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Signal channel closed. Stopping Telegram service.");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::models::{Direction, Instrument, TechnicalSnapshot};
    use std::collections::BTreeMap;

    #[test]
    fn message_carries_levels_and_schedule() {
        let entry = Utc.with_ymd_and_hms(2025, 6, 10, 13, 0, 0).unwrap();
        let signal = Signal {
            instrument: Instrument::new("USD/JPY"),
            direction: Direction::Sell,
            confidence: 78.4,
            entry_price: 151.2,
            entry_time: entry,
            stop_loss: 151.25,
            take_profit: 151.05,
            stop_loss_distance: 5.0,
            take_profit_distance: 15.0,
            lot_size: 0.01,
            escalation_schedule: Signal::escalation_from(entry),
            technical_snapshot: TechnicalSnapshot {
                direction: Direction::Sell,
                confidence: 80.0,
                price: 151.2,
                support: 150.9,
                resistance: 151.4,
                buy_votes: 1,
                sell_votes: 7,
                degraded: false,
                indicators: BTreeMap::new(),
            },
            ai_snapshot: None,
            forced: true,
        };

        let text = format_signal(&signal);
        assert!(text.starts_with("Forced signal\n"));
        assert!(text.contains("USD/JPY SELL @ 151.20000"));
        assert!(text.contains("Confidence: 78%"));
        assert!(text.contains("13:05 / 13:10 / 13:15"));
    }
}

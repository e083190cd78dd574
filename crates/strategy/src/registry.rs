use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common::models::Signal;
use tracing::info;

/// Single-slot holder for the live signal.
///
/// The lock is only taken inside these synchronous methods, so it can never be
/// held across an `.await`.
#[derive(Debug, Default)]
pub struct SignalRegistry {
    slot: Mutex<Option<Signal>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `signal` if the slot is empty. An occupied slot is left untouched.
    pub fn try_set(&self, signal: Signal) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        info!("Signal registered: {}", signal.summary());
        *slot = Some(signal);
        true
    }

    pub fn get(&self) -> Option<Signal> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    /// Empties the slot, returning what was there.
    pub fn clear(&self) -> Option<Signal> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Clears the slot only if its signal has expired by `now`.
    pub fn clear_expired(&self, now: DateTime<Utc>) -> Option<Signal> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|s| s.is_expired(now)) {
            let expired = slot.take();
            if let Some(signal) = &expired {
                info!("Signal expired: {}", signal.summary());
            }
            expired
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use common::models::{Direction, Instrument, TechnicalSnapshot};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    pub(crate) fn signal(instrument: &str, confidence: f64, entry_time: DateTime<Utc>) -> Signal {
        Signal {
            instrument: Instrument::new(instrument),
            direction: Direction::Buy,
            confidence,
            entry_price: 1.1,
            entry_time,
            stop_loss: 1.0995,
            take_profit: 1.1015,
            stop_loss_distance: 5.0,
            take_profit_distance: 15.0,
            lot_size: 0.01,
            escalation_schedule: Signal::escalation_from(entry_time),
            technical_snapshot: TechnicalSnapshot {
                direction: Direction::Buy,
                confidence,
                price: 1.1,
                support: 1.09,
                resistance: 1.11,
                buy_votes: 5,
                sell_votes: 1,
                degraded: false,
                indicators: BTreeMap::new(),
            },
            ai_snapshot: None,
            forced: false,
        }
    }

    #[test]
    fn occupied_slot_rejects_second_signal() {
        let registry = SignalRegistry::new();
        assert!(registry.try_set(signal("EUR/USD", 80.0, Utc::now())));
        assert!(!registry.try_set(signal("GBP/USD", 95.0, Utc::now())));
        assert_eq!(registry.get().unwrap().instrument.as_str(), "EUR/USD");

        assert!(registry.clear().is_some());
        assert!(registry.is_empty());
        assert!(registry.try_set(signal("GBP/USD", 95.0, Utc::now())));
    }

    #[test]
    fn concurrent_try_set_admits_exactly_one() {
        let registry = Arc::new(SignalRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.try_set(signal("EUR/USD", 50.0 + i as f64, Utc::now()))
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(registry.get().is_some());
    }

    #[test]
    fn clear_expired_keeps_live_signal() {
        let registry = SignalRegistry::new();
        let entry = Utc::now();
        registry.try_set(signal("EUR/USD", 80.0, entry));

        assert!(registry.clear_expired(entry + Duration::minutes(4)).is_none());
        assert!(registry.get().is_some());
        assert!(registry.clear_expired(entry + Duration::minutes(5)).is_some());
        assert!(registry.is_empty());
    }
}

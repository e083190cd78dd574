use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::models::{Instrument, ScanMode, Signal, TechnicalSnapshot};
use common::settings::{Settings, SettingsStore};
use market_data::TradingCalendar;
use tracing::{info, warn};

use crate::registry::SignalRegistry;
use crate::scanner::{PairScanner, ScanOutcome};

/// Why a request did or did not produce a signal.
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Published(Signal),
    /// A live signal already exists. Carries it unless it was cleared meanwhile.
    RegistryOccupied(Option<Signal>),
    NoActiveInstruments,
    NoCandidate {
        evaluated: usize,
        best_confidence: Option<f64>,
    },
}

/// Ties the calendar, scanner, registry and settings together behind the
/// entry points the bot uses.
pub struct SignalDesk {
    calendar: Arc<dyn TradingCalendar>,
    scanner: PairScanner,
    registry: Arc<SignalRegistry>,
    settings: Arc<dyn SettingsStore>,
    auto_threshold: f64,
}

impl SignalDesk {
    pub fn new(
        calendar: Arc<dyn TradingCalendar>,
        scanner: PairScanner,
        registry: Arc<SignalRegistry>,
        settings: Arc<dyn SettingsStore>,
        auto_threshold: f64,
    ) -> Self {
        Self {
            calendar,
            scanner,
            registry,
            settings,
            auto_threshold,
        }
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    pub fn current(&self) -> Option<Signal> {
        self.registry.get()
    }

    pub fn clear(&self) -> Option<Signal> {
        self.registry.clear()
    }

    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Option<Signal> {
        self.registry.clear_expired(now)
    }

    pub fn active_instruments(&self, now: DateTime<Utc>) -> Vec<Instrument> {
        self.calendar.active_instruments(now)
    }

    /// Fixed threshold for automatic scans, the operator's for overrides.
    pub fn threshold_for(&self, mode: ScanMode, settings: &Settings) -> f64 {
        match mode {
            ScanMode::Auto => self.auto_threshold,
            ScanMode::Override | ScanMode::OverrideFast => settings.manual_confidence_threshold,
        }
    }

    pub async fn request(&self, mode: ScanMode, now: DateTime<Utc>) -> SignalOutcome {
        if let Some(current) = self.registry.get() {
            return SignalOutcome::RegistryOccupied(Some(current));
        }

        let instruments = self.calendar.active_instruments(now);
        if instruments.is_empty() {
            info!("No instruments in session, nothing to scan");
            return SignalOutcome::NoActiveInstruments;
        }

        let settings = self.settings.snapshot();
        let threshold = self.threshold_for(mode, &settings);

        match self.scanner.scan(&instruments, threshold, mode, &settings).await {
            ScanOutcome::Selected(signal) => {
                if self.registry.try_set(signal.clone()) {
                    SignalOutcome::Published(signal)
                } else {
                    warn!("Registry filled during scan, dropping {}", signal.instrument);
                    SignalOutcome::RegistryOccupied(self.registry.get())
                }
            }
            ScanOutcome::NoActiveInstruments => SignalOutcome::NoActiveInstruments,
            ScanOutcome::NoCandidate {
                evaluated,
                best_confidence,
            } => SignalOutcome::NoCandidate {
                evaluated,
                best_confidence,
            },
        }
    }

    /// Single-instrument analysis. Never touches the registry.
    pub async fn analyze(&self, instrument: &Instrument, mode: ScanMode) -> Option<Signal> {
        let settings = self.settings.snapshot();
        self.scanner.analyze_one(instrument, mode, &settings).await
    }

    pub async fn quick_rank(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Vec<(Instrument, TechnicalSnapshot)> {
        let instruments = self.calendar.active_instruments(now);
        self.scanner.quick_rank(&instruments, limit).await
    }
}

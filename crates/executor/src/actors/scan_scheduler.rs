use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::models::{ScanMode, Signal};
use strategy::{SignalDesk, SignalOutcome};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info};
use uuid::Uuid;

use crate::actors::{Actor, ActorType, ControlMessage};
use crate::state::{Role, ScanStats};

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Standby,
    Occupied,
    NotDue,
    NoActiveInstruments,
    NoCandidate,
    Published(Signal),
}

#[derive(Debug, Clone)]
pub struct SchedulerTiming {
    pub tick: Duration,
    pub scan_interval: Duration,
    pub sweep_expired: bool,
}

/// Runs automatic scans while this process is primary.
pub struct ScanScheduler {
    id: Uuid,
    desk: Arc<SignalDesk>,
    role: watch::Receiver<Role>,
    stats: Arc<Mutex<ScanStats>>,
    signals: broadcast::Sender<Signal>,
    timing: SchedulerTiming,
}

impl ScanScheduler {
    pub fn new(
        desk: Arc<SignalDesk>,
        role: watch::Receiver<Role>,
        stats: Arc<Mutex<ScanStats>>,
        signals: broadcast::Sender<Signal>,
        timing: SchedulerTiming,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            desk,
            role,
            stats,
            signals,
            timing,
        }
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, ScanStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        self.stats().roll_day(now);

        if !self.role.borrow().is_primary() {
            return TickOutcome::Standby;
        }

        if self.timing.sweep_expired {
            self.desk.sweep_expired(now);
        }
        if self.desk.current().is_some() {
            return TickOutcome::Occupied;
        }
        if !self.stats().auto_scan_due(now, self.timing.scan_interval) {
            return TickOutcome::NotDue;
        }

        let outcome = self.desk.request(ScanMode::Auto, now).await;
        if matches!(outcome, SignalOutcome::NoActiveInstruments) {
            self.stats().record_skip_no_active();
            debug!("No active instruments, skipping auto scan");
            return TickOutcome::NoActiveInstruments;
        }

        self.stats().record_auto_scan(now);

        match outcome {
            SignalOutcome::Published(signal) => {
                let today = {
                    let mut stats = self.stats();
                    stats.record_signal(now);
                    stats.signals_today
                };
                info!("Auto signal published ({} today): {}", today, signal.summary());
                if self.signals.send(signal.clone()).is_err() {
                    debug!("No signal subscribers");
                }
                TickOutcome::Published(signal)
            }
            SignalOutcome::RegistryOccupied(_) => TickOutcome::Occupied,
            SignalOutcome::NoCandidate { .. } => TickOutcome::NoCandidate,
            SignalOutcome::NoActiveInstruments => TickOutcome::NoActiveInstruments,
        }
    }
}

#[async_trait]
impl Actor for ScanScheduler {
    fn name(&self) -> ActorType {
        ActorType::ScanScheduler
    }

    fn id(&self) -> Uuid {
        self.id
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        self.report_started(&supervisor_tx).await;
        loop {
            let outcome = self.tick(Utc::now()).await;
            debug!("Scheduler tick: {:?}", outcome);

            // A promotion wakes the loop early.
            tokio::select! {
                _ = sleep(self.timing.tick) => {}
                changed = self.role.changed() => {
                    if changed.is_err() {
                        anyhow::bail!("role channel closed");
                    }
                }
            }
        }
    }
}

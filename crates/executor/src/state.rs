use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use market_data::calendar::wat;
use tracing::info;

/// Leadership state of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Secondary,
    PrimaryScheduling,
}

impl Role {
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::PrimaryScheduling)
    }
}

/// Scheduler counters, shared across scheduler restarts. `signals_today`
/// follows the local calendar day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanStats {
    pub auto_scans: u64,
    pub signals_today: u32,
    pub skipped_no_active: u64,
    pub last_auto_scan: Option<DateTime<Utc>>,
    day: Option<NaiveDate>,
}

impl ScanStats {
    /// Resets the daily counter when `now` falls on a new local date.
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.with_timezone(&wat()).date_naive();
        if self.day != Some(today) {
            if self.day.is_some() {
                info!("New trading day {}, {} signals yesterday", today, self.signals_today);
            }
            self.signals_today = 0;
            self.day = Some(today);
        }
    }

    pub fn record_auto_scan(&mut self, now: DateTime<Utc>) {
        self.roll_day(now);
        self.auto_scans += 1;
        self.last_auto_scan = Some(now);
    }

    /// Whether `interval` has passed since the last automatic scan.
    pub fn auto_scan_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_auto_scan {
            None => true,
            Some(last) => (now - last)
                .to_std()
                .map(|elapsed| elapsed >= interval)
                .unwrap_or(false),
        }
    }

    pub fn record_signal(&mut self, now: DateTime<Utc>) {
        self.roll_day(now);
        self.signals_today += 1;
    }

    pub fn record_skip_no_active(&mut self) {
        self.skipped_no_active += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_counter_resets_at_local_midnight() {
        let mut stats = ScanStats::default();
        // 22:30 UTC is 23:30 WAT.
        let before = Utc.with_ymd_and_hms(2025, 6, 10, 22, 30, 0).unwrap();
        stats.record_signal(before);
        stats.record_signal(before);
        assert_eq!(stats.signals_today, 2);

        // 23:10 UTC is already the next day in WAT.
        let after = Utc.with_ymd_and_hms(2025, 6, 10, 23, 10, 0).unwrap();
        stats.roll_day(after);
        assert_eq!(stats.signals_today, 0);
        stats.record_signal(after);
        assert_eq!(stats.signals_today, 1);
    }

    #[test]
    fn auto_scans_are_spaced_by_interval() {
        let mut stats = ScanStats::default();
        let interval = Duration::from_secs(300);
        let now = Utc::now();
        assert!(stats.auto_scan_due(now, interval));

        stats.record_auto_scan(now);
        assert_eq!(stats.auto_scans, 1);
        assert_eq!(stats.last_auto_scan, Some(now));
        assert!(!stats.auto_scan_due(now + chrono::Duration::seconds(299), interval));
        assert!(stats.auto_scan_due(now + chrono::Duration::seconds(300), interval));
        // Clock stepped backwards.
        assert!(!stats.auto_scan_due(now - chrono::Duration::seconds(5), interval));
    }
}

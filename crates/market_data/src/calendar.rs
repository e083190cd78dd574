use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use common::models::Instrument;
use tracing::warn;

/// West Africa Time, UTC+1 all year.
pub const WAT_OFFSET_SECS: i32 = 3600;

pub fn wat() -> FixedOffset {
    FixedOffset::east_opt(WAT_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Trading-hours collaborator.
pub trait TradingCalendar: Send + Sync {
    /// Whether `instrument` is inside its window, plus a human readable range.
    fn is_active(&self, instrument: &Instrument, now: DateTime<Utc>) -> (bool, String);

    /// Instruments currently inside their window, in table order.
    fn active_instruments(&self, now: DateTime<Utc>) -> Vec<Instrument>;
}

/// A daily window in local minutes, inclusive at both ends. Windows whose end
/// is before their start cross midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    start: u32,
    end: u32,
    label: String,
}

impl SessionWindow {
    /// Parses 12-hour bounds such as `"1 PM"` or `"2:30 AM"`.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        Some(Self {
            start: parse_12h(start)?,
            end: parse_12h(end)?,
            label: format!("{} – {}", start.trim(), end.trim()),
        })
    }

    pub fn contains(&self, minute_of_day: u32) -> bool {
        if self.start <= self.end {
            (self.start..=self.end).contains(&minute_of_day)
        } else {
            minute_of_day >= self.start || minute_of_day <= self.end
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

fn parse_12h(raw: &str) -> Option<u32> {
    let upper = raw.trim().to_uppercase();
    let (clock, pm) = if let Some(rest) = upper.strip_suffix("PM") {
        (rest.trim(), true)
    } else if let Some(rest) = upper.strip_suffix("AM") {
        (rest.trim(), false)
    } else {
        return None;
    };

    let (hour, minute) = match clock.split_once(':') {
        Some((h, m)) => (h.trim().parse::<u32>().ok()?, m.trim().parse::<u32>().ok()?),
        None => (clock.parse::<u32>().ok()?, 0),
    };
    if !(1..=12).contains(&hour) || minute > 59 {
        return None;
    }

    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, true) => h + 12,
        (h, false) => h,
    };
    Some(hour24 * 60 + minute)
}

/// Calendar backed by a fixed table of daily sessions in one local offset.
#[derive(Debug, Clone)]
pub struct SessionCalendar {
    offset: FixedOffset,
    offset_label: String,
    sessions: Vec<(Instrument, Option<SessionWindow>)>,
}

impl SessionCalendar {
    pub fn new(offset: FixedOffset, offset_label: impl Into<String>) -> Self {
        Self {
            offset,
            offset_label: offset_label.into(),
            sessions: Vec::new(),
        }
    }

    /// Adds an instrument. `None` bounds mean it is always tradable.
    pub fn with_session(mut self, instrument: &str, bounds: Option<(&str, &str)>) -> Self {
        let window = bounds.and_then(|(start, end)| {
            let parsed = SessionWindow::parse(start, end);
            if parsed.is_none() {
                warn!("Ignoring unparsable session {} – {} for {}", start, end, instrument);
            }
            parsed
        });
        self.sessions.push((Instrument::new(instrument), window));
        self
    }

    /// The ten-instrument table the bot ships with, in West Africa Time.
    pub fn default_table() -> Self {
        Self::new(wat(), "WAT")
            .with_session("EUR/USD", Some(("1 PM", "5 PM")))
            .with_session("USD/JPY", Some(("2 AM", "4 AM")))
            .with_session("GBP/USD", Some(("1 PM", "5 PM")))
            .with_session("AUD/USD", Some(("11 PM", "7 AM")))
            .with_session("USD/CAD", Some(("2:30 PM", "6 PM")))
            .with_session("USD/CHF", Some(("1 PM", "5 PM")))
            .with_session("XAU/USD", Some(("1 PM", "5 PM")))
            .with_session("NZD/USD", Some(("11 PM", "7 AM")))
            .with_session("EUR/JPY", Some(("2 AM", "4 AM")))
            .with_session("GBP/JPY", Some(("2 AM", "4 AM")))
    }

    pub fn instruments(&self) -> impl Iterator<Item = &Instrument> {
        self.sessions.iter().map(|(instrument, _)| instrument)
    }

    fn minute_of_day(&self, now: DateTime<Utc>) -> u32 {
        let local = now.with_timezone(&self.offset);
        local.hour() * 60 + local.minute()
    }
}

impl TradingCalendar for SessionCalendar {
    fn is_active(&self, instrument: &Instrument, now: DateTime<Utc>) -> (bool, String) {
        let window = self
            .sessions
            .iter()
            .find(|(known, _)| known == instrument)
            .and_then(|(_, window)| window.as_ref());

        match window {
            Some(window) => (
                window.contains(self.minute_of_day(now)),
                format!("{} {}", window.label(), self.offset_label),
            ),
            None => (true, "No time restriction".to_string()),
        }
    }

    fn active_instruments(&self, now: DateTime<Utc>) -> Vec<Instrument> {
        self.sessions
            .iter()
            .filter(|(instrument, _)| self.is_active(instrument, now).0)
            .map(|(instrument, _)| instrument.clone())
            .collect()
    }
}

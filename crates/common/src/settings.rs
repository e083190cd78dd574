use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const HISTORY_LIMIT: usize = 50;

/// Operator-tunable trade parameters, read by the scanner at scan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub lot_size: f64,
    pub stop_loss_pips: f64,
    pub take_profit_pips: f64,
    /// Take-profit used instead of `take_profit_pips` for the metal instrument.
    pub special_instrument_take_profit_pips: f64,
    pub manual_confidence_threshold: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lot_size: 0.01,
            stop_loss_pips: 5.0,
            take_profit_pips: 15.0,
            special_instrument_take_profit_pips: 20.0,
            manual_confidence_threshold: 50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    LotSize,
    StopLossPips,
    TakeProfitPips,
    SpecialInstrumentTakeProfitPips,
    ManualConfidenceThreshold,
}

impl SettingKey {
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Self::LotSize => (0.001, 1.0),
            Self::StopLossPips => (1.0, 50.0),
            Self::TakeProfitPips => (5.0, 100.0),
            Self::SpecialInstrumentTakeProfitPips => (10.0, 100.0),
            Self::ManualConfidenceThreshold => (20.0, 100.0),
        }
    }

    fn slot<'a>(&self, settings: &'a mut Settings) -> &'a mut f64 {
        match self {
            Self::LotSize => &mut settings.lot_size,
            Self::StopLossPips => &mut settings.stop_loss_pips,
            Self::TakeProfitPips => &mut settings.take_profit_pips,
            Self::SpecialInstrumentTakeProfitPips => {
                &mut settings.special_instrument_take_profit_pips
            }
            Self::ManualConfidenceThreshold => &mut settings.manual_confidence_threshold,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{key:?} must be between {min} and {max}, got {value}")]
    OutOfRange {
        key: SettingKey,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("settings file io: {0}")]
    Io(#[from] io::Error),
    #[error("settings file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Read-only view the core needs of the settings collaborator.
pub trait SettingsStore: Send + Sync {
    fn snapshot(&self) -> Settings;
}

/// Fixed settings, used when nothing is persisted.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub Settings);

impl SettingsStore for StaticSettings {
    fn snapshot(&self) -> Settings {
        self.0.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingChange {
    pub at: DateTime<Utc>,
    pub key: SettingKey,
    pub old_value: f64,
    pub new_value: f64,
    pub note: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(flatten)]
    settings: Settings,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    history: Vec<SettingChange>,
}

/// Settings persisted as a JSON document.
pub struct JsonSettingsStore {
    path: PathBuf,
    state: RwLock<SettingsFile>,
}

impl JsonSettingsStore {
    /// Loads `path`, filling missing keys with defaults. A missing file is
    /// created with the defaults.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<SettingsFile>(&raw)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No settings at {}, writing defaults", path.display());
                let state = SettingsFile::default();
                write_atomically(&path, &state)?;
                state
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn set(
        &self,
        key: SettingKey,
        value: f64,
        note: impl Into<String>,
    ) -> Result<Settings, SettingsError> {
        let (min, max) = key.bounds();
        if !(min..=max).contains(&value) {
            return Err(SettingsError::OutOfRange {
                key,
                value,
                min,
                max,
            });
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let slot = key.slot(&mut state.settings);
        let old_value = std::mem::replace(slot, value);

        state.history.push(SettingChange {
            at: Utc::now(),
            key,
            old_value,
            new_value: value,
            note: note.into(),
        });
        let overflow = state.history.len().saturating_sub(HISTORY_LIMIT);
        state.history.drain(..overflow);
        state.last_updated = Some(Utc::now());

        write_atomically(&self.path, &state)?;
        info!(?key, old_value, new_value = value, "Setting updated");
        Ok(state.settings.clone())
    }

    /// Restores every value to its default. History is kept.
    pub fn reset(&self) -> Result<Settings, SettingsError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.settings = Settings::default();
        state.last_updated = Some(Utc::now());
        write_atomically(&self.path, &state)?;
        warn!("Settings reset to defaults");
        Ok(state.settings.clone())
    }

    pub fn history(&self) -> Vec<SettingChange> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .history
            .clone()
    }
}

impl SettingsStore for JsonSettingsStore {
    fn snapshot(&self) -> Settings {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .settings
            .clone()
    }
}

fn write_atomically(path: &Path, state: &SettingsFile) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::draft::{autosave::DEFAULT_DEBOUNCE, KeyTokens};

pub const DEBOUNCE_ENV: &str = "CILT_AUTOSAVE_DEBOUNCE_MS";

const MIN_DEBOUNCE_MS: u64 = 250;
const MAX_DEBOUNCE_MS: u64 = 500;
const MAX_RETENTION_DAYS: u32 = 3650;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftSettings {
    pub autosave_debounce_ms: u64,
    pub draft_retention_days: u32,
    pub fallback_token: String,
    pub missing_line_token: String,
}

impl Default for DraftSettings {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            draft_retention_days: 14,
            fallback_token: "default".into(),
            missing_line_token: "no_line".into(),
        }
    }
}

impl DraftSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn key_tokens(&self) -> KeyTokens {
        KeyTokens {
            fallback: self.fallback_token.clone(),
            missing_line: self.missing_line_token.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_DEBOUNCE_MS..=MAX_DEBOUNCE_MS).contains(&self.autosave_debounce_ms) {
            bail!(
                "autosave debounce must be between {MIN_DEBOUNCE_MS} and {MAX_DEBOUNCE_MS} ms, got {}",
                self.autosave_debounce_ms
            );
        }
        if self.draft_retention_days > MAX_RETENTION_DAYS {
            bail!(
                "draft retention must be at most {MAX_RETENTION_DAYS} days, got {}",
                self.draft_retention_days
            );
        }
        if self.fallback_token.trim().is_empty() || self.missing_line_token.trim().is_empty() {
            bail!("draft key placeholder tokens must not be empty");
        }
        Ok(())
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<DraftSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data: DraftSettings = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                DraftSettings::default()
            })
        } else {
            DraftSettings::default()
        };

        if let Err(err) = data.validate() {
            warn!("Ignoring invalid settings at {}: {err:#}", path.display());
            data = DraftSettings::default();
        }

        let data = with_debounce_override(data, debounce_override());

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> DraftSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: DraftSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &DraftSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, DraftSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, DraftSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Applies the env debounce only when it stays inside the allowed window.
fn with_debounce_override(data: DraftSettings, override_ms: Option<u64>) -> DraftSettings {
    let Some(ms) = override_ms else {
        return data;
    };
    let overridden = DraftSettings {
        autosave_debounce_ms: ms,
        ..data.clone()
    };
    match overridden.validate() {
        Ok(()) => overridden,
        Err(err) => {
            warn!("Ignoring {DEBOUNCE_ENV}: {err:#}");
            data
        }
    }
}

fn debounce_override() -> Option<u64> {
    std::env::var(DEBOUNCE_ENV)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

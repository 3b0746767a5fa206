use crate::capture::ffmpeg::FfmpegCaptureConfig;
use crate::recorder::lifecycle::{DEFAULT_BACKGROUND_BUDGET, DEFAULT_SAFETY_MARGIN};
use crate::recorder::types::{ControllerTiming, SessionConfig, DEFAULT_FINALIZE_TIMEOUT, DEFAULT_START_TIMEOUT};
use crate::shared::paths::{ensure_dir, get_recordings_dir, get_storage_dir};
use crate::store::integrity::DEFAULT_MIN_VALID_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const RECORDINGS_DIR_ENV: &str = "STASHCAM_RECORDINGS_DIR";
pub const SEGMENT_SECS_ENV: &str = "STASHCAM_SEGMENT_SECS";

/// Below this much free space a start report carries a low-disk warning.
const DEFAULT_LOW_DISK_BYTES: u64 = 500 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderSettings {
    /// Overrides the XDG default recordings directory.
    pub recordings_dir: Option<PathBuf>,
    pub session: SessionConfig,
    pub min_valid_bytes: u64,
    pub low_disk_bytes: u64,
    pub start_timeout_secs: u64,
    pub finalize_timeout_secs: u64,
    pub background_budget_secs: u64,
    pub safety_margin_secs: u64,
    pub ffprobe_binary: String,
    pub capture: FfmpegCaptureConfig,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            recordings_dir: None,
            session: SessionConfig::default(),
            min_valid_bytes: DEFAULT_MIN_VALID_BYTES,
            low_disk_bytes: DEFAULT_LOW_DISK_BYTES,
            start_timeout_secs: DEFAULT_START_TIMEOUT.as_secs(),
            finalize_timeout_secs: DEFAULT_FINALIZE_TIMEOUT.as_secs(),
            background_budget_secs: DEFAULT_BACKGROUND_BUDGET.as_secs(),
            safety_margin_secs: DEFAULT_SAFETY_MARGIN.as_secs(),
            ffprobe_binary: "ffprobe".to_string(),
            capture: FfmpegCaptureConfig::default(),
        }
    }
}

impl RecorderSettings {
    pub fn recordings_dir(&self) -> PathBuf {
        self.recordings_dir
            .clone()
            .unwrap_or_else(get_recordings_dir)
    }

    pub fn timing(&self) -> ControllerTiming {
        ControllerTiming {
            start_timeout: Duration::from_secs(self.start_timeout_secs),
            finalize_timeout: Duration::from_secs(self.finalize_timeout_secs),
        }
    }

    pub fn background_budget(&self) -> Duration {
        Duration::from_secs(self.background_budget_secs)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    ParseError(#[from] serde_json::Error),
}

fn get_settings_path() -> PathBuf {
    get_storage_dir().join("settings.json")
}

/// Loads settings from the storage dir, falling back to defaults on a missing or invalid file,
/// then applies environment overrides.
pub fn load_settings() -> RecorderSettings {
    let path = get_settings_path();

    let mut settings = if path.exists() {
        load_settings_from_file(&path).unwrap_or_else(|e| {
            tracing::warn!(target: "system", "Ignoring invalid settings at {:?}: {}", path, e);
            RecorderSettings::default()
        })
    } else {
        RecorderSettings::default()
    };

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn load_settings_from_file(path: &Path) -> Result<RecorderSettings, SettingsError> {
    let contents = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&contents)?;
    Ok(settings)
}

pub fn save_settings(settings: &RecorderSettings) -> Result<(), SettingsError> {
    let storage_dir = get_storage_dir();
    ensure_dir(&storage_dir)?;

    save_settings_to(&get_settings_path(), settings)
}

fn save_settings_to(path: &Path, settings: &RecorderSettings) -> Result<(), SettingsError> {
    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, contents)?;
    Ok(())
}

fn apply_env_overrides(settings: &mut RecorderSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(dir) = var(RECORDINGS_DIR_ENV).filter(|d| !d.is_empty()) {
        settings.recordings_dir = Some(PathBuf::from(dir));
    }

    if let Some(raw) = var(SEGMENT_SECS_ENV) {
        match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => settings.session.segment_secs = secs,
            _ => tracing::warn!(target: "system", "Ignoring invalid {}={:?}", SEGMENT_SECS_ENV, raw),
        }
    }
}

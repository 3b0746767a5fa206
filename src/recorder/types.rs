use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::RecorderError;
use crate::capture::{CameraPosition, ResolutionPreset};
use crate::store::disk::DiskSpaceSnapshot;
use crate::store::{is_media_extension, RecordingEntry};

pub const DEFAULT_SEGMENT_SECS: u64 = 120;
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FINALIZE_TIMEOUT: Duration = Duration::from_secs(15);

/// How the host app presents itself while recording. Carried per session, never global.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum PresentationMode {
    #[default]
    Plain,
    Decoy { screen: String },
}

/// Parameters for one recording session, passed to `start()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub segment_secs: u64,
    pub audio_enabled: bool,
    pub camera: CameraPosition,
    pub preset: ResolutionPreset,
    pub location_tagging: bool,
    pub presentation: PresentationMode,
    /// File extension of produced segments.
    pub container: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            segment_secs: DEFAULT_SEGMENT_SECS,
            audio_enabled: true,
            camera: CameraPosition::default(),
            preset: ResolutionPreset::default(),
            location_tagging: false,
            presentation: PresentationMode::default(),
            container: "mp4".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_secs.max(1))
    }

    /// Rejects containers the catalog sweep would not list back after a restart.
    pub fn validate(&self) -> Result<(), RecorderError> {
        let container = self.container.as_str();
        let plain = !container.is_empty()
            && !container.contains(['/', '\\', '.'])
            && container.trim() == container;
        if plain && is_media_extension(container) {
            Ok(())
        } else {
            Err(RecorderError::UnsupportedContainer(self.container.clone()))
        }
    }
}

/// Deadlines the controller enforces on the capture source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerTiming {
    pub start_timeout: Duration,
    pub finalize_timeout: Duration,
}

impl Default for ControllerTiming {
    fn default() -> Self {
        Self {
            start_timeout: DEFAULT_START_TIMEOUT,
            finalize_timeout: DEFAULT_FINALIZE_TIMEOUT,
        }
    }
}

/// Returned by a successful `start()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub session_id: String,
    pub preset: ResolutionPreset,
    pub preset_fell_back: bool,
    pub disk: Option<DiskSpaceSnapshot>,
}

impl StartReport {
    /// Advisory only; a low disk never blocks a start.
    pub fn disk_warning(&self) -> Option<RecorderError> {
        self.disk
            .filter(|d| d.is_low)
            .map(|d| RecorderError::DiskLow {
                available_bytes: d.available_bytes,
            })
    }
}

/// What a finished session left behind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub committed: Vec<RecordingEntry>,
    pub discarded: usize,
    pub error: Option<String>,
}

/// Recording status snapshot for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStatus {
    pub state: String,
    pub session_id: Option<String>,
    pub segment: Option<u32>,
    pub elapsed_seconds: f64,
    pub committed_count: usize,
    pub presentation: Option<PresentationMode>,
    pub error: Option<String>,
}

impl RecordingStatus {
    pub fn unavailable(reason: &str) -> Self {
        Self {
            state: "unavailable".to_string(),
            session_id: None,
            segment: None,
            elapsed_seconds: 0.0,
            committed_count: 0,
            presentation: None,
            error: Some(reason.to_string()),
        }
    }
}

//! Boundary to the live capture pipeline.
//!
//! The controller never talks to a camera directly. It drives an implementation of
//! [`CaptureSource`], which owns the encoder and can be redirected to a new output target.
//! Finalize completions are delivered through a callback that may fire on any thread.

pub mod ffmpeg;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a capture source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Camera or microphone access was denied: {0}")]
    PermissionDenied(String),
    #[error("No usable capture device: {0}")]
    DeviceUnavailable(String),
    #[error("Resolution preset {0:?} is not supported")]
    PresetUnsupported(ResolutionPreset),
    #[error("Failed to open output target: {0}")]
    TargetOpenFailed(String),
    #[error("Finalize failed: {0}")]
    FinalizeFailed(String),
    #[error("Capture process failed: {0}")]
    Process(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    #[default]
    Back,
    Front,
    External,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ResolutionPreset {
    #[serde(rename = "2160p")]
    P2160,
    #[default]
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "480p")]
    P480,
}

/// Presets from best to worst. Fallback walks this list downward.
pub const PRESET_ORDER: [ResolutionPreset; 4] = [
    ResolutionPreset::P2160,
    ResolutionPreset::P1080,
    ResolutionPreset::P720,
    ResolutionPreset::P480,
];

impl ResolutionPreset {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ResolutionPreset::P2160 => (3840, 2160),
            ResolutionPreset::P1080 => (1920, 1080),
            ResolutionPreset::P720 => (1280, 720),
            ResolutionPreset::P480 => (640, 480),
        }
    }

    fn rank(&self) -> usize {
        PRESET_ORDER.iter().position(|p| p == self).unwrap_or(0)
    }
}

/// Picks the preset to run with.
///
/// The requested preset wins when supported. Otherwise the first supported preset below it is
/// used, then the closest supported preset above it. `None` only when nothing is supported.
pub fn negotiate_preset(
    requested: ResolutionPreset,
    supported: &[ResolutionPreset],
) -> Option<ResolutionPreset> {
    if supported.contains(&requested) {
        return Some(requested);
    }

    tracing::debug!(target: "capture", "[CAPTURE] {}", CaptureError::PresetUnsupported(requested));

    let start = requested.rank();
    PRESET_ORDER[start..]
        .iter()
        .chain(PRESET_ORDER[..start].iter().rev())
        .find(|p| supported.contains(p))
        .copied()
}

/// Pipeline parameters applied before the first target opens.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub camera: CameraPosition,
    pub preset: ResolutionPreset,
    pub audio_enabled: bool,
}

/// Opaque handle for one output target of the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetHandle(pub u64);

/// Result delivered once per finalized target.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    /// Where the finalized file ended up.
    pub path: PathBuf,
    pub duration_hint: Option<Duration>,
    /// Set when the encoder reported a problem. The file may still be playable.
    pub error: Option<CaptureError>,
}

pub type FinalizeCallback = Box<dyn FnOnce(FinalizeOutcome) + Send + 'static>;

/// A continuous encoded media source that can be redirected between output files.
///
/// Implementations guarantee that `on_finalized` fires exactly once per `finalize` call and
/// never block inside it for long; the controller keeps at most one finalize outstanding.
pub trait CaptureSource: Send + Sync {
    /// Requests camera (and microphone when `audio` is set) access.
    fn authorize(&self, audio: bool) -> Result<(), CaptureError>;

    /// Presets the device can deliver for `camera`, in any order.
    fn supported_presets(&self, camera: CameraPosition) -> Vec<ResolutionPreset>;

    /// Builds the pipeline. Blocks until the pipeline is running or fails.
    fn configure(&self, pipeline: &PipelineConfig) -> Result<(), CaptureError>;

    /// Starts writing into `path`.
    fn open_target(&self, path: &Path) -> Result<TargetHandle, CaptureError>;

    /// Closes out `handle` so its file becomes independently playable.
    fn finalize(&self, handle: TargetHandle, on_finalized: FinalizeCallback);

    /// Stops everything synchronously, without waiting for clean finalization.
    fn force_stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_preset_wins_when_supported() {
        let supported = [ResolutionPreset::P720, ResolutionPreset::P1080];
        assert_eq!(
            negotiate_preset(ResolutionPreset::P1080, &supported),
            Some(ResolutionPreset::P1080)
        );
    }

    #[test]
    fn test_falls_back_to_next_lower_preset() {
        let supported = [ResolutionPreset::P480, ResolutionPreset::P720];
        assert_eq!(
            negotiate_preset(ResolutionPreset::P2160, &supported),
            Some(ResolutionPreset::P720)
        );
    }

    #[test]
    fn test_falls_back_upward_when_nothing_lower() {
        let supported = [ResolutionPreset::P1080];
        assert_eq!(
            negotiate_preset(ResolutionPreset::P480, &supported),
            Some(ResolutionPreset::P1080)
        );
    }

    #[test]
    fn test_no_supported_presets() {
        assert_eq!(negotiate_preset(ResolutionPreset::P720, &[]), None);
    }

    #[test]
    fn test_preset_serde_names() {
        let json = serde_json::to_string(&ResolutionPreset::P720).unwrap();
        assert_eq!(json, "\"720p\"");
        let parsed: ResolutionPreset = serde_json::from_str("\"2160p\"").unwrap();
        assert_eq!(parsed, ResolutionPreset::P2160);
    }
}

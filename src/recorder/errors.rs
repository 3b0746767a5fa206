use std::time::Duration;
use thiserror::Error;

use crate::capture::{CaptureError, ResolutionPreset};
use crate::shared::errors::StorageError;

/// Top-level error type for recording operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error("Camera or microphone access was denied: {0}")]
    PermissionDenied(String),
    #[error("No usable capture device: {0}")]
    DeviceUnavailable(String),
    #[error("Container {0:?} is not a supported segment format")]
    UnsupportedContainer(String),
    #[error("Resolution preset {0:?} is not supported")]
    PresetUnsupported(ResolutionPreset),
    #[error("Capture session did not start within {0:?}")]
    SessionStartTimeout(Duration),
    #[error("Finalize failed: {0}")]
    FinalizeFailed(String),
    #[error("Segment {name} failed integrity check: {reason}")]
    IntegrityRejected { name: String, reason: String },
    #[error("Low disk space: {available_bytes} bytes available")]
    DiskLow { available_bytes: u64 },
    #[error("Failed to delete {name}: {reason}")]
    DeleteFailed { name: String, reason: String },
    #[error("Recording already in progress")]
    AlreadyRecording,
    #[error("Start was cancelled")]
    Cancelled,
    #[error("Capture failed: {0}")]
    Capture(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Recording controller is not running")]
    ControllerUnavailable,
}

impl From<CaptureError> for RecorderError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied(msg) => RecorderError::PermissionDenied(msg),
            CaptureError::DeviceUnavailable(msg) => RecorderError::DeviceUnavailable(msg),
            CaptureError::PresetUnsupported(preset) => RecorderError::PresetUnsupported(preset),
            CaptureError::FinalizeFailed(msg) => RecorderError::FinalizeFailed(msg),
            other => RecorderError::Capture(other.to_string()),
        }
    }
}

impl From<StorageError> for RecorderError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::DeleteFailed { name, reason } => {
                RecorderError::DeleteFailed { name, reason }
            }
            other => RecorderError::Storage(other.to_string()),
        }
    }
}

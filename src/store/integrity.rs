//! Classifies finalized files as valid, corrupted, or too small to trust.

use serde::Serialize;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

/// Files at or below this size are never opened; they are treated as torn writes.
pub const DEFAULT_MIN_VALID_BYTES: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "verdict")]
pub enum Verdict {
    Valid {
        size: u64,
        /// Only known after a deep check.
        duration: Option<f64>,
    },
    Missing,
    TooSmall { size: u64 },
    Corrupted { reason: String },
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            Verdict::Valid { .. } => "valid".to_string(),
            Verdict::Missing => "file is missing".to_string(),
            Verdict::TooSmall { size } => format!("only {} bytes", size),
            Verdict::Corrupted { reason } => reason.clone(),
        }
    }
}

/// Opens a media container and reports its duration in seconds.
pub trait MediaProbe: Send + Sync {
    fn probe_duration(&self, path: &Path) -> Result<f64, String>;
}

/// Probes containers with `ffprobe`.
pub struct FfprobeProbe {
    binary: String,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfprobeProbe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl MediaProbe for FfprobeProbe {
    fn probe_duration(&self, path: &Path) -> Result<f64, String> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| format!("ffprobe failed: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("ffprobe rejected container: {}", stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("no duration reported ({:?})", stdout.trim()))
    }
}

/// Two-tier verifier: a cheap size check and a container probe.
#[derive(Clone)]
pub struct IntegrityVerifier {
    min_valid_bytes: u64,
    probe: Arc<dyn MediaProbe>,
}

impl IntegrityVerifier {
    pub fn new(min_valid_bytes: u64, probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            min_valid_bytes,
            probe,
        }
    }

    pub fn min_valid_bytes(&self) -> u64 {
        self.min_valid_bytes
    }

    /// Existence and size only. Never opens the container.
    pub fn fast_check(&self, path: &Path) -> Verdict {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Verdict::Missing,
            Err(e) => {
                return Verdict::Corrupted {
                    reason: format!("unreadable: {}", e),
                }
            }
        };

        if !metadata.is_file() {
            return Verdict::Corrupted {
                reason: "not a regular file".to_string(),
            };
        }

        let size = metadata.len();
        if size <= self.min_valid_bytes {
            return Verdict::TooSmall { size };
        }

        Verdict::Valid {
            size,
            duration: None,
        }
    }

    /// Fast check, then a container probe that must report a positive duration.
    /// Blocks; call from a blocking context.
    pub fn deep_check_blocking(&self, path: &Path) -> Verdict {
        let size = match self.fast_check(path) {
            Verdict::Valid { size, .. } => size,
            other => return other,
        };

        match self.probe.probe_duration(path) {
            Ok(duration) if duration > 0.0 && duration.is_finite() => Verdict::Valid {
                size,
                duration: Some(duration),
            },
            Ok(duration) => Verdict::Corrupted {
                reason: format!("reports duration {}", duration),
            },
            Err(reason) => Verdict::Corrupted { reason },
        }
    }
}

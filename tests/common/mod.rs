//! Shared fixtures: a scripted capture source, a header-sniffing probe and a controller harness.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stashcam_lib::capture::{
    CameraPosition, CaptureError, CaptureSource, FinalizeCallback, FinalizeOutcome,
    PipelineConfig, ResolutionPreset, TargetHandle, PRESET_ORDER,
};
use stashcam_lib::recorder::{
    ControllerDeps, ControllerHandle, ControllerTiming, LocationSource, SegmentationController,
    SessionConfig,
};
use stashcam_lib::store::integrity::{IntegrityVerifier, MediaProbe, DEFAULT_MIN_VALID_BYTES};
use stashcam_lib::store::SegmentStore;

pub const PLAYABLE_HEADER: &[u8] = b"FAKEMP4";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FinalizeMode {
    /// The callback fires inside `finalize`.
    Immediate,
    /// Callbacks queue up until `complete_next` is called.
    Manual,
}

#[derive(Clone, Debug)]
pub struct FakeConfig {
    pub finalize: FinalizeMode,
    pub deny_permission: bool,
    pub presets: Vec<ResolutionPreset>,
    pub configure_delay: Duration,
    /// Opens beyond this many fail.
    pub fail_open_after: Option<usize>,
    pub payload_bytes: usize,
    pub finalize_error: Option<CaptureError>,
}

impl Default for FakeConfig {
    fn default() -> Self {
        Self {
            finalize: FinalizeMode::Immediate,
            deny_permission: false,
            presets: PRESET_ORDER.to_vec(),
            configure_delay: Duration::ZERO,
            fail_open_after: None,
            payload_bytes: 4096,
            finalize_error: None,
        }
    }
}

#[derive(Default)]
struct FakeState {
    configured: bool,
    next_handle: u64,
    opened: usize,
    open: HashMap<TargetHandle, PathBuf>,
    pending: VecDeque<(PathBuf, FinalizeCallback)>,
    in_flight: usize,
    max_in_flight: usize,
    finalize_calls: usize,
    force_stops: usize,
}

/// Capture source that writes a small fake container per target.
pub struct FakeCapture {
    config: FakeConfig,
    state: Mutex<FakeState>,
}

impl FakeCapture {
    pub fn new(config: FakeConfig) -> Self {
        Self {
            config,
            state: Mutex::new(FakeState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn outcome(&self, path: PathBuf) -> FinalizeOutcome {
        FinalizeOutcome {
            path,
            duration_hint: None,
            error: self.config.finalize_error.clone(),
        }
    }

    /// Fires the oldest queued finalize callback. Returns false when none was queued.
    pub fn complete_next(&self) -> bool {
        let next = {
            let mut state = self.state();
            let next = state.pending.pop_front();
            if next.is_some() {
                state.in_flight -= 1;
            }
            next
        };

        match next {
            Some((path, callback)) => {
                callback(self.outcome(path));
                true
            }
            None => false,
        }
    }

    pub fn finalize_calls(&self) -> usize {
        self.state().finalize_calls
    }

    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn pending_finalizes(&self) -> usize {
        self.state().pending.len()
    }

    pub fn force_stops(&self) -> usize {
        self.state().force_stops
    }

    pub fn open_targets(&self) -> usize {
        self.state().open.len()
    }

    pub fn opened(&self) -> usize {
        self.state().opened
    }
}

impl CaptureSource for FakeCapture {
    fn authorize(&self, _audio: bool) -> Result<(), CaptureError> {
        if self.config.deny_permission {
            return Err(CaptureError::PermissionDenied("camera".to_string()));
        }
        Ok(())
    }

    fn supported_presets(&self, _camera: CameraPosition) -> Vec<ResolutionPreset> {
        self.config.presets.clone()
    }

    fn configure(&self, _pipeline: &PipelineConfig) -> Result<(), CaptureError> {
        if !self.config.configure_delay.is_zero() {
            std::thread::sleep(self.config.configure_delay);
        }
        self.state().configured = true;
        Ok(())
    }

    fn open_target(&self, path: &Path) -> Result<TargetHandle, CaptureError> {
        let mut state = self.state();
        if !state.configured {
            return Err(CaptureError::TargetOpenFailed("not configured".to_string()));
        }
        if let Some(limit) = self.config.fail_open_after {
            if state.opened >= limit {
                return Err(CaptureError::TargetOpenFailed("disk went away".to_string()));
            }
        }

        let mut payload = PLAYABLE_HEADER.to_vec();
        payload.resize(self.config.payload_bytes, 0);
        std::fs::write(path, payload).map_err(|e| CaptureError::TargetOpenFailed(e.to_string()))?;

        state.opened += 1;
        state.next_handle += 1;
        let handle = TargetHandle(state.next_handle);
        state.open.insert(handle, path.to_path_buf());
        Ok(handle)
    }

    fn finalize(&self, handle: TargetHandle, on_finalized: FinalizeCallback) {
        let path = {
            let mut state = self.state();
            state.finalize_calls += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.open.remove(&handle).unwrap_or_default()
        };

        match self.config.finalize {
            FinalizeMode::Immediate => {
                self.state().in_flight -= 1;
                on_finalized(self.outcome(path));
            }
            FinalizeMode::Manual => {
                self.state().pending.push_back((path, on_finalized));
            }
        }
    }

    fn force_stop(&self) {
        let mut state = self.state();
        state.force_stops += 1;
        state.configured = false;
        state.open.clear();
        state.pending.clear();
        state.in_flight = 0;
    }
}

/// Accepts files that start with the fake container header.
pub struct FakeProbe;

impl MediaProbe for FakeProbe {
    fn probe_duration(&self, path: &Path) -> Result<f64, String> {
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        if bytes.starts_with(PLAYABLE_HEADER) {
            Ok(1.5)
        } else {
            Err("moov atom not found".to_string())
        }
    }
}

pub fn new_store(dir: &Path) -> Arc<SegmentStore> {
    let verifier = IntegrityVerifier::new(DEFAULT_MIN_VALID_BYTES, Arc::new(FakeProbe));
    Arc::new(SegmentStore::new(dir, verifier, 0).unwrap())
}

pub fn write_playable(path: &Path, len: usize) {
    let mut bytes = PLAYABLE_HEADER.to_vec();
    bytes.resize(len, 1);
    std::fs::write(path, bytes).unwrap();
}

pub fn write_garbage(path: &Path, len: usize) {
    std::fs::write(path, vec![0xAB; len]).unwrap();
}

pub fn session(segment_secs: u64) -> SessionConfig {
    SessionConfig {
        segment_secs,
        ..Default::default()
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub capture: Arc<FakeCapture>,
    pub store: Arc<SegmentStore>,
    pub handle: ControllerHandle,
}

impl Harness {
    pub fn recordings_dir(&self) -> PathBuf {
        self.dir.path().join("recordings")
    }

    pub fn staging_files(&self) -> usize {
        std::fs::read_dir(self.recordings_dir().join(".staging"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Spawns a controller on the current runtime.
pub fn spawn_controller(config: FakeConfig) -> Harness {
    spawn_controller_with(config, ControllerTiming::default(), None)
}

pub fn spawn_controller_with(
    config: FakeConfig,
    timing: ControllerTiming,
    location: Option<Arc<dyn LocationSource>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = new_store(&dir.path().join("recordings"));
    let capture = Arc::new(FakeCapture::new(config));

    let (controller, handle) = SegmentationController::new(ControllerDeps {
        capture: capture.clone(),
        store: store.clone(),
        location,
        timing,
    });
    tokio::spawn(controller.run());

    Harness {
        dir,
        capture,
        store,
        handle,
    }
}

/// Lets spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Steps paused time forward one second at a time so every timer fires in order.
pub async fn advance_secs(secs: u64) {
    for _ in 0..secs {
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
    }
}

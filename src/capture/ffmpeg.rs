//! FFmpeg-backed capture source: one encoder process per output target.
//!
//! Output is fragmented MP4 so a process killed mid-write still leaves the fragments written so
//! far playable. Whether such a file is kept is decided later by the integrity sweep.

use super::{
    CameraPosition, CaptureError, CaptureSource, FinalizeCallback, FinalizeOutcome,
    PipelineConfig, ResolutionPreset, TargetHandle, PRESET_ORDER,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const QUIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long a graceful `q` may take before the encoder is killed.
const QUIT_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CameraInput {
    pub camera: CameraPosition,
    /// Input arguments, e.g. `["-f", "v4l2", "-i", "/dev/video0"]`.
    pub args: Vec<String>,
    #[serde(default = "default_presets")]
    pub presets: Vec<ResolutionPreset>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FfmpegCaptureConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_cameras")]
    pub cameras: Vec<CameraInput>,
    #[serde(default = "default_audio_input")]
    pub audio_input: Vec<String>,
    #[serde(default = "default_crf")]
    pub crf: String,
    #[serde(default = "default_encoder_preset")]
    pub encoder_preset: String,
}

fn default_binary() -> String {
    "ffmpeg".to_string()
}

fn default_presets() -> Vec<ResolutionPreset> {
    PRESET_ORDER.to_vec()
}

fn default_cameras() -> Vec<CameraInput> {
    vec![CameraInput {
        camera: CameraPosition::Back,
        args: vec![
            "-f".to_string(),
            "v4l2".to_string(),
            "-i".to_string(),
            "/dev/video0".to_string(),
        ],
        presets: default_presets(),
    }]
}

fn default_audio_input() -> Vec<String> {
    vec![
        "-f".to_string(),
        "pulse".to_string(),
        "-i".to_string(),
        "default".to_string(),
    ]
}

fn default_crf() -> String {
    "23".to_string()
}

fn default_encoder_preset() -> String {
    "veryfast".to_string()
}

impl Default for FfmpegCaptureConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            cameras: default_cameras(),
            audio_input: default_audio_input(),
            crf: default_crf(),
            encoder_preset: default_encoder_preset(),
        }
    }
}

/// RAII guard ensuring the encoder process does not outlive its target.
///
/// On drop, if not marked as completed, the process is killed (SIGKILL on Unix). The partial
/// file stays on disk for the integrity sweep to judge.
struct ProcessGuard {
    child: Option<Child>,
    output_path: PathBuf,
    started_at: Instant,
    completed: bool,
}

impl ProcessGuard {
    fn new(child: Child, output_path: PathBuf) -> Self {
        Self {
            child: Some(child),
            output_path,
            started_at: Instant::now(),
            completed: false,
        }
    }

    fn mark_completed(&mut self) {
        self.completed = true;
    }

    /// Asks the encoder to quit cleanly, then waits until it exits, the grace period runs out,
    /// or `abort` is raised.
    fn quit(&mut self, abort: &AtomicBool) -> Result<(), CaptureError> {
        let Some(child) = self.child.as_mut() else {
            return Err(CaptureError::FinalizeFailed("encoder already gone".to_string()));
        };

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q") {
                tracing::warn!(target: "capture", "[FFMPEG] Failed to send quit: {}", e);
            }
        }

        let deadline = Instant::now() + QUIT_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(CaptureError::FinalizeFailed(format!(
                        "encoder exited with {}",
                        status
                    )))
                }
                Ok(None) => {}
                Err(e) => return Err(CaptureError::FinalizeFailed(e.to_string())),
            }

            if abort.load(Ordering::SeqCst) {
                return Err(CaptureError::FinalizeFailed("aborted by force stop".to_string()));
            }
            if Instant::now() >= deadline {
                return Err(CaptureError::FinalizeFailed(format!(
                    "encoder did not exit within {:?}",
                    QUIT_GRACE
                )));
            }
            std::thread::sleep(QUIT_POLL_INTERVAL);
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        if let Some(mut child) = self.child.take() {
            tracing::warn!(target: "capture", "[FFMPEG] Killing encoder for {:?}", self.output_path);
            if let Err(e) = child.kill() {
                tracing::debug!(target: "capture", "[FFMPEG] Kill failed (already exited?): {}", e);
            }
            let _ = child.wait();
        }
    }
}

#[derive(Default)]
struct SourceState {
    pipeline: Option<PipelineConfig>,
    next_handle: u64,
    writing: HashMap<TargetHandle, ProcessGuard>,
    finalizing: HashMap<TargetHandle, Arc<AtomicBool>>,
}

pub struct FfmpegCaptureSource {
    config: FfmpegCaptureConfig,
    state: Arc<Mutex<SourceState>>,
}

impl FfmpegCaptureSource {
    pub fn new(config: FfmpegCaptureConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(SourceState::default())),
        }
    }

    fn camera_input(&self, camera: CameraPosition) -> Option<&CameraInput> {
        self.config.cameras.iter().find(|c| c.camera == camera)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SourceState>, CaptureError> {
        self.state
            .lock()
            .map_err(|e| CaptureError::Process(format!("capture state poisoned: {}", e)))
    }

    fn build_args(&self, pipeline: &PipelineConfig, path: &Path) -> Result<Vec<String>, CaptureError> {
        let input = self.camera_input(pipeline.camera).ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("no input configured for {:?}", pipeline.camera))
        })?;
        let (width, height) = pipeline.preset.dimensions();

        let mut args: Vec<String> = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-video_size".to_string(),
            format!("{}x{}", width, height),
        ];
        args.extend(input.args.iter().cloned());

        let has_audio = pipeline.audio_enabled && !self.config.audio_input.is_empty();
        if has_audio {
            args.extend(self.config.audio_input.iter().cloned());
        }

        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-crf".to_string(),
            self.config.crf.clone(),
            "-preset".to_string(),
            self.config.encoder_preset.clone(),
        ]);

        if has_audio {
            args.extend([
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                "128k".to_string(),
            ]);
        }

        args.extend([
            "-movflags".to_string(),
            "+frag_keyframe+empty_moov+default_base_moof".to_string(),
            "-y".to_string(),
            path.to_string_lossy().to_string(),
        ]);

        Ok(args)
    }
}

/// Device nodes named in input arguments, e.g. `/dev/video0`.
fn device_nodes(args: &[String]) -> impl Iterator<Item = &String> {
    args.iter().filter(|a| a.starts_with("/dev/"))
}

fn check_device(node: &str) -> Result<(), CaptureError> {
    match std::fs::File::open(node) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(CaptureError::PermissionDenied(format!("{}: {}", node, e)))
        }
        Err(e) => Err(CaptureError::DeviceUnavailable(format!("{}: {}", node, e))),
    }
}

pub fn check_ffmpeg(binary: &str) -> Result<(), CaptureError> {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|_| CaptureError::DeviceUnavailable(format!("{} not found", binary)))?;
    Ok(())
}

impl CaptureSource for FfmpegCaptureSource {
    fn authorize(&self, audio: bool) -> Result<(), CaptureError> {
        check_ffmpeg(&self.config.binary)?;

        let mut nodes: Vec<&String> = self
            .config
            .cameras
            .iter()
            .flat_map(|c| device_nodes(&c.args))
            .collect();
        if audio {
            nodes.extend(device_nodes(&self.config.audio_input));
        }

        // Missing nodes are judged in configure, for the camera actually selected.
        for node in nodes {
            if let Err(e @ CaptureError::PermissionDenied(_)) = check_device(node) {
                return Err(e);
            }
        }
        Ok(())
    }

    fn supported_presets(&self, camera: CameraPosition) -> Vec<ResolutionPreset> {
        self.camera_input(camera)
            .map(|c| c.presets.clone())
            .unwrap_or_default()
    }

    fn configure(&self, pipeline: &PipelineConfig) -> Result<(), CaptureError> {
        let input = self.camera_input(pipeline.camera).ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!("no input configured for {:?}", pipeline.camera))
        })?;
        for node in device_nodes(&input.args) {
            check_device(node)?;
        }

        tracing::info!(target: "capture",
            "[FFMPEG] Pipeline configured: camera={:?}, preset={:?}, audio={}",
            pipeline.camera, pipeline.preset, pipeline.audio_enabled);

        self.lock()?.pipeline = Some(pipeline.clone());
        Ok(())
    }

    fn open_target(&self, path: &Path) -> Result<TargetHandle, CaptureError> {
        let mut state = self.lock()?;
        let pipeline = state
            .pipeline
            .clone()
            .ok_or_else(|| CaptureError::TargetOpenFailed("pipeline not configured".to_string()))?;

        let args = self.build_args(&pipeline, path)?;
        tracing::debug!(target: "capture", "[FFMPEG] args: {:?}", args);

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CaptureError::TargetOpenFailed(format!("Failed to spawn ffmpeg: {}", e)))?;

        if let Some(stderr) = child.stderr.take() {
            let label = path.to_string_lossy().to_string();
            std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    tracing::warn!(target: "capture", "[FFMPEG] {}: {}", label, line);
                }
            });
        }

        state.next_handle += 1;
        let handle = TargetHandle(state.next_handle);
        state
            .writing
            .insert(handle, ProcessGuard::new(child, path.to_path_buf()));

        tracing::info!(target: "capture", "[FFMPEG] Writing target {:?} -> {:?}", handle, path);
        Ok(handle)
    }

    fn finalize(&self, handle: TargetHandle, on_finalized: FinalizeCallback) {
        let abort = Arc::new(AtomicBool::new(false));
        let guard = match self.lock() {
            Ok(mut state) => {
                let guard = state.writing.remove(&handle);
                if guard.is_some() {
                    state.finalizing.insert(handle, abort.clone());
                }
                guard
            }
            Err(e) => {
                tracing::error!(target: "capture", "[FFMPEG] {}", e);
                None
            }
        };

        let Some(mut guard) = guard else {
            on_finalized(FinalizeOutcome {
                path: PathBuf::new(),
                duration_hint: None,
                error: Some(CaptureError::FinalizeFailed(format!("unknown target {:?}", handle))),
            });
            return;
        };

        let state = self.state.clone();
        std::thread::spawn(move || {
            let result = guard.quit(&abort);
            if result.is_ok() {
                guard.mark_completed();
            }
            let outcome = FinalizeOutcome {
                path: guard.output_path.clone(),
                duration_hint: Some(guard.started_at.elapsed()),
                error: result.err(),
            };
            // Kills the encoder if it did not quit cleanly.
            drop(guard);

            if let Ok(mut state) = state.lock() {
                state.finalizing.remove(&handle);
            }
            on_finalized(outcome);
        });
    }

    fn force_stop(&self) {
        let guards: Vec<ProcessGuard> = match self.lock() {
            Ok(mut state) => {
                for abort in state.finalizing.values() {
                    abort.store(true, Ordering::SeqCst);
                }
                state.pipeline = None;
                state.writing.drain().map(|(_, guard)| guard).collect()
            }
            Err(e) => {
                tracing::error!(target: "capture", "[FFMPEG] {}", e);
                return;
            }
        };

        tracing::warn!(target: "capture", "[FFMPEG] Force stop: killing {} encoder(s)", guards.len());
        drop(guards);
    }
}

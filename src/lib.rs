pub mod capture;
pub mod core;
pub mod recorder;
pub mod shared;
pub mod store;

use std::sync::Arc;

use crate::capture::ffmpeg::{check_ffmpeg, FfmpegCaptureSource};
use crate::core::settings::{load_settings, RecorderSettings};
use crate::recorder::{
    ControllerDeps, FixedBudget, LifecycleGuard, RecorderError, RecordingState,
    SegmentationController,
};
use crate::store::integrity::{FfprobeProbe, IntegrityVerifier};
use crate::store::SegmentStore;

/// Records one session with the FFmpeg capture source until a signal or failure ends it.
pub fn run() {
    let _logging = crate::core::logging::init_logging();
    let settings = load_settings();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(target: "system", "Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(record(settings)) {
        tracing::error!(target: "system", "Recording failed: {}", e);
        std::process::exit(1);
    }
}

async fn record(settings: RecorderSettings) -> Result<(), RecorderError> {
    check_ffmpeg(&settings.capture.binary)?;

    let verifier = IntegrityVerifier::new(
        settings.min_valid_bytes,
        Arc::new(FfprobeProbe::new(settings.ffprobe_binary.clone())),
    );
    let store = Arc::new(SegmentStore::new(
        settings.recordings_dir(),
        verifier,
        settings.low_disk_bytes,
    )?);

    let (controller, handle) = SegmentationController::new(ControllerDeps {
        capture: Arc::new(FfmpegCaptureSource::new(settings.capture.clone())),
        store,
        location: None,
        timing: settings.timing(),
    });
    tokio::spawn(controller.run());

    let (guard, lifecycle) = LifecycleGuard::new(
        handle.clone(),
        Arc::new(FixedBudget::new(settings.background_budget())),
        settings.safety_margin(),
    );
    tokio::spawn(guard.run());

    let sweep = handle.load_catalog().await?;
    tracing::info!(target: "system",
        "Catalog ready: {} segment(s), {} rejected", sweep.kept, sweep.rejected.len());

    #[cfg(unix)]
    tokio::spawn(async move {
        if let Err(e) = recorder::lifecycle::forward_unix_signals(lifecycle).await {
            tracing::error!(target: "system", "Failed to install signal handlers: {}", e);
        }
    });
    #[cfg(not(unix))]
    drop(lifecycle);

    let report = handle.start(settings.session.clone()).await?;
    tracing::info!(target: "system",
        "Recording session {} at {:?} into {:?}",
        report.session_id, report.preset, handle.store().dir());

    let final_state = handle
        .wait_for(|s| matches!(s, RecordingState::Stopped { .. } | RecordingState::Idle))
        .await?;

    if let Some(summary) = handle.stop().await? {
        tracing::info!(target: "system",
            "Session {} finished: {} committed, {} discarded",
            summary.session_id, summary.committed.len(), summary.discarded);
    }

    match final_state.error() {
        Some(error) => Err(error.clone()),
        None => Ok(()),
    }
}

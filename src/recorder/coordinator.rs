//! SegmentationController - single owner actor for the segmented recording lifecycle.
//!
//! The controller owns the session, the rotation timer and the finalize watchdog, and processes
//! everything through the state machine. Nothing else touches session state.
//!
//! Architecture:
//! - `ControllerHandle` sends Commands to the controller via command_tx (bounded)
//! - Timers, bring-up tasks and finalize callbacks send Events via event_tx (unbounded, never blocks)
//! - The controller applies events before commands and executes the resulting SideEffects
//! - Observers receive state changes through a watch channel

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::errors::RecorderError;
use super::location::LocationSource;
use super::session::{RecordingSession, SegmentTarget, TargetPhase};
use super::state::{transition, RecordingState, SessionEvent, SideEffect};
use super::types::{ControllerTiming, RecordingStatus, SessionConfig, SessionSummary, StartReport};
use crate::capture::{negotiate_preset, CaptureSource, FinalizeOutcome, PipelineConfig, ResolutionPreset};
use crate::store::disk::DiskSpaceSnapshot;
use crate::store::{
    CommitOutcome, DeleteReport, MediaAttributes, PendingSegment, RecordingEntry, SegmentStore,
    SweepReport,
};

const COMMAND_BUFFER: usize = 16;

/// Commands sent from handles to the controller.
#[derive(Debug)]
pub enum Command {
    Start {
        config: SessionConfig,
        response_tx: oneshot::Sender<Result<StartReport, RecorderError>>,
    },
    Stop {
        response_tx: Option<oneshot::Sender<Option<SessionSummary>>>,
    },
    EmergencyStop {
        response_tx: oneshot::Sender<()>,
    },
    Rotate {
        response_tx: oneshot::Sender<bool>,
    },
    Reset {
        response_tx: oneshot::Sender<()>,
    },
    Status {
        response_tx: oneshot::Sender<RecordingStatus>,
    },
}

/// Events sent from timers, bring-up tasks and capture callbacks.
///
/// Every event carries the generation it was issued under; events from an older generation are
/// dropped.
#[derive(Debug)]
enum ControllerEvent {
    BringUpFinished {
        generation: u64,
        result: Result<BringUp, RecorderError>,
    },
    RotationTick {
        generation: u64,
    },
    Finalized {
        generation: u64,
        sequence: u32,
        outcome: FinalizeOutcome,
    },
    FinalizeTimedOut {
        generation: u64,
        sequence: u32,
    },
}

#[derive(Debug)]
struct BringUp {
    preset: ResolutionPreset,
    disk: Option<DiskSpaceSnapshot>,
}

/// Collaborators the controller drives.
pub struct ControllerDeps {
    pub capture: Arc<dyn CaptureSource>,
    pub store: Arc<SegmentStore>,
    pub location: Option<Arc<dyn LocationSource>>,
    pub timing: ControllerTiming,
}

pub struct SegmentationController {
    capture: Arc<dyn CaptureSource>,
    store: Arc<SegmentStore>,
    location: Option<Arc<dyn LocationSource>>,
    timing: ControllerTiming,
    state: RecordingState,
    state_tx: watch::Sender<RecordingState>,
    generation: u64,
    session: Option<RecordingSession>,
    last_summary: Option<SessionSummary>,
    finalized: Option<(u32, FinalizeOutcome)>,
    pending_start: Option<oneshot::Sender<Result<StartReport, RecorderError>>>,
    pending_stops: Vec<oneshot::Sender<Option<SessionSummary>>>,
    bring_up: Option<JoinHandle<()>>,
    rotation_timer: Option<JoinHandle<()>>,
    finalize_watchdog: Option<JoinHandle<()>>,
    command_rx: mpsc::Receiver<Command>,
    event_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl SegmentationController {
    pub fn new(deps: ControllerDeps) -> (Self, ControllerHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RecordingState::Idle);

        let handle = ControllerHandle {
            command_tx,
            state_rx,
            store: deps.store.clone(),
        };

        let controller = Self {
            capture: deps.capture,
            store: deps.store,
            location: deps.location,
            timing: deps.timing,
            state: RecordingState::Idle,
            state_tx,
            generation: 0,
            session: None,
            last_summary: None,
            finalized: None,
            pending_start: None,
            pending_stops: Vec::new(),
            bring_up: None,
            rotation_timer: None,
            finalize_watchdog: None,
            command_rx,
            event_rx,
            event_tx,
        };

        (controller, handle)
    }

    /// Main event loop. Run this as a tokio task.
    pub async fn run(mut self) {
        tracing::info!(target: "recorder", "[CONTROLLER] Starting event loop");

        loop {
            tokio::select! {
                biased;
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        tracing::info!(target: "recorder", "[CONTROLLER] All handles dropped, shutting down");
                        break;
                    }
                },
            }
        }

        self.shutdown();
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start {
                config,
                response_tx,
            } => self.handle_start(config, response_tx),
            Command::Stop { response_tx } => self.handle_stop(response_tx),
            Command::EmergencyStop { response_tx } => {
                if self.state.is_active() {
                    tracing::warn!(target: "recorder",
                        "[CONTROLLER] Emergency stop requested in state {}", self.state.name());
                }
                self.apply(SessionEvent::EmergencyStopRequested);
                let _ = response_tx.send(());
            }
            Command::Rotate { response_tx } => {
                let rotating = matches!(self.state, RecordingState::Recording { .. });
                self.apply(SessionEvent::RotationTick);
                let _ = response_tx.send(rotating);
            }
            Command::Reset { response_tx } => {
                self.apply(SessionEvent::Reset);
                let _ = response_tx.send(());
            }
            Command::Status { response_tx } => {
                let _ = response_tx.send(self.build_status());
            }
        }
    }

    fn handle_start(
        &mut self,
        config: SessionConfig,
        response_tx: oneshot::Sender<Result<StartReport, RecorderError>>,
    ) {
        if self.state.is_active() {
            let _ = response_tx.send(Err(RecorderError::AlreadyRecording));
            return;
        }
        if let Err(error) = config.validate() {
            tracing::warn!(target: "recorder", "[CONTROLLER] Start refused: {}", error);
            let _ = response_tx.send(Err(error));
            return;
        }

        self.generation += 1;
        let session = RecordingSession::new(config);
        tracing::info!(target: "recorder",
            "[CONTROLLER] Starting session {} ({}s segments, preset {:?})",
            session.id, session.config.segment_secs, session.config.preset);

        self.session = Some(session);
        self.pending_start = Some(response_tx);
        self.apply(SessionEvent::StartRequested);
    }

    fn handle_stop(&mut self, response_tx: Option<oneshot::Sender<Option<SessionSummary>>>) {
        match &self.state {
            RecordingState::Idle => {
                if let Some(tx) = response_tx {
                    let _ = tx.send(None);
                }
            }
            RecordingState::Stopped { .. } => {
                if let Some(tx) = response_tx {
                    let _ = tx.send(self.last_summary.clone());
                }
            }
            _ => {
                if let Some(tx) = response_tx {
                    self.pending_stops.push(tx);
                }
                if self.state.accepts_stop() {
                    tracing::info!(target: "recorder",
                        "[CONTROLLER] Stop requested in state {}", self.state.name());
                    self.apply(SessionEvent::StopRequested);
                }
            }
        }
    }

    fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::BringUpFinished { generation, result } => {
                let current = generation == self.generation
                    && matches!(self.state, RecordingState::Starting { .. });
                if !current {
                    tracing::debug!(target: "recorder", "[CONTROLLER] Ignoring stale bring-up result");
                    if result.is_ok() && !self.state.is_active() {
                        self.capture.force_stop();
                    }
                    return;
                }

                self.bring_up = None;
                match result {
                    Ok(bring_up) => {
                        if let Some(session) = self.session.as_mut() {
                            session.preset_fell_back = bring_up.preset != session.config.preset;
                            session.preset = bring_up.preset;
                            session.disk = bring_up.disk;
                        }
                        self.apply(SessionEvent::PipelineReady);
                    }
                    Err(error) => {
                        tracing::error!(target: "recorder", "[CONTROLLER] Start failed: {}", error);
                        self.apply(SessionEvent::PipelineFailed { error });
                    }
                }
            }
            ControllerEvent::RotationTick { generation } => {
                if generation == self.generation {
                    self.apply(SessionEvent::RotationTick);
                }
            }
            ControllerEvent::Finalized {
                generation,
                sequence,
                outcome,
            } => {
                if generation != self.generation {
                    tracing::debug!(target: "recorder",
                        "[CONTROLLER] Ignoring finalize of segment {} from an ended session", sequence);
                    return;
                }
                self.finalized = Some((sequence, outcome));
                self.apply(SessionEvent::SegmentFinalized { sequence });
                self.finalized = None;
            }
            ControllerEvent::FinalizeTimedOut {
                generation,
                sequence,
            } => {
                if generation == self.generation && self.state.finalizing() == Some(sequence) {
                    tracing::error!(target: "recorder",
                        "[CONTROLLER] Segment {} did not finalize within {:?}, forcing stop",
                        sequence, self.timing.finalize_timeout);
                    self.apply(SessionEvent::FinalizeTimedOut { sequence });
                }
            }
        }
    }

    /// Runs `event` through the state machine and executes the effects in order.
    ///
    /// An effect may fail with a follow-up event; the rest of the batch is then dropped and the
    /// follow-up is applied to the new state.
    fn apply(&mut self, event: SessionEvent) {
        let mut next = Some(event);

        while let Some(event) = next.take() {
            let (new_state, effects) = transition(self.state.clone(), event);
            self.state = new_state;

            for effect in effects {
                if let Some(follow_up) = self.execute_effect(effect) {
                    next = Some(follow_up);
                    break;
                }
            }
        }

        debug_assert!(
            self.session
                .as_ref()
                .map_or(true, |s| s.active_count() <= 1 && s.finalizing_count() <= 1),
            "more than one target is being written or finalized"
        );
    }

    fn execute_effect(&mut self, effect: SideEffect) -> Option<SessionEvent> {
        match effect {
            SideEffect::BringUpPipeline => return self.bring_up_pipeline(),
            SideEffect::CancelBringUp => {
                // Left running: the blocking work cannot be interrupted, and its late result
                // is what tears the pipeline down again.
                self.bring_up = None;
                self.generation += 1;
                tracing::info!(target: "recorder", "[CONTROLLER] Start cancelled");
            }
            SideEffect::OpenTarget { sequence } => return self.open_target(sequence),
            SideEffect::ArmRotationTimer => self.arm_rotation_timer(),
            SideEffect::CancelRotationTimer => {
                if let Some(handle) = self.rotation_timer.take() {
                    handle.abort();
                    tracing::debug!(target: "recorder", "[CONTROLLER] Rotation timer cancelled");
                }
            }
            SideEffect::FinalizeTarget { sequence } => return self.finalize_target(sequence),
            SideEffect::CommitTarget { sequence } => {
                self.disarm_watchdog();
                let outcome = match self.finalized.take() {
                    Some((seq, outcome)) if seq == sequence => Some(outcome),
                    other => {
                        self.finalized = other;
                        None
                    }
                };
                self.commit_target(sequence, outcome);
            }
            SideEffect::ForceStopCapture => {
                self.disarm_watchdog();
                tracing::warn!(target: "recorder", "[CONTROLLER] Forcing capture stop");
                self.capture.force_stop();
            }
            SideEffect::CommitOutstanding => {
                let outstanding = self
                    .session
                    .as_ref()
                    .map(|s| s.outstanding())
                    .unwrap_or_default();
                for sequence in outstanding {
                    self.commit_target(sequence, None);
                }
            }
            SideEffect::AcknowledgeStart => self.acknowledge_start(),
            SideEffect::RejectStart { error } => {
                if let Some(tx) = self.pending_start.take() {
                    let _ = tx.send(Err(error));
                }
            }
            SideEffect::CompleteStop => self.complete_stop(),
            SideEffect::EmitStateChange { state } => {
                tracing::debug!(target: "recorder", "[CONTROLLER] State -> {}", state.name());
                self.state_tx.send_replace(state);
            }
        }
        None
    }

    fn bring_up_pipeline(&mut self) -> Option<SessionEvent> {
        let Some(session) = self.session.as_ref() else {
            return Some(SessionEvent::PipelineFailed {
                error: RecorderError::Capture("no session to start".to_string()),
            });
        };

        let capture = self.capture.clone();
        let store = self.store.clone();
        let config = session.config.clone();
        let event_tx = self.event_tx.clone();
        let generation = self.generation;
        let timeout = self.timing.start_timeout;

        self.bring_up = Some(tokio::spawn(async move {
            let mut work = tokio::task::spawn_blocking(move || {
                bring_up_blocking(capture.as_ref(), &store, &config)
            });

            let joined = match tokio::time::timeout(timeout, &mut work).await {
                Ok(joined) => joined,
                Err(_) => {
                    let _ = event_tx.send(ControllerEvent::BringUpFinished {
                        generation,
                        result: Err(RecorderError::SessionStartTimeout(timeout)),
                    });
                    // The late result is stale by now and only drives teardown.
                    work.await
                }
            };

            let result = joined.unwrap_or_else(|e| {
                Err(RecorderError::Capture(format!("bring-up task failed: {}", e)))
            });
            let _ = event_tx.send(ControllerEvent::BringUpFinished { generation, result });
        }));

        None
    }

    fn open_target(&mut self, sequence: u32) -> Option<SessionEvent> {
        let Some(session) = self.session.as_mut() else {
            return Some(SessionEvent::CaptureFailed {
                error: RecorderError::Capture("no session".to_string()),
            });
        };

        let file_name = session.file_name(sequence);
        let staging_path = match self.store.reserve_staging(&file_name) {
            Ok(path) => path,
            Err(e) => return Some(SessionEvent::CaptureFailed { error: e.into() }),
        };

        match self.capture.open_target(&staging_path) {
            Ok(handle) => {
                tracing::info!(target: "recorder", "[CONTROLLER] Segment {} -> {}", sequence, file_name);
                session.insert_target(SegmentTarget::new(
                    sequence,
                    handle,
                    staging_path,
                    file_name,
                    Instant::now(),
                ));
                None
            }
            Err(e) => {
                tracing::error!(target: "recorder",
                    "[CONTROLLER] Failed to open segment {}: {}", sequence, e);
                self.store.release_staging(&file_name);
                Some(SessionEvent::CaptureFailed { error: e.into() })
            }
        }
    }

    fn arm_rotation_timer(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Some(handle) = self.rotation_timer.take() {
            handle.abort();
        }

        let period = session.config.segment_duration();
        let event_tx = self.event_tx.clone();
        let generation = self.generation;

        self.rotation_timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if event_tx
                    .send(ControllerEvent::RotationTick { generation })
                    .is_err()
                {
                    break;
                }
            }
        }));
        tracing::debug!(target: "recorder", "[CONTROLLER] Rotation timer armed ({:?})", period);
    }

    fn finalize_target(&mut self, sequence: u32) -> Option<SessionEvent> {
        let Some(target) = self
            .session
            .as_mut()
            .and_then(|s| s.target_mut(sequence))
        else {
            return Some(SessionEvent::CaptureFailed {
                error: RecorderError::FinalizeFailed(format!("segment {} was never opened", sequence)),
            });
        };

        target.advance(TargetPhase::Finalizing);
        let handle = target.handle;

        let event_tx = self.event_tx.clone();
        let generation = self.generation;
        tracing::info!(target: "recorder", "[CONTROLLER] Finalizing segment {}", sequence);
        self.capture.finalize(
            handle,
            Box::new(move |outcome| {
                let _ = event_tx.send(ControllerEvent::Finalized {
                    generation,
                    sequence,
                    outcome,
                });
            }),
        );

        self.disarm_watchdog();
        let event_tx = self.event_tx.clone();
        let timeout = self.timing.finalize_timeout;
        self.finalize_watchdog = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = event_tx.send(ControllerEvent::FinalizeTimedOut {
                generation,
                sequence,
            });
        }));

        None
    }

    fn disarm_watchdog(&mut self) {
        if let Some(handle) = self.finalize_watchdog.take() {
            handle.abort();
        }
    }

    /// Hands a target to the store. Integrity and storage failures are logged and counted,
    /// never surfaced.
    fn commit_target(&mut self, sequence: u32, outcome: Option<FinalizeOutcome>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(target) = session.target(sequence).cloned() else {
            tracing::warn!(target: "recorder", "[CONTROLLER] No segment {} to commit", sequence);
            return;
        };
        if target.phase().is_settled() {
            return;
        }

        if let Some(error) = outcome.as_ref().and_then(|o| o.error.as_ref()) {
            let error = RecorderError::FinalizeFailed(error.to_string());
            tracing::warn!(target: "recorder",
                "[CONTROLLER] Segment {}: {}; attempting commit anyway", sequence, error);
        }

        let source_path = outcome
            .as_ref()
            .map(|o| o.path.clone())
            .filter(|p| p.exists())
            .unwrap_or_else(|| target.staging_path.clone());

        let ended_at = target.finalize_requested_at.unwrap_or_else(Instant::now);
        let duration = outcome
            .and_then(|o| o.duration_hint)
            .unwrap_or_else(|| ended_at.saturating_duration_since(target.opened_at));

        let created_at = session.wall_clock_at(target.opened_at);
        let mut attrs = MediaAttributes {
            duration_secs: duration.as_secs_f64(),
            created_at: Some(created_at),
            ..Default::default()
        };

        if session.config.location_tagging {
            if let Some(location) = self.location.as_ref() {
                let ended_wall = session.wall_clock_at(ended_at);
                attrs.location = location.current_fix();
                attrs.address = attrs
                    .location
                    .as_ref()
                    .and_then(|p| location.reverse_geocode(p));
                attrs.location_path = location.track_between(created_at, ended_wall);
            }
        }

        let pending = PendingSegment {
            source_path,
            file_name: target.file_name.clone(),
            sequence,
        };

        let phase = match self.store.commit(&pending, attrs) {
            Ok(CommitOutcome::Committed(entry)) => {
                session.committed.push(entry);
                TargetPhase::Committed
            }
            Ok(CommitOutcome::Discarded(verdict)) => {
                let error = RecorderError::IntegrityRejected {
                    name: pending.file_name.clone(),
                    reason: verdict.reason(),
                };
                tracing::warn!(target: "recorder", "[CONTROLLER] {}", error);
                session.discarded += 1;
                TargetPhase::Discarded
            }
            Err(e) => {
                tracing::error!(target: "recorder",
                    "[CONTROLLER] Failed to commit segment {}: {}", sequence, e);
                session.discarded += 1;
                TargetPhase::Discarded
            }
        };

        if let Some(target) = session.target_mut(sequence) {
            target.advance(phase);
        }
    }

    fn acknowledge_start(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let report = StartReport {
            session_id: session.id.clone(),
            preset: session.preset,
            preset_fell_back: session.preset_fell_back,
            disk: session.disk,
        };

        if report.preset_fell_back {
            tracing::info!(target: "recorder",
                "[CONTROLLER] Requested preset {:?} unavailable, recording at {:?}",
                session.config.preset, report.preset);
        }
        if let Some(warning) = report.disk_warning() {
            tracing::warn!(target: "recorder", "[CONTROLLER] {}", warning);
        }

        if let Some(tx) = self.pending_start.take() {
            let _ = tx.send(Ok(report));
        }
        tracing::info!(target: "recorder", "[CONTROLLER] Recording started");
    }

    fn complete_stop(&mut self) {
        if let Some(handle) = self.rotation_timer.take() {
            handle.abort();
        }
        self.disarm_watchdog();

        let summary = self.session.take().map(|session| SessionSummary {
            session_id: session.id,
            committed: session.committed,
            discarded: session.discarded,
            error: self.state.error().map(|e| e.to_string()),
        });

        if let Some(summary) = &summary {
            tracing::info!(target: "recorder",
                "[CONTROLLER] Session {} ended: committed={}, discarded={}",
                summary.session_id, summary.committed.len(), summary.discarded);
            self.last_summary = Some(summary.clone());
        }

        for tx in self.pending_stops.drain(..) {
            let _ = tx.send(summary.clone());
        }
    }

    fn build_status(&self) -> RecordingStatus {
        let session = self.session.as_ref();
        let committed_count = match (session, &self.state) {
            (Some(s), _) => s.committed.len(),
            (None, RecordingState::Stopped { .. }) => self
                .last_summary
                .as_ref()
                .map_or(0, |s| s.committed.len()),
            (None, _) => 0,
        };

        RecordingStatus {
            state: self.state.name().to_string(),
            session_id: session
                .map(|s| s.id.clone())
                .or_else(|| match self.state {
                    RecordingState::Stopped { .. } => {
                        self.last_summary.as_ref().map(|s| s.session_id.clone())
                    }
                    _ => None,
                }),
            segment: self.state.current_segment(),
            elapsed_seconds: session.map_or(0.0, |s| s.started_at().elapsed().as_secs_f64()),
            committed_count,
            presentation: session.map(|s| s.config.presentation.clone()),
            error: self.state.error().map(|e| e.to_string()),
        }
    }

    fn shutdown(&mut self) {
        if self.state.is_active() {
            tracing::warn!(target: "recorder", "[CONTROLLER] Shutting down with an active session");
            self.apply(SessionEvent::EmergencyStopRequested);
        }
        if let Some(handle) = self.bring_up.take() {
            handle.abort();
        }
        if let Some(handle) = self.rotation_timer.take() {
            handle.abort();
        }
        self.disarm_watchdog();
        tracing::info!(target: "recorder", "[CONTROLLER] Event loop stopped");
    }
}

/// Authorization, preset negotiation and pipeline configuration. Blocks.
fn bring_up_blocking(
    capture: &dyn CaptureSource,
    store: &SegmentStore,
    config: &SessionConfig,
) -> Result<BringUp, RecorderError> {
    capture.authorize(config.audio_enabled)?;

    let supported = capture.supported_presets(config.camera);
    let preset = negotiate_preset(config.preset, &supported).ok_or_else(|| {
        RecorderError::DeviceUnavailable(format!("no usable preset for {:?} camera", config.camera))
    })?;

    capture.configure(&PipelineConfig {
        camera: config.camera,
        preset,
        audio_enabled: config.audio_enabled,
    })?;

    Ok(BringUp {
        preset,
        disk: store.disk_space(),
    })
}

/// Handle to send commands to the controller and read the catalog.
#[derive(Clone)]
pub struct ControllerHandle {
    command_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<RecordingState>,
    store: Arc<SegmentStore>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RecorderError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(make(response_tx))
            .await
            .map_err(|_| RecorderError::ControllerUnavailable)?;

        response_rx
            .await
            .map_err(|_| RecorderError::ControllerUnavailable)
    }

    /// Resolves once the first segment is being written, or with the reason it could not start.
    pub async fn start(&self, config: SessionConfig) -> Result<StartReport, RecorderError> {
        self.request(|response_tx| Command::Start {
            config,
            response_tx,
        })
        .await?
    }

    /// Graceful stop. Resolves when the last segment is committed. `None` when no session ran.
    pub async fn stop(&self) -> Result<Option<SessionSummary>, RecorderError> {
        self.request(|response_tx| Command::Stop {
            response_tx: Some(response_tx),
        })
        .await
    }

    /// Graceful stop without waiting for it to finish.
    pub async fn request_stop(&self) -> Result<(), RecorderError> {
        self.command_tx
            .send(Command::Stop { response_tx: None })
            .await
            .map_err(|_| RecorderError::ControllerUnavailable)
    }

    /// Forced stop. Resolves once the controller has processed it.
    pub async fn emergency_stop(&self) -> Result<(), RecorderError> {
        self.request(|response_tx| Command::EmergencyStop { response_tx })
            .await
    }

    /// Rotates now. Returns false when no segment was being recorded.
    pub async fn rotate(&self) -> Result<bool, RecorderError> {
        self.request(|response_tx| Command::Rotate { response_tx })
            .await
    }

    /// Clears a stopped session back to idle.
    pub async fn reset(&self) -> Result<(), RecorderError> {
        self.request(|response_tx| Command::Reset { response_tx })
            .await
    }

    pub async fn status(&self) -> RecordingStatus {
        self.request(|response_tx| Command::Status { response_tx })
            .await
            .unwrap_or_else(|_| RecordingStatus::unavailable("Controller not running"))
    }

    pub fn state(&self) -> RecordingState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecordingState> {
        self.state_rx.clone()
    }

    /// Waits until the controller reports a state matching `done`.
    pub async fn wait_for(
        &self,
        done: impl Fn(&RecordingState) -> bool,
    ) -> Result<RecordingState, RecorderError> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|s| done(s))
            .await
            .map_err(|_| RecorderError::ControllerUnavailable)?;
        Ok(state.clone())
    }

    pub fn catalog(&self) -> Vec<RecordingEntry> {
        self.store.list_all()
    }

    pub fn store(&self) -> Arc<SegmentStore> {
        self.store.clone()
    }

    pub async fn load_catalog(&self) -> Result<SweepReport, RecorderError> {
        Ok(self.store.load_catalog().await?)
    }

    pub async fn delete(&self, name: &str) -> Result<(), RecorderError> {
        let store = self.store.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || store.delete(&name))
            .await
            .map_err(|e| RecorderError::Storage(e.to_string()))??;
        Ok(())
    }

    pub async fn delete_all(&self) -> Result<DeleteReport, RecorderError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.delete_all())
            .await
            .map_err(|e| RecorderError::Storage(e.to_string()))
    }
}

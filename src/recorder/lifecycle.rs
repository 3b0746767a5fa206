//! Lifecycle guard - turns process lifecycle signals into stop requests.
//!
//! Focus loss stops gracefully. Entering the background opens an execution grant whose deadline
//! is the remaining budget minus a safety margin; if the session is still running when it expires
//! the guard forces an emergency stop. Termination always forces an emergency stop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::coordinator::ControllerHandle;
use super::errors::RecorderError;
use super::state::RecordingState;

pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(5);
pub const DEFAULT_BACKGROUND_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    FocusLost,
    EnteredBackground,
    WillTerminate,
    BecameActive,
}

/// The platform's finite background-execution allowance.
pub trait ExecutionBudget: Send + Sync {
    /// Opens a grant. Calling it while a grant is open does nothing.
    fn begin(&self);

    /// Time left on the open grant, `None` when no grant is open.
    fn remaining(&self) -> Option<Duration>;

    /// Releases the grant. Calling it without an open grant does nothing.
    fn end(&self);
}

/// A budget with a fixed ceiling, measured from `begin`.
pub struct FixedBudget {
    ceiling: Duration,
    granted_at: Mutex<Option<Instant>>,
}

impl FixedBudget {
    pub fn new(ceiling: Duration) -> Self {
        Self {
            ceiling,
            granted_at: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.granted_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl Default for FixedBudget {
    fn default() -> Self {
        Self::new(DEFAULT_BACKGROUND_BUDGET)
    }
}

impl ExecutionBudget for FixedBudget {
    fn begin(&self) {
        self.granted_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert_with(Instant::now);
    }

    fn remaining(&self) -> Option<Duration> {
        self.granted_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| self.ceiling.saturating_sub(at.elapsed()))
    }

    fn end(&self) {
        self.granted_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}

type SignalMessage = (LifecycleSignal, oneshot::Sender<()>);

pub struct LifecycleGuard {
    controller: ControllerHandle,
    budget: Arc<dyn ExecutionBudget>,
    safety_margin: Duration,
    signal_rx: mpsc::Receiver<SignalMessage>,
    state_rx: watch::Receiver<RecordingState>,
    grant_open: bool,
    deadline: Option<Instant>,
}

impl LifecycleGuard {
    pub fn new(
        controller: ControllerHandle,
        budget: Arc<dyn ExecutionBudget>,
        safety_margin: Duration,
    ) -> (Self, LifecycleHandle) {
        let (signal_tx, signal_rx) = mpsc::channel(8);
        let state_rx = controller.subscribe();

        let guard = Self {
            controller,
            budget,
            safety_margin,
            signal_rx,
            state_rx,
            grant_open: false,
            deadline: None,
        };

        (guard, LifecycleHandle { signal_tx })
    }

    /// Main loop. Run this as a tokio task.
    pub async fn run(mut self) {
        tracing::info!(target: "lifecycle", "[GUARD] Watching lifecycle signals");

        loop {
            let deadline = self.deadline;

            tokio::select! {
                msg = self.signal_rx.recv() => match msg {
                    Some((signal, ack)) => {
                        self.handle_signal(signal).await;
                        let _ = ack.send(());
                    }
                    None => break,
                },
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let live = self.state_rx.borrow_and_update().is_active();
                    if !live && self.grant_open {
                        tracing::info!(target: "lifecycle", "[GUARD] Session ended before the deadline");
                        self.end_grant();
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    if self.session_live() {
                        tracing::warn!(target: "lifecycle",
                            "[GUARD] Background budget nearly exhausted, forcing emergency stop");
                        self.emergency_stop().await;
                    }
                    self.end_grant();
                }
            }
        }

        self.end_grant();
        tracing::info!(target: "lifecycle", "[GUARD] Stopped");
    }

    async fn handle_signal(&mut self, signal: LifecycleSignal) {
        tracing::info!(target: "lifecycle", "[GUARD] Signal {:?} in state {}",
            signal, self.state_rx.borrow().name());

        match signal {
            LifecycleSignal::FocusLost => {
                if self.state_rx.borrow().accepts_stop() {
                    if let Err(e) = self.controller.request_stop().await {
                        tracing::error!(target: "lifecycle", "[GUARD] Graceful stop failed: {}", e);
                    }
                }
            }
            LifecycleSignal::EnteredBackground => {
                if self.session_live() {
                    self.begin_grant();
                }
            }
            LifecycleSignal::WillTerminate => {
                self.emergency_stop().await;
                self.end_grant();
            }
            LifecycleSignal::BecameActive => self.end_grant(),
        }
    }

    fn session_live(&self) -> bool {
        self.state_rx.borrow().is_active()
    }

    async fn emergency_stop(&self) {
        if let Err(e) = self.controller.emergency_stop().await {
            tracing::error!(target: "lifecycle", "[GUARD] Emergency stop failed: {}", e);
        }
    }

    fn begin_grant(&mut self) {
        if self.grant_open {
            return;
        }
        self.budget.begin();
        self.grant_open = true;

        let remaining = self.budget.remaining().unwrap_or(Duration::ZERO);
        let usable = remaining.saturating_sub(self.safety_margin);
        self.deadline = Some(Instant::now() + usable);
        tracing::info!(target: "lifecycle",
            "[GUARD] Background grant opened: remaining={:?}, deadline in {:?}", remaining, usable);
    }

    fn end_grant(&mut self) {
        self.deadline = None;
        if !self.grant_open {
            return;
        }
        self.budget.end();
        self.grant_open = false;
        tracing::info!(target: "lifecycle", "[GUARD] Background grant ended");
    }
}

/// Inbound side of the guard; lifecycle callbacks go through here.
#[derive(Clone)]
pub struct LifecycleHandle {
    signal_tx: mpsc::Sender<SignalMessage>,
}

impl LifecycleHandle {
    /// Delivers `signal` and waits until the guard has acted on it.
    pub async fn notify(&self, signal: LifecycleSignal) -> Result<(), RecorderError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.signal_tx
            .send((signal, ack_tx))
            .await
            .map_err(|_| RecorderError::ControllerUnavailable)?;
        ack_rx
            .await
            .map_err(|_| RecorderError::ControllerUnavailable)
    }
}

/// Maps Unix signals onto lifecycle signals until the guard goes away.
///
/// SIGINT is a focus loss, SIGUSR1 entering the background, SIGTERM and SIGHUP termination.
#[cfg(unix)]
pub async fn forward_unix_signals(handle: LifecycleHandle) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        let signal = tokio::select! {
            _ = sigint.recv() => LifecycleSignal::FocusLost,
            _ = sigusr1.recv() => LifecycleSignal::EnteredBackground,
            _ = sigterm.recv() => LifecycleSignal::WillTerminate,
            _ = sighup.recv() => LifecycleSignal::WillTerminate,
        };

        tracing::info!(target: "lifecycle", "[SIGNALS] Forwarding {:?}", signal);
        if handle.notify(signal).await.is_err() {
            break;
        }
    }

    Ok(())
}

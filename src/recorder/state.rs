//! Pure state machine for the segmented recording lifecycle.
//!
//! This module implements the state machine as a pure function:
//! `(State, Event) -> (NewState, Vec<SideEffect>)`
//!
//! Invalid transitions return the current state with empty effects. Timer ticks and late
//! finalize callbacks therefore never need to be filtered by the caller.

use tokio::time::Instant;

use super::errors::RecorderError;

/// Recording state machine.
///
/// Each variant carries only the data relevant to that state. At most one target is being
/// finalized at any time, and only `Rotating` and `Stopping` have one.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingState {
    /// No session, ready to start.
    Idle,

    /// Authorization and pipeline bring-up in progress.
    Starting { requested_at: Instant },

    /// Writing into target `segment`.
    Recording { started_at: Instant, segment: u32 },

    /// Target `finalizing` is being closed; the next one opens when it completes.
    Rotating {
        started_at: Instant,
        finalizing: u32,
        stop_requested: bool,
    },

    /// The last target is being closed.
    Stopping { started_at: Instant, finalizing: u32 },

    /// Session over. `error` is set when it ended abnormally.
    Stopped { error: Option<RecorderError> },
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

impl RecordingState {
    /// True while a session owns the capture source.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RecordingState::Starting { .. }
                | RecordingState::Recording { .. }
                | RecordingState::Rotating { .. }
                | RecordingState::Stopping { .. }
        )
    }

    /// True while a graceful stop would still change something.
    pub fn accepts_stop(&self) -> bool {
        matches!(
            self,
            RecordingState::Starting { .. }
                | RecordingState::Recording { .. }
                | RecordingState::Rotating { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Starting { .. } => "starting",
            RecordingState::Recording { .. } => "recording",
            RecordingState::Rotating { .. } => "rotating",
            RecordingState::Stopping { .. } => "stopping",
            RecordingState::Stopped { .. } => "stopped",
        }
    }

    /// Sequence number of the target currently being written, if any.
    pub fn current_segment(&self) -> Option<u32> {
        match self {
            RecordingState::Recording { segment, .. } => Some(*segment),
            RecordingState::Rotating { finalizing, .. } => Some(finalizing + 1),
            RecordingState::Stopping { finalizing, .. } => Some(*finalizing),
            _ => None,
        }
    }

    /// Sequence number of the target awaiting its finalize callback, if any.
    pub fn finalizing(&self) -> Option<u32> {
        match self {
            RecordingState::Rotating { finalizing, .. }
            | RecordingState::Stopping { finalizing, .. } => Some(*finalizing),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<Instant> {
        match self {
            RecordingState::Recording { started_at, .. }
            | RecordingState::Rotating { started_at, .. }
            | RecordingState::Stopping { started_at, .. } => Some(*started_at),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RecorderError> {
        match self {
            RecordingState::Stopped { error } => error.as_ref(),
            _ => None,
        }
    }
}

/// Events that can trigger state transitions.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// User requested a new session.
    StartRequested,

    /// Authorization and pipeline configuration succeeded.
    PipelineReady,

    /// Authorization or pipeline configuration failed or timed out.
    PipelineFailed { error: RecorderError },

    /// Segment duration elapsed (or a manual rotation was requested).
    RotationTick,

    /// The capture source finished closing target `sequence`.
    SegmentFinalized { sequence: u32 },

    /// Graceful stop from the user or the lifecycle guard.
    StopRequested,

    /// Forced stop: no waiting on the capture source.
    EmergencyStopRequested,

    /// Target `sequence` did not finalize within the deadline.
    FinalizeTimedOut { sequence: u32 },

    /// The capture source failed mid-session.
    CaptureFailed { error: RecorderError },

    /// Clear a stopped session.
    Reset,
}

/// Side effects triggered by state transitions.
///
/// These are returned by `transition()` and executed by the controller in order.
/// The state machine itself never performs I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Authorize and configure the capture pipeline off the actor.
    BringUpPipeline,

    /// Abandon an in-flight bring-up.
    CancelBringUp,

    /// Start writing into a new staging target.
    OpenTarget { sequence: u32 },

    ArmRotationTimer,

    CancelRotationTimer,

    /// Ask the capture source to close a target and arm the finalize watchdog.
    FinalizeTarget { sequence: u32 },

    /// Hand a finalized target to the segment store.
    CommitTarget { sequence: u32 },

    /// Stop the capture source without waiting for finalization.
    ForceStopCapture,

    /// Commit whatever unfinished targets left on disk.
    CommitOutstanding,

    /// Resolve a pending `start()` with its report.
    AcknowledgeStart,

    /// Resolve a pending `start()` with an error.
    RejectStart { error: RecorderError },

    /// Close out the session and resolve pending `stop()` calls.
    CompleteStop,

    /// Broadcast the new state.
    EmitStateChange { state: RecordingState },
}

/// Pure state transition function.
///
/// Returns the new state and any side effects to execute.
/// Invalid transitions return the current state with an empty effect list.
pub fn transition(state: RecordingState, event: SessionEvent) -> (RecordingState, Vec<SideEffect>) {
    match (&state, event) {
        // Idle/Stopped + StartRequested -> Starting
        (RecordingState::Idle | RecordingState::Stopped { .. }, SessionEvent::StartRequested) => {
            let new_state = RecordingState::Starting {
                requested_at: Instant::now(),
            };
            let effects = vec![
                SideEffect::BringUpPipeline,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Starting + PipelineReady -> Recording(1)
        (RecordingState::Starting { .. }, SessionEvent::PipelineReady) => {
            let new_state = RecordingState::Recording {
                started_at: Instant::now(),
                segment: 1,
            };
            let effects = vec![
                SideEffect::OpenTarget { sequence: 1 },
                SideEffect::ArmRotationTimer,
                SideEffect::AcknowledgeStart,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Starting + PipelineFailed/CaptureFailed -> Stopped(error)
        (
            RecordingState::Starting { .. },
            SessionEvent::PipelineFailed { error } | SessionEvent::CaptureFailed { error },
        ) => {
            let new_state = RecordingState::Stopped {
                error: Some(error.clone()),
            };
            let effects = vec![
                SideEffect::ForceStopCapture,
                SideEffect::RejectStart { error },
                SideEffect::CompleteStop,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Starting + StopRequested -> Idle (cancel before the pipeline is up)
        (RecordingState::Starting { .. }, SessionEvent::StopRequested) => {
            let new_state = RecordingState::Idle;
            let effects = vec![
                SideEffect::CancelBringUp,
                SideEffect::RejectStart {
                    error: RecorderError::Cancelled,
                },
                SideEffect::CompleteStop,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Starting + EmergencyStopRequested -> Stopped
        (RecordingState::Starting { .. }, SessionEvent::EmergencyStopRequested) => {
            let new_state = RecordingState::Stopped { error: None };
            let effects = vec![
                SideEffect::CancelBringUp,
                SideEffect::ForceStopCapture,
                SideEffect::RejectStart {
                    error: RecorderError::Cancelled,
                },
                SideEffect::CompleteStop,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Recording + RotationTick -> Rotating
        (RecordingState::Recording { started_at, segment }, SessionEvent::RotationTick) => {
            let new_state = RecordingState::Rotating {
                started_at: *started_at,
                finalizing: *segment,
                stop_requested: false,
            };
            let effects = vec![
                SideEffect::FinalizeTarget { sequence: *segment },
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Rotating + SegmentFinalized -> Recording(next), or Stopping(next) if stop was requested
        (
            RecordingState::Rotating {
                started_at,
                finalizing,
                stop_requested,
            },
            SessionEvent::SegmentFinalized { sequence },
        ) if sequence == *finalizing => {
            let next = finalizing + 1;
            let mut effects = vec![
                SideEffect::CommitTarget {
                    sequence: *finalizing,
                },
                SideEffect::OpenTarget { sequence: next },
            ];

            let new_state = if *stop_requested {
                effects.push(SideEffect::FinalizeTarget { sequence: next });
                RecordingState::Stopping {
                    started_at: *started_at,
                    finalizing: next,
                }
            } else {
                RecordingState::Recording {
                    started_at: *started_at,
                    segment: next,
                }
            };
            effects.push(SideEffect::EmitStateChange {
                state: new_state.clone(),
            });
            (new_state, effects)
        }

        // Recording + StopRequested -> Stopping
        (RecordingState::Recording { started_at, segment }, SessionEvent::StopRequested) => {
            let new_state = RecordingState::Stopping {
                started_at: *started_at,
                finalizing: *segment,
            };
            let effects = vec![
                SideEffect::CancelRotationTimer,
                SideEffect::FinalizeTarget { sequence: *segment },
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Rotating + StopRequested -> Rotating (stop once the in-flight finalize lands)
        (
            RecordingState::Rotating {
                started_at,
                finalizing,
                stop_requested: false,
            },
            SessionEvent::StopRequested,
        ) => {
            let new_state = RecordingState::Rotating {
                started_at: *started_at,
                finalizing: *finalizing,
                stop_requested: true,
            };
            let effects = vec![
                SideEffect::CancelRotationTimer,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Stopping + SegmentFinalized -> Stopped
        (RecordingState::Stopping { finalizing, .. }, SessionEvent::SegmentFinalized { sequence })
            if sequence == *finalizing =>
        {
            let new_state = RecordingState::Stopped { error: None };
            let effects = vec![
                SideEffect::CommitTarget {
                    sequence: *finalizing,
                },
                SideEffect::CompleteStop,
                SideEffect::EmitStateChange {
                    state: new_state.clone(),
                },
            ];
            (new_state, effects)
        }

        // Active + EmergencyStopRequested -> Stopped
        (
            RecordingState::Recording { .. }
            | RecordingState::Rotating { .. }
            | RecordingState::Stopping { .. },
            SessionEvent::EmergencyStopRequested,
        ) => emergency(None),

        // Rotating/Stopping + FinalizeTimedOut -> Stopped(error)
        (
            RecordingState::Rotating { finalizing, .. } | RecordingState::Stopping { finalizing, .. },
            SessionEvent::FinalizeTimedOut { sequence },
        ) if sequence == *finalizing => emergency(Some(RecorderError::FinalizeFailed(format!(
            "segment {} did not finalize in time",
            sequence
        )))),

        // Active + CaptureFailed -> Stopped(error)
        (
            RecordingState::Recording { .. }
            | RecordingState::Rotating { .. }
            | RecordingState::Stopping { .. },
            SessionEvent::CaptureFailed { error },
        ) => emergency(Some(error)),

        // Stopped + Reset -> Idle
        (RecordingState::Stopped { .. }, SessionEvent::Reset) => {
            let new_state = RecordingState::Idle;
            let effects = vec![SideEffect::EmitStateChange {
                state: new_state.clone(),
            }];
            (new_state, effects)
        }

        // Invalid transition: return current state with no effects
        _ => (state, vec![]),
    }
}

/// Forced stop: the rotation timer goes first, then the capture source, then whatever is on disk.
fn emergency(error: Option<RecorderError>) -> (RecordingState, Vec<SideEffect>) {
    let new_state = RecordingState::Stopped {
        error: error.clone(),
    };
    let effects = vec![
        SideEffect::CancelRotationTimer,
        SideEffect::ForceStopCapture,
        SideEffect::CommitOutstanding,
        SideEffect::RejectStart {
            error: error.unwrap_or(RecorderError::Cancelled),
        },
        SideEffect::CompleteStop,
        SideEffect::EmitStateChange {
            state: new_state.clone(),
        },
    ];
    (new_state, effects)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(segment: u32) -> RecordingState {
        RecordingState::Recording {
            started_at: Instant::now(),
            segment,
        }
    }

    fn rotating(finalizing: u32, stop_requested: bool) -> RecordingState {
        RecordingState::Rotating {
            started_at: Instant::now(),
            finalizing,
            stop_requested,
        }
    }

    #[test]
    fn test_idle_to_starting() {
        let (new_state, effects) = transition(RecordingState::Idle, SessionEvent::StartRequested);

        assert!(matches!(new_state, RecordingState::Starting { .. }));
        assert_eq!(effects.len(), 2);
        assert!(matches!(effects[0], SideEffect::BringUpPipeline));
        assert!(matches!(effects[1], SideEffect::EmitStateChange { .. }));
    }

    #[test]
    fn test_stopped_session_can_start_again() {
        let state = RecordingState::Stopped { error: None };
        let (new_state, _) = transition(state, SessionEvent::StartRequested);
        assert!(matches!(new_state, RecordingState::Starting { .. }));
    }

    #[test]
    fn test_starting_to_recording_opens_first_target() {
        let state = RecordingState::Starting {
            requested_at: Instant::now(),
        };
        let (new_state, effects) = transition(state, SessionEvent::PipelineReady);

        assert!(matches!(new_state, RecordingState::Recording { segment: 1, .. }));
        assert_eq!(effects[0], SideEffect::OpenTarget { sequence: 1 });
        assert_eq!(effects[1], SideEffect::ArmRotationTimer);
        assert_eq!(effects[2], SideEffect::AcknowledgeStart);
    }

    #[test]
    fn test_pipeline_failure_rejects_start() {
        let state = RecordingState::Starting {
            requested_at: Instant::now(),
        };
        let error = RecorderError::PermissionDenied("camera".to_string());
        let (new_state, effects) = transition(
            state,
            SessionEvent::PipelineFailed {
                error: error.clone(),
            },
        );

        assert_eq!(new_state.error(), Some(&error));
        assert!(effects.contains(&SideEffect::RejectStart { error }));
    }

    #[test]
    fn test_starting_can_be_cancelled() {
        let state = RecordingState::Starting {
            requested_at: Instant::now(),
        };
        let (new_state, effects) = transition(state, SessionEvent::StopRequested);

        assert_eq!(new_state, RecordingState::Idle);
        assert_eq!(effects[0], SideEffect::CancelBringUp);
        assert!(effects.contains(&SideEffect::RejectStart {
            error: RecorderError::Cancelled
        }));
    }

    #[test]
    fn test_tick_starts_rotation() {
        let (new_state, effects) = transition(recording(3), SessionEvent::RotationTick);

        assert!(matches!(
            new_state,
            RecordingState::Rotating {
                finalizing: 3,
                stop_requested: false,
                ..
            }
        ));
        assert_eq!(effects[0], SideEffect::FinalizeTarget { sequence: 3 });
    }

    #[test]
    fn test_tick_while_rotating_is_ignored() {
        let state = rotating(2, false);
        let (new_state, effects) = transition(state.clone(), SessionEvent::RotationTick);

        assert_eq!(new_state, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_rotation_completes_commit_before_open() {
        let (new_state, effects) =
            transition(rotating(2, false), SessionEvent::SegmentFinalized { sequence: 2 });

        assert!(matches!(new_state, RecordingState::Recording { segment: 3, .. }));
        assert_eq!(effects[0], SideEffect::CommitTarget { sequence: 2 });
        assert_eq!(effects[1], SideEffect::OpenTarget { sequence: 3 });
    }

    #[test]
    fn test_stop_while_rotating_finalizes_next_target_too() {
        let (state, effects) = transition(rotating(1, false), SessionEvent::StopRequested);
        assert!(matches!(
            state,
            RecordingState::Rotating {
                stop_requested: true,
                ..
            }
        ));
        assert_eq!(effects[0], SideEffect::CancelRotationTimer);
        assert_eq!(effects.len(), 2);

        let (state, effects) = transition(state, SessionEvent::SegmentFinalized { sequence: 1 });
        assert!(matches!(state, RecordingState::Stopping { finalizing: 2, .. }));
        assert_eq!(effects[0], SideEffect::CommitTarget { sequence: 1 });
        assert_eq!(effects[1], SideEffect::OpenTarget { sequence: 2 });
        assert_eq!(effects[2], SideEffect::FinalizeTarget { sequence: 2 });

        let (state, effects) = transition(state, SessionEvent::SegmentFinalized { sequence: 2 });
        assert_eq!(state, RecordingState::Stopped { error: None });
        assert!(effects.contains(&SideEffect::CommitTarget { sequence: 2 }));
        assert!(effects.contains(&SideEffect::CompleteStop));
    }

    #[test]
    fn test_stop_cancels_timer_first() {
        let (new_state, effects) = transition(recording(4), SessionEvent::StopRequested);

        assert!(matches!(new_state, RecordingState::Stopping { finalizing: 4, .. }));
        assert_eq!(effects[0], SideEffect::CancelRotationTimer);
        assert_eq!(effects[1], SideEffect::FinalizeTarget { sequence: 4 });
    }

    #[test]
    fn test_emergency_stop_cancels_timer_then_forces_capture() {
        for state in [recording(1), rotating(1, false), rotating(1, true)] {
            let (new_state, effects) = transition(state, SessionEvent::EmergencyStopRequested);

            assert_eq!(new_state, RecordingState::Stopped { error: None });
            assert_eq!(effects[0], SideEffect::CancelRotationTimer);
            assert_eq!(effects[1], SideEffect::ForceStopCapture);
            assert_eq!(effects[2], SideEffect::CommitOutstanding);
        }
    }

    #[test]
    fn test_emergency_stop_from_idle_is_noop() {
        let (new_state, effects) = transition(RecordingState::Idle, SessionEvent::EmergencyStopRequested);

        assert_eq!(new_state, RecordingState::Idle);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_late_finalize_after_stop_is_ignored() {
        let state = RecordingState::Stopped { error: None };
        let (new_state, effects) =
            transition(state.clone(), SessionEvent::SegmentFinalized { sequence: 1 });

        assert_eq!(new_state, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_stale_finalize_sequence_is_ignored() {
        let state = rotating(5, false);
        let (new_state, effects) =
            transition(state.clone(), SessionEvent::SegmentFinalized { sequence: 4 });

        assert_eq!(new_state, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_finalize_timeout_escalates() {
        let (new_state, effects) =
            transition(rotating(2, false), SessionEvent::FinalizeTimedOut { sequence: 2 });

        assert!(matches!(
            new_state.error(),
            Some(RecorderError::FinalizeFailed(_))
        ));
        assert!(effects.contains(&SideEffect::ForceStopCapture));
    }

    #[test]
    fn test_finalize_timeout_for_committed_target_is_ignored() {
        let (new_state, effects) = transition(recording(3), SessionEvent::FinalizeTimedOut { sequence: 2 });

        assert!(matches!(new_state, RecordingState::Recording { segment: 3, .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn test_capture_failure_stops_with_error() {
        let error = RecorderError::Capture("device lost".to_string());
        let (new_state, effects) = transition(
            recording(2),
            SessionEvent::CaptureFailed {
                error: error.clone(),
            },
        );

        assert_eq!(new_state.error(), Some(&error));
        assert!(effects.contains(&SideEffect::CommitOutstanding));
    }

    #[test]
    fn test_stopped_to_idle_on_reset() {
        let state = RecordingState::Stopped {
            error: Some(RecorderError::Cancelled),
        };
        let (new_state, effects) = transition(state, SessionEvent::Reset);

        assert_eq!(new_state, RecordingState::Idle);
        assert!(effects
            .iter()
            .any(|e| matches!(e, SideEffect::EmitStateChange { .. })));
    }

    #[test]
    fn test_current_segment_tracks_next_target_while_rotating() {
        assert_eq!(rotating(2, false).current_segment(), Some(3));
        assert_eq!(recording(2).current_segment(), Some(2));
        assert_eq!(RecordingState::Idle.current_segment(), None);
    }
}

pub mod coordinator;
pub mod errors;
pub mod lifecycle;
pub mod location;
pub mod session;
pub mod state;
pub mod types;

pub use coordinator::{ControllerDeps, ControllerHandle, SegmentationController};
pub use errors::RecorderError;
pub use lifecycle::{ExecutionBudget, FixedBudget, LifecycleGuard, LifecycleHandle, LifecycleSignal};
pub use location::{LocationLog, LocationSource};
pub use state::RecordingState;
pub use types::{
    ControllerTiming, PresentationMode, RecordingStatus, SessionConfig, SessionSummary, StartReport,
};

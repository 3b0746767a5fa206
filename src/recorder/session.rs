//! Per-session bookkeeping owned by the controller actor.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::time::Instant;

use super::types::SessionConfig;
use crate::capture::{ResolutionPreset, TargetHandle};
use crate::store::disk::DiskSpaceSnapshot;
use crate::store::RecordingEntry;

/// Where a target is in its life. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPhase {
    Active,
    Finalizing,
    Committed,
    Discarded,
}

impl TargetPhase {
    pub fn is_settled(&self) -> bool {
        matches!(self, TargetPhase::Committed | TargetPhase::Discarded)
    }

    fn rank(&self) -> u8 {
        match self {
            TargetPhase::Active => 0,
            TargetPhase::Finalizing => 1,
            TargetPhase::Committed | TargetPhase::Discarded => 2,
        }
    }
}

/// One output file of the session.
#[derive(Debug, Clone)]
pub struct SegmentTarget {
    pub sequence: u32,
    pub handle: TargetHandle,
    pub staging_path: PathBuf,
    pub file_name: String,
    pub opened_at: Instant,
    pub finalize_requested_at: Option<Instant>,
    phase: TargetPhase,
}

impl SegmentTarget {
    pub fn new(
        sequence: u32,
        handle: TargetHandle,
        staging_path: PathBuf,
        file_name: String,
        opened_at: Instant,
    ) -> Self {
        Self {
            sequence,
            handle,
            staging_path,
            file_name,
            opened_at,
            finalize_requested_at: None,
            phase: TargetPhase::Active,
        }
    }

    pub fn phase(&self) -> TargetPhase {
        self.phase
    }

    /// Moves the target forward. Returns false (and leaves the phase alone) for a backward or
    /// sideways move.
    pub fn advance(&mut self, next: TargetPhase) -> bool {
        if next.rank() <= self.phase.rank() {
            tracing::warn!(target: "recorder",
                "[SESSION] Refusing phase change {:?} -> {:?} for segment {}",
                self.phase, next, self.sequence);
            return false;
        }
        if next == TargetPhase::Finalizing {
            self.finalize_requested_at = Some(Instant::now());
        }
        self.phase = next;
        true
    }
}

/// State of one recording session, from `start()` until stop completes.
pub struct RecordingSession {
    pub id: String,
    pub config: SessionConfig,
    pub preset: ResolutionPreset,
    pub preset_fell_back: bool,
    pub disk: Option<DiskSpaceSnapshot>,
    started_wall: DateTime<Utc>,
    started_at: Instant,
    targets: BTreeMap<u32, SegmentTarget>,
    pub committed: Vec<RecordingEntry>,
    pub discarded: usize,
}

impl RecordingSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            preset: config.preset,
            preset_fell_back: false,
            disk: None,
            config,
            started_wall: Utc::now(),
            started_at: Instant::now(),
            targets: BTreeMap::new(),
            committed: Vec::new(),
            discarded: 0,
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Wall-clock time corresponding to `instant`, anchored at session start.
    ///
    /// Derived from the monotonic clock so segment timestamps never overlap even if the system
    /// clock jumps mid-session.
    pub fn wall_clock_at(&self, instant: Instant) -> DateTime<Utc> {
        let offset = instant.saturating_duration_since(self.started_at);
        chrono::Duration::from_std(offset)
            .map(|d| self.started_wall + d)
            .unwrap_or(self.started_wall)
    }

    /// `rec_<YYYYMMDD-HHMMSS>_<session8>_<seq:04>.<ext>`
    pub fn file_name(&self, sequence: u32) -> String {
        let short_id: String = self.id.chars().filter(|c| *c != '-').take(8).collect();
        format!(
            "rec_{}_{}_{:04}.{}",
            self.started_wall.format("%Y%m%d-%H%M%S"),
            short_id,
            sequence,
            self.config.container
        )
    }

    pub fn insert_target(&mut self, target: SegmentTarget) {
        self.targets.insert(target.sequence, target);
    }

    pub fn target(&self, sequence: u32) -> Option<&SegmentTarget> {
        self.targets.get(&sequence)
    }

    pub fn target_mut(&mut self, sequence: u32) -> Option<&mut SegmentTarget> {
        self.targets.get_mut(&sequence)
    }

    /// Targets that have not been committed or discarded, oldest first.
    pub fn outstanding(&self) -> Vec<u32> {
        self.targets
            .values()
            .filter(|t| !t.phase().is_settled())
            .map(|t| t.sequence)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.targets
            .values()
            .filter(|t| t.phase() == TargetPhase::Active)
            .count()
    }

    pub fn finalizing_count(&self) -> usize {
        self.targets
            .values()
            .filter(|t| t.phase() == TargetPhase::Finalizing)
            .count()
    }
}

//! On-disk catalog of committed segments.
//!
//! Layout of the recordings directory:
//! - `<name>.mp4` committed, catalog-visible segments
//! - `.staging/` targets the capture source is still writing (or was, before a crash)
//! - `metadata.json` side table keyed by segment file name
//!
//! The store and the load-time sweep are the only writers of this directory.

pub mod disk;
pub mod integrity;
pub mod metadata;

use crate::shared::errors::StorageError;
use crate::shared::paths::{ensure_dir, staging_dir};
use chrono::{DateTime, Utc};
use disk::{probe_disk_space, DiskSpaceSnapshot};
use integrity::{IntegrityVerifier, Verdict};
use metadata::{GeoPoint, MetadataTable, SegmentMetadata, TrackPoint, METADATA_FILE_NAME};
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

pub const MEDIA_EXTENSIONS: [&str; 4] = ["mp4", "mov", "m4v", "mkv"];

/// A committed, catalog-visible segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub name: String,
    pub path: PathBuf,
    pub sequence: Option<u32>,
    pub duration_secs: f64,
    pub size_bytes: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
    pub address: Option<String>,
    pub location_path: Vec<TrackPoint>,
}

/// A finalized target waiting to become a catalog entry.
#[derive(Debug, Clone)]
pub struct PendingSegment {
    pub source_path: PathBuf,
    pub file_name: String,
    pub sequence: u32,
}

/// Attributes the controller knows about a segment at commit time.
#[derive(Debug, Clone, Default)]
pub struct MediaAttributes {
    pub duration_secs: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
    pub address: Option<String>,
    pub location_path: Vec<TrackPoint>,
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed(RecordingEntry),
    Discarded(Verdict),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedFile {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub kept: usize,
    pub promoted: usize,
    pub rejected: Vec<RejectedFile>,
    pub pruned_metadata: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub deleted: Vec<String>,
    pub failures: Vec<DeleteFailure>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct SegmentStore {
    dir: PathBuf,
    staging: PathBuf,
    verifier: IntegrityVerifier,
    low_disk_bytes: u64,
    catalog: RwLock<Vec<RecordingEntry>>,
    /// Also serializes every mutation of the directory. Lock order: side table, then catalog.
    side_table: Mutex<MetadataTable>,
    loaded: AtomicBool,
    /// Staging names handed to a live session and not yet committed or discarded.
    in_flight: Mutex<HashSet<String>>,
}

impl SegmentStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        verifier: IntegrityVerifier,
        low_disk_bytes: u64,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        let staging = staging_dir(&dir);
        ensure_dir(&dir).map_err(|e| StorageError::directory(format!("{:?}: {}", dir, e)))?;
        ensure_dir(&staging)
            .map_err(|e| StorageError::directory(format!("{:?}: {}", staging, e)))?;

        let side_table = MetadataTable::load(&dir.join(METADATA_FILE_NAME));

        Ok(Self {
            dir,
            staging,
            verifier,
            low_disk_bytes,
            catalog: RwLock::new(Vec::new()),
            side_table: Mutex::new(side_table),
            loaded: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the capture source should write a target named `file_name`.
    pub fn staging_path(&self, file_name: &str) -> PathBuf {
        self.staging.join(file_name)
    }

    /// Hands out a staging path for a live target. The sweep leaves it alone until the
    /// target is committed, discarded or released.
    pub fn reserve_staging(&self, file_name: &str) -> Result<PathBuf, StorageError> {
        validate_name(file_name)?;
        self.lock_in_flight().insert(file_name.to_string());
        Ok(self.staging_path(file_name))
    }

    /// Gives up a reservation whose target was never opened.
    pub fn release_staging(&self, file_name: &str) {
        self.lock_in_flight().remove(file_name);
    }

    pub fn is_in_flight(&self, file_name: &str) -> bool {
        self.lock_in_flight().contains(file_name)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn disk_space(&self) -> Option<DiskSpaceSnapshot> {
        probe_disk_space(&self.dir, self.low_disk_bytes)
    }

    /// Entries sorted newest first; entries without a creation time come last.
    pub fn list_all(&self) -> Vec<RecordingEntry> {
        let mut entries = self.read_catalog().clone();
        sort_newest_first(&mut entries);
        entries
    }

    pub fn get(&self, name: &str) -> Option<RecordingEntry> {
        self.read_catalog().iter().find(|e| e.name == name).cloned()
    }

    /// Moves a finalized target into the catalog.
    ///
    /// The file is fast-checked first; rejected files are deleted and reported as discarded.
    /// The entry is published only after the rename and the side-table write.
    pub fn commit(
        &self,
        pending: &PendingSegment,
        attrs: MediaAttributes,
    ) -> Result<CommitOutcome, StorageError> {
        let outcome =
            validate_name(&pending.file_name).and_then(|()| self.commit_reserved(pending, attrs));
        self.release_staging(&pending.file_name);
        outcome
    }

    fn commit_reserved(
        &self,
        pending: &PendingSegment,
        attrs: MediaAttributes,
    ) -> Result<CommitOutcome, StorageError> {
        let verdict = self.verifier.fast_check(&pending.source_path);
        let Verdict::Valid { size, .. } = verdict else {
            tracing::warn!(target: "store",
                "[STORE] Integrity rejected {}: {}", pending.file_name, verdict.reason());
            if let Err(e) = remove_if_present(&pending.source_path) {
                tracing::warn!(target: "store", "[STORE] Failed to remove rejected file: {}", e);
            }
            return Ok(CommitOutcome::Discarded(verdict));
        };

        let dest = self.dir.join(&pending.file_name);
        let mut table = self.lock_table();

        if pending.source_path != dest {
            fs::rename(&pending.source_path, &dest)?;
        }

        let row = SegmentMetadata {
            location: attrs.location,
            address: attrs.address.clone(),
            location_path: attrs.location_path.clone(),
            created_at: attrs.created_at,
            duration_hint: Some(attrs.duration_secs),
        };
        if let Err(e) = table.upsert(&pending.file_name, row) {
            // The media file is already in place; the next sweep tolerates a missing row.
            tracing::warn!(target: "store",
                "[STORE] Failed to write side table for {}: {}", pending.file_name, e);
        }

        let entry = RecordingEntry {
            name: pending.file_name.clone(),
            path: dest,
            sequence: Some(pending.sequence),
            duration_secs: attrs.duration_secs,
            size_bytes: size,
            created_at: attrs.created_at,
            location: attrs.location,
            address: attrs.address,
            location_path: attrs.location_path,
        };

        let mut catalog = self.write_catalog();
        catalog.retain(|e| e.name != entry.name);
        catalog.push(entry.clone());

        tracing::info!(target: "store",
            "[STORE] Committed {} ({} bytes, {:.1}s)", entry.name, entry.size_bytes, entry.duration_secs);
        Ok(CommitOutcome::Committed(entry))
    }

    /// Removes the media file and its side-table row. A file that is already gone counts as
    /// deleted.
    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;
        let mut table = self.lock_table();

        let path = self.dir.join(name);
        remove_if_present(&path).map_err(|e| StorageError::delete_failed(name, e))?;

        if let Err(e) = table.remove(name) {
            tracing::warn!(target: "store", "[STORE] Failed to prune side-table row {}: {}", name, e);
        }
        self.write_catalog().retain(|e| e.name != name);

        tracing::info!(target: "store", "[STORE] Deleted {}", name);
        Ok(())
    }

    /// Deletes every catalog entry, collecting failures instead of stopping at the first one.
    pub fn delete_all(&self) -> DeleteReport {
        let names: Vec<String> = self.read_catalog().iter().map(|e| e.name.clone()).collect();
        let mut report = DeleteReport::default();

        for name in names {
            match self.delete(&name) {
                Ok(()) => report.deleted.push(name),
                Err(e) => {
                    tracing::warn!(target: "store", "[STORE] {}", e);
                    report.failures.push(DeleteFailure {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !report.is_complete() {
            tracing::warn!(target: "store",
                "[STORE] delete_all finished with {} failure(s)", report.failures.len());
        }
        report
    }

    /// Runs the integrity sweep and publishes the catalog.
    ///
    /// Files failing the fast check are deleted first; the rest are probed on the blocking pool
    /// and deleted if unplayable. Playable staging leftovers are promoted into the directory.
    /// Side-table rows without a media file are pruned. Staging files reserved by a live
    /// session are skipped.
    pub async fn load_catalog(&self) -> Result<SweepReport, StorageError> {
        ensure_dir(&self.dir)?;
        ensure_dir(&self.staging)?;

        let mut report = SweepReport::default();
        let published: HashSet<String> =
            self.read_catalog().iter().map(|e| e.name.clone()).collect();

        let mut candidates: Vec<(PathBuf, bool)> = Vec::new();
        let listed = list_media(&self.dir)?
            .into_iter()
            .map(|p| (p, false))
            .chain(list_media(&self.staging)?.into_iter().map(|p| (p, true)))
            .collect::<Vec<_>>();
        // Reservations precede file creation, so a snapshot taken after listing covers every
        // live file that was listed.
        let in_flight = self.lock_in_flight().clone();

        for (path, staged) in listed {
            let name = file_name(&path);
            if staged && in_flight.contains(&name) {
                tracing::debug!(target: "store", "[SWEEP] Skipping live target {}", name);
                continue;
            }
            if !staged && published.contains(&name) {
                continue;
            }
            let verdict = self.verifier.fast_check(&path);
            if verdict.is_valid() {
                candidates.push((path, staged));
            } else if staged && matches!(verdict, Verdict::Missing) {
                continue;
            } else {
                reject(&path, &verdict, &mut report);
            }
        }

        let verifier = self.verifier.clone();
        let checked: Vec<(PathBuf, bool, Verdict)> = tokio::task::spawn_blocking(move || {
            candidates
                .into_iter()
                .map(|(path, staged)| {
                    let verdict = verifier.deep_check_blocking(&path);
                    (path, staged, verdict)
                })
                .collect()
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?;

        let mut table = self.lock_table();
        let mut survivors: Vec<RecordingEntry> = Vec::new();

        for (path, staged, verdict) in checked {
            // A commit may have moved the file while it was being probed.
            if staged && matches!(verdict, Verdict::Missing) {
                continue;
            }
            let Verdict::Valid { size, duration } = verdict else {
                reject(&path, &verdict, &mut report);
                continue;
            };

            let name = file_name(&path);
            let path = if staged {
                let dest = self.dir.join(&name);
                if dest.exists() {
                    let duplicate = Verdict::Corrupted {
                        reason: "duplicate of a committed segment".to_string(),
                    };
                    reject(&path, &duplicate, &mut report);
                    continue;
                }
                fs::rename(&path, &dest)?;
                report.promoted += 1;
                tracing::info!(target: "store", "[SWEEP] Promoted staging leftover {}", name);
                dest
            } else {
                path
            };

            let row = table.get(&name).cloned().unwrap_or_default();
            survivors.push(entry_from_disk(name, path, size, duration, row));
        }

        let mut catalog = self.write_catalog();
        catalog.retain(|e| e.path.exists());
        for entry in survivors {
            if !catalog.iter().any(|e| e.name == entry.name) {
                catalog.push(entry);
            }
        }

        let on_disk: HashSet<String> = catalog.iter().map(|e| e.name.clone()).collect();
        report.pruned_metadata = table.retain(|name| on_disk.contains(name))?;
        report.kept = catalog.len();

        self.loaded.store(true, Ordering::SeqCst);
        tracing::info!(target: "store",
            "[SWEEP] Catalog loaded: kept={}, promoted={}, rejected={}, pruned_metadata={}",
            report.kept, report.promoted, report.rejected.len(), report.pruned_metadata);

        Ok(report)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_table(&self) -> MutexGuard<'_, MetadataTable> {
        self.side_table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_catalog(&self) -> std::sync::RwLockReadGuard<'_, Vec<RecordingEntry>> {
        self.catalog.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_catalog(&self) -> std::sync::RwLockWriteGuard<'_, Vec<RecordingEntry>> {
        self.catalog.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn reject(path: &Path, verdict: &Verdict, report: &mut SweepReport) {
    let name = file_name(path);
    tracing::warn!(target: "store", "[SWEEP] Integrity rejected {}: {}", name, verdict.reason());
    if let Err(e) = remove_if_present(path) {
        tracing::warn!(target: "store", "[SWEEP] Failed to remove {}: {}", name, e);
    }
    report.rejected.push(RejectedFile {
        name,
        reason: verdict.reason(),
    });
}

fn entry_from_disk(
    name: String,
    path: PathBuf,
    size: u64,
    probed_duration: Option<f64>,
    row: SegmentMetadata,
) -> RecordingEntry {
    let created_at = row.created_at.or_else(|| {
        fs::metadata(&path)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .ok()
            .map(DateTime::<Utc>::from)
    });

    RecordingEntry {
        sequence: parse_sequence(&name),
        duration_secs: probed_duration.or(row.duration_hint).unwrap_or(0.0),
        size_bytes: size,
        created_at,
        location: row.location,
        address: row.address,
        location_path: row.location_path,
        name,
        path,
    }
}

/// Whether the sweep recognizes `ext` (without the dot) as a segment file.
pub fn is_media_extension(ext: &str) -> bool {
    MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

fn list_media(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let is_media = path
            .extension()
            .and_then(|e| e.to_str())
            .map(is_media_extension)
            .unwrap_or(false);
        if is_media {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains('/')
        && !name.contains('\\')
        && name != METADATA_FILE_NAME;
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

/// Sequence number encoded as the last `_`-separated field of the file stem.
pub fn parse_sequence(name: &str) -> Option<u32> {
    Path::new(name)
        .file_stem()?
        .to_str()?
        .rsplit('_')
        .next()?
        .parse()
        .ok()
}

pub fn sort_newest_first(entries: &mut [RecordingEntry]) {
    entries.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(a_at), Some(b_at)) => b_at.cmp(&a_at),
        (Some(_), None) => CmpOrdering::Less,
        (None, Some(_)) => CmpOrdering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
}

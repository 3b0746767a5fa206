use serde::Serialize;
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Advisory free-space reading taken before a session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskSpaceSnapshot {
    pub available_bytes: u64,
    pub is_low: bool,
}

/// Reads free space for the filesystem holding `dir`.
/// Returns `None` when no mounted disk contains it.
pub fn probe_disk_space(dir: &Path, low_threshold_bytes: u64) -> Option<DiskSpaceSnapshot> {
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<(PathBuf, u64)> = disks
        .list()
        .iter()
        .map(|d| (d.mount_point().to_path_buf(), d.available_space()))
        .collect();

    let Some(available_bytes) = available_on(&dir, &mounts) else {
        tracing::debug!(target: "store", "[DISK] No mounted disk holds {:?}", dir);
        return None;
    };

    Some(DiskSpaceSnapshot {
        available_bytes,
        is_low: available_bytes < low_threshold_bytes,
    })
}

/// Free bytes of the mount with the longest mount point containing `dir`.
fn available_on(dir: &Path, mounts: &[(PathBuf, u64)]) -> Option<u64> {
    mounts
        .iter()
        .filter(|(mount, _)| dir.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
        .map(|(_, available)| *available)
}

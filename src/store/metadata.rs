//! Side table of per-segment attributes that do not live inside the media container.
//!
//! The table is a single JSON file keyed by segment file name. Every field is optional so older
//! and newer versions of the file load without errors.

use crate::shared::errors::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const METADATA_FILE_NAME: &str = "metadata.json";
const METADATA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }
}

/// One sample of the path travelled while a segment was recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location_path: Vec<TrackPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_hint: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, SegmentMetadata>,
}

/// In-memory copy of the side table plus the path it persists to.
#[derive(Debug)]
pub struct MetadataTable {
    path: PathBuf,
    entries: BTreeMap<String, SegmentMetadata>,
}

impl MetadataTable {
    /// Loads the table at `path`. A missing file is an empty table; an unreadable one is logged
    /// and treated as empty so the media files stay reachable.
    pub fn load(path: &Path) -> Self {
        let entries = match read_table(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(target: "store", "[METADATA] Ignoring unreadable side table {:?}: {}", path, e);
                BTreeMap::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, name: &str) -> Option<&SegmentMetadata> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn upsert(&mut self, name: &str, metadata: SegmentMetadata) -> Result<(), StorageError> {
        self.entries.insert(name.to_string(), metadata);
        self.save()
    }

    /// Removes the row for `name`. Returns whether a row existed.
    pub fn remove(&mut self, name: &str) -> Result<bool, StorageError> {
        let existed = self.entries.remove(name).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    /// Drops every row whose key fails `keep`. Returns how many rows were pruned.
    pub fn retain<F>(&mut self, mut keep: F) -> Result<usize, StorageError>
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|name, _| keep(name));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            self.save()?;
        }
        Ok(pruned)
    }

    /// Writes to a temp file and renames it over the table.
    fn save(&self) -> Result<(), StorageError> {
        let file = MetadataFile {
            version: METADATA_VERSION,
            entries: self.entries.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<BTreeMap<String, SegmentMetadata>, StorageError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path)?;
    let file: MetadataFile = serde_json::from_str(&content)?;
    Ok(file.entries)
}

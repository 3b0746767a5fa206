//! Location data attached to committed segments.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::store::metadata::{GeoPoint, TrackPoint};

pub const DEFAULT_LOG_CAPACITY: usize = 4096;

/// Supplies position data for segment tagging. Calls happen on the controller actor and must
/// return quickly.
pub trait LocationSource: Send + Sync {
    fn current_fix(&self) -> Option<GeoPoint>;

    /// Samples recorded inside `[from, to]`, oldest first.
    fn track_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<TrackPoint>;

    fn reverse_geocode(&self, point: &GeoPoint) -> Option<String>;
}

/// Bounded in-memory location history fed by the host.
pub struct LocationLog {
    capacity: usize,
    inner: Mutex<LogInner>,
}

#[derive(Default)]
struct LogInner {
    samples: VecDeque<TrackPoint>,
    last_fix: Option<GeoPoint>,
    address: Option<String>,
}

impl LocationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(LogInner::default()),
        }
    }

    /// Records a fix. The oldest sample is dropped once the log is full.
    pub fn record(&self, point: GeoPoint, at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.samples.len() == self.capacity {
            inner.samples.pop_front();
        }
        inner.samples.push_back(TrackPoint {
            latitude: point.latitude,
            longitude: point.longitude,
            timestamp: at,
        });
        inner.last_fix = Some(point);
    }

    /// Address for the latest fix, as resolved by the host's geocoder.
    pub fn set_address(&self, address: Option<String>) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).address = address;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocationLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LocationSource for LocationLog {
    fn current_fix(&self) -> Option<GeoPoint> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).last_fix
    }

    fn track_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<TrackPoint> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .samples
            .iter()
            .filter(|p| p.timestamp >= from && p.timestamp <= to)
            .copied()
            .collect()
    }

    fn reverse_geocode(&self, _point: &GeoPoint) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .address
            .clone()
    }
}

use chrono::{DateTime, Utc};
use geo_types::Point;
use trip_logger_lib::{trip::{TripRecord, TripStatus}, waypoint::Waypoint};

use crate::StoreError;

/// Partial update of a trip record. `None` fields are left untouched.
///
/// The mutable columns only ever move from unset to set over a trip's
/// life, so the store can apply a patch as a single COALESCE update.
#[derive(Debug, Clone, Default)]
pub struct TripPatch {
    pub updated_at: Option<DateTime<Utc>>,
    pub status: Option<TripStatus>,
    pub end_time: Option<DateTime<Utc>>,
    pub end_location: Option<Point>,
    pub waypoints: Option<Vec<Waypoint>>,
    pub total_distance_km: Option<f64>,
    pub total_duration_secs: Option<i64>,
    pub paused_secs: Option<i64>,
}

impl TripPatch {
    /// The full mutable content of an in-progress record, as written by
    /// the auto-save coordinator.
    pub fn snapshot_of(record: &TripRecord) -> Self {
        Self {
            updated_at: Some(record.updated_at),
            status: Some(record.status),
            end_time: record.end_time,
            end_location: record.end_location,
            waypoints: Some(record.waypoints.clone()),
            total_distance_km: record.total_distance_km,
            total_duration_secs: record.total_duration_secs,
            paused_secs: Some(record.paused_secs),
        }
    }
}

/// Durable keyed storage for trip records.
///
/// Every operation is atomic per record; no multi-record transactions are
/// assumed by callers.
#[async_trait::async_trait]
pub trait TripStore: Send + Sync {
    /// Insert a fresh record and return the id the store assigned.
    async fn create(&self, record: &TripRecord) -> Result<i64, StoreError>;

    async fn get(&self, trip_id: i64) -> Result<TripRecord, StoreError>;

    async fn update(&self, trip_id: i64, patch: TripPatch) -> Result<(), StoreError>;

    async fn delete(&self, trip_id: i64) -> Result<(), StoreError>;

    /// Records still marked Active, i.e. trips a prior run never closed
    /// out. Used by startup recovery.
    async fn query_active(&self) -> Result<Vec<TripRecord>, StoreError>;
}

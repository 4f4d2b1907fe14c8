use chrono::{DateTime, NaiveDate, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlx")]
use sqlx::{prelude::*, sqlite::SqliteRow};

use super::waypoint::Waypoint;

/// Lifecycle status of a trip record.
///
/// `Completed` and `Cancelled` are terminal: a record in either state is
/// never mutated or transitioned again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripStatus {
    Active,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Active => "active",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TripStatus::Active),
            "completed" => Some(TripStatus::Completed),
            "cancelled" => Some(TripStatus::Cancelled),
            _ => None,
        }
    }
}

/// The persisted representation of one driving session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripRecord {
    pub trip_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub trip_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TripStatus,
    pub start_location: Point,
    pub end_location: Option<Point>,
    pub waypoints: Vec<Waypoint>,
    pub total_distance_km: Option<f64>,
    pub total_duration_secs: Option<i64>,
    /// Cumulative pause time, persisted so a recovered session can
    /// reproduce the pause-aware elapsed clock.
    pub paused_secs: i64,
}

impl TripRecord {
    /// A fresh in-progress record. The store assigns the real id on insert.
    pub fn begin(start_time: DateTime<Utc>, start_location: Point) -> Self {
        Self {
            trip_id: 0,
            created_at: start_time,
            updated_at: start_time,
            trip_date: start_time.date_naive(),
            start_time,
            end_time: None,
            status: TripStatus::Active,
            start_location,
            end_location: None,
            waypoints: Vec::new(),
            total_distance_km: None,
            total_duration_secs: None,
            paused_secs: 0,
        }
    }

    pub fn waypoints_blob(&self) -> Vec<u8> {
        bincode::serialize(&self.waypoints).unwrap()
    }

    pub fn waypoints_from_blob(bytes: &[u8]) -> Result<Vec<Waypoint>, &'static str> {
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        bincode::deserialize(bytes).map_err(|_| "Failed to deserialize waypoint blob")
    }
}

#[cfg(feature = "sqlx")]
impl FromRow<'_, SqliteRow> for TripRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let status_text: String = row.get(6);
        let status = TripStatus::parse(&status_text).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: format!("unknown trip status: {status_text}").into(),
        })?;

        let blob: Vec<u8> = row.get(11);
        let waypoints = TripRecord::waypoints_from_blob(&blob).map_err(|e| sqlx::Error::ColumnDecode {
            index: "waypoints".into(),
            source: e.into(),
        })?;

        let end_location = match (row.get::<Option<f64>, _>(9), row.get::<Option<f64>, _>(10)) {
            (Some(lat), Some(lon)) => Some(Point::new(lon, lat)),
            _ => None,
        };

        Ok(Self {
            trip_id: row.get(0),
            created_at: row.get(1),
            updated_at: row.get(2),
            trip_date: row.get(3),
            start_time: row.get(4),
            end_time: row.get(5),
            status,
            start_location: Point::new(row.get::<f64, _>(8), row.get::<f64, _>(7)),
            end_location,
            waypoints,
            total_distance_km: row.get(12),
            total_duration_secs: row.get(13),
            paused_secs: row.get(14),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waypoint::WaypointKind;
    use chrono::TimeZone;

    #[test]
    fn begin_is_active_with_empty_track() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let trip = TripRecord::begin(t0, Point::new(139.7671, 35.6812));
        assert_eq!(trip.status, TripStatus::Active);
        assert_eq!(trip.trip_date, t0.date_naive());
        assert!(trip.waypoints.is_empty());
        assert_eq!(trip.paused_secs, 0);
    }

    #[test]
    fn waypoint_blob_round_trips() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let mut trip = TripRecord::begin(t0, Point::new(139.7671, 35.6812));
        trip.waypoints.push(Waypoint::new(1, trip.start_location, t0, WaypointKind::Start));

        let blob = trip.waypoints_blob();
        let decoded = TripRecord::waypoints_from_blob(&blob).unwrap();
        assert_eq!(decoded, trip.waypoints);
    }

    #[test]
    fn empty_blob_decodes_to_no_waypoints() {
        assert!(TripRecord::waypoints_from_blob(&[]).unwrap().is_empty());
    }
}

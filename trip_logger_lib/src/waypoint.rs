use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

use super::fix::PositioningFix;

/// Semantic kind of a recorded waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaypointKind {
    Start,
    End,
    Fuel,
    Rest,
    Parking,
    Other,
}

impl WaypointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaypointKind::Start => "start",
            WaypointKind::End => "end",
            WaypointKind::Fuel => "fuel",
            WaypointKind::Rest => "rest",
            WaypointKind::Parking => "parking",
            WaypointKind::Other => "other",
        }
    }
}

/// A recorded, semantically tagged point-in-time location within a trip.
/// Immutable once recorded, except for `label` and `note`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Waypoint {
    pub waypoint_id: i64,
    pub position: Point,
    pub accuracy_m: Option<f64>,
    pub altitude_m: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub kind: WaypointKind,
    pub label: Option<String>,
    pub note: Option<String>,
}

impl Waypoint {
    pub fn new(waypoint_id: i64, position: Point, timestamp: DateTime<Utc>, kind: WaypointKind) -> Self {
        Self {
            waypoint_id,
            position,
            accuracy_m: None,
            altitude_m: None,
            timestamp,
            kind,
            label: None,
            note: None,
        }
    }

    pub fn from_fix(waypoint_id: i64, fix: &PositioningFix, kind: WaypointKind) -> Self {
        Self {
            waypoint_id,
            position: fix.position,
            accuracy_m: Some(fix.accuracy_m),
            altitude_m: None,
            timestamp: fix.timestamp,
            kind,
            label: None,
            note: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl TryFrom<&[u8]> for Waypoint {
    type Error = &'static str;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        bincode::deserialize_from(value).map_err(|_| "Failed to deserialize Waypoint")
    }
}

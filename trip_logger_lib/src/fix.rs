use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// One positioning reading. Never persisted on its own, only distilled
/// into waypoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PositioningFix {
    pub position: Point,
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
}

impl PositioningFix {
    pub fn new(position: Point, accuracy_m: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            accuracy_m,
            timestamp,
        }
    }
}

use geo_types::Point;
use trip_logger_lib::{distance::haversine_km, fix::PositioningFix, waypoint::WaypointKind};

/// Decides which incoming fixes become waypoints.
///
/// Keeps the anchor: the last recorded point that displacement is
/// measured against. Fixes inside one threshold window collapse into at
/// most one new waypoint because the anchor only advances on acceptance.
#[derive(Debug, Clone)]
pub struct WaypointAccumulator {
    threshold_km: f64,
    anchor: Option<Point>,
}

impl WaypointAccumulator {
    pub fn new(threshold_km: f64) -> Self {
        Self {
            threshold_km,
            anchor: None,
        }
    }

    /// Arm the anchor at the trip's start location.
    pub fn arm(&mut self, at: Point) {
        self.anchor = Some(at);
    }

    pub fn disarm(&mut self) {
        self.anchor = None;
    }

    /// Whether an automatic fix moved far enough from the anchor to be
    /// recorded. Advances the anchor when it did.
    pub fn accept(&mut self, fix: &PositioningFix) -> bool {
        let Some(anchor) = self.anchor else {
            return false;
        };

        if haversine_km(anchor, fix.position) >= self.threshold_km {
            self.anchor = Some(fix.position);
            true
        } else {
            false
        }
    }

    /// An explicit marker always records; only start/end kinds move the
    /// anchor.
    pub fn record_manual(&mut self, kind: WaypointKind, at: Point) {
        if matches!(kind, WaypointKind::Start | WaypointKind::End) {
            self.anchor = Some(at);
        }
    }
}

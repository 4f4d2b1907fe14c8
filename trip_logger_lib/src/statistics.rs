use serde::{Deserialize, Serialize};

use super::{distance::haversine_km, waypoint::Waypoint};

/// Derived per-trip statistics. Never mutated directly, only recomputed
/// from the waypoint sequence and elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TripStatistics {
    pub distance_km: f64,
    pub avg_speed_kmh: f64,
    pub max_speed_kmh: f64,
    pub moving_secs: i64,
    pub stopped_secs: i64,
}

/// Recompute all statistics from the full waypoint list.
///
/// Any non-zero positional delta counts as moving, so positioning jitter
/// at a standstill is counted as motion. A pair with a zero time delta
/// contributes distance but is skipped for max speed.
pub fn compute(waypoints: &[Waypoint], elapsed_secs: i64) -> TripStatistics {
    if waypoints.len() < 2 {
        return TripStatistics::default();
    }

    let mut raw_distance_km = 0.0;
    let mut moving_secs = 0;
    let mut max_speed_kmh = 0.0f64;

    for pair in waypoints.windows(2) {
        let leg_km = haversine_km(pair[0].position, pair[1].position);
        let leg_secs = (pair[1].timestamp - pair[0].timestamp).num_seconds();

        raw_distance_km += leg_km;

        if leg_km > 0.0 {
            moving_secs += leg_secs;
        }

        if leg_secs > 0 {
            let speed = leg_km / (leg_secs as f64 / 3600.0);
            max_speed_kmh = max_speed_kmh.max(speed);
        }
    }

    let distance_km = (raw_distance_km * 10.0).round() / 10.0;
    let stopped_secs = (elapsed_secs - moving_secs).max(0);
    let avg_speed_kmh = if moving_secs > 0 {
        distance_km / (moving_secs as f64 / 3600.0)
    } else {
        0.0
    };

    TripStatistics {
        distance_km,
        avg_speed_kmh,
        max_speed_kmh,
        moving_secs,
        stopped_secs,
    }
}

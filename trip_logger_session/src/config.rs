use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the recording session engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Minimum displacement before a fix becomes a new waypoint, in km.
    pub waypoint_threshold_km: f64,
    /// Period between auto-save ticks.
    pub autosave_period: Duration,
    /// Bounded window for one positioning request.
    pub fix_timeout: Duration,
    /// Extra attempts after a timed-out positioning request.
    pub fix_retries: u32,
    /// Refresh period of the published runtime snapshot.
    pub display_tick: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            waypoint_threshold_km: 0.1,
            autosave_period: Duration::from_secs(30),
            fix_timeout: Duration::from_secs(5),
            fix_retries: 2,
            display_tick: Duration::from_secs(1),
        }
    }
}

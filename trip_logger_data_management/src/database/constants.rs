pub const TRIPS_TABLE_NAME: &str = "Trips";
pub const TRIP_ID: &str = "trip_id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";
pub const TRIP_DATE: &str = "trip_date";
pub const START_TIME: &str = "start_time";
pub const END_TIME: &str = "end_time";
pub const STATUS: &str = "status";
pub const START_LAT: &str = "start_lat";
pub const START_LON: &str = "start_lon";
pub const END_LAT: &str = "end_lat";
pub const END_LON: &str = "end_lon";
pub const WAYPOINTS: &str = "waypoints";
pub const TOTAL_DISTANCE_KM: &str = "total_distance_km";
pub const TOTAL_DURATION_SECS: &str = "total_duration_secs";
pub const PAUSED_SECS: &str = "paused_secs";

pub const STATUS_ACTIVE: &str = "active";

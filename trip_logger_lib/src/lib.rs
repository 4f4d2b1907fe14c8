pub mod distance;
pub mod fix;
pub mod statistics;
pub mod trip;
pub mod waypoint;

use geo_types::Point;

/// Great-circle distance between two coordinates in kilometers.
///
/// Haversine formula on a spherical earth. Points follow the geo-types
/// convention: x = longitude, y = latitude, degrees.
pub fn haversine_km(p1: Point, p2: Point) -> f64 {
    const R: f64 = 6372.8; // Radius of the earth in km

    let d_lat = (p2.y() - p1.y()).to_radians();
    let d_lon = (p2.x() - p1.x()).to_radians();
    let lat1 = p1.y().to_radians();
    let lat2 = p2.y().to_radians();

    let a = f64::sin(d_lat / 2.).powi(2)
        + f64::cos(lat1) * f64::cos(lat2) * f64::sin(d_lon / 2.).powi(2);
    let c = 2. * f64::asin(f64::sqrt(a));

    R * c
}

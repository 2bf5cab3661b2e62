/// Mean Earth radius (meters) used for great-circle distances.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Average city driving speed, in meters per minute (~30 km/h).
pub const CITY_DRIVING_M_PER_MIN: f64 = 500.0;

/// Point in degrees.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Parse `lat,lng`.
    pub fn parse(text: &str) -> Option<Self> {
        let (lat, lng) = text.split_once(',')?;
        let lat = lat.trim().parse::<f64>().ok()?;
        let lng = lng.trim().parse::<f64>().ok()?;
        (lat.is_finite() && lng.is_finite()).then_some(Self { lat, lng })
    }
}

/// Great-circle distance between two points (haversine).
pub fn haversine_meters(a: LatLng, b: LatLng) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Distance to the closest target, `None` when there are no targets.
pub fn nearest_distance_meters<I>(origin: LatLng, targets: I) -> Option<f64>
where
    I: IntoIterator<Item = LatLng>,
{
    targets
        .into_iter()
        .map(|t| haversine_meters(origin, t))
        .fold(None, |best, d| match best {
            Some(b) if b <= d => Some(b),
            _ => Some(d),
        })
}

/// Rough driving time; never less than one minute.
pub fn driving_minutes(meters: f64) -> u32 {
    ((meters / CITY_DRIVING_M_PER_MIN).round() as u32).max(1)
}

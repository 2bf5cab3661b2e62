/// Geographic rectangle given by its southwest and northeast corners (degrees).
///
/// Map viewports never cross the antimeridian in practice, so `contains` is a
/// plain component-wise test.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeoBounds {
    pub sw_lat: f64,
    pub sw_lng: f64,
    pub ne_lat: f64,
    pub ne_lng: f64,
}

impl GeoBounds {
    pub fn new(sw_lat: f64, sw_lng: f64, ne_lat: f64, ne_lng: f64) -> Self {
        GeoBounds {
            sw_lat,
            sw_lng,
            ne_lat,
            ne_lng,
        }
    }

    /// Parse `swLat,swLng,neLat,neLng`.
    pub fn parse(text: &str) -> Option<Self> {
        let parts: Vec<f64> = text
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;
        match parts.as_slice() {
            [sw_lat, sw_lng, ne_lat, ne_lng] => {
                let b = GeoBounds::new(*sw_lat, *sw_lng, *ne_lat, *ne_lng);
                b.is_valid().then_some(b)
            }
            _ => None,
        }
    }

    /// Finite corners, latitudes within ±90, longitudes within ±180, and
    /// southwest not above/right of northeast.
    pub fn is_valid(&self) -> bool {
        let finite = [self.sw_lat, self.sw_lng, self.ne_lat, self.ne_lng]
            .iter()
            .all(|v| v.is_finite());
        finite
            && (-90.0..=90.0).contains(&self.sw_lat)
            && (-90.0..=90.0).contains(&self.ne_lat)
            && (-180.0..=180.0).contains(&self.sw_lng)
            && (-180.0..=180.0).contains(&self.ne_lng)
            && self.sw_lat <= self.ne_lat
            && self.sw_lng <= self.ne_lng
    }

    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.sw_lat && lat <= self.ne_lat && lng >= self.sw_lng && lng <= self.ne_lng
    }
}

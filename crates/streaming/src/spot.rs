//! Canonical parking spot representation shared by the fetch and live paths.

use std::fmt;

use foundation::math::LatLng;
use serde::{Deserialize, Serialize};

/// Identifier assigned by the backing store; stable for the spot's lifetime.
pub type SpotId = i64;

/// Occupancy state of a spot. The only field that changes at high frequency.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum SpotStatus {
    #[default]
    Available,
    Occupied,
    Reserved,
    /// Also accepted as `OutOfService` on input.
    #[serde(alias = "OutOfService")]
    Maintenance,
}

impl SpotStatus {
    pub const ALL: [SpotStatus; 4] = [
        SpotStatus::Available,
        SpotStatus::Occupied,
        SpotStatus::Reserved,
        SpotStatus::Maintenance,
    ];

    /// Strict, case-insensitive parse. Separators (`_`, `-`, space) are ignored
    /// so `out_of_service` and `Out Of Service` both map to `Maintenance`.
    pub fn parse(text: &str) -> Option<Self> {
        let key: String = text
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "available" | "free" => Some(Self::Available),
            "occupied" => Some(Self::Occupied),
            "reserved" => Some(Self::Reserved),
            "maintenance" | "outofservice" => Some(Self::Maintenance),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Occupied => "Occupied",
            Self::Reserved => "Reserved",
            Self::Maintenance => "Maintenance",
        }
    }
}

impl fmt::Display for SpotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parking location with a mutable occupancy status.
///
/// Geometry, label, price, city and area are reference data. Only `status`
/// and `last_updated` are expected to be overwritten by live deltas.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    pub id: SpotId,
    pub latitude: f64,
    pub longitude: f64,
    pub location: String,
    pub status: SpotStatus,
    /// `None` means free parking.
    pub price_per_hour: Option<f64>,
    pub last_updated: Option<String>,
    pub city: Option<String>,
    pub area: Option<String>,
}

impl Spot {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    pub fn is_available(&self) -> bool {
        self.status == SpotStatus::Available
    }
}

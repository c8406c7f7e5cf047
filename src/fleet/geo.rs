//! Great-circle distance and the propagation-delay latency model.
//!
//! Distances use the haversine formula over a spherical Earth of radius
//! [`EARTH_RADIUS_KM`]. Network latency is *estimated*, not measured:
//! `distance / 1000 km × ms_per_1000km + overhead`, capped at the caller's
//! latency budget.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by [`haversine_km`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoPoint {
    /// Latitude in degrees, `-90.0..=90.0`.
    pub latitude: f64,
    /// Longitude in degrees, `-180.0..=180.0`.
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point from latitude and longitude in degrees.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Return `true` if both coordinates are finite and in range.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(self, other)
    }
}

/// Great-circle distance between two points in kilometres.
///
/// Symmetric in its arguments and zero for identical points.
///
/// # Example
///
/// ```rust
/// use tokio_edge_router::fleet::geo::{haversine_km, GeoPoint};
/// let frankfurt = GeoPoint::new(50.1109, 8.6821);
/// let tokyo = GeoPoint::new(35.6762, 139.6503);
/// let d = haversine_km(&frankfurt, &tokyo);
/// assert!((9300.0..9400.0).contains(&d));
/// ```
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points.
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Estimate one-way network latency in milliseconds for a given distance.
///
/// The estimate is capped at `budget_ms` so a far-away node scores zero on
/// latency rather than going negative.
pub fn estimate_latency_ms(
    distance_km: f64,
    ms_per_1000km: f64,
    overhead_ms: f64,
    budget_ms: f64,
) -> f64 {
    let raw = (distance_km / 1000.0) * ms_per_1000km + overhead_ms;
    raw.min(budget_ms)
}

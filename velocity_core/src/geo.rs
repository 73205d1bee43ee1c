//! Great-circle distance on a spherical Earth.
//!
//! Velocities are derived from these distances, so the formula and the
//! radius are fixed: haversine with R = 6 371 000 m.

use crate::tracking::TrackingError;

/// Mean Earth radius used for every distance computation (meters).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A validated WGS84 position.
///
/// Construction rejects non-finite coordinates and latitudes beyond the
/// poles, and wraps longitude into `[-180, 180)`, so every `GeoPosition` in
/// the system is usable for distance computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPosition {
    latitude: f64,
    longitude: f64,
}

impl GeoPosition {
    /// Create a position from degrees.
    ///
    /// Longitude is wrapped, so `190.0` becomes `-170.0` and `180.0` becomes
    /// `-180.0`. Both name the same meridian.
    ///
    /// # Errors
    /// `TrackingError::InvalidCoordinates` if either value is NaN/infinite
    /// or latitude is outside [-90, 90].
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, TrackingError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(TrackingError::InvalidCoordinates(format!(
                "non-finite coordinate ({latitude}, {longitude})"
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(TrackingError::InvalidCoordinates(format!(
                "latitude {latitude} out of range"
            )));
        }
        Ok(Self {
            latitude,
            longitude: normalize_longitude(longitude),
        })
    }

    #[inline]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    #[inline]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Wrap a finite longitude into `[-180, 180)`.
fn normalize_longitude(longitude: f64) -> f64 {
    let wrapped = longitude % 360.0;
    if wrapped < -180.0 {
        wrapped + 360.0
    } else if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Haversine distance in meters between two positions.
pub fn distance_m(a: GeoPosition, b: GeoPosition) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    // Rounding can push h marginally above 1 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

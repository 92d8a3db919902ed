//! Geographic bounding-box construction for photo search queries.
//!
//! The search API takes a `bbox` parameter describing a rectangular query
//! region as `min_lon,min_lat,max_lon,max_lat`. This module derives that box
//! from a pin's coordinate and a pair of half-extents, clamped so the box
//! never leaves the valid coordinate space.

use std::fmt;

pub const LAT_MIN: f64 = -90.0;
pub const LAT_MAX: f64 = 90.0;
pub const LON_MIN: f64 = -180.0;
pub const LON_MAX: f64 = 180.0;

/// A rectangular geographic query region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Builds the box centered on a coordinate, clamped to the valid
    /// latitude/longitude ranges.
    pub fn around(latitude: f64, longitude: f64, half_width: f64, half_height: f64) -> Self {
        Self {
            min_lon: (longitude - half_width).max(LON_MIN),
            min_lat: (latitude - half_height).max(LAT_MIN),
            max_lon: (longitude + half_width).min(LON_MAX),
            max_lat: (latitude + half_height).min(LAT_MAX),
        }
    }
}

impl fmt::Display for BoundingBox {
    /// Renders the comma-separated form expected by the `bbox` query parameter.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

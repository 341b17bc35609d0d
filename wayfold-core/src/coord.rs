//! Fixed-point coordinate representation.
//!
//! Degrees are scaled by [`COORDINATE_SCALE`] and rounded to the nearest
//! integer, which keeps the resolution at 1e-7 degrees (about one centimetre
//! at the equator) while halving the storage cost of an `f64` pair.

use geo::Coord;
use serde::{Deserialize, Serialize};

/// Number of fixed-point units per degree.
pub const COORDINATE_SCALE: f64 = 1.0e7;

/// A longitude/latitude pair stored as scaled integers.
///
/// # Examples
///
/// ```
/// use wayfold_core::Coordinate;
///
/// let coord = Coordinate::from_degrees(13.404954, 52.520008).expect("valid");
/// assert_eq!(coord.lon, 134_049_540);
/// assert_eq!(coord.lat, 525_200_080);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Coordinate {
    /// Longitude in 1e-7 degrees.
    pub lon: i32,
    /// Latitude in 1e-7 degrees.
    pub lat: i32,
}

impl Coordinate {
    /// Build a coordinate from already-scaled components.
    #[must_use]
    pub const fn from_fixed(lon: i32, lat: i32) -> Self {
        Self { lon, lat }
    }

    /// Scale WGS84 degrees into fixed point.
    ///
    /// Returns `None` for non-finite values or values outside
    /// `[-180, 180] x [-90, 90]`.
    #[must_use]
    pub fn from_degrees(lon: f64, lat: f64) -> Option<Self> {
        let valid = lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat);
        valid.then(|| Self {
            lon: scale(lon),
            lat: scale(lat),
        })
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn lon_degrees(self) -> f64 {
        unscale(self.lon)
    }

    /// Latitude in degrees.
    #[must_use]
    pub fn lat_degrees(self) -> f64 {
        unscale(self.lat)
    }

    /// Convert into a `geo` coordinate with `x = longitude`, `y = latitude`.
    #[must_use]
    pub fn to_geo(self) -> Coord<f64> {
        Coord {
            x: self.lon_degrees(),
            y: self.lat_degrees(),
        }
    }
}

#[expect(
    clippy::float_arithmetic,
    clippy::cast_possible_truncation,
    reason = "inputs are range-checked so the scaled value fits in i32"
)]
fn scale(degrees: f64) -> i32 {
    (degrees * COORDINATE_SCALE).round() as i32
}

#[expect(
    clippy::float_arithmetic,
    reason = "fixed-point to degree conversion is a float division"
)]
fn unscale(fixed: i32) -> f64 {
    f64::from(fixed) / COORDINATE_SCALE
}

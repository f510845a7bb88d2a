//! Pixel-space to parametric-domain mapping for one slide.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("invalid slide dimensions {width}x{height}: both axes must be non-zero")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Affine mapping between a slide's pixel grid and the bounded parametric
/// domain the hexagonal index is built over.
///
/// The vertical pixel axis spans the latitude-like axis `[-90, 90]` and
/// the horizontal axis the longitude-like axis `[-180, 180]`:
///
/// ```text
/// lat = (y / height) * 180 - 90
/// lng = (x / width)  * 360 - 180
/// ```
///
/// No rounding or clamping is applied, and the two directions are exact
/// inverses up to floating point: a pixel outside the slide maps outside
/// the nominal domain (the index normalizes such angles) instead of
/// silently moving.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlideProjection {
    width: f64,
    height: f64,
}

impl SlideProjection {
    /// Build a projection from slide pixel dimensions.
    ///
    /// A zero-sized slide cannot be indexed and is rejected outright.
    pub fn new(width: u32, height: u32) -> Result<Self, ProjectionError> {
        if width == 0 || height == 0 {
            return Err(ProjectionError::InvalidDimensions { width, height });
        }
        Ok(Self {
            width: f64::from(width),
            height: f64::from(height),
        })
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    /// Map a pixel coordinate to `(lat, lng)` in the parametric domain.
    pub fn to_domain(&self, x: f64, y: f64) -> (f64, f64) {
        let (unit_x, unit_y) = self.to_unit(x, y);
        (unit_y * 180.0 - 90.0, unit_x * 360.0 - 180.0)
    }

    /// Map a parametric-domain point back to pixel coordinates.
    pub fn to_pixel(&self, lat: f64, lng: f64) -> (f64, f64) {
        (
            ((lng + 180.0) / 360.0) * self.width,
            ((lat + 90.0) / 180.0) * self.height,
        )
    }

    /// Scale a pixel coordinate into `[0, 1]` on both axes, the space
    /// viewport bounds are expressed in.
    pub fn to_unit(&self, x: f64, y: f64) -> (f64, f64) {
        (x / self.width, y / self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_zero_dimensions() {
        assert!(matches!(
            SlideProjection::new(0, 4096),
            Err(ProjectionError::InvalidDimensions { width: 0, .. })
        ));
        assert!(SlideProjection::new(4096, 0).is_err());
        assert!(SlideProjection::new(4096, 4096).is_ok());
    }

    #[test]
    fn test_corners_span_the_full_domain() {
        let projection = SlideProjection::new(50_000, 30_000).unwrap();

        let (lat, lng) = projection.to_domain(0.0, 0.0);
        assert_relative_eq!(lat, -90.0);
        assert_relative_eq!(lng, -180.0);

        let (lat, lng) = projection.to_domain(50_000.0, 30_000.0);
        assert_relative_eq!(lat, 90.0);
        assert_relative_eq!(lng, 180.0);

        let (lat, lng) = projection.to_domain(25_000.0, 15_000.0);
        assert_relative_eq!(lat, 0.0);
        assert_relative_eq!(lng, 0.0);
    }

    #[test]
    fn test_round_trip_is_exact_inverse() {
        let projection = SlideProjection::new(1234, 987).unwrap();
        for &(x, y) in &[(0.0, 0.0), (617.0, 493.5), (1234.0, 987.0), (3.25, 900.75)] {
            let (lat, lng) = projection.to_domain(x, y);
            let (rx, ry) = projection.to_pixel(lat, lng);
            assert_relative_eq!(rx, x, epsilon = 1e-9);
            assert_relative_eq!(ry, y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_out_of_range_pixels_are_not_clamped() {
        let projection = SlideProjection::new(100, 100).unwrap();
        let (lat, lng) = projection.to_domain(200.0, -50.0);
        assert_relative_eq!(lng, 540.0);
        assert_relative_eq!(lat, -180.0);
    }

    proptest! {
        #[test]
        fn round_trip_recovers_pixels(
            width in 1u32..200_000,
            height in 1u32..200_000,
            x in -1.0e6f64..1.0e6,
            y in -1.0e6f64..1.0e6,
        ) {
            let projection = SlideProjection::new(width, height).unwrap();
            let (lat, lng) = projection.to_domain(x, y);
            let (rx, ry) = projection.to_pixel(lat, lng);
            prop_assert!((rx - x).abs() <= 1e-6 * x.abs().max(1.0));
            prop_assert!((ry - y).abs() <= 1e-6 * y.abs().max(1.0));
        }
    }
}

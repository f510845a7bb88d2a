//! The "VIEWPORT" Engine - Bounding-Box Restriction of Raw Geometry
//!
//! At deep zoom the client wants exact geometries, but only those inside
//! the visible rectangle. Bounds arrive in unit-normalized slide space
//! (`[0, 1]` on both axes); each raw pixel coordinate is scaled by the
//! slide dimensions before an **inclusive** containment test. Filtering
//! returns new, reduced copies; stored features are never mutated.
//!
//! Polygons are filtered ring-wise: vertices are kept or dropped one by
//! one, which is deliberately not polygon clipping. A ring crossing the
//! viewport edge keeps only its inside vertices, and a huge ring that
//! surrounds the viewport without placing a vertex inside it disappears.
//! That approximation matches what the rendering client has always done
//! and keeps vertex counts consistent with the binning engine, which
//! aggregates the same vertices.

use crate::feature::{Feature, Geometry};
use crate::projection::SlideProjection;
use serde::Serialize;

/// Viewport rectangle in unit-normalized slide coordinates.
///
/// Coordinates are rounded to six decimal places on construction; that is
/// the precision contract that keeps derived query keys stable across
/// float noise from rendering clients. Both axes are closed intervals: a
/// point exactly on an edge is inside.
///
/// Only [`ViewportBounds::new`] applies the rounding, so there is no
/// `Deserialize` impl here; transport-facing code deserializes raw values
/// and builds bounds through `new`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl ViewportBounds {
    /// Build bounds, applying the six-decimal rounding contract.
    pub fn new(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Self {
        Self {
            x_min: round6(x_min),
            x_max: round6(x_max),
            y_min: round6(y_min),
            y_max: round6(y_max),
        }
    }

    /// True when every bound is a finite number.
    pub fn is_finite(&self) -> bool {
        self.x_min.is_finite()
            && self.x_max.is_finite()
            && self.y_min.is_finite()
            && self.y_max.is_finite()
    }

    /// Inclusive containment test in unit-normalized space.
    pub fn contains(&self, unit_x: f64, unit_y: f64) -> bool {
        unit_x >= self.x_min
            && unit_x <= self.x_max
            && unit_y >= self.y_min
            && unit_y <= self.y_max
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// Filters features against a viewport, producing reduced copies.
#[derive(Debug, Clone, Copy)]
pub struct ViewportFilter {
    bounds: ViewportBounds,
    passthrough: bool,
}

impl ViewportFilter {
    /// Filter against `bounds`.
    pub fn new(bounds: ViewportBounds) -> Self {
        Self {
            bounds,
            passthrough: false,
        }
    }

    /// Patch mode: every feature is returned whole and the bounds are
    /// ignored. Patches are small standalone images whose annotations use
    /// patch-local coordinates the viewport bounds were never expressed
    /// in.
    pub fn passthrough() -> Self {
        Self {
            bounds: ViewportBounds::new(0.0, 1.0, 0.0, 1.0),
            passthrough: true,
        }
    }

    pub fn bounds(&self) -> &ViewportBounds {
        &self.bounds
    }

    /// Reduce one feature to the parts inside the viewport.
    ///
    /// Returns `None` when nothing survives; callers omit the feature
    /// entirely rather than returning an empty shell.
    pub fn clip_feature(&self, feature: &Feature, projection: &SlideProjection) -> Option<Feature> {
        if self.passthrough {
            return Some(feature.clone());
        }
        let geometry = self.clip_geometry(&feature.geometry, projection)?;
        Some(Feature {
            id: feature.id.clone(),
            geometry,
            classification: feature.classification.clone(),
        })
    }

    /// Reduce a whole source, preserving input order.
    pub fn filter_features(
        &self,
        features: &[Feature],
        projection: &SlideProjection,
    ) -> Vec<Feature> {
        features
            .iter()
            .filter_map(|feature| self.clip_feature(feature, projection))
            .collect()
    }

    fn clip_geometry(&self, geometry: &Geometry, projection: &SlideProjection) -> Option<Geometry> {
        match geometry {
            Geometry::Point(point) => {
                if self.contains_pixel(*point, projection) {
                    Some(Geometry::Point(*point))
                } else {
                    None
                }
            }
            Geometry::MultiPoint(points) => {
                let kept = self.clip_ring(points, projection);
                if kept.is_empty() {
                    None
                } else {
                    Some(Geometry::MultiPoint(kept))
                }
            }
            Geometry::Polygon(rings) => {
                let kept = self.clip_rings(rings, projection);
                if kept.is_empty() {
                    None
                } else {
                    Some(Geometry::Polygon(kept))
                }
            }
            Geometry::MultiPolygon(polygons) => {
                let kept: Vec<Vec<Vec<[f64; 2]>>> = polygons
                    .iter()
                    .map(|rings| self.clip_rings(rings, projection))
                    .filter(|rings| !rings.is_empty())
                    .collect();
                if kept.is_empty() {
                    None
                } else {
                    Some(Geometry::MultiPolygon(kept))
                }
            }
        }
    }

    /// Ring-wise vertex filter; rings that lose every vertex are dropped.
    fn clip_rings(
        &self,
        rings: &[Vec<[f64; 2]>],
        projection: &SlideProjection,
    ) -> Vec<Vec<[f64; 2]>> {
        rings
            .iter()
            .map(|ring| self.clip_ring(ring, projection))
            .filter(|ring| !ring.is_empty())
            .collect()
    }

    fn clip_ring(&self, ring: &[[f64; 2]], projection: &SlideProjection) -> Vec<[f64; 2]> {
        ring.iter()
            .copied()
            .filter(|point| self.contains_pixel(*point, projection))
            .collect()
    }

    fn contains_pixel(&self, point: [f64; 2], projection: &SlideProjection) -> bool {
        let (unit_x, unit_y) = projection.to_unit(point[0], point[1]);
        self.bounds.contains(unit_x, unit_y)
    }
}

//! Annotation data model and lenient payload ingestion.
//!
//! Annotation sets arrive as GeoJSON-shaped exports from image-analysis
//! tooling. Real exports are messy: features without ids, geometry types
//! this pipeline does not aggregate, classifications missing entirely.
//! Ingestion therefore works feature-by-feature: whatever parses cleanly
//! is kept, everything else is skipped with a [`DataQualityWarning`] so a
//! single bad record can never sink a million-feature batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Classification name applied when an annotation carries none.
pub const UNCLASSIFIED: &str = "Unknown";

/// Display color (white) for unclassified annotations.
pub const UNCLASSIFIED_COLOR: [u8; 3] = [255, 255, 255];

/// Payloads that cannot be interpreted as a feature batch at all.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("annotation payload must be a FeatureCollection or a feature array")]
    InvalidCollection,
}

/// Non-fatal data-quality findings accumulated during ingestion and
/// binning.
///
/// These never abort a batch: the offending feature (or single sample) is
/// skipped and the finding travels alongside the result.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityWarning {
    #[error("feature at index {index} has no id; skipped")]
    MissingId { index: usize },

    #[error("feature '{feature_id}' has no geometry; skipped")]
    MissingGeometry { feature_id: String },

    #[error("feature '{feature_id}' has unsupported geometry type '{geometry_type}'; skipped")]
    UnsupportedGeometry {
        feature_id: String,
        geometry_type: String,
    },

    #[error("feature '{feature_id}' has malformed coordinates; skipped")]
    MalformedCoordinates { feature_id: String },

    #[error("feature '{feature_id}' has no classification; defaulted to 'Unknown'")]
    MissingClassification { feature_id: String },

    #[error("feature '{feature_id}' has a sample at ({x}, {y}) that does not map to a finite grid position; sample skipped")]
    NonFiniteSample { feature_id: String, x: f64, y: f64 },
}

/// Annotation geometry: the closed set of shapes the pipeline accepts.
///
/// The serialized form is a GeoJSON geometry object
/// (`{"type": "Point", "coordinates": [x, y]}`), so stored payloads and
/// query responses stay wire-compatible with annotation tooling. A tag
/// outside this set fails to parse and is reported, never guessed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    /// A single `[x, y]` pixel coordinate.
    Point([f64; 2]),
    /// Independent points sharing one id and classification.
    MultiPoint(Vec<[f64; 2]>),
    /// Vertex rings; the first is the outer boundary, the rest are holes.
    Polygon(Vec<Vec<[f64; 2]>>),
    /// A list of polygons.
    MultiPolygon(Vec<Vec<Vec<[f64; 2]>>>),
}

impl Geometry {
    /// GeoJSON type tag of this shape.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Every coordinate that participates in density aggregation, in
    /// payload order: the point itself, each point of a multi-point, or
    /// every ring vertex of a polygon (outer boundary and holes alike).
    /// Polygons are deliberately not rasterized; their vertex density is
    /// the aggregation signal.
    pub fn sample_points(&self) -> Box<dyn Iterator<Item = [f64; 2]> + '_> {
        match self {
            Geometry::Point(point) => Box::new(std::iter::once(*point)),
            Geometry::MultiPoint(points) => Box::new(points.iter().copied()),
            Geometry::Polygon(rings) => Box::new(rings.iter().flatten().copied()),
            Geometry::MultiPolygon(polygons) => {
                Box::new(polygons.iter().flatten().flatten().copied())
            }
        }
    }

    /// Number of samples [`Geometry::sample_points`] yields.
    pub fn sample_count(&self) -> usize {
        match self {
            Geometry::Point(_) => 1,
            Geometry::MultiPoint(points) => points.len(),
            Geometry::Polygon(rings) => rings.iter().map(Vec::len).sum(),
            Geometry::MultiPolygon(polygons) => polygons
                .iter()
                .map(|rings| rings.iter().map(Vec::len).sum::<usize>())
                .sum(),
        }
    }
}

/// Label attached to an annotation by the analysis model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub name: String,
    /// RGB display color.
    pub color: [u8; 3],
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            name: UNCLASSIFIED.to_string(),
            color: UNCLASSIFIED_COLOR,
        }
    }
}

/// One annotated structure: a stable id, a geometry, and a classification.
///
/// Features are immutable once parsed; viewport filtering returns new,
/// reduced copies rather than editing these in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub geometry: Geometry,
    #[serde(default)]
    pub classification: Classification,
}

/// Result of leniently parsing one raw annotation payload.
#[derive(Debug, Clone, Default)]
pub struct FeatureBatch {
    /// Features that parsed cleanly, in payload order.
    pub features: Vec<Feature>,
    /// One warning per skipped feature or defaulted field.
    pub warnings: Vec<DataQualityWarning>,
}

/// Parse a raw annotation payload.
///
/// Accepts either a GeoJSON FeatureCollection (`{"features": [...]}`) or
/// a bare feature array; anything else is [`FeatureError::InvalidCollection`].
/// Individual features are parsed independently: a missing id, missing
/// geometry, unknown geometry tag or malformed coordinates skip that one
/// feature and record a warning.
pub fn parse_features(payload: &Value) -> Result<FeatureBatch, FeatureError> {
    let raw = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("features") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => return Err(FeatureError::InvalidCollection),
        },
        _ => return Err(FeatureError::InvalidCollection),
    };

    let mut batch = FeatureBatch::default();
    for (index, item) in raw.iter().enumerate() {
        parse_one(index, item, &mut batch);
    }
    Ok(batch)
}

fn parse_one(index: usize, item: &Value, batch: &mut FeatureBatch) {
    let id = match feature_id(item) {
        Some(id) => id,
        None => {
            batch.warnings.push(DataQualityWarning::MissingId { index });
            return;
        }
    };

    let raw_geometry = match item.get("geometry") {
        Some(raw) if !raw.is_null() => raw,
        _ => {
            batch
                .warnings
                .push(DataQualityWarning::MissingGeometry { feature_id: id });
            return;
        }
    };

    let geometry = match serde_json::from_value::<Geometry>(raw_geometry.clone()) {
        Ok(geometry) => geometry,
        Err(_) => {
            // Distinguish an unknown type tag from broken coordinates.
            match raw_geometry.get("type").and_then(Value::as_str) {
                Some(tag) if !KNOWN_GEOMETRY_TYPES.contains(&tag) => {
                    batch.warnings.push(DataQualityWarning::UnsupportedGeometry {
                        feature_id: id,
                        geometry_type: tag.to_string(),
                    });
                }
                _ => {
                    batch
                        .warnings
                        .push(DataQualityWarning::MalformedCoordinates { feature_id: id });
                }
            }
            return;
        }
    };

    let classification = match classification_of(item) {
        Some(classification) => classification,
        None => {
            batch.warnings.push(DataQualityWarning::MissingClassification {
                feature_id: id.clone(),
            });
            Classification::default()
        }
    };

    batch.features.push(Feature {
        id,
        geometry,
        classification,
    });
}

const KNOWN_GEOMETRY_TYPES: [&str; 4] = ["Point", "MultiPoint", "Polygon", "MultiPolygon"];

/// Ids are usually strings, but some exporters emit numbers; empty
/// strings count as missing.
fn feature_id(item: &Value) -> Option<String> {
    match item.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

/// Classification lives under `properties.classification` in annotator
/// exports, or at the top level in records this crate emitted itself.
/// A present-but-partial classification falls back field by field.
fn classification_of(item: &Value) -> Option<Classification> {
    let raw = item
        .get("properties")
        .and_then(|properties| properties.get("classification"))
        .or_else(|| item.get("classification"))?;

    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(UNCLASSIFIED)
        .to_string();
    let color = raw.get("color").and_then(parse_color).unwrap_or(UNCLASSIFIED_COLOR);
    Some(Classification { name, color })
}

fn parse_color(raw: &Value) -> Option<[u8; 3]> {
    let parts = raw.as_array()?;
    if parts.len() != 3 {
        return None;
    }
    let mut color = [0u8; 3];
    for (slot, part) in color.iter_mut().zip(parts) {
        *slot = u8::try_from(part.as_u64()?).ok()?;
    }
    Some(color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tumor_point(id: &str, x: f64, y: f64) -> Value {
        json!({
            "id": id,
            "geometry": { "type": "Point", "coordinates": [x, y] },
            "properties": { "classification": { "name": "Tumor", "color": [200, 0, 0] } }
        })
    }

    #[test]
    fn test_parses_feature_collection_and_bare_array() {
        let features = vec![tumor_point("f-1", 10.0, 10.0), tumor_point("f-2", 90.0, 90.0)];

        let collection = json!({ "type": "FeatureCollection", "features": features });
        let batch = parse_features(&collection).unwrap();
        assert_eq!(batch.features.len(), 2);
        assert!(batch.warnings.is_empty());

        let bare = Value::Array(features);
        let batch = parse_features(&bare).unwrap();
        assert_eq!(batch.features.len(), 2);
        assert_eq!(batch.features[0].id, "f-1");
        assert_eq!(batch.features[0].classification.name, "Tumor");
        assert_eq!(batch.features[0].classification.color, [200, 0, 0]);
    }

    #[test]
    fn test_rejects_non_collection_payloads() {
        assert!(parse_features(&json!(42)).is_err());
        assert!(parse_features(&json!({ "type": "Feature" })).is_err());
        assert!(parse_features(&json!({ "features": "nope" })).is_err());
    }

    #[test]
    fn test_feature_without_id_is_skipped() {
        let payload = json!([
            {
                "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [5.0, 0.0], [5.0, 5.0]]] },
                "properties": { "classification": { "name": "Stroma", "color": [0, 200, 0] } }
            },
            tumor_point("f-1", 10.0, 10.0),
        ]);

        let batch = parse_features(&payload).unwrap();
        assert_eq!(batch.features.len(), 1);
        assert_eq!(batch.features[0].id, "f-1");
        assert_eq!(batch.warnings, vec![DataQualityWarning::MissingId { index: 0 }]);
    }

    #[test]
    fn test_empty_string_id_counts_as_missing() {
        let payload = json!([{ "id": "", "geometry": { "type": "Point", "coordinates": [1.0, 1.0] } }]);
        let batch = parse_features(&payload).unwrap();
        assert!(batch.features.is_empty());
        assert_eq!(batch.warnings, vec![DataQualityWarning::MissingId { index: 0 }]);
    }

    #[test]
    fn test_numeric_id_is_kept() {
        let payload = json!([{ "id": 17, "geometry": { "type": "Point", "coordinates": [1.0, 1.0] } }]);
        let batch = parse_features(&payload).unwrap();
        assert_eq!(batch.features[0].id, "17");
    }

    #[test]
    fn test_feature_without_geometry_is_skipped() {
        let payload = json!([
            { "id": "f-1", "properties": {} },
            { "id": "f-2", "geometry": null },
        ]);
        let batch = parse_features(&payload).unwrap();
        assert!(batch.features.is_empty());
        assert_eq!(batch.warnings.len(), 2);
        assert!(matches!(
            &batch.warnings[0],
            DataQualityWarning::MissingGeometry { feature_id } if feature_id == "f-1"
        ));
    }

    #[test]
    fn test_unsupported_geometry_type_is_reported() {
        let payload = json!([{
            "id": "f-1",
            "geometry": { "type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]] }
        }]);
        let batch = parse_features(&payload).unwrap();
        assert!(batch.features.is_empty());
        assert!(matches!(
            &batch.warnings[0],
            DataQualityWarning::UnsupportedGeometry { geometry_type, .. } if geometry_type == "LineString"
        ));
    }

    #[test]
    fn test_malformed_coordinates_are_reported() {
        let payload = json!([{
            "id": "f-1",
            "geometry": { "type": "Point", "coordinates": "oops" }
        }]);
        let batch = parse_features(&payload).unwrap();
        assert!(batch.features.is_empty());
        assert!(matches!(
            &batch.warnings[0],
            DataQualityWarning::MalformedCoordinates { feature_id } if feature_id == "f-1"
        ));
    }

    #[test]
    fn test_missing_classification_defaults_to_unknown() {
        let payload = json!([{ "id": "f-1", "geometry": { "type": "Point", "coordinates": [1.0, 1.0] } }]);
        let batch = parse_features(&payload).unwrap();
        assert_eq!(batch.features[0].classification, Classification::default());
        assert!(matches!(
            &batch.warnings[0],
            DataQualityWarning::MissingClassification { feature_id } if feature_id == "f-1"
        ));
    }

    #[test]
    fn test_partial_classification_falls_back_per_field() {
        let payload = json!([{
            "id": "f-1",
            "geometry": { "type": "Point", "coordinates": [1.0, 1.0] },
            "properties": { "classification": { "name": "Necrosis" } }
        }]);
        let batch = parse_features(&payload).unwrap();
        assert_eq!(batch.features[0].classification.name, "Necrosis");
        assert_eq!(batch.features[0].classification.color, UNCLASSIFIED_COLOR);
        assert!(batch.warnings.is_empty());
    }

    #[test]
    fn test_top_level_classification_is_accepted() {
        let payload = json!([{
            "id": "f-1",
            "geometry": { "type": "Point", "coordinates": [1.0, 1.0] },
            "classification": { "name": "Tumor", "color": [200, 0, 0] }
        }]);
        let batch = parse_features(&payload).unwrap();
        assert_eq!(batch.features[0].classification.name, "Tumor");
    }

    #[test]
    fn test_sample_fold_order_covers_all_rings() {
        let polygon = Geometry::Polygon(vec![
            vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]],
            vec![[2.0, 2.0], [3.0, 2.0]],
        ]);
        assert_eq!(polygon.sample_count(), 5);
        let samples: Vec<_> = polygon.sample_points().collect();
        assert_eq!(samples[2], [10.0, 10.0]);
        assert_eq!(samples[3], [2.0, 2.0]);

        let multi = Geometry::MultiPolygon(vec![
            vec![vec![[0.0, 0.0], [1.0, 0.0]]],
            vec![vec![[5.0, 5.0]]],
        ]);
        assert_eq!(multi.sample_count(), 3);
        assert_eq!(multi.sample_points().last(), Some([5.0, 5.0]));

        assert_eq!(Geometry::Point([7.0, 8.0]).sample_count(), 1);
        assert_eq!(Geometry::MultiPoint(vec![]).sample_count(), 0);
    }

    #[test]
    fn test_geometry_serializes_as_geojson() {
        let point = Geometry::Point([10.0, 20.0]);
        let encoded = serde_json::to_value(&point).unwrap();
        assert_eq!(encoded, json!({ "type": "Point", "coordinates": [10.0, 20.0] }));

        let rings = Geometry::Polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]]);
        let round_tripped: Geometry =
            serde_json::from_value(serde_json::to_value(&rings).unwrap()).unwrap();
        assert_eq!(round_tripped, rings);
        assert_eq!(rings.type_name(), "Polygon");
    }
}

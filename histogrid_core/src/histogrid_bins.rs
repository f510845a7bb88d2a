//! The "BINNING" Engine - Hexagonal Aggregation of Annotation Geometry
//!
//! Folds every annotation coordinate of a slide into H3 cells at a fixed
//! resolution and keeps per-cell statistics:
//! - which features touched the cell (deduplicated, sorted ids)
//! - how many raw samples landed in it
//! - the classification mix, with one display color per class
//!
//! Cells partition the sampled points exactly: every indexable sample
//! lands in exactly one cell, so per-cell counts sum to the number of
//! samples folded. Folding the same features twice yields identical
//! cells, which is what makes full-replacement persistence idempotent.

use crate::feature::{DataQualityWarning, Feature};
use crate::projection::SlideProjection;
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// RECORDS
// ============================================================================

/// Per-classification tally inside one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationCount {
    /// Samples of this classification that landed in the cell.
    pub count: u64,
    /// Display color, fixed at the first sample seen for the class.
    pub color: [u8; 3],
}

/// One aggregated hexagonal cell of a slide at one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexCell {
    /// Slide this cell belongs to.
    pub slide_id: String,
    /// H3 cell index, serialized as the canonical hex string.
    #[serde(with = "hex_id_serde")]
    pub hex_id: CellIndex,
    /// H3 resolution the cell was computed at.
    pub resolution: u8,
    /// Distinct ids of features with at least one sample in the cell,
    /// sorted lexicographically.
    pub feature_ids: Vec<String>,
    /// Samples folded into the cell: vertices and points, not distinct
    /// features, so this is always >= `feature_ids.len()`.
    pub annotation_count: u64,
    /// Sample tallies per classification name.
    pub classifications: BTreeMap<String, ClassificationCount>,
    /// Cell boundary vertices in slide pixel space, typically six (five
    /// for the rare pentagon cells).
    pub image_coordinates: Vec<[f64; 2]>,
}

/// Serialize a [`CellIndex`] as its canonical H3 string (`"822d57fffffffff"`
/// style), not the bare u64 h3o would otherwise emit.
mod hex_id_serde {
    use h3o::CellIndex;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cell: &CellIndex, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&cell.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CellIndex, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

// ============================================================================
// BINNING ENGINE
// ============================================================================

/// Output of binning one feature batch.
#[derive(Debug, Clone)]
pub struct BinningReport {
    /// Aggregated cells, ordered by hex id.
    pub cells: Vec<HexCell>,
    /// Samples folded across all cells.
    pub samples_folded: u64,
    /// Per-sample findings (samples that could not be indexed).
    pub warnings: Vec<DataQualityWarning>,
}

/// Aggregates one slide's features at one H3 resolution.
///
/// A binner is cheap to build and stateless between calls; aggregating a
/// slide at several resolutions means one binner per resolution, each
/// folding the features independently.
#[derive(Debug, Clone)]
pub struct SlideBinner {
    slide_id: String,
    projection: SlideProjection,
    resolution: Resolution,
}

impl SlideBinner {
    pub fn new(
        slide_id: impl Into<String>,
        projection: SlideProjection,
        resolution: Resolution,
    ) -> Self {
        Self {
            slide_id: slide_id.into(),
            projection,
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Fold every sample of every feature into its H3 cell.
    ///
    /// Samples that do not map to a finite grid position are skipped one
    /// at a time and reported; they never abort the batch.
    pub fn bin(&self, features: &[Feature]) -> BinningReport {
        let mut accumulators: BTreeMap<CellIndex, CellAccumulator> = BTreeMap::new();
        let mut samples_folded = 0u64;
        let mut warnings = Vec::new();

        for feature in features {
            for [x, y] in feature.geometry.sample_points() {
                let (lat, lng) = self.projection.to_domain(x, y);
                let position = match LatLng::new(lat, lng) {
                    Ok(position) => position,
                    Err(_) => {
                        warnings.push(DataQualityWarning::NonFiniteSample {
                            feature_id: feature.id.clone(),
                            x,
                            y,
                        });
                        continue;
                    }
                };
                let cell = position.to_cell(self.resolution);
                accumulators.entry(cell).or_default().fold(feature);
                samples_folded += 1;
            }
        }

        let cells = accumulators
            .into_iter()
            .map(|(cell, accumulator)| self.emit(cell, accumulator))
            .collect();

        BinningReport {
            cells,
            samples_folded,
            warnings,
        }
    }

    /// Freeze one accumulator into its stored record, converting the cell
    /// boundary back to pixel space.
    fn emit(&self, cell: CellIndex, accumulator: CellAccumulator) -> HexCell {
        let image_coordinates = cell
            .boundary()
            .iter()
            .map(|vertex| {
                let (x, y) = self.projection.to_pixel(vertex.lat(), vertex.lng());
                [x, y]
            })
            .collect();

        HexCell {
            slide_id: self.slide_id.clone(),
            hex_id: cell,
            resolution: u8::from(self.resolution),
            feature_ids: accumulator.feature_ids.into_iter().collect(),
            annotation_count: accumulator.annotation_count,
            classifications: accumulator.classifications,
            image_coordinates,
        }
    }
}

/// Running statistics for one cell while a batch folds.
#[derive(Debug, Default)]
struct CellAccumulator {
    feature_ids: BTreeSet<String>,
    annotation_count: u64,
    classifications: BTreeMap<String, ClassificationCount>,
}

impl CellAccumulator {
    fn fold(&mut self, feature: &Feature) {
        if !self.feature_ids.contains(&feature.id) {
            self.feature_ids.insert(feature.id.clone());
        }
        self.annotation_count += 1;

        let classification = &feature.classification;
        let tally = self
            .classifications
            .entry(classification.name.clone())
            .or_insert_with(|| ClassificationCount {
                count: 0,
                color: classification.color,
            });
        tally.count += 1;
    }
}

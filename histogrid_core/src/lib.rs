//! HistoGrid Core - Hexagonal Aggregation of Whole-Slide Annotations
//!
//! Pure computation for the annotation pipeline:
//! 1. **Projection**: maps slide pixels onto the bounded parametric domain
//!    the hexagonal index is built over, and back
//! 2. **Binning**: folds every annotation coordinate into H3 cells with
//!    per-cell statistics (ids, sample counts, classification mix)
//! 3. **Viewport**: restricts raw geometry to a visible rectangle with
//!    inclusive bounds
//!
//! No I/O happens here; persistence and orchestration live in the
//! companion crates.

pub mod feature;
pub mod histogrid_bins;
pub mod histogrid_viewport;
pub mod projection;

// Re-export key types for convenience
pub use feature::{
    parse_features, Classification, DataQualityWarning, Feature, FeatureBatch, FeatureError,
    Geometry,
};
pub use histogrid_bins::{BinningReport, ClassificationCount, HexCell, SlideBinner};
pub use histogrid_viewport::{ViewportBounds, ViewportFilter};
pub use projection::{ProjectionError, SlideProjection};

// The index types callers need to drive the engines.
pub use h3o::{CellIndex, Resolution};

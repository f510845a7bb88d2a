//! HistoGrid Precompute Pipeline
//!
//! Orchestrates the path from uploaded annotation sets to queryable hex
//! cells. Each unit (one annotation file on one slide) moves through four
//! stages:
//!
//! 1. **Located**: the set is looked up in the catalog
//! 2. **Normalized**: slide dimensions become a pixel-to-domain projection
//! 3. **Aggregated**: features are parsed and folded into H3 cells
//! 4. **Persisted**: the cells replace the previous generation atomically
//!
//! A failure at any stage fails that unit only; batch runs accumulate
//! per-unit outcomes and keep going. The same service answers the two
//! read paths: aggregated cells by (slide, resolution) and raw geometry
//! restricted to a viewport.

mod error;
mod report;
mod service;

pub use error::PipelineError;
pub use report::{BatchReport, ResolutionSummary, SkippedUnit, UnitReport, UnitStage};
pub use service::{PipelineConfig, PrecomputeService, RequestedBounds, ViewportRequest};

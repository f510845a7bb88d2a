//! Precompute run reports.
//!
//! Batch runs never abort on a bad unit; they accumulate per-unit
//! outcomes into these records instead. Everything serializes to JSON so
//! CI and operator tooling can parse a run without scraping logs.

use histogrid_core::DataQualityWarning;
use serde::Serialize;
use uuid::Uuid;

/// Stage a unit reached, or failed in, while being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStage {
    /// Catalog lookup of the annotation set.
    Located,
    /// Slide dimensions validated into a projection.
    Normalized,
    /// Features parsed and folded into cells.
    Aggregated,
    /// Cells swapped into the store.
    Persisted,
}

impl UnitStage {
    pub fn name(&self) -> &'static str {
        match self {
            UnitStage::Located => "located",
            UnitStage::Normalized => "normalized",
            UnitStage::Aggregated => "aggregated",
            UnitStage::Persisted => "persisted",
        }
    }
}

impl std::fmt::Display for UnitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one (slide, resolution) aggregation within a unit.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionSummary {
    pub resolution: u8,
    pub cells_written: usize,
    /// Cells of the previous generation the replacement removed.
    pub cells_removed: usize,
    pub samples_folded: u64,
    /// Per-cell write failures surfaced by the store; non-fatal.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub encode_failures: Vec<String>,
}

/// Result of one fully processed unit (one annotation set).
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub filename: String,
    pub slide_id: String,
    pub resolutions: Vec<ResolutionSummary>,
    /// Data-quality findings accumulated across parsing and binning.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<DataQualityWarning>,
}

impl UnitReport {
    /// Total cells written across resolutions.
    pub fn cells_written(&self) -> usize {
        self.resolutions.iter().map(|summary| summary.cells_written).sum()
    }
}

/// A unit the batch could not process, with the stage that failed.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedUnit {
    pub filename: String,
    pub slide_id: String,
    pub stage: UnitStage,
    pub reason: String,
}

/// Outcome of a whole batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Correlation id tying log lines and artifacts to this run.
    pub run_id: Uuid,
    pub completed: Vec<UnitReport>,
    pub skipped: Vec<SkippedUnit>,
    /// True when the run was cut short by a stop request.
    pub stopped_early: bool,
}

impl BatchReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            completed: Vec::new(),
            skipped: Vec::new(),
            stopped_early: false,
        }
    }

    /// True when every unit completed.
    pub fn all_completed(&self) -> bool {
        self.skipped.is_empty()
    }
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

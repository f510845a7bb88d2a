//! The "PRECOMPUTE" Service - Ingestion, Batch Runs, and Queries
//!
//! One service instance owns the two storage seams and everything that
//! moves between them:
//! - ingest an uploaded annotation set (validate, store, precompute)
//! - recompute one unit or sweep the whole catalog
//! - answer cell queries by (slide, resolution)
//! - answer viewport queries with raw, bounds-restricted geometry
//!
//! Units are processed synchronously one at a time; a batch run can be
//! asked to stop between units via a one-way flag.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use histogrid_core::{
    parse_features, Feature, HexCell, Resolution, SlideBinner, SlideProjection, ViewportBounds,
    ViewportFilter,
};
use histogrid_store::{AnnotationSet, AnnotationStore, HexCellStore};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::report::{BatchReport, ResolutionSummary, SkippedUnit, UnitReport, UnitStage};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Precompute tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Resolutions aggregated when a request does not name any.
    pub resolutions: Vec<Resolution>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolutions: vec![Resolution::Two],
        }
    }
}

// ============================================================================
// QUERY SHAPES
// ============================================================================

/// Viewport bounds exactly as a client sent them, before the rounding
/// contract is applied. [`ViewportBounds`] is built from these through
/// its constructor so the contract cannot be skipped.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

/// One viewport query against a slide's raw geometry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportRequest {
    pub slide_id: Option<String>,
    /// Required even in patch mode; the transport contract always sends
    /// bounds.
    pub bounds: Option<RequestedBounds>,
    /// Restrict sources to sets produced by this analysis model.
    pub model: Option<String>,
    /// Patch mode: the slide is a small standalone image, return every
    /// feature whole instead of filtering.
    #[serde(default)]
    pub patch: bool,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Orchestrates the annotation pipeline over injected stores.
pub struct PrecomputeService {
    annotations: Arc<dyn AnnotationStore>,
    hex_cells: Arc<dyn HexCellStore>,
    config: PipelineConfig,
    stop: AtomicBool,
}

impl PrecomputeService {
    pub fn new(annotations: Arc<dyn AnnotationStore>, hex_cells: Arc<dyn HexCellStore>) -> Self {
        Self::with_config(annotations, hex_cells, PipelineConfig::default())
    }

    pub fn with_config(
        annotations: Arc<dyn AnnotationStore>,
        hex_cells: Arc<dyn HexCellStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            annotations,
            hex_cells,
            config,
            stop: AtomicBool::new(false),
        }
    }

    /// Ask a running batch to stop after the unit in flight. The flag is
    /// one-way for the lifetime of the service; a stopped service is
    /// replaced, not reused.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Ingestion and precompute
    // ------------------------------------------------------------------

    /// Validate, store, and immediately precompute one uploaded set.
    ///
    /// Validation runs before the catalog write: a set whose slide cannot
    /// be projected or whose payload is not a feature collection is
    /// rejected whole and nothing is stored.
    pub fn ingest(
        &self,
        set: &AnnotationSet,
        resolutions: Option<&[Resolution]>,
        overwrite: bool,
    ) -> Result<UnitReport, PipelineError> {
        validate_identifier("filename", &set.filename)?;
        validate_identifier("slide id", &set.slide_id)?;
        SlideProjection::new(set.image_width, set.image_height)?;
        parse_features(&set.features)?;

        self.annotations.put(set, overwrite)?;
        info!(
            "Ingested annotation set '{}' for slide '{}' ({}x{})",
            set.filename, set.slide_id, set.image_width, set.image_height
        );
        self.process_set(set, self.resolutions_or_default(resolutions))
    }

    /// Recompute the cells of one cataloged unit.
    pub fn compute_for_unit(
        &self,
        filename: &str,
        slide_id: &str,
        resolutions: Option<&[Resolution]>,
    ) -> Result<UnitReport, PipelineError> {
        validate_identifier("filename", filename)?;
        validate_identifier("slide id", slide_id)?;

        let set = match self.annotations.find(filename, slide_id)? {
            Some(set) => set,
            None => {
                return Err(PipelineError::SetNotFound {
                    filename: filename.to_string(),
                    slide_id: slide_id.to_string(),
                })
            }
        };
        self.process_set(&set, self.resolutions_or_default(resolutions))
    }

    /// Precompute every unit in the catalog, one at a time.
    ///
    /// A failing unit is skipped with its failure stage recorded and the
    /// run continues; the returned report carries both outcomes. The only
    /// hard errors are an unreadable or empty catalog.
    pub fn compute_for_all_units(
        &self,
        resolutions: Option<&[Resolution]>,
    ) -> Result<BatchReport, PipelineError> {
        let sets = self.annotations.all()?;
        if sets.is_empty() {
            return Err(PipelineError::input("no annotation sets to precompute"));
        }

        let resolutions = self.resolutions_or_default(resolutions);
        let mut report = BatchReport::new();
        info!(
            "Precompute run {} started: {} units",
            report.run_id,
            sets.len()
        );

        for set in &sets {
            if self.stop_requested() {
                warn!(
                    "Precompute run {} stopped early after {} of {} units",
                    report.run_id,
                    report.completed.len() + report.skipped.len(),
                    sets.len()
                );
                report.stopped_early = true;
                break;
            }

            match self.process_set(set, resolutions) {
                Ok(unit) => report.completed.push(unit),
                Err(error) => {
                    let stage = failure_stage(&error);
                    warn!(
                        "Unit '{}' on slide '{}' skipped at stage {}: {}",
                        set.filename, set.slide_id, stage, error
                    );
                    report.skipped.push(SkippedUnit {
                        filename: set.filename.clone(),
                        slide_id: set.slide_id.clone(),
                        stage,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            "Precompute run {} finished: {} completed, {} skipped",
            report.run_id,
            report.completed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Run one unit through normalization, aggregation, and persistence.
    fn process_set(
        &self,
        set: &AnnotationSet,
        resolutions: &[Resolution],
    ) -> Result<UnitReport, PipelineError> {
        let projection = SlideProjection::new(set.image_width, set.image_height)?;
        let batch = parse_features(&set.features)?;
        for warning in &batch.warnings {
            debug!("Unit '{}' on slide '{}': {}", set.filename, set.slide_id, warning);
        }

        let mut summaries = Vec::with_capacity(resolutions.len());
        let mut warnings = batch.warnings.clone();
        for &resolution in resolutions {
            let binner = SlideBinner::new(set.slide_id.as_str(), projection, resolution);
            let binned = binner.bin(&batch.features);
            for warning in &binned.warnings {
                debug!("Unit '{}' on slide '{}': {}", set.filename, set.slide_id, warning);
            }

            let outcome =
                self.hex_cells
                    .replace(&set.slide_id, u8::from(resolution), &binned.cells)?;
            for failure in &outcome.encode_failures {
                warn!(
                    "Slide '{}' at resolution {}: cell left out of write: {}",
                    set.slide_id,
                    u8::from(resolution),
                    failure
                );
            }
            info!(
                "Precomputed slide '{}' at resolution {}: {} cells from {} samples, {} replaced",
                set.slide_id,
                u8::from(resolution),
                outcome.written,
                binned.samples_folded,
                outcome.removed
            );

            summaries.push(ResolutionSummary {
                resolution: u8::from(resolution),
                cells_written: outcome.written,
                cells_removed: outcome.removed,
                samples_folded: binned.samples_folded,
                encode_failures: outcome.encode_failures,
            });
            warnings.extend(binned.warnings);
        }

        Ok(UnitReport {
            filename: set.filename.clone(),
            slide_id: set.slide_id.clone(),
            resolutions: summaries,
            warnings,
        })
    }

    fn resolutions_or_default<'a>(
        &'a self,
        requested: Option<&'a [Resolution]>,
    ) -> &'a [Resolution] {
        match requested {
            Some(resolutions) if !resolutions.is_empty() => resolutions,
            _ => &self.config.resolutions,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Aggregated cells for one slide at one resolution, in hex-id order.
    pub fn query_hex_cells(
        &self,
        slide_id: &str,
        resolution: Resolution,
    ) -> Result<Vec<HexCell>, PipelineError> {
        validate_identifier("slide id", slide_id)?;

        let cells = self.hex_cells.find(slide_id, u8::from(resolution))?;
        if cells.is_empty() {
            return Err(PipelineError::CellsNotFound {
                slide_id: slide_id.to_string(),
                resolution: u8::from(resolution),
            });
        }
        Ok(cells)
    }

    /// Raw features inside a viewport, grouped by source set filename.
    ///
    /// Every matching source appears in the result, including those the
    /// viewport reduced to nothing; a client distinguishes "this layer is
    /// empty here" from "this layer does not exist".
    pub fn query_viewport(
        &self,
        request: &ViewportRequest,
    ) -> Result<BTreeMap<String, Vec<Feature>>, PipelineError> {
        let slide_id = match &request.slide_id {
            Some(slide_id) => {
                validate_identifier("slide id", slide_id)?;
                slide_id.as_str()
            }
            None => return Err(PipelineError::input("viewport query requires a slide id")),
        };
        let bounds = match request.bounds {
            Some(raw) => ViewportBounds::new(raw.x_min, raw.x_max, raw.y_min, raw.y_max),
            None => return Err(PipelineError::input("viewport query requires bounds")),
        };
        if !bounds.is_finite() {
            return Err(PipelineError::input(
                "viewport bounds must be finite numbers",
            ));
        }

        let filter = if request.patch {
            ViewportFilter::passthrough()
        } else {
            ViewportFilter::new(bounds)
        };

        let sets = self.annotations.for_slide(slide_id)?;
        if sets.is_empty() {
            return Err(PipelineError::SlideNotFound(slide_id.to_string()));
        }

        let mut sources = BTreeMap::new();
        for set in &sets {
            if !set.matches_model(request.model.as_deref()) {
                debug!(
                    "Viewport query on slide '{}': set '{}' excluded by model restriction",
                    slide_id, set.filename
                );
                continue;
            }
            let projection = SlideProjection::new(set.image_width, set.image_height)?;
            let batch = parse_features(&set.features)?;
            let kept = filter.filter_features(&batch.features, &projection);
            debug!(
                "Viewport query on slide '{}': set '{}' reduced {} -> {} features",
                slide_id,
                set.filename,
                batch.features.len(),
                kept.len()
            );
            sources.insert(set.filename.clone(), kept);
        }

        // Sets exist for the slide but none carry the requested model.
        if sources.is_empty() {
            return Err(PipelineError::SlideNotFound(slide_id.to_string()));
        }
        Ok(sources)
    }
}

/// Map a unit failure to the stage it occurred in.
fn failure_stage(error: &PipelineError) -> UnitStage {
    match error {
        PipelineError::SetNotFound { .. } | PipelineError::SlideNotFound(_) => UnitStage::Located,
        PipelineError::Projection(_) => UnitStage::Normalized,
        PipelineError::Features(_) | PipelineError::Input(_) => UnitStage::Aggregated,
        PipelineError::Store(_) | PipelineError::CellsNotFound { .. } => UnitStage::Persisted,
    }
}

/// Identifiers become storage key segments; they must be non-empty and
/// free of the NUL byte the key layout uses as a separator.
fn validate_identifier(what: &str, value: &str) -> Result<(), PipelineError> {
    if value.is_empty() {
        return Err(PipelineError::Input(format!("{} must not be empty", what)));
    }
    if value.contains('\0') {
        return Err(PipelineError::Input(format!(
            "{} must not contain NUL bytes",
            what
        )));
    }
    Ok(())
}

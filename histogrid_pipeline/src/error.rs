//! Pipeline error taxonomy.
//!
//! Callers route on three classes: invalid input (rejected before any
//! lookup touches a store), not-found (the key has no data, which is
//! distinct from a query that filtered down to nothing), and internal
//! failures passed through from the layers below.

use histogrid_core::{FeatureError, ProjectionError};
use histogrid_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller-supplied input was missing or malformed.
    #[error("invalid input: {0}")]
    Input(String),

    /// No annotation sets exist for the slide (or none match the
    /// requested model).
    #[error("no annotation sets found for slide '{0}'")]
    SlideNotFound(String),

    /// The (filename, slide) unit is not in the catalog.
    #[error("annotation set '{filename}' not found for slide '{slide_id}'")]
    SetNotFound { filename: String, slide_id: String },

    /// Nothing precomputed for the (slide, resolution) key.
    #[error("no hex cells found for slide '{slide_id}' at resolution {resolution}")]
    CellsNotFound { slide_id: String, resolution: u8 },

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Features(#[from] FeatureError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Shorthand for [`PipelineError::Input`].
    pub fn input(message: impl Into<String>) -> Self {
        PipelineError::Input(message.into())
    }

    /// True for the not-found family, so a transport layer can map these
    /// without matching every variant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::SlideNotFound(_)
                | PipelineError::SetNotFound { .. }
                | PipelineError::CellsNotFound { .. }
        )
    }
}

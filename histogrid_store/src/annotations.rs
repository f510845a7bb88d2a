//! Annotation-set catalog and raw geometry storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// One uploaded annotation set: the raw geometry payload plus the slide
/// metadata the pipeline needs to locate and normalize it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSet {
    /// Upload filename; together with `slide_id` it identifies the set.
    pub filename: String,
    /// Slide the annotations belong to.
    pub slide_id: String,
    /// Analysis model that produced the set, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Slide width in pixels, from the pyramid descriptor.
    pub image_width: u32,
    /// Slide height in pixels.
    pub image_height: u32,
    /// Raw GeoJSON payload (FeatureCollection or feature array), stored
    /// verbatim and parsed leniently at read time.
    pub features: Value,
}

impl AnnotationSet {
    /// True when this set satisfies a model restriction. An absent
    /// restriction matches every set; a present one matches only sets
    /// tagged with exactly that model, so untagged sets never leak into
    /// a restricted query.
    pub fn matches_model(&self, model: Option<&str>) -> bool {
        match model {
            None => true,
            Some(wanted) => self.model.as_deref() == Some(wanted),
        }
    }
}

/// Catalog plus blob storage for annotation sets.
///
/// Implementations are injected at startup and must be thread-safe so
/// batch runs can fan units out across workers.
pub trait AnnotationStore: Send + Sync {
    /// Store a set. Fails with [`StoreError::AlreadyExists`] when the
    /// (filename, slide) pair is taken, unless `overwrite` is set.
    fn put(&self, set: &AnnotationSet, overwrite: bool) -> Result<(), StoreError>;

    /// True when a set with this filename exists for the slide.
    fn contains(&self, filename: &str, slide_id: &str) -> Result<bool, StoreError>;

    /// Catalog lookup for one unit.
    fn find(&self, filename: &str, slide_id: &str) -> Result<Option<AnnotationSet>, StoreError>;

    /// Every set stored for a slide, in filename order.
    fn for_slide(&self, slide_id: &str) -> Result<Vec<AnnotationSet>, StoreError>;

    /// Every set in the catalog, in (slide, filename) order.
    fn all(&self) -> Result<Vec<AnnotationSet>, StoreError>;
}

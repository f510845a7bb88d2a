//! In-memory store doubles.
//!
//! Same contracts as the sled stores, backed by mutexed maps; pipeline
//! tests run against these without touching a filesystem.

use std::collections::BTreeMap;
use std::sync::Mutex;

use histogrid_core::HexCell;

use crate::annotations::{AnnotationSet, AnnotationStore};
use crate::cells::{HexCellStore, ReplaceOutcome};
use crate::error::StoreError;

/// [`AnnotationStore`] double backed by a `BTreeMap`, so iteration order
/// matches the sled key layout: (slide, filename).
#[derive(Default)]
pub struct MemoryAnnotationStore {
    sets: Mutex<BTreeMap<(String, String), AnnotationSet>>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnnotationStore for MemoryAnnotationStore {
    fn put(&self, set: &AnnotationSet, overwrite: bool) -> Result<(), StoreError> {
        let mut sets = self
            .sets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = (set.slide_id.clone(), set.filename.clone());
        if !overwrite && sets.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                filename: set.filename.clone(),
                slide_id: set.slide_id.clone(),
            });
        }
        sets.insert(key, set.clone());
        Ok(())
    }

    fn contains(&self, filename: &str, slide_id: &str) -> Result<bool, StoreError> {
        let sets = self
            .sets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sets.contains_key(&(slide_id.to_string(), filename.to_string())))
    }

    fn find(&self, filename: &str, slide_id: &str) -> Result<Option<AnnotationSet>, StoreError> {
        let sets = self
            .sets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sets
            .get(&(slide_id.to_string(), filename.to_string()))
            .cloned())
    }

    fn for_slide(&self, slide_id: &str) -> Result<Vec<AnnotationSet>, StoreError> {
        let sets = self
            .sets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sets
            .iter()
            .filter(|((slide, _), _)| slide == slide_id)
            .map(|(_, set)| set.clone())
            .collect())
    }

    fn all(&self) -> Result<Vec<AnnotationSet>, StoreError> {
        let sets = self
            .sets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(sets.values().cloned().collect())
    }
}

/// [`HexCellStore`] double. The single map mutex gives the same
/// one-writer-per-key guarantee the sled store builds from key locks.
#[derive(Default)]
pub struct MemoryHexCellStore {
    cells: Mutex<BTreeMap<(String, u8), Vec<HexCell>>>,
}

impl MemoryHexCellStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HexCellStore for MemoryHexCellStore {
    fn find(&self, slide_id: &str, resolution: u8) -> Result<Vec<HexCell>, StoreError> {
        let cells = self
            .cells
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(cells
            .get(&(slide_id.to_string(), resolution))
            .cloned()
            .unwrap_or_default())
    }

    fn replace(
        &self,
        slide_id: &str,
        resolution: u8,
        cells: &[HexCell],
    ) -> Result<ReplaceOutcome, StoreError> {
        let mut outcome = ReplaceOutcome::default();
        let mut kept = Vec::with_capacity(cells.len());
        // Encode exactly like the sled store would, so failures surface
        // identically.
        for cell in cells {
            match serde_json::to_vec(cell) {
                Ok(_) => {
                    kept.push(cell.clone());
                    outcome.written += 1;
                }
                Err(err) => {
                    outcome
                        .encode_failures
                        .push(format!("{}: {}", cell.hex_id, err));
                }
            }
        }

        let mut map = self
            .cells
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = map.insert((slide_id.to_string(), resolution), kept);
        outcome.removed = previous.map_or(0, |cells| cells.len());
        Ok(outcome)
    }
}

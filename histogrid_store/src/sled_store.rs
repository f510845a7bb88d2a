//! Sled-backed production stores.
//!
//! One process-wide [`StoreHandle`] owns the embedded database; each
//! store wraps one tree of it. Keys are NUL-joined component paths so a
//! `scan_prefix` walks exactly one slide (or one slide + resolution)
//! range; identifiers are validated NUL-free before they reach a key.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use histogrid_core::HexCell;

use crate::annotations::{AnnotationSet, AnnotationStore};
use crate::cells::{HexCellStore, ReplaceOutcome};
use crate::error::StoreError;

const KEY_SEPARATOR: u8 = 0;

// Slide id leads every key so per-slide reads are prefix scans.
fn annotation_key(filename: &str, slide_id: &str) -> Vec<u8> {
    let mut key = slide_prefix(slide_id);
    key.extend_from_slice(filename.as_bytes());
    key
}

fn slide_prefix(slide_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(slide_id.len() + 1);
    key.extend_from_slice(slide_id.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

fn cell_prefix(slide_id: &str, resolution: u8) -> Vec<u8> {
    let mut key = slide_prefix(slide_id);
    key.push(resolution);
    key.push(KEY_SEPARATOR);
    key
}

fn cell_key(slide_id: &str, resolution: u8, hex_id: &str) -> Vec<u8> {
    let mut key = cell_prefix(slide_id, resolution);
    key.extend_from_slice(hex_id.as_bytes());
    key
}

// ============================================================================
// STORE HANDLE
// ============================================================================

/// Process-wide handle to the embedded database.
///
/// Open it once at startup and hand the derived stores to whatever needs
/// them; nothing in this crate reaches for an ambient global client.
#[derive(Clone)]
pub struct StoreHandle {
    db: sled::Db,
}

impl StoreHandle {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Temporary database whose contents vanish on drop; for tests and
    /// scratch runs.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn annotations(&self) -> Result<SledAnnotationStore, StoreError> {
        let tree = self.db.open_tree("annotation_sets")?;
        Ok(SledAnnotationStore { tree })
    }

    pub fn hex_cells(&self) -> Result<SledHexCellStore, StoreError> {
        let tree = self.db.open_tree("hex_cells")?;
        Ok(SledHexCellStore {
            tree,
            locks: KeyLocks::default(),
        })
    }

    /// Flush buffered writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

// ============================================================================
// ANNOTATION SETS
// ============================================================================

/// Sled-backed [`AnnotationStore`].
pub struct SledAnnotationStore {
    tree: sled::Tree,
}

impl AnnotationStore for SledAnnotationStore {
    fn put(&self, set: &AnnotationSet, overwrite: bool) -> Result<(), StoreError> {
        let key = annotation_key(&set.filename, &set.slide_id);
        if !overwrite && self.tree.contains_key(&key)? {
            return Err(StoreError::AlreadyExists {
                filename: set.filename.clone(),
                slide_id: set.slide_id.clone(),
            });
        }
        let encoded = serde_json::to_vec(set)?;
        self.tree.insert(key, encoded)?;
        self.tree.flush()?;
        Ok(())
    }

    fn contains(&self, filename: &str, slide_id: &str) -> Result<bool, StoreError> {
        Ok(self.tree.contains_key(annotation_key(filename, slide_id))?)
    }

    fn find(&self, filename: &str, slide_id: &str) -> Result<Option<AnnotationSet>, StoreError> {
        match self.tree.get(annotation_key(filename, slide_id))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn for_slide(&self, slide_id: &str) -> Result<Vec<AnnotationSet>, StoreError> {
        let mut sets = Vec::new();
        for entry in self.tree.scan_prefix(slide_prefix(slide_id)) {
            let (_, raw) = entry?;
            sets.push(serde_json::from_slice(&raw)?);
        }
        Ok(sets)
    }

    fn all(&self) -> Result<Vec<AnnotationSet>, StoreError> {
        let mut sets = Vec::new();
        for entry in self.tree.iter() {
            let (_, raw) = entry?;
            sets.push(serde_json::from_slice(&raw)?);
        }
        Ok(sets)
    }
}

// ============================================================================
// HEX CELLS
// ============================================================================

/// Sled-backed [`HexCellStore`].
///
/// `replace` applies the removal of the previous generation and the
/// insertion of the new one as a single [`sled::Batch`], and a
/// per-(slide, resolution) lock serializes writers on the same key while
/// keeping `find` from interleaving with a writer's scan.
pub struct SledHexCellStore {
    tree: sled::Tree,
    locks: KeyLocks,
}

/// One mutex per (slide, resolution) key, created on first use.
#[derive(Clone, Default)]
struct KeyLocks {
    inner: Arc<Mutex<HashMap<(String, u8), Arc<Mutex<()>>>>>,
}

impl KeyLocks {
    fn lock_for(&self, slide_id: &str, resolution: u8) -> Arc<Mutex<()>> {
        let mut registry = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        registry
            .entry((slide_id.to_string(), resolution))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl HexCellStore for SledHexCellStore {
    fn find(&self, slide_id: &str, resolution: u8) -> Result<Vec<HexCell>, StoreError> {
        let key_lock = self.locks.lock_for(slide_id, resolution);
        let _held = key_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut cells = Vec::new();
        for entry in self.tree.scan_prefix(cell_prefix(slide_id, resolution)) {
            let (_, raw) = entry?;
            cells.push(serde_json::from_slice(&raw)?);
        }
        Ok(cells)
    }

    fn replace(
        &self,
        slide_id: &str,
        resolution: u8,
        cells: &[HexCell],
    ) -> Result<ReplaceOutcome, StoreError> {
        let key_lock = self.locks.lock_for(slide_id, resolution);
        let _held = key_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut batch = sled::Batch::default();
        let mut outcome = ReplaceOutcome::default();

        for entry in self.tree.scan_prefix(cell_prefix(slide_id, resolution)) {
            let (key, _) = entry?;
            batch.remove(key);
            outcome.removed += 1;
        }

        for cell in cells {
            match serde_json::to_vec(cell) {
                Ok(encoded) => {
                    batch.insert(
                        cell_key(slide_id, resolution, &cell.hex_id.to_string()),
                        encoded,
                    );
                    outcome.written += 1;
                }
                Err(err) => {
                    outcome
                        .encode_failures
                        .push(format!("{}: {}", cell.hex_id, err));
                }
            }
        }

        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use histogrid_core::ClassificationCount;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample_set(filename: &str, slide_id: &str) -> AnnotationSet {
        AnnotationSet {
            filename: filename.to_string(),
            slide_id: slide_id.to_string(),
            model: Some("nucleus-v2".to_string()),
            image_width: 100,
            image_height: 100,
            features: json!([{ "id": "f-1", "geometry": { "type": "Point", "coordinates": [1.0, 2.0] } }]),
        }
    }

    fn sample_cell(slide_id: &str, resolution: u8, hex: &str, count: u64) -> HexCell {
        let mut classifications = BTreeMap::new();
        classifications.insert(
            "Tumor".to_string(),
            ClassificationCount {
                count,
                color: [200, 0, 0],
            },
        );
        HexCell {
            slide_id: slide_id.to_string(),
            hex_id: hex.parse().unwrap(),
            resolution,
            feature_ids: vec!["f-1".to_string()],
            annotation_count: count,
            classifications,
            image_coordinates: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]],
        }
    }

    #[test]
    fn test_annotation_round_trip() {
        let store = StoreHandle::temporary().unwrap().annotations().unwrap();
        let set = sample_set("cells.geojson", "slide-1");

        store.put(&set, false).unwrap();
        assert!(store.contains("cells.geojson", "slide-1").unwrap());
        assert_eq!(store.find("cells.geojson", "slide-1").unwrap(), Some(set));
        assert_eq!(store.find("cells.geojson", "slide-2").unwrap(), None);
    }

    #[test]
    fn test_put_rejects_duplicates_unless_overwrite() {
        let store = StoreHandle::temporary().unwrap().annotations().unwrap();
        let mut set = sample_set("cells.geojson", "slide-1");

        store.put(&set, false).unwrap();
        assert!(matches!(
            store.put(&set, false),
            Err(StoreError::AlreadyExists { .. })
        ));

        set.image_width = 222;
        store.put(&set, true).unwrap();
        let stored = store.find("cells.geojson", "slide-1").unwrap().unwrap();
        assert_eq!(stored.image_width, 222);
    }

    #[test]
    fn test_for_slide_does_not_leak_across_prefixes() {
        let store = StoreHandle::temporary().unwrap().annotations().unwrap();
        store.put(&sample_set("a.geojson", "slide-1"), false).unwrap();
        store.put(&sample_set("b.geojson", "slide-1"), false).unwrap();
        store.put(&sample_set("c.geojson", "slide-10"), false).unwrap();

        let sets = store.for_slide("slide-1").unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].filename, "a.geojson");
        assert_eq!(sets[1].filename, "b.geojson");

        assert_eq!(store.for_slide("slide-10").unwrap().len(), 1);
        assert!(store.for_slide("slide-2").unwrap().is_empty());
        assert_eq!(store.all().unwrap().len(), 3);
    }

    #[test]
    fn test_replace_then_find_round_trip() {
        let store = StoreHandle::temporary().unwrap().hex_cells().unwrap();
        let cells = vec![
            sample_cell("slide-1", 2, "85283473fffffff", 3),
            sample_cell("slide-1", 2, "8a2a1072b59ffff", 7),
        ];

        let outcome = store.replace("slide-1", 2, &cells).unwrap();
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.removed, 0);
        assert!(outcome.encode_failures.is_empty());

        let found = store.find("slide-1", 2).unwrap();
        assert_eq!(found, cells);
    }

    #[test]
    fn test_replace_swaps_the_whole_generation() {
        let store = StoreHandle::temporary().unwrap().hex_cells().unwrap();
        let first = vec![
            sample_cell("slide-1", 2, "85283473fffffff", 3),
            sample_cell("slide-1", 2, "8a2a1072b59ffff", 7),
        ];
        store.replace("slide-1", 2, &first).unwrap();

        let second = vec![sample_cell("slide-1", 2, "8a2a1072b59ffff", 1)];
        let outcome = store.replace("slide-1", 2, &second).unwrap();
        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.written, 1);

        let found = store.find("slide-1", 2).unwrap();
        assert_eq!(found, second);
    }

    #[test]
    fn test_replace_with_empty_clears_the_key() {
        let store = StoreHandle::temporary().unwrap().hex_cells().unwrap();
        store
            .replace("slide-1", 2, &[sample_cell("slide-1", 2, "85283473fffffff", 3)])
            .unwrap();

        let outcome = store.replace("slide-1", 2, &[]).unwrap();
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.written, 0);
        assert!(store.find("slide-1", 2).unwrap().is_empty());
    }

    #[test]
    fn test_keys_are_isolated_by_slide_and_resolution() {
        let store = StoreHandle::temporary().unwrap().hex_cells().unwrap();
        store
            .replace("slide-1", 2, &[sample_cell("slide-1", 2, "85283473fffffff", 3)])
            .unwrap();
        store
            .replace("slide-1", 5, &[sample_cell("slide-1", 5, "8a2a1072b59ffff", 4)])
            .unwrap();
        store
            .replace("slide-10", 2, &[sample_cell("slide-10", 2, "8a2a1072b59ffff", 5)])
            .unwrap();

        assert_eq!(store.find("slide-1", 2).unwrap().len(), 1);
        assert_eq!(store.find("slide-1", 5).unwrap().len(), 1);
        assert_eq!(store.find("slide-10", 2).unwrap().len(), 1);
        assert!(store.find("slide-10", 5).unwrap().is_empty());

        store.replace("slide-1", 2, &[]).unwrap();
        assert_eq!(store.find("slide-1", 5).unwrap().len(), 1);
        assert_eq!(store.find("slide-10", 2).unwrap().len(), 1);
    }

    #[test]
    fn test_cells_come_back_in_hex_id_order() {
        let store = StoreHandle::temporary().unwrap().hex_cells().unwrap();
        // Insert out of order; the key layout sorts them.
        let cells = vec![
            sample_cell("slide-1", 2, "8a2a1072b59ffff", 7),
            sample_cell("slide-1", 2, "85283473fffffff", 3),
        ];
        store.replace("slide-1", 2, &cells).unwrap();

        let found = store.find("slide-1", 2).unwrap();
        assert_eq!(found[0].hex_id.to_string(), "85283473fffffff");
        assert_eq!(found[1].hex_id.to_string(), "8a2a1072b59ffff");
    }
}

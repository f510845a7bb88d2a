//! Precomputed hex-cell storage.

use histogrid_core::HexCell;

use crate::error::StoreError;

/// Result of one full-replacement write.
#[derive(Debug, Clone, Default)]
pub struct ReplaceOutcome {
    /// Cells of the previous generation removed by the replacement.
    pub removed: usize,
    /// Cells written.
    pub written: usize,
    /// Cells that failed to encode and were left out of the write. The
    /// replacement itself still goes through; failures are surfaced to
    /// the caller, not raised.
    pub encode_failures: Vec<String>,
}

/// Storage for aggregated cells, keyed by (slide, resolution, hex id).
pub trait HexCellStore: Send + Sync {
    /// All cells for one slide at one resolution, in hex-id order.
    fn find(&self, slide_id: &str, resolution: u8) -> Result<Vec<HexCell>, StoreError>;

    /// Atomically replace every cell of a (slide, resolution) key with
    /// `cells`. Readers observe the previous complete generation or the
    /// new one, never a mix; concurrent replacements of the same key are
    /// serialized while other keys proceed independently.
    fn replace(
        &self,
        slide_id: &str,
        resolution: u8,
        cells: &[HexCell],
    ) -> Result<ReplaceOutcome, StoreError>;
}

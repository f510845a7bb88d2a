//! HistoGrid Persistence Layer
//!
//! Storage seams for the annotation pipeline: the catalog of uploaded
//! annotation sets (raw geometry plus slide metadata) and the precomputed
//! hex cells. Production uses one process-wide embedded database opened
//! at startup and injected wherever a store is needed ([`StoreHandle`]);
//! tests use `StoreHandle::temporary()` or the in-memory doubles.

mod annotations;
mod cells;
mod error;
mod memory;
mod sled_store;

pub use annotations::{AnnotationSet, AnnotationStore};
pub use cells::{HexCellStore, ReplaceOutcome};
pub use error::StoreError;
pub use memory::{MemoryAnnotationStore, MemoryHexCellStore};
pub use sled_store::{SledAnnotationStore, SledHexCellStore, StoreHandle};

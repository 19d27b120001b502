pub mod block;
pub mod record;

pub use block::{Block, BlockCategory};
pub use record::{
    ChurnLevel, DependencyRecord, GitEnrichment, ImportEdge, RankedResult, VectorRecord,
    WatchListEntry,
};

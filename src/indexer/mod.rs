pub mod embedder;
pub mod reranker;

pub use embedder::*;
pub use reranker::*;

//! Entities added for the indexing pipeline's vector store contract
//! (not carried over from the legacy MCP-tool chunk model).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An import or runtime-registry edge discovered by an extractor strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportEdge {
    pub source: String,
    pub symbols: BTreeSet<String>,
    pub runtime: bool,
}

impl ImportEdge {
    pub fn new(source: impl Into<String>, runtime: bool) -> Self {
        Self {
            source: source.into(),
            symbols: BTreeSet::new(),
            runtime,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbols.insert(symbol.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChurnLevel {
    Low,
    Medium,
    High,
}

impl ChurnLevel {
    pub fn from_commit_count(count: u32) -> Self {
        if count <= 3 {
            ChurnLevel::Low
        } else if count <= 10 {
            ChurnLevel::Medium
        } else {
            ChurnLevel::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChurnLevel::Low => "low",
            ChurnLevel::Medium => "medium",
            ChurnLevel::High => "high",
        }
    }
}

/// Per-file git enrichment attached to a [`VectorRecord`] when git
/// integration is enabled and the project is inside a work-tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitEnrichment {
    pub last_commit_author: Option<String>,
    pub last_commit_email: Option<String>,
    pub last_commit_date: Option<String>,
    pub last_commit_hash: Option<String>,
    pub last_commit_message: Option<String>,
    pub commit_count_window: Option<u32>,
    pub churn_level: Option<ChurnLevel>,
}

/// One row of the `code_search` table: a block plus its embedding vector
/// and optional summary/git enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub collection: String,
    pub project_name: String,
    pub name: String,
    pub r#type: String,
    pub category: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub comments: String,
    pub content: String,
    pub summary: Option<String>,
    pub file_hash: String,
    pub vector: Vec<f32>,
    pub git: GitEnrichment,
}

/// One row of the `dependencies` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub file_path: String,
    pub project_name: String,
    pub collection: String,
    pub imports: Vec<ImportEdge>,
    pub exports: Vec<String>,
}

/// A persisted watch-list entry, surviving daemon restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchListEntry {
    pub folder_path: String,
    pub project_name: String,
    pub collection: String,
}

/// A ranked search hit returned by the search front-end, after hybrid
/// retrieval and optional reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub file_path: String,
    pub name: String,
    pub r#type: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub summary: Option<String>,
    pub score: f32,
    pub rerank_score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn churn_level_thresholds() {
        assert_eq!(ChurnLevel::from_commit_count(0), ChurnLevel::Low);
        assert_eq!(ChurnLevel::from_commit_count(3), ChurnLevel::Low);
        assert_eq!(ChurnLevel::from_commit_count(4), ChurnLevel::Medium);
        assert_eq!(ChurnLevel::from_commit_count(10), ChurnLevel::Medium);
        assert_eq!(ChurnLevel::from_commit_count(11), ChurnLevel::High);
    }

    #[test]
    fn import_edge_symbols_dedupe() {
        let edge = ImportEdge::new("models.User", true)
            .with_symbol("findById")
            .with_symbol("findById");
        assert_eq!(edge.symbols.len(), 1);
    }
}

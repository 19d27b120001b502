//! Extractor Registry (component C1): dispatches a file to one of N
//! language strategies, each turning source text into a uniform list of
//! [`Block`]s plus an imports/exports metadata record.

mod chunking;
mod code;
mod data;
mod fallback;
mod markdown;
mod xml;

use crate::models::{Block, ImportEdge};

pub use code::CodeStrategy;
pub use data::{JsonStrategy, TomlStrategy};
pub use markdown::{MarkdownPolicy, MarkdownStrategy};
pub use xml::XmlStrategy;

/// What a strategy produces for one file: its blocks, plus the
/// dependency metadata written to the `dependencies` table.
#[derive(Debug, Clone, Default)]
pub struct ExtractResult {
    pub blocks: Vec<Block>,
    pub imports: Vec<ImportEdge>,
    pub exports: Vec<String>,
}

pub trait ExtractorStrategy: Send + Sync {
    /// Lowercase extensions (without the leading dot) this strategy claims.
    fn extensions(&self) -> &'static [&'static str];

    /// Extracts blocks and dependency metadata. Must never panic on
    /// malformed input — on an internal parse failure a strategy should
    /// return the whole-file fallback itself (see `fallback::whole_file_block`).
    fn extract(&self, file_path: &str, content: &str) -> ExtractResult;
}

pub struct ExtractorRegistry {
    strategies: Vec<Box<dyn ExtractorStrategy>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(CodeStrategy::rust()),
                Box::new(CodeStrategy::typescript()),
                Box::new(CodeStrategy::python()),
                Box::new(CodeStrategy::go()),
                Box::new(MarkdownStrategy::new()),
                Box::new(JsonStrategy),
                Box::new(TomlStrategy),
                Box::new(XmlStrategy),
            ],
        }
    }

    /// Dispatches to the first strategy claiming `file_path`'s lowercased
    /// extension; files with no claimed extension get the whole-file
    /// fallback block with empty imports/exports.
    pub fn extract(&self, file_path: &str, content: &str) -> ExtractResult {
        let ext = file_path
            .rsplit('.')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        for strategy in &self.strategies {
            if strategy.extensions().contains(&ext.as_str()) {
                return strategy.extract(file_path, content);
            }
        }
        fallback::whole_file_block(file_path, content)
    }

    /// The union of extensions every registered strategy claims, used by
    /// the indexing pipeline's enumeration step to build its known-
    /// indexable extension set (SPEC_FULL §4.7 step 5).
    pub fn indexable_extensions(&self) -> Vec<&'static str> {
        self.strategies
            .iter()
            .flat_map(|s| s.extensions().iter().copied())
            .collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_by_extension() {
        let registry = ExtractorRegistry::new();
        let result = registry.extract("src/lib.rs", "pub fn hi() {}\n");
        assert!(result.blocks.iter().any(|b| b.name == "hi"));
    }

    #[test]
    fn unknown_extension_falls_back_to_whole_file() {
        let registry = ExtractorRegistry::new();
        let result = registry.extract("data.bin", "whatever content");
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].r#type, "file");
        assert!(result.imports.is_empty());
        assert!(result.exports.is_empty());
    }

    #[test]
    fn indexable_extensions_cover_registered_strategies() {
        let registry = ExtractorRegistry::new();
        let exts = registry.indexable_extensions();
        assert!(exts.contains(&"rs"));
        assert!(exts.contains(&"ts"));
        assert!(exts.contains(&"py"));
        assert!(exts.contains(&"go"));
        assert!(exts.contains(&"md"));
        assert!(exts.contains(&"json"));
        assert!(exts.contains(&"toml"));
    }
}

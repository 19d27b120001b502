//! The [`Block`] entity emitted by extractor strategies (component C1):
//! a parseable unit of source — either a *parent* declaration/heading or
//! a *chunk* of a large parent's body.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockCategory {
    Code,
    Documentation,
}

impl BlockCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockCategory::Code => "code",
            BlockCategory::Documentation => "documentation",
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown") {
            BlockCategory::Documentation
        } else {
            BlockCategory::Code
        }
    }
}

/// A parseable unit of source code or documentation. Either a *parent*
/// (class/method/function/.../heading) or a *chunk* of a large parent's
/// body (`parent_name` set, `r#type == "chunk"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub name: String,
    pub r#type: String,
    pub category: BlockCategory,
    /// 1-based, inclusive.
    pub start_line: u32,
    /// 1-based, inclusive. Invariant: `start_line <= end_line`.
    pub end_line: u32,
    pub comments: String,
    pub content: String,
    /// Only set when `r#type == "chunk"`.
    pub parent_name: Option<String>,
    pub file_path: String,
}

impl Block {
    pub fn is_chunk(&self) -> bool {
        self.r#type == "chunk"
    }

    /// A chunk's parent name, or its own name if it's already a parent —
    /// the identity used to key first-pass summaries (SPEC_FULL §4.7).
    pub fn summary_key(&self) -> &str {
        self.parent_name.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_from_extension() {
        assert_eq!(BlockCategory::from_extension("md").as_str(), "documentation");
        assert_eq!(BlockCategory::from_extension("ts").as_str(), "code");
    }
}

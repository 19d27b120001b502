//! Parent-to-chunk subdivision (SPEC_FULL §4.1 rule 3): a parent block
//! spanning more than [`CHUNK_THRESHOLD_LINES`] lines is subdivided into
//! chunks of up to [`CHUNK_MAX_BODY_LINES`] body-lines, preferring to cut
//! just before a line that opens a recognized control-flow construct.

use crate::models::Block;

pub const CHUNK_THRESHOLD_LINES: u32 = 50;
pub const CHUNK_MAX_BODY_LINES: usize = 20;

const BOUNDARY_KEYWORDS: &[&str] = &[
    "if ", "if(", "} else", "else ", "else{", "for ", "for(", "while ", "while(", "try",
    "switch ", "switch(", "select ", "select{", "when ", "match ", "match(",
];

/// Returns the chunk blocks for `parent`, or an empty vec if it doesn't
/// exceed the threshold. `parent` itself is left unmodified by the caller.
pub fn chunk_parent(parent: &Block) -> Vec<Block> {
    let total_lines = parent.end_line.saturating_sub(parent.start_line) + 1;
    if total_lines <= CHUNK_THRESHOLD_LINES {
        return Vec::new();
    }

    let lines: Vec<&str> = parent.content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut idx = 0usize;
    let mut ordinal = 1u32;
    while idx < lines.len() {
        let mut end = (idx + CHUNK_MAX_BODY_LINES).min(lines.len());
        if end < lines.len() {
            if let Some(cut) = (idx + 1..end).rev().find(|&i| is_boundary_line(lines[i])) {
                end = cut;
            }
        }
        let end = end.max(idx + 1);
        let chunk_lines = &lines[idx..end];
        let start_line = parent.start_line + idx as u32;
        let end_line = parent.start_line + (end - 1) as u32;

        chunks.push(Block {
            name: format!("{}#chunk{}", parent.name, ordinal),
            r#type: "chunk".to_string(),
            category: parent.category,
            start_line,
            end_line,
            comments: parent.comments.clone(),
            content: chunk_lines.join("\n"),
            parent_name: Some(parent.name.clone()),
            file_path: parent.file_path.clone(),
        });

        ordinal += 1;
        idx = end;
    }

    chunks
}

fn is_boundary_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    BOUNDARY_KEYWORDS.iter().any(|kw| trimmed.starts_with(kw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockCategory;

    fn block(lines: usize) -> Block {
        let content = (0..lines)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        Block {
            name: "big_fn".to_string(),
            r#type: "function".to_string(),
            category: BlockCategory::Code,
            start_line: 1,
            end_line: lines as u32,
            comments: "doc".to_string(),
            content,
            parent_name: None,
            file_path: "f.rs".to_string(),
        }
    }

    #[test]
    fn short_parent_has_no_chunks() {
        assert!(chunk_parent(&block(10)).is_empty());
    }

    #[test]
    fn long_parent_is_subdivided_with_max_body_lines() {
        let chunks = chunk_parent(&block(100));
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.end_line - c.start_line + 1 <= CHUNK_MAX_BODY_LINES as u32);
            assert_eq!(c.parent_name.as_deref(), Some("big_fn"));
            assert_eq!(c.r#type, "chunk");
            assert_eq!(c.comments, "doc");
        }
        let covered: u32 = chunks.iter().map(|c| c.end_line - c.start_line + 1).sum();
        assert_eq!(covered, 100);
    }

    #[test]
    fn cuts_before_boundary_line_when_possible() {
        let mut lines: Vec<String> = (0..30).map(|i| format!("stmt{i};")).collect();
        lines[15] = "if condition {".to_string();
        let content = lines.join("\n");
        let b = Block {
            content,
            end_line: 30,
            ..block(30)
        };
        let chunks = chunk_parent(&b);
        assert!(chunks
            .iter()
            .any(|c| c.content.lines().last() == Some("stmt14;")));
    }
}

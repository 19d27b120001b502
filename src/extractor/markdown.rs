//! Markdown extractor strategy (SPEC_FULL §4.1 rule 7): three chunking
//! policies producing `category=documentation` blocks.

use pulldown_cmark::{Event, Options, Parser, Tag};

use crate::models::{Block, BlockCategory};

use super::{ExtractResult, ExtractorStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownPolicy {
    None,
    Paragraphs,
    Headings,
}

pub struct MarkdownStrategy {
    policy: MarkdownPolicy,
}

impl MarkdownStrategy {
    pub fn new() -> Self {
        Self {
            policy: MarkdownPolicy::Headings,
        }
    }

    pub fn with_policy(policy: MarkdownPolicy) -> Self {
        Self { policy }
    }
}

impl Default for MarkdownStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractorStrategy for MarkdownStrategy {
    fn extensions(&self) -> &'static [&'static str] {
        &["md", "markdown"]
    }

    fn extract(&self, file_path: &str, content: &str) -> ExtractResult {
        let blocks = match self.policy {
            MarkdownPolicy::None => {
                vec![doc_block(
                    "document".to_string(),
                    1,
                    line_count(content),
                    content,
                    file_path,
                )]
            }
            MarkdownPolicy::Paragraphs => paragraph_blocks(content, file_path),
            MarkdownPolicy::Headings => heading_blocks(content, file_path),
        };
        ExtractResult {
            blocks,
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }
}

fn line_count(content: &str) -> u32 {
    content.lines().count().max(1) as u32
}

fn doc_block(name: String, start_line: u32, end_line: u32, content: &str, file_path: &str) -> Block {
    Block {
        name,
        r#type: "documentation".to_string(),
        category: BlockCategory::Documentation,
        start_line,
        end_line: end_line.max(start_line),
        comments: String::new(),
        content: content.to_string(),
        parent_name: None,
        file_path: file_path.to_string(),
    }
}

fn paragraph_blocks(content: &str, file_path: &str) -> Vec<Block> {
    let lines: Vec<&str> = content.lines().collect();
    let mut blocks = Vec::new();
    let mut start: Option<usize> = None;
    let mut ordinal = 0u32;

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                ordinal += 1;
                blocks.push(doc_block(
                    format!("paragraph{ordinal}"),
                    s as u32 + 1,
                    i as u32,
                    &lines[s..i].join("\n"),
                    file_path,
                ));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        ordinal += 1;
        blocks.push(doc_block(
            format!("paragraph{ordinal}"),
            s as u32 + 1,
            lines.len() as u32,
            &lines[s..].join("\n"),
            file_path,
        ));
    }

    if blocks.is_empty() {
        blocks.push(doc_block(
            "document".to_string(),
            1,
            line_count(content),
            content,
            file_path,
        ));
    }
    blocks
}

fn heading_blocks(content: &str, file_path: &str) -> Vec<Block> {
    let offsets = heading_offsets(content);
    if offsets.is_empty() {
        return vec![doc_block(
            "document".to_string(),
            1,
            line_count(content),
            content,
            file_path,
        )];
    }

    let line_starts = line_start_offsets(content);
    let mut blocks = Vec::new();
    for (idx, &start_off) in offsets.iter().enumerate() {
        let end_off = offsets.get(idx + 1).copied().unwrap_or(content.len());
        let start_line = offset_to_line(&line_starts, start_off);
        let last_byte = end_off.saturating_sub(1).max(start_off);
        let end_line = offset_to_line(&line_starts, last_byte).max(start_line);
        let text = &content[start_off..end_off.min(content.len())];
        let name = heading_name(text);
        blocks.push(doc_block(name, start_line, end_line, text.trim_end(), file_path));
    }
    blocks
}

fn heading_name(text: &str) -> String {
    text.lines()
        .next()
        .unwrap_or("")
        .trim_start_matches('#')
        .trim()
        .to_string()
}

fn heading_offsets(content: &str) -> Vec<usize> {
    let parser = Parser::new_ext(content, Options::empty());
    let mut offsets = Vec::new();
    for (event, range) in parser.into_offset_iter() {
        if let Event::Start(Tag::Heading { .. }) = event {
            offsets.push(range.start);
        }
    }
    offsets
}

fn line_start_offsets(content: &str) -> Vec<usize> {
    let mut starts = vec![0usize];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

fn offset_to_line(line_starts: &[usize], offset: usize) -> u32 {
    match line_starts.binary_search(&offset) {
        Ok(i) => i as u32 + 1,
        Err(0) => 1,
        Err(i) => i as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_policy_splits_on_each_heading() {
        let content = "# Title\nintro text\n\n## Section\nbody\n";
        let strategy = MarkdownStrategy::with_policy(MarkdownPolicy::Headings);
        let result = strategy.extract("README.md", content);
        assert_eq!(result.blocks.len(), 2);
        assert_eq!(result.blocks[0].name, "Title");
        assert_eq!(result.blocks[1].name, "Section");
        assert!(result
            .blocks
            .iter()
            .all(|b| b.category == BlockCategory::Documentation));
    }

    #[test]
    fn no_headings_falls_back_to_single_block() {
        let content = "just plain text\nwith two lines\n";
        let strategy = MarkdownStrategy::with_policy(MarkdownPolicy::Headings);
        let result = strategy.extract("notes.md", content);
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].name, "document");
    }

    #[test]
    fn paragraphs_policy_splits_on_blank_lines() {
        let content = "first paragraph\nstill first\n\nsecond paragraph\n";
        let strategy = MarkdownStrategy::with_policy(MarkdownPolicy::Paragraphs);
        let result = strategy.extract("notes.md", content);
        assert_eq!(result.blocks.len(), 2);
    }

    #[test]
    fn none_policy_yields_single_block() {
        let content = "# A\n\n# B\n";
        let strategy = MarkdownStrategy::with_policy(MarkdownPolicy::None);
        let result = strategy.extract("notes.md", content);
        assert_eq!(result.blocks.len(), 1);
    }
}

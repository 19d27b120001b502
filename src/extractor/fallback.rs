//! Whole-file fallback block, used both when no strategy claims an
//! extension and when a strategy's own parse fails (SPEC_FULL §4.1:
//! "a strategy that throws yields the fallback single-file block").

use crate::models::{Block, BlockCategory};

use super::ExtractResult;

pub fn whole_file_block(file_path: &str, content: &str) -> ExtractResult {
    let line_count = content.lines().count().max(1) as u32;
    let name = file_path
        .rsplit('/')
        .next()
        .unwrap_or(file_path)
        .to_string();
    let ext = file_path.rsplit('.').next().unwrap_or("");

    let block = Block {
        name,
        r#type: "file".to_string(),
        category: BlockCategory::from_extension(ext),
        start_line: 1,
        end_line: line_count,
        comments: String::new(),
        content: content.to_string(),
        parent_name: None,
        file_path: file_path.to_string(),
    };

    ExtractResult {
        blocks: vec![block],
        imports: Vec::new(),
        exports: Vec::new(),
    }
}

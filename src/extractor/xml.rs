//! XML extractor strategy (SPEC_FULL §4.1 rule 8): a root block plus a
//! deduplicated set of distinct element tag names as `tag` blocks. No
//! validating parser is involved — a lightweight scan is sufficient since
//! the contract only asks for a name list, not a structured tree.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Block, BlockCategory};

use super::{ExtractResult, ExtractorStrategy};

static OPEN_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\s*([A-Za-z_][\w:.-]*)").unwrap());

pub struct XmlStrategy;

impl ExtractorStrategy for XmlStrategy {
    fn extensions(&self) -> &'static [&'static str] {
        &["xml"]
    }

    fn extract(&self, file_path: &str, content: &str) -> ExtractResult {
        let mut tags = BTreeSet::new();
        for caps in OPEN_TAG.captures_iter(content) {
            if let Some(name) = caps.get(1) {
                let text = name.as_str();
                if !text.eq_ignore_ascii_case("?xml") {
                    tags.insert(text.to_string());
                }
            }
        }

        let mut blocks = vec![Block {
            name: file_path
                .rsplit('/')
                .next()
                .unwrap_or(file_path)
                .to_string(),
            r#type: "file".to_string(),
            category: BlockCategory::Documentation,
            start_line: 1,
            end_line: content.lines().count().max(1) as u32,
            comments: String::new(),
            content: content.to_string(),
            parent_name: None,
            file_path: file_path.to_string(),
        }];

        for tag in tags {
            let line = find_tag_line(content, &tag).unwrap_or(1);
            blocks.push(Block {
                name: tag,
                r#type: "tag".to_string(),
                category: BlockCategory::Documentation,
                start_line: line,
                end_line: line,
                comments: String::new(),
                content: String::new(),
                parent_name: None,
                file_path: file_path.to_string(),
            });
        }

        ExtractResult {
            blocks,
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }
}

fn find_tag_line(content: &str, tag: &str) -> Option<u32> {
    let needle = format!("<{tag}");
    for (i, line) in content.lines().enumerate() {
        if line.contains(&needle) {
            return Some(i as u32 + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_tags_are_deduplicated() {
        let content = "<root>\n  <item/>\n  <item/>\n  <meta/>\n</root>\n";
        let result = XmlStrategy.extract("data.xml", content);
        let tag_names: Vec<&str> = result
            .blocks
            .iter()
            .skip(1)
            .map(|b| b.name.as_str())
            .collect();
        assert!(tag_names.contains(&"item"));
        assert!(tag_names.contains(&"meta"));
        assert_eq!(tag_names.iter().filter(|&&n| n == "item").count(), 1);
    }
}

//! JSON/TOML extractor strategies (SPEC_FULL §4.1 rule 8): a root block
//! plus a deduplicated set of top-level names as key_pair/table blocks.

use regex::Regex;

use crate::models::{Block, BlockCategory};

use super::fallback::whole_file_block;
use super::{ExtractResult, ExtractorStrategy};

pub struct JsonStrategy;
pub struct TomlStrategy;

impl ExtractorStrategy for JsonStrategy {
    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn extract(&self, file_path: &str, content: &str) -> ExtractResult {
        let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(content)
        else {
            return whole_file_block(file_path, content);
        };

        let mut blocks = vec![root_block(file_path, content)];
        for key in map.keys() {
            blocks.push(named_block(key, "key_pair", content, file_path));
        }
        ExtractResult {
            blocks,
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }
}

impl ExtractorStrategy for TomlStrategy {
    fn extensions(&self) -> &'static [&'static str] {
        &["toml"]
    }

    fn extract(&self, file_path: &str, content: &str) -> ExtractResult {
        let Ok(toml::Value::Table(table)) = content.parse::<toml::Value>() else {
            return whole_file_block(file_path, content);
        };

        let mut blocks = vec![root_block(file_path, content)];
        for (key, value) in table.iter() {
            let block_type = if matches!(value, toml::Value::Table(_))
                || matches!(value, toml::Value::Array(items) if items.iter().any(|v| matches!(v, toml::Value::Table(_))))
            {
                "table"
            } else {
                "key_pair"
            };
            blocks.push(named_block(key, block_type, content, file_path));
        }
        ExtractResult {
            blocks,
            imports: Vec::new(),
            exports: Vec::new(),
        }
    }
}

fn root_block(file_path: &str, content: &str) -> Block {
    Block {
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
    }
}

/// Approximates a line span for a top-level key by locating its first
/// quoted/bare occurrence as a key in the source text — these blocks exist
/// to surface a deduplicated name list, not to pinpoint exact ranges.
fn named_block(name: &str, r#type: &str, content: &str, file_path: &str) -> Block {
    let line = find_key_line(content, name).unwrap_or(1);
    Block {
        name: name.to_string(),
        r#type: r#type.to_string(),
        category: BlockCategory::Documentation,
        start_line: line,
        end_line: line,
        comments: String::new(),
        content: String::new(),
        parent_name: None,
        file_path: file_path.to_string(),
    }
}

fn find_key_line(content: &str, key: &str) -> Option<u32> {
    let escaped = regex::escape(key);
    let pattern = format!(r#"(^|\s)"?{escaped}"?\s*[:=]"#);
    let re = Regex::new(&pattern).ok()?;
    for (i, line) in content.lines().enumerate() {
        if re.is_match(line) {
            return Some(i as u32 + 1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_top_level_keys_become_key_pair_blocks() {
        let content = r#"{"name": "vibescout", "version": "0.1.0"}"#;
        let result = JsonStrategy.extract("package.json", content);
        assert_eq!(result.blocks[0].r#type, "file");
        assert!(result
            .blocks
            .iter()
            .any(|b| b.name == "name" && b.r#type == "key_pair"));
    }

    #[test]
    fn toml_table_is_distinguished_from_key_pair() {
        let content = "name = \"vibescout\"\n\n[dependencies]\nserde = \"1\"\n";
        let result = TomlStrategy.extract("Cargo.toml", content);
        assert!(result
            .blocks
            .iter()
            .any(|b| b.name == "name" && b.r#type == "key_pair"));
        assert!(result
            .blocks
            .iter()
            .any(|b| b.name == "dependencies" && b.r#type == "table"));
    }

    #[test]
    fn invalid_json_falls_back_to_whole_file() {
        let result = JsonStrategy.extract("broken.json", "{not json");
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.blocks[0].r#type, "file");
    }
}

//! Ignore Engine — composes gitignore-style patterns from every recognized
//! ignore file in a project root into one matcher plus a list of glob
//! traversal patterns usable to prune filesystem walks cheaply.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

/// Ignore files consulted, in precedence order. Later files can't un-ignore
/// an earlier pattern — gitignore semantics only ever narrow what is kept.
pub const RECOGNIZED_IGNORE_FILES: &[&str] = &[
    ".gitignore",
    ".vibeignore",
    ".vibescoutignore",
    ".cursorignore",
    ".aiderignore",
    ".codeiumignore",
    ".continueignore",
];

/// Directories and file globs ignored unconditionally, regardless of any
/// project-local ignore file.
pub const DEFAULT_IGNORES: &[&str] = &[
    ".git",
    ".vibescout",
    ".lancedb",
    ".lancedb_test",
    "node_modules",
    "dist",
    "build",
    "target",
    "*.lock",
];

pub struct IgnoreEngine {
    matcher: Gitignore,
    traversal_patterns: Vec<String>,
}

impl IgnoreEngine {
    /// Build an ignore engine for `root`, reading every recognized ignore
    /// file that exists plus `extra` patterns supplied by configuration.
    pub fn build(root: &Path, extra: &[String]) -> Self {
        let mut builder = GitignoreBuilder::new(root);
        let mut traversal_patterns = Vec::new();

        for pattern in DEFAULT_IGNORES {
            let _ = builder.add_line(None, pattern);
            traversal_patterns.extend(to_traversal_patterns(pattern));
        }

        for pattern in extra {
            let _ = builder.add_line(None, pattern);
            traversal_patterns.extend(to_traversal_patterns(pattern));
        }

        for file_name in RECOGNIZED_IGNORE_FILES {
            let path = root.join(file_name);
            if !path.exists() {
                continue;
            }
            if let Err(e) = builder.add(&path) {
                tracing::warn!("failed to read ignore file {:?}: {}", path, e);
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(&path) {
                for line in content.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    traversal_patterns.extend(to_traversal_patterns(line));
                }
            }
        }

        traversal_patterns.sort();
        traversal_patterns.dedup();

        let matcher = builder.build().unwrap_or_else(|e| {
            tracing::warn!("failed to build ignore matcher: {}", e);
            Gitignore::empty()
        });

        Self {
            matcher,
            traversal_patterns,
        }
    }

    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        self.matcher.matched(path, is_dir).is_ignore()
    }

    pub fn traversal_patterns(&self) -> &[String] {
        &self.traversal_patterns
    }
}

/// Translate one gitignore-style line into the glob traversal pattern(s)
/// used to prune directory walks, per SPEC_FULL §4.12's rules:
/// - a bare name with no path separator or wildcard gets `**/name` and,
///   since it might name a directory, also `**/name/**`.
/// - a pattern that already contains a `/` becomes `**/pattern`, plus the
///   `/**` directory-shaped form when it doesn't look like a file (no `.`
///   in the final segment).
/// - a pattern already prefixed with `**/` is left as-is.
fn to_traversal_patterns(pattern: &str) -> Vec<String> {
    let pattern = pattern.trim();
    if pattern.is_empty() || pattern.starts_with('#') {
        return Vec::new();
    }
    let negated = pattern.starts_with('!');
    let core = pattern.trim_start_matches('!');

    if core.starts_with("**/") {
        return vec![prefix_negation(core.to_string(), negated)];
    }

    let looks_like_dir_candidate = core.ends_with('/')
        || !core
            .rsplit('/')
            .next()
            .unwrap_or(core)
            .contains('.');
    let core = core.trim_end_matches('/');

    let mut out = Vec::new();
    if core.contains('/') {
        out.push(prefix_negation(format!("**/{core}"), negated));
        if looks_like_dir_candidate {
            out.push(prefix_negation(format!("**/{core}/**"), negated));
        }
    } else {
        out.push(prefix_negation(format!("**/{core}"), negated));
        if looks_like_dir_candidate {
            out.push(prefix_negation(format!("**/{core}/**"), negated));
        }
    }
    out
}

fn prefix_negation(pattern: String, negated: bool) -> String {
    if negated {
        format!("!{pattern}")
    } else {
        pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_produces_file_and_dir_forms() {
        let patterns = to_traversal_patterns("node_modules");
        assert!(patterns.contains(&"**/node_modules".to_string()));
        assert!(patterns.contains(&"**/node_modules/**".to_string()));
    }

    #[test]
    fn extension_pattern_has_no_dir_form() {
        let patterns = to_traversal_patterns("*.lock");
        assert_eq!(patterns, vec!["**/*.lock".to_string()]);
    }

    #[test]
    fn already_prefixed_pattern_is_unchanged() {
        let patterns = to_traversal_patterns("**/fixtures");
        assert_eq!(patterns, vec!["**/fixtures".to_string()]);
    }

    #[test]
    fn composes_multiple_ignore_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("included.ts"), "export const x = 1;").unwrap();
        std::fs::write(dir.path().join("ignored.ts"), "export const y = 2;").unwrap();
        std::fs::write(dir.path().join(".vibeignore"), "ignored.ts\n").unwrap();

        let engine = IgnoreEngine::build(dir.path(), &[]);
        assert!(!engine.is_ignored(&dir.path().join("included.ts"), false));
        assert!(engine.is_ignored(&dir.path().join("ignored.ts"), false));
    }

    #[test]
    fn default_ignores_always_apply() {
        let dir = tempfile::tempdir().unwrap();
        let engine = IgnoreEngine::build(dir.path(), &[]);
        assert!(engine.is_ignored(&dir.path().join("node_modules").join("x.js"), false));
        assert!(engine.is_ignored(&dir.path().join(".git").join("HEAD"), false));
    }
}

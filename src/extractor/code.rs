//! Tree-sitter backed extractor strategies for Rust, TypeScript/JavaScript,
//! Python and Go. Query strings are grounded on the ones already written
//! and exercised for the legacy IDE-tool parser (`indexer/parser/core.rs`);
//! this module reuses them but emits [`Block`]/[`ImportEdge`] values
//! instead of the old `Symbol`/`CodeChunk` pair, per SPEC_FULL §4.1.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor};

use crate::models::{Block, BlockCategory, ImportEdge};

use super::chunking::chunk_parent;
use super::fallback::whole_file_block;
use super::{ExtractResult, ExtractorStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLang {
    Rust,
    TypeScript,
    Python,
    Go,
}

impl CodeLang {
    fn ts_language(&self) -> Language {
        match self {
            CodeLang::Rust => tree_sitter_rust::LANGUAGE.into(),
            CodeLang::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            CodeLang::Python => tree_sitter_python::LANGUAGE.into(),
            CodeLang::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    fn query_str(&self) -> &'static str {
        match self {
            CodeLang::Rust => RUST_QUERY,
            CodeLang::TypeScript => TYPESCRIPT_QUERY,
            CodeLang::Python => PYTHON_QUERY,
            CodeLang::Go => GO_QUERY,
        }
    }
}

pub struct CodeStrategy {
    lang: CodeLang,
    extensions: &'static [&'static str],
}

impl CodeStrategy {
    pub fn rust() -> Self {
        Self {
            lang: CodeLang::Rust,
            extensions: &["rs"],
        }
    }

    pub fn typescript() -> Self {
        Self {
            lang: CodeLang::TypeScript,
            extensions: &["ts", "tsx", "js", "jsx", "mjs", "cjs"],
        }
    }

    pub fn python() -> Self {
        Self {
            lang: CodeLang::Python,
            extensions: &["py"],
        }
    }

    pub fn go() -> Self {
        Self {
            lang: CodeLang::Go,
            extensions: &["go"],
        }
    }
}

impl ExtractorStrategy for CodeStrategy {
    fn extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    fn extract(&self, file_path: &str, content: &str) -> ExtractResult {
        match extract_code(self.lang, file_path, content) {
            Some(result) => result,
            None => whole_file_block(file_path, content),
        }
    }
}

fn extract_code(lang: CodeLang, file_path: &str, content: &str) -> Option<ExtractResult> {
    let mut parser = Parser::new();
    parser.set_language(&lang.ts_language()).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();
    let code = content.as_bytes();

    let parents = extract_blocks(lang, root, code, file_path, content);
    let mut blocks = Vec::new();
    for parent in parents {
        let chunks = chunk_parent(&parent);
        blocks.push(parent);
        blocks.extend(chunks);
    }

    let mut imports = extract_imports(lang, root, code);
    if lang == CodeLang::TypeScript {
        imports.extend(extract_runtime_imports(root, code));
    }
    let exports = extract_exports(lang, root, code);

    Some(ExtractResult {
        blocks,
        imports,
        exports,
    })
}

fn has_ancestor(node: Node<'_>, kinds: &[&str]) -> bool {
    let mut cur = node.parent();
    while let Some(n) = cur {
        if kinds.contains(&n.kind()) {
            return true;
        }
        cur = n.parent();
    }
    false
}

/// Walk backwards through the node's (or its `export_statement` wrapper's)
/// previous siblings, accumulating consecutive comment nodes, per
/// SPEC_FULL §4.1 rule 2.
fn collect_leading_comments(node: Node<'_>, code: &[u8]) -> String {
    let target = match node.parent() {
        Some(p) if p.kind() == "export_statement" => p,
        _ => node,
    };

    let mut comments = Vec::new();
    let mut sib = target.prev_sibling();
    while let Some(n) = sib {
        if n.kind().contains("comment") {
            comments.push(n.utf8_text(code).unwrap_or("").to_string());
            sib = n.prev_sibling();
        } else {
            break;
        }
    }
    comments.reverse();
    comments.join("\n")
}

fn make_block(
    name: String,
    r#type: &str,
    node: Node<'_>,
    code: &[u8],
    file_path: &str,
) -> Block {
    Block {
        name,
        r#type: r#type.to_string(),
        category: BlockCategory::Code,
        start_line: node.start_position().row as u32 + 1,
        end_line: node.end_position().row as u32 + 1,
        comments: collect_leading_comments(node, code),
        content: node.utf8_text(code).unwrap_or("").to_string(),
        parent_name: None,
        file_path: file_path.to_string(),
    }
}

fn extract_blocks(
    lang: CodeLang,
    root: Node<'_>,
    code: &[u8],
    file_path: &str,
    _content: &str,
) -> Vec<Block> {
    let query = match Query::new(&lang.ts_language(), lang.query_str()) {
        Ok(q) => q,
        Err(_) => return Vec::new(),
    };
    let capture_names = query.capture_names();
    let mut cursor = QueryCursor::new();
    let mut blocks = Vec::new();

    let mut matches = cursor.matches(&query, root, code);
    while let Some(m) = matches.next() {
        let mut name = String::new();
        let mut raw_kind = "";
        let mut main_node: Option<Node<'_>> = None;

        for capture in m.captures {
            let capture_name = capture_names[capture.index as usize];
            if capture_name == "name" {
                name = capture.node.utf8_text(code).unwrap_or("").to_string();
            } else if !capture_name.starts_with('_') {
                raw_kind = capture_name;
                main_node = Some(capture.node);
            }
        }

        let (Some(node), false) = (main_node, name.is_empty()) else {
            continue;
        };

        let Some(mut block_type) = canonical_type(lang, raw_kind) else {
            continue;
        };

        if block_type == "function"
            && ((lang == CodeLang::Rust && has_ancestor(node, &["impl_item"]))
                || (lang == CodeLang::Python && has_ancestor(node, &["class_definition"])))
        {
            block_type = "method";
        }
        if block_type == "method" && (name == "constructor" || name == "__init__") {
            block_type = "constructor";
        }

        blocks.push(make_block(name, block_type, node, code, file_path));
    }

    blocks
}

/// Maps a query capture name to a canonical Block `type`, or `None` when
/// the capture exists purely to anchor another capture (e.g. Rust's
/// `impl` header, whose methods are captured independently as functions).
fn canonical_type(lang: CodeLang, raw: &str) -> Option<&'static str> {
    match lang {
        CodeLang::Rust => Some(match raw {
            "function" => "function",
            "struct" | "enum" | "type_alias" => "type",
            "trait" => "interface",
            "const" | "static" => "property",
            "macro" => "function",
            "module" => "type",
            "impl" => return None,
            _ => return None,
        }),
        CodeLang::TypeScript => Some(match raw {
            "function" | "exported_function" | "declare_function" | "arrow_func"
            | "exported_arrow_func" => "function",
            "class" | "abstract_class" | "exported_class" => "class",
            "method" => "method",
            "interface" => "interface",
            "type_alias" | "enum" | "namespace" => "type",
            _ => return None,
        }),
        CodeLang::Python => Some(match raw {
            "function" | "decorated_function" => "function",
            "class" | "decorated_class" => "class",
            "typed_assignment" => "property",
            _ => return None,
        }),
        CodeLang::Go => Some(match raw {
            "function" => "function",
            "method" => "method",
            "struct" | "interface" => {
                if raw == "interface" {
                    "interface"
                } else {
                    "type"
                }
            }
            "const" | "var" => "property",
            _ => return None,
        }),
    }
}

fn extract_imports(lang: CodeLang, root: Node<'_>, code: &[u8]) -> Vec<ImportEdge> {
    let raw: Vec<(String, String)> = match lang {
        CodeLang::Rust => collect_rust_imports(root, code),
        CodeLang::TypeScript => collect_ts_imports(root, code),
        CodeLang::Python => collect_python_imports(root, code),
        CodeLang::Go => collect_go_imports(root, code),
    };
    merge_edges(raw, false)
}

fn merge_edges(raw: Vec<(String, String)>, runtime: bool) -> Vec<ImportEdge> {
    let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (source, symbol) in raw {
        merged.entry(source).or_default().insert(symbol);
    }
    merged
        .into_iter()
        .map(|(source, symbols)| ImportEdge {
            source,
            symbols,
            runtime,
        })
        .collect()
}

// -- Rust: use_declaration ----------------------------------------------------

fn collect_rust_imports(root: Node<'_>, code: &[u8]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for i in 0..root.child_count() {
        let Some(child) = root.child(i) else { continue };
        if child.kind() != "use_declaration" {
            continue;
        }
        if let Some(arg) = child.child_by_field_name("argument") {
            walk_rust_use(arg, code, &mut Vec::new(), &mut out);
        }
    }
    out
}

fn walk_rust_use(node: Node<'_>, code: &[u8], prefix: &mut Vec<String>, out: &mut Vec<(String, String)>) {
    match node.kind() {
        "identifier" | "crate" | "self" | "super" => {
            let text = node.utf8_text(code).unwrap_or("");
            let mut parts = prefix.clone();
            parts.push(text.to_string());
            let full = parts.join("::");
            if !full.starts_with("std::") && !full.starts_with("core::") {
                out.push((full, text.to_string()));
            }
        }
        "scoped_identifier" => {
            let full = node.utf8_text(code).unwrap_or("").to_string();
            if !full.starts_with("std::") && !full.starts_with("core::") {
                let item = node
                    .child_by_field_name("name")
                    .and_then(|n| n.utf8_text(code).ok())
                    .unwrap_or(&full)
                    .to_string();
                out.push((full, item));
            }
        }
        "scoped_use_list" => {
            let path_node = node.child_by_field_name("path");
            let list_node = node.child_by_field_name("list");
            let path_text = path_node.and_then(|n| n.utf8_text(code).ok()).unwrap_or("");
            let mut new_prefix = prefix.clone();
            if !path_text.is_empty() {
                new_prefix.extend(path_text.split("::").map(|s| s.to_string()));
            }
            if let Some(list) = list_node {
                walk_rust_use(list, code, &mut new_prefix, out);
            }
        }
        "use_list" => {
            for j in 0..node.child_count() {
                if let Some(child) = node.child(j) {
                    if child.is_named() {
                        walk_rust_use(child, code, prefix, out);
                    }
                }
            }
        }
        "use_as_clause" => {
            if let Some(orig) = node.named_child(0) {
                walk_rust_use(orig, code, prefix, out);
            }
        }
        "use_wildcard" => {
            if let Some(path_node) = node.child_by_field_name("path") {
                let full = path_node.utf8_text(code).unwrap_or("").to_string();
                if !full.starts_with("std::") && !full.starts_with("core::") {
                    out.push((format!("{full}::*"), "*".to_string()));
                }
            }
        }
        _ => {}
    }
}

// -- TypeScript / JavaScript: import_statement --------------------------------

fn collect_ts_imports(root: Node<'_>, code: &[u8]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for i in 0..root.child_count() {
        let Some(child) = root.child(i) else { continue };
        if child.kind() != "import_statement" {
            continue;
        }
        let Some(source_node) = child.child_by_field_name("source") else {
            continue;
        };
        let raw = source_node.utf8_text(code).unwrap_or("");
        let source = raw.trim_matches(|c| c == '\'' || c == '"').to_string();

        let mut items = Vec::new();
        walk_ts_import_clause(child, code, &mut items);
        if items.is_empty() {
            items.push("*".to_string());
        }
        for item in items {
            out.push((source.clone(), item));
        }
    }
    out
}

fn walk_ts_import_clause(node: Node<'_>, code: &[u8], items: &mut Vec<String>) {
    for j in 0..node.child_count() {
        let Some(child) = node.child(j) else { continue };
        match child.kind() {
            "identifier" if node.kind() == "import_clause" => {
                if let Ok(t) = child.utf8_text(code) {
                    items.push(t.to_string());
                }
            }
            "namespace_import" => {
                for k in 0..child.child_count() {
                    if let Some(id) = child.child(k) {
                        if id.kind() == "identifier" {
                            if let Ok(t) = id.utf8_text(code) {
                                items.push(t.to_string());
                            }
                        }
                    }
                }
            }
            "named_imports" => {
                for k in 0..child.named_child_count() {
                    if let Some(spec) = child.named_child(k) {
                        let name = spec
                            .child_by_field_name("alias")
                            .or_else(|| spec.child_by_field_name("name"))
                            .and_then(|n| n.utf8_text(code).ok())
                            .unwrap_or_else(|| spec.utf8_text(code).unwrap_or(""));
                        if !name.is_empty() {
                            items.push(name.to_string());
                        }
                    }
                }
            }
            "import_clause" => walk_ts_import_clause(child, code, items),
            _ => {}
        }
    }
}

// -- Python: import_statement / import_from_statement -------------------------

fn collect_python_imports(root: Node<'_>, code: &[u8]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    walk_python_imports(root, code, &mut out);
    out
}

fn walk_python_imports(node: Node<'_>, code: &[u8], out: &mut Vec<(String, String)>) {
    for i in 0..node.child_count() {
        let Some(child) = node.child(i) else { continue };
        match child.kind() {
            "import_statement" => {
                for j in 0..child.named_child_count() {
                    if let Some(name_node) = child.named_child(j) {
                        let raw = name_node.utf8_text(code).unwrap_or("");
                        let path = if name_node.kind() == "aliased_import" {
                            name_node
                                .child_by_field_name("name")
                                .and_then(|n| n.utf8_text(code).ok())
                                .unwrap_or(raw)
                        } else {
                            raw
                        };
                        if !path.is_empty() {
                            let item = path.rsplit('.').next().unwrap_or(path).to_string();
                            out.push((path.to_string(), item));
                        }
                    }
                }
            }
            "import_from_statement" => {
                let module = child
                    .child_by_field_name("module_name")
                    .and_then(|n| n.utf8_text(code).ok())
                    .unwrap_or("");
                let module_end = child
                    .child_by_field_name("module_name")
                    .map(|m| m.end_byte())
                    .unwrap_or(0);

                for j in 0..child.named_child_count() {
                    if let Some(n) = child.named_child(j) {
                        match n.kind() {
                            "dotted_name" | "identifier" if n.start_byte() > module_end => {
                                if let Ok(t) = n.utf8_text(code) {
                                    if !t.is_empty() {
                                        out.push((module.to_string(), t.to_string()));
                                    }
                                }
                            }
                            "aliased_import" => {
                                if let Some(name) = n
                                    .child_by_field_name("name")
                                    .and_then(|nm| nm.utf8_text(code).ok())
                                {
                                    if !name.is_empty() {
                                        out.push((module.to_string(), name.to_string()));
                                    }
                                }
                            }
                            "wildcard_import" => {
                                out.push((module.to_string(), "*".to_string()));
                            }
                            _ => {}
                        }
                    }
                }
            }
            _ if child.named_child_count() > 0
                && matches!(
                    child.kind(),
                    "if_statement"
                        | "try_statement"
                        | "block"
                        | "except_clause"
                        | "with_statement"
                        | "function_definition"
                        | "module"
                ) =>
            {
                walk_python_imports(child, code, out);
            }
            _ => {}
        }
    }
}

// -- Go: import_declaration ----------------------------------------------------

fn collect_go_imports(root: Node<'_>, code: &[u8]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for i in 0..root.child_count() {
        let Some(child) = root.child(i) else { continue };
        if child.kind() != "import_declaration" {
            continue;
        }
        for j in 0..child.named_child_count() {
            if let Some(spec) = child.named_child(j) {
                match spec.kind() {
                    "import_spec" => push_go_import_spec(spec, code, &mut out),
                    "import_spec_list" => {
                        for k in 0..spec.named_child_count() {
                            if let Some(inner) = spec.named_child(k) {
                                if inner.kind() == "import_spec" {
                                    push_go_import_spec(inner, code, &mut out);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    out
}

fn push_go_import_spec(spec: Node<'_>, code: &[u8], out: &mut Vec<(String, String)>) {
    let Some(path_node) = spec.child_by_field_name("path") else {
        return;
    };
    let raw = path_node.utf8_text(code).unwrap_or("");
    let path = raw.trim_matches('"');
    if path.is_empty() {
        return;
    }
    let pkg = path.rsplit('/').next().unwrap_or(path).to_string();
    out.push((path.to_string(), pkg));
}

// -- Exports -------------------------------------------------------------------

fn extract_exports(lang: CodeLang, root: Node<'_>, code: &[u8]) -> Vec<String> {
    match lang {
        CodeLang::Rust => extract_rust_exports(root, code),
        CodeLang::TypeScript => extract_ts_exports(root, code),
        CodeLang::Python => extract_python_exports(root, code),
        CodeLang::Go => extract_go_exports(root, code),
    }
}

fn extract_rust_exports(root: Node<'_>, code: &[u8]) -> Vec<String> {
    let mut out = BTreeSet::new();
    for i in 0..root.child_count() {
        let Some(child) = root.child(i) else { continue };
        let has_pub = (0..child.child_count())
            .filter_map(|k| child.child(k))
            .any(|c| c.kind() == "visibility_modifier");
        if !has_pub {
            continue;
        }
        if let Some(n) = child.child_by_field_name("name") {
            if let Ok(t) = n.utf8_text(code) {
                out.insert(t.to_string());
            }
        }
    }
    out.into_iter().collect()
}

fn extract_ts_exports(root: Node<'_>, code: &[u8]) -> Vec<String> {
    let mut out = BTreeSet::new();
    for i in 0..root.child_count() {
        let Some(child) = root.child(i) else { continue };
        if child.kind() != "export_statement" {
            continue;
        }
        if let Some(decl) = child.child_by_field_name("declaration") {
            collect_ts_declared_names(decl, code, &mut out);
        }
        // `export { A, B as C }` / `export * from '...'`
        for j in 0..child.child_count() {
            if let Some(c) = child.child(j) {
                match c.kind() {
                    "export_clause" => {
                        for k in 0..c.named_child_count() {
                            if let Some(spec) = c.named_child(k) {
                                let name = spec
                                    .child_by_field_name("alias")
                                    .or_else(|| spec.child_by_field_name("name"))
                                    .and_then(|n| n.utf8_text(code).ok());
                                if let Some(name) = name {
                                    out.insert(name.to_string());
                                }
                            }
                        }
                    }
                    "*" => {
                        out.insert("*".to_string());
                    }
                    _ => {}
                }
            }
        }
    }
    out.into_iter().collect()
}

fn collect_ts_declared_names(node: Node<'_>, code: &[u8], out: &mut BTreeSet<String>) {
    if let Some(name) = node.child_by_field_name("name") {
        if let Ok(t) = name.utf8_text(code) {
            out.insert(t.to_string());
            return;
        }
    }
    if node.kind() == "lexical_declaration" {
        for j in 0..node.named_child_count() {
            if let Some(decl) = node.named_child(j) {
                if decl.kind() == "variable_declarator" {
                    if let Some(name) = decl.child_by_field_name("name") {
                        if let Ok(t) = name.utf8_text(code) {
                            out.insert(t.to_string());
                        }
                    }
                }
            }
        }
    }
}

fn extract_python_exports(root: Node<'_>, code: &[u8]) -> Vec<String> {
    // Prefer an explicit `__all__` list when present.
    for i in 0..root.named_child_count() {
        let Some(child) = root.named_child(i) else { continue };
        if child.kind() != "expression_statement" {
            continue;
        }
        let Some(assign) = child.named_child(0) else { continue };
        if assign.kind() != "assignment" {
            continue;
        }
        let Some(left) = assign.child_by_field_name("left") else { continue };
        if left.utf8_text(code) != Ok("__all__") {
            continue;
        }
        let Some(right) = assign.child_by_field_name("right") else { continue };
        let mut names = Vec::new();
        for j in 0..right.named_child_count() {
            if let Some(s) = right.named_child(j) {
                if let Ok(text) = s.utf8_text(code) {
                    names.push(text.trim_matches(|c| c == '\'' || c == '"').to_string());
                }
            }
        }
        if !names.is_empty() {
            return names;
        }
    }

    let mut out = BTreeSet::new();
    for i in 0..root.named_child_count() {
        let Some(child) = root.named_child(i) else { continue };
        if !matches!(child.kind(), "function_definition" | "class_definition") {
            continue;
        }
        if let Some(name) = child.child_by_field_name("name") {
            if let Ok(t) = name.utf8_text(code) {
                if !t.starts_with('_') {
                    out.insert(t.to_string());
                }
            }
        }
    }
    out.into_iter().collect()
}

fn extract_go_exports(root: Node<'_>, code: &[u8]) -> Vec<String> {
    let mut out = BTreeSet::new();
    for i in 0..root.child_count() {
        let Some(child) = root.child(i) else { continue };
        let name = match child.kind() {
            "function_declaration" | "method_declaration" => child
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(code).ok()),
            _ => None,
        };
        if let Some(name) = name {
            if name.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                out.insert(name.to_string());
            }
        }
    }
    out.into_iter().collect()
}

/// Synthesizes `ImportEdge{runtime: true}` entries for `app.X.Y.Method(...)`
/// style registry member-chains (TS/JS only), per SPEC_FULL §4.1 rule 6.
fn extract_runtime_imports(root: Node<'_>, code: &[u8]) -> Vec<ImportEdge> {
    let mut raw = Vec::new();
    walk_runtime_imports(root, code, &mut raw);
    merge_edges(raw, true)
}

fn walk_runtime_imports(node: Node<'_>, code: &[u8], out: &mut Vec<(String, String)>) {
    if node.kind() == "member_expression" {
        let is_nested_app_chain = node
            .parent()
            .map(|p| p.kind() == "member_expression")
            .unwrap_or(false)
            && flatten_member_chain(node.parent().unwrap(), code)
                .map(|segs| segs.first().map(String::as_str) == Some("app"))
                .unwrap_or(false);

        if !is_nested_app_chain {
            if let Some(segments) = flatten_member_chain(node, code) {
                if segments.first().map(String::as_str) == Some("app") && segments.len() >= 4 {
                    // source drops the leading "app" token and the trailing
                    // method segment: app.models.User.findById -> "models.User"
                    let source = segments[1..segments.len() - 1].join(".");
                    let symbol = segments[segments.len() - 1].clone();
                    out.push((source, symbol));
                }
            }
        }
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            walk_runtime_imports(child, code, out);
        }
    }
}

fn flatten_member_chain(node: Node<'_>, code: &[u8]) -> Option<Vec<String>> {
    match node.kind() {
        "identifier" | "this" => Some(vec![node.utf8_text(code).ok()?.to_string()]),
        "member_expression" => {
            let object = node.child_by_field_name("object")?;
            let property = node.child_by_field_name("property")?;
            let mut base = flatten_member_chain(object, code)?;
            base.push(property.utf8_text(code).ok()?.to_string());
            Some(base)
        }
        "call_expression" => flatten_member_chain(node.child_by_field_name("function")?, code),
        _ => None,
    }
}

// Query constants, grounded on the legacy IDE-tool parser's queries
// (indexer/parser/core.rs) and re-used as-is; this module only changes
// what the captures are turned into.

const RUST_QUERY: &str = r#"
(function_item
  name: (identifier) @name
) @function

(struct_item
  name: (type_identifier) @name
) @struct

(enum_item
  name: (type_identifier) @name
) @enum

(impl_item
  type: (type_identifier) @name
) @impl

(impl_item
  type: (generic_type
    type: (type_identifier) @name
  )
) @impl

(trait_item
  name: (type_identifier) @name
) @trait

(const_item
  name: (identifier) @name
) @const

(static_item
  name: (identifier) @name
) @static

(mod_item
  name: (identifier) @name
) @module

(macro_definition
  name: (identifier) @name
) @macro

(type_item
  name: (type_identifier) @name
) @type_alias
"#;

const TYPESCRIPT_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name
) @function

(class_declaration
  name: (type_identifier) @name
) @class

(abstract_class_declaration
  name: (type_identifier) @name
) @abstract_class

(method_definition
  name: (property_identifier) @name
) @method

(interface_declaration
  name: (type_identifier) @name
) @interface

(type_alias_declaration
  name: (type_identifier) @name
) @type_alias

(enum_declaration
  name: (identifier) @name
) @enum

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function)
  )
) @arrow_func

(export_statement
  declaration: (function_declaration
    name: (identifier) @name
  )
) @exported_function

(export_statement
  declaration: (class_declaration
    name: (type_identifier) @name
  )
) @exported_class

(export_statement
  declaration: (lexical_declaration
    (variable_declarator
      name: (identifier) @name
      value: (arrow_function)
    )
  )
) @exported_arrow_func

(ambient_declaration
  (function_signature
    name: (identifier) @name
  )
) @declare_function

(module
  name: (string) @name
) @namespace
"#;

const PYTHON_QUERY: &str = r#"
(function_definition
  name: (identifier) @name
) @function

(class_definition
  name: (identifier) @name
) @class

(decorated_definition
  definition: (function_definition
    name: (identifier) @name
  )
) @decorated_function

(decorated_definition
  definition: (class_definition
    name: (identifier) @name
  )
) @decorated_class

(assignment
  left: (identifier) @name
  type: (type) @_type
) @typed_assignment
"#;

const GO_QUERY: &str = r#"
(function_declaration
  name: (identifier) @name
) @function

(method_declaration
  name: (field_identifier) @name
) @method

(type_declaration
  (type_spec
    name: (type_identifier) @name
    type: (struct_type)
  )
) @struct

(type_declaration
  (type_spec
    name: (type_identifier) @name
    type: (interface_type)
  )
) @interface

(const_declaration
  (const_spec
    name: (identifier) @name
  )
) @const

(var_declaration
  (var_spec
    name: (identifier) @name
  )
) @var
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_function_and_doc_comment() {
        let src = "/// doc\npub fn greet() -> &'static str {\n    \"hi\"\n}\n";
        let result = extract_code(CodeLang::Rust, "lib.rs", src).unwrap();
        let block = result
            .blocks
            .iter()
            .find(|b| b.name == "greet")
            .expect("greet block");
        assert_eq!(block.r#type, "function");
        assert!(block.comments.contains("doc"));
        assert!(result.exports.contains(&"greet".to_string()));
    }

    #[test]
    fn rust_impl_method_is_classified_as_method() {
        let src = "struct Foo;\nimpl Foo {\n    fn bar(&self) {}\n}\n";
        let result = extract_code(CodeLang::Rust, "lib.rs", src).unwrap();
        let bar = result.blocks.iter().find(|b| b.name == "bar").unwrap();
        assert_eq!(bar.r#type, "method");
    }

    #[test]
    fn rust_use_declaration_is_import_edge() {
        let src = "use std::collections::HashMap;\nuse crate::foo::{Bar, Baz};\n";
        let result = extract_code(CodeLang::Rust, "lib.rs", src).unwrap();
        assert!(result
            .imports
            .iter()
            .any(|e| e.source == "crate::foo" && e.symbols.contains("Bar")));
        assert!(!result.imports.iter().any(|e| e.source.starts_with("std")));
    }

    #[test]
    fn ts_named_import_and_export() {
        let src = "import { foo, bar as baz } from './utils';\nexport function run() {}\n";
        let result = extract_code(CodeLang::TypeScript, "main.ts", src).unwrap();
        assert!(result
            .imports
            .iter()
            .any(|e| e.source == "./utils" && e.symbols.contains("foo")));
        assert!(result.exports.contains(&"run".to_string()));
    }

    #[test]
    fn ts_runtime_registry_import_is_synthesized() {
        let src = "app.users.repository.findById(1);\n";
        let result = extract_code(CodeLang::TypeScript, "handler.ts", src).unwrap();
        let edge = result
            .imports
            .iter()
            .find(|e| e.runtime)
            .expect("runtime edge");
        assert_eq!(edge.source, "users.repository");
        assert!(edge.symbols.contains("findById"));
    }

    /// S4: two distinct registry chains each produce one edge, and a
    /// triple use of the same chain dedups to a single entry with
    /// accumulated symbols.
    #[test]
    fn ts_runtime_registry_imports_dedup_by_source() {
        let src = "function g() {\n  app.models.User.findById(id);\n  app.models.User.findById(id);\n  app.models.User.findById(id);\n  app.providers.Payment.process(x);\n}\n";
        let result = extract_code(CodeLang::TypeScript, "handler.ts", src).unwrap();
        let runtime_edges: Vec<_> = result.imports.iter().filter(|e| e.runtime).collect();
        assert_eq!(runtime_edges.len(), 2);
        let user_edge = runtime_edges.iter().find(|e| e.source == "models.User").expect("models.User edge");
        assert_eq!(user_edge.symbols.len(), 1);
        assert!(user_edge.symbols.contains("findById"));
        let payment_edge = runtime_edges
            .iter()
            .find(|e| e.source == "providers.Payment")
            .expect("providers.Payment edge");
        assert!(payment_edge.symbols.contains("process"));
    }

    #[test]
    fn python_function_inside_class_is_method() {
        let src = "class Widget:\n    def render(self):\n        pass\n";
        let result = extract_code(CodeLang::Python, "widget.py", src).unwrap();
        let render = result.blocks.iter().find(|b| b.name == "render").unwrap();
        assert_eq!(render.r#type, "method");
    }

    #[test]
    fn go_exported_function_detected() {
        let src = "package main\n\nfunc Run() {}\n\nfunc helper() {}\n";
        let result = extract_code(CodeLang::Go, "main.go", src).unwrap();
        assert!(result.exports.contains(&"Run".to_string()));
        assert!(!result.exports.contains(&"helper".to_string()));
    }
}

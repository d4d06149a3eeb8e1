//! Function Extractor.
//!
//! Structural, tree-sitter-backed extraction of function-granular units with
//! owning class and line span, dispatched by a tagged `Language` variant
//! keyed off the file extension. Scoped to function bodies and class
//! ownership — no broader symbol taxonomy (structs, enums, traits, impls,
//! consts).

use std::path::Path;

use tracing::warn;
use tree_sitter::{Node, Parser};

/// A function/method record before the caller stamps its owning file path.
#[derive(Debug, Clone)]
pub struct RawFunctionRecord {
    pub name: String,
    pub code: String,
    pub lineno: usize,
    pub end_lineno: usize,
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    Java,
    TypeScript,
    Tsx,
    JavaScript,
}

fn language_for_ext(ext: &str) -> Option<Language> {
    match ext {
        "py" => Some(Language::Python),
        "java" => Some(Language::Java),
        "ts" => Some(Language::TypeScript),
        "tsx" => Some(Language::Tsx),
        "js" | "jsx" => Some(Language::JavaScript),
        _ => None,
    }
}

fn grammar(lang: Language) -> tree_sitter::Language {
    match lang {
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
    }
}

/// True if `kind` is a class-like declaration for `lang`.
fn is_class_node(kind: &str, lang: Language) -> bool {
    match lang {
        Language::Python => kind == "class_definition",
        Language::Java => matches!(kind, "class_declaration" | "record_declaration" | "enum_declaration"),
        Language::TypeScript | Language::Tsx | Language::JavaScript => {
            matches!(kind, "class_declaration" | "class")
        }
    }
}

/// True if `node` is a function/method declaration *with a body* for `lang`
/// — abstract/interface methods without a body are not indexed units.
fn is_function_node(node: &Node, lang: Language) -> bool {
    let kind = node.kind();
    match lang {
        Language::Python => kind == "function_definition",
        Language::Java => {
            matches!(kind, "method_declaration" | "constructor_declaration")
                && node.child_by_field_name("body").is_some()
        }
        Language::TypeScript | Language::Tsx | Language::JavaScript => match kind {
            "function_declaration" => node.child_by_field_name("body").is_some(),
            "method_definition" => node.child_by_field_name("body").is_some(),
            // `const foo = () => { ... }` / `const foo = function () { ... }` —
            // best-effort; object-literal properties with the same shape can
            // false-positive, which is acceptable for this extractor.
            "variable_declarator" => node
                .child_by_field_name("value")
                .map(|v| matches!(v.kind(), "arrow_function" | "function_expression"))
                .unwrap_or(false)
                && node
                    .child_by_field_name("value")
                    .and_then(|v| v.child_by_field_name("body"))
                    .is_some(),
            _ => false,
        },
    }
}

fn extract_name(node: &Node, source: &[u8], lang: Language) -> Option<String> {
    match lang {
        Language::TypeScript | Language::Tsx | Language::JavaScript
            if node.kind() == "variable_declarator" =>
        {
            node.child_by_field_name("name").and_then(|n| n.utf8_text(source).ok()).map(str::to_string)
        }
        _ => node.child_by_field_name("name").and_then(|n| n.utf8_text(source).ok()).map(str::to_string),
    }
}

/// Walk a node, tracking the innermost enclosing class by recursion depth
/// rather than a post-hoc span scan — nested classes naturally shadow their
/// parent while we're inside them, so a method always attaches to the
/// narrowest class that contains it.
fn walk(node: Node, source: &[u8], lang: Language, class_stack: &mut Vec<String>, out: &mut Vec<RawFunctionRecord>) {
    let kind = node.kind();

    if is_class_node(kind, lang) {
        let name = extract_name(&node, source, lang).unwrap_or_default();
        class_stack.push(name);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk(child, source, lang, class_stack, out);
        }
        class_stack.pop();
        return;
    }

    if is_function_node(&node, lang) {
        let target = if kind == "variable_declarator" {
            node.child_by_field_name("value").unwrap_or(node)
        } else {
            node
        };
        if let Some(name) = extract_name(&node, source, lang) {
            let lineno = node.start_position().row + 1;
            let end_lineno = node.end_position().row + 1;
            let code = node.utf8_text(source).unwrap_or("").to_string();
            out.push(RawFunctionRecord {
                name,
                code,
                lineno,
                end_lineno,
                class_name: class_stack.last().cloned(),
            });
        }
        // Descend for nested functions/closures, keeping the same class
        // owner — but don't re-walk into `target`'s body twice if it's the
        // same node we just recorded.
        let mut cursor = target.walk();
        for child in target.children(&mut cursor) {
            walk(child, source, lang, class_stack, out);
        }
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, lang, class_stack, out);
    }
}

/// Parse `content` as `ext` and extract its function records. Returns an
/// empty vector for unsupported extensions or unparsable content — callers
/// treat an empty result as "no functions", not an error (the caller logs
/// the path that triggered it).
pub fn extract_source(content: &str, ext: &str) -> Vec<RawFunctionRecord> {
    let Some(lang) = language_for_ext(ext) else { return Vec::new() };

    let mut parser = Parser::new();
    if parser.set_language(&grammar(lang)).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(content, None) else { return Vec::new() };

    let source = content.as_bytes();
    let mut out = Vec::new();
    let mut class_stack = Vec::new();
    walk(tree.root_node(), source, lang, &mut class_stack, &mut out);
    out
}

/// Read and extract `path`. A read failure or unparsable content yields an
/// empty sequence and a warning.
pub fn extract_file(path: &Path, ext: &str) -> Vec<RawFunctionRecord> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read file for extraction");
            return Vec::new();
        }
    };
    extract_source(&content, ext)
}

/// Whether `ext` has extractor support at all — used by the builder to
/// decide which files are candidates before touching disk.
pub fn supports_ext(ext: &str) -> bool {
    language_for_ext(ext).is_some()
}

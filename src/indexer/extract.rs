//! Symbol extraction from syntax trees.
//!
//! One generic tree walker drives every language; per-language behavior is
//! a [`Rules`] table mapping node kinds to symbol types. The walk carries
//! the enclosing name path and parent symbol id, so nested definitions
//! record their hierarchy, and is pure: the same source buffer always
//! yields the same symbols (ids excepted).
//!
//! `name_path` is slash-delimited and rooted at the file's package name
//! when the language declares one (`package_clause`, `package_header`, …),
//! the file stem otherwise. Duplicate paths inside one file (overloads)
//! get an ordinal suffix so the per-project uniqueness holds.

use std::collections::HashSet;
use tree_sitter::{Node, Parser};
use uuid::Uuid;

use super::languages;
use crate::error::{Error, Result};
use crate::models::{CodeSymbol, SymbolType};

/// Per-language extraction table.
struct Rules {
    /// Node kinds whose name becomes the path root instead of the file stem.
    package: &'static [&'static str],
    /// Nesting node kinds: name joins the path; `Some` also emits a symbol.
    containers: &'static [(&'static str, Option<SymbolType>)],
    /// Emitting node kinds. Also descended into, so inner definitions nest.
    symbols: &'static [(&'static str, SymbolType)],
}

fn rules_for(language: &str) -> Option<&'static Rules> {
    use SymbolType::*;
    static RUST: Rules = Rules {
        package: &[],
        containers: &[
            ("struct_item", Some(Class)),
            ("enum_item", Some(Enum)),
            ("trait_item", Some(Interface)),
            ("union_item", Some(Class)),
            ("mod_item", Some(Package)),
            ("impl_item", None),
        ],
        symbols: &[
            ("function_item", Function),
            ("const_item", Constant),
            ("static_item", Variable),
        ],
    };
    static GO: Rules = Rules {
        package: &["package_clause"],
        containers: &[("type_spec", Some(Class))],
        symbols: &[
            ("function_declaration", Function),
            ("method_declaration", Method),
            ("const_spec", Constant),
            ("var_spec", Variable),
        ],
    };
    static PYTHON: Rules = Rules {
        package: &[],
        containers: &[("class_definition", Some(Class))],
        symbols: &[("function_definition", Function)],
    };
    static JAVASCRIPT: Rules = Rules {
        package: &[],
        containers: &[("class_declaration", Some(Class))],
        symbols: &[
            ("function_declaration", Function),
            ("generator_function_declaration", Function),
            ("method_definition", Method),
        ],
    };
    static TYPESCRIPT: Rules = Rules {
        package: &[],
        containers: &[
            ("class_declaration", Some(Class)),
            ("abstract_class_declaration", Some(Class)),
            ("interface_declaration", Some(Interface)),
            ("enum_declaration", Some(Enum)),
        ],
        symbols: &[
            ("function_declaration", Function),
            ("generator_function_declaration", Function),
            ("method_definition", Method),
            ("public_field_definition", Property),
        ],
    };
    static JAVA: Rules = Rules {
        package: &["package_declaration"],
        containers: &[
            ("class_declaration", Some(Class)),
            ("interface_declaration", Some(Interface)),
            ("enum_declaration", Some(Enum)),
            ("record_declaration", Some(Class)),
            ("annotation_type_declaration", Some(Interface)),
        ],
        symbols: &[
            ("method_declaration", Method),
            ("constructor_declaration", Method),
            ("field_declaration", Property),
        ],
    };
    static C: Rules = Rules {
        package: &[],
        containers: &[
            ("struct_specifier", Some(Class)),
            ("union_specifier", Some(Class)),
            ("enum_specifier", Some(Enum)),
        ],
        symbols: &[("function_definition", Function)],
    };
    static CPP: Rules = Rules {
        package: &[],
        containers: &[
            ("class_specifier", Some(Class)),
            ("struct_specifier", Some(Class)),
            ("union_specifier", Some(Class)),
            ("enum_specifier", Some(Enum)),
            ("namespace_definition", Some(Package)),
        ],
        symbols: &[("function_definition", Function)],
    };
    static CSHARP: Rules = Rules {
        package: &[],
        containers: &[
            ("namespace_declaration", Some(Package)),
            ("file_scoped_namespace_declaration", Some(Package)),
            ("class_declaration", Some(Class)),
            ("interface_declaration", Some(Interface)),
            ("struct_declaration", Some(Class)),
            ("enum_declaration", Some(Enum)),
            ("record_declaration", Some(Class)),
        ],
        symbols: &[
            ("method_declaration", Method),
            ("constructor_declaration", Method),
            ("property_declaration", Property),
            ("field_declaration", Property),
        ],
    };
    static RUBY: Rules = Rules {
        package: &[],
        containers: &[("class", Some(Class)), ("module", Some(Package))],
        symbols: &[("method", Function), ("singleton_method", Function)],
    };
    static PHP: Rules = Rules {
        package: &[],
        containers: &[
            ("namespace_definition", Some(Package)),
            ("class_declaration", Some(Class)),
            ("interface_declaration", Some(Interface)),
            ("trait_declaration", Some(Interface)),
            ("enum_declaration", Some(Enum)),
        ],
        symbols: &[
            ("function_definition", Function),
            ("method_declaration", Method),
            ("const_declaration", Constant),
        ],
    };
    static SWIFT: Rules = Rules {
        package: &[],
        containers: &[
            ("class_declaration", Some(Class)),
            ("protocol_declaration", Some(Interface)),
        ],
        symbols: &[
            ("function_declaration", Function),
            ("property_declaration", Property),
            ("init_declaration", Method),
        ],
    };
    static KOTLIN: Rules = Rules {
        package: &["package_header"],
        containers: &[
            ("class_declaration", Some(Class)),
            ("object_declaration", Some(Class)),
        ],
        symbols: &[
            ("function_declaration", Function),
            ("property_declaration", Property),
        ],
    };

    match language {
        "rust" => Some(&RUST),
        "go" => Some(&GO),
        "python" => Some(&PYTHON),
        "javascript" => Some(&JAVASCRIPT),
        "typescript" | "tsx" => Some(&TYPESCRIPT),
        "java" => Some(&JAVA),
        "c" => Some(&C),
        "cpp" => Some(&CPP),
        "csharp" => Some(&CSHARP),
        "ruby" => Some(&RUBY),
        "php" => Some(&PHP),
        "swift" => Some(&SWIFT),
        "kotlin" => Some(&KOTLIN),
        _ => None,
    }
}

/// Parse `source` and extract its symbol tree.
pub fn extract_symbols(
    project_id: &str,
    file_path: &str,
    language: &str,
    source: &str,
) -> Result<Vec<CodeSymbol>> {
    let rules = rules_for(language)
        .ok_or_else(|| Error::Validation(format!("unsupported language: {}", language)))?;
    let grammar = languages::grammar(language)
        .ok_or_else(|| Error::Validation(format!("no grammar for language: {}", language)))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| Error::Validation(format!("grammar rejected for {}: {}", language, e)))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| Error::Validation(format!("parse failed for {}", file_path)))?;

    let root_name = find_package_root(tree.root_node(), source, rules)
        .unwrap_or_else(|| file_stem(file_path));

    let mut ctx = WalkContext {
        project_id,
        file_path,
        language,
        source,
        rules,
        seen_paths: HashSet::new(),
        symbols: Vec::new(),
    };
    walk(
        tree.root_node(),
        &mut ctx,
        &root_name,
        None,
        false,
    );
    Ok(ctx.symbols)
}

struct WalkContext<'a> {
    project_id: &'a str,
    file_path: &'a str,
    language: &'a str,
    source: &'a str,
    rules: &'static Rules,
    seen_paths: HashSet<String>,
    symbols: Vec<CodeSymbol>,
}

fn walk(
    node: Node<'_>,
    ctx: &mut WalkContext<'_>,
    path: &str,
    parent_id: Option<&str>,
    inside_type: bool,
) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    drop(cursor);

    for child in children {
        let kind = child.kind();

        if let Some((_, emit)) = ctx
            .rules
            .containers
            .iter()
            .find(|(container, _)| *container == kind)
        {
            // C-family `struct foo` also appears as a type reference; only
            // a definition (with a body) declares a symbol.
            if kind.ends_with("_specifier") && child.child_by_field_name("body").is_none() {
                walk(child, ctx, path, parent_id, inside_type);
                continue;
            }
            let name = container_name(child, ctx.source);
            let Some(name) = name else {
                // Anonymous container: contents stay at the current path.
                walk(child, ctx, path, parent_id, inside_type);
                continue;
            };
            let child_path = format!("{}/{}", path, name);
            let symbol_type = emit.map(|t| adjust_container_type(child, t));
            let nests_type = matches!(
                symbol_type,
                Some(SymbolType::Class | SymbolType::Interface | SymbolType::Enum)
            ) || (emit.is_none() && kind == "impl_item");

            match symbol_type {
                Some(symbol_type) => {
                    let id = push_symbol(ctx, child, &name, &child_path, symbol_type, parent_id);
                    walk(child, ctx, &child_path, Some(&id), nests_type || inside_type);
                }
                None => {
                    walk(child, ctx, &child_path, parent_id, nests_type || inside_type);
                }
            }
            continue;
        }

        if let Some((_, symbol_type)) = ctx
            .rules
            .symbols
            .iter()
            .find(|(symbol, _)| *symbol == kind)
        {
            if let Some(name) = resolve_name(child, ctx.source) {
                let (effective_path, effective_type) =
                    place_symbol(ctx, child, path, &name, *symbol_type, inside_type);
                let id = push_symbol(
                    ctx,
                    child,
                    &name,
                    &effective_path,
                    effective_type,
                    parent_id,
                );
                // Inner definitions (closures, nested defs) nest below.
                walk(child, ctx, &effective_path, Some(&id), inside_type);
                continue;
            }
        }

        walk(child, ctx, path, parent_id, inside_type);
    }
}

/// Compute the path and final type for an emitting node. Go methods hang
/// off their receiver type; functions inside a type become methods.
fn place_symbol(
    ctx: &WalkContext<'_>,
    node: Node<'_>,
    path: &str,
    name: &str,
    declared: SymbolType,
    inside_type: bool,
) -> (String, SymbolType) {
    if ctx.language == "go" && node.kind() == "method_declaration" {
        if let Some(receiver) = go_receiver_type(node, ctx.source) {
            return (format!("{}/{}/{}", path, receiver, name), SymbolType::Method);
        }
    }
    let effective = if declared == SymbolType::Function && inside_type {
        SymbolType::Method
    } else {
        declared
    };
    (format!("{}/{}", path, name), effective)
}

/// Go's `type X ...` declares whatever its underlying type is; reclassify
/// interfaces.
fn adjust_container_type(node: Node<'_>, declared: SymbolType) -> SymbolType {
    if node.kind() == "type_spec" {
        if let Some(underlying) = node.child_by_field_name("type") {
            return match underlying.kind() {
                "interface_type" => SymbolType::Interface,
                _ => SymbolType::Class,
            };
        }
    }
    declared
}

fn push_symbol(
    ctx: &mut WalkContext<'_>,
    node: Node<'_>,
    name: &str,
    name_path: &str,
    symbol_type: SymbolType,
    parent_id: Option<&str>,
) -> String {
    // Overloads would collide on name_path; suffix an ordinal.
    let mut unique_path = name_path.to_string();
    let mut ordinal = 1;
    while !ctx.seen_paths.insert(unique_path.clone()) {
        ordinal += 1;
        unique_path = format!("{}#{}", name_path, ordinal);
    }

    let id = Uuid::new_v4().to_string();
    let source_code = node_text(node, ctx.source).to_string();
    ctx.symbols.push(CodeSymbol {
        id: id.clone(),
        project_id: ctx.project_id.to_string(),
        file_path: ctx.file_path.to_string(),
        language: ctx.language.to_string(),
        symbol_type,
        name: name.to_string(),
        name_path: unique_path,
        start_line: node.start_position().row as i64 + 1,
        end_line: node.end_position().row as i64 + 1,
        start_byte: node.start_byte() as i64,
        end_byte: node.end_byte() as i64,
        signature: signature_of(node, ctx.source),
        doc_string: doc_comment(node, ctx.source, ctx.language),
        source_code,
        embedding: None,
        parent_id: parent_id.map(str::to_string),
        metadata: serde_json::json!({}),
    });
    id
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    &source[node.start_byte()..node.end_byte()]
}

fn file_stem(file_path: &str) -> String {
    std::path::Path::new(file_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.to_string())
}

/// The package/namespace name declared at the top of the file, if any.
fn find_package_root(root: Node<'_>, source: &str, rules: &Rules) -> Option<String> {
    if rules.package.is_empty() {
        return None;
    }
    let mut cursor = root.walk();
    let children: Vec<Node> = root.named_children(&mut cursor).collect();
    for child in children {
        if rules.package.contains(&child.kind()) {
            return resolve_name(child, source);
        }
    }
    None
}

/// Name kinds recognized across grammars.
const NAME_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "simple_identifier",
    "field_identifier",
    "property_identifier",
    "constant",
    "package_identifier",
    "namespace_identifier",
    "namespace_name",
    "scoped_identifier",
    "dotted_name",
    "qualified_identifier",
    "name",
];

/// Resolve the name of a definition node: the `name` field first, then the
/// C-style declarator chain, then the first name-like descendant.
fn resolve_name(node: Node<'_>, source: &str) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        return Some(name_like_text(name_node, source));
    }
    if let Some(declarator) = node.child_by_field_name("declarator") {
        return resolve_declarator(declarator, source);
    }
    first_name_descendant(node, source, 2)
}

/// Containers name themselves like symbols, except `impl` blocks which
/// take the implemented type's name.
fn container_name(node: Node<'_>, source: &str) -> Option<String> {
    if node.kind() == "impl_item" {
        if let Some(type_node) = node.child_by_field_name("type") {
            return Some(node_text(type_node, source).to_string());
        }
    }
    resolve_name(node, source)
}

/// Walk C/C++ declarators down to the identifier.
fn resolve_declarator(node: Node<'_>, source: &str) -> Option<String> {
    if NAME_KINDS.contains(&node.kind()) {
        return Some(node_text(node, source).to_string());
    }
    if let Some(inner) = node.child_by_field_name("declarator") {
        return resolve_declarator(inner, source);
    }
    first_name_descendant(node, source, 3)
}

fn name_like_text(node: Node<'_>, source: &str) -> String {
    if NAME_KINDS.contains(&node.kind()) || node.named_child_count() == 0 {
        return node_text(node, source).to_string();
    }
    first_name_descendant(node, source, 2).unwrap_or_else(|| node_text(node, source).to_string())
}

fn first_name_descendant(node: Node<'_>, source: &str, depth: usize) -> Option<String> {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    drop(cursor);
    for child in &children {
        if NAME_KINDS.contains(&child.kind()) {
            return Some(node_text(*child, source).to_string());
        }
    }
    if depth > 1 {
        for child in &children {
            if let Some(found) = first_name_descendant(*child, source, depth - 1) {
                return Some(found);
            }
        }
    }
    None
}

/// The receiver type of a Go method: `func (s *Server) Close()` → `Server`.
fn go_receiver_type(node: Node<'_>, source: &str) -> Option<String> {
    let receiver = node.child_by_field_name("receiver")?;
    first_name_descendant(receiver, source, 3).map(|t| t.trim_start_matches('*').to_string())
}

/// The declaration head: everything before the body, or the first line.
fn signature_of(node: Node<'_>, source: &str) -> Option<String> {
    let text = node_text(node, source);
    let head = match node.child_by_field_name("body") {
        Some(body) if body.start_byte() > node.start_byte() => {
            &source[node.start_byte()..body.start_byte()]
        }
        _ => text.lines().next().unwrap_or(text),
    };
    let head = head.trim().trim_end_matches('{').trim_end_matches(':').trim();
    if head.is_empty() {
        None
    } else {
        Some(head.to_string())
    }
}

/// Comment lines immediately preceding the node, plus Python's leading
/// string in the body.
fn doc_comment(node: Node<'_>, source: &str, language: &str) -> Option<String> {
    if language == "python" {
        if let Some(doc) = python_docstring(node, source) {
            return Some(doc);
        }
    }

    let mut parts: Vec<String> = Vec::new();
    let mut expected_row = node.start_position().row;
    let mut sibling = node.prev_sibling();
    while let Some(prev) = sibling {
        if !prev.kind().contains("comment") {
            break;
        }
        // Only comments touching the definition count as its docs.
        if prev.end_position().row + 1 < expected_row {
            break;
        }
        expected_row = prev.start_position().row;
        parts.push(node_text(prev, source).to_string());
        sibling = prev.prev_sibling();
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts.join("\n"))
}

fn python_docstring(node: Node<'_>, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    Some(
        node_text(string, source)
            .trim_matches(|c| c == '"' || c == '\'')
            .trim()
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(symbols: &[CodeSymbol]) -> Vec<(&str, SymbolType)> {
        symbols
            .iter()
            .map(|s| (s.name_path.as_str(), s.symbol_type))
            .collect()
    }

    #[test]
    fn go_extraction_roots_at_package() {
        let source = r#"package server

// Serve runs the loop.
func Serve() {}

type Handler struct {
    name string
}

func (h *Handler) Handle() error { return nil }
"#;
        let symbols = extract_symbols("p", "server/main.go", "go", source).unwrap();
        let got = paths(&symbols);
        assert!(got.contains(&("server/Serve", SymbolType::Function)), "{:?}", got);
        assert!(got.contains(&("server/Handler", SymbolType::Class)), "{:?}", got);
        assert!(
            got.contains(&("server/Handler/Handle", SymbolType::Method)),
            "{:?}",
            got
        );

        let serve = symbols.iter().find(|s| s.name == "Serve").unwrap();
        assert_eq!(serve.doc_string.as_deref(), Some("// Serve runs the loop."));
        assert!(serve.signature.as_deref().unwrap().starts_with("func Serve"));
        assert!(serve.start_line >= 1 && serve.end_line >= serve.start_line);
    }

    #[test]
    fn rust_extraction_nests_impl_methods() {
        let source = r#"
pub struct Engine {
    state: u8,
}

impl Engine {
    pub fn start(&mut self) {}
}

pub fn free_standing() {}

pub const LIMIT: usize = 10;
"#;
        let symbols = extract_symbols("p", "src/engine.rs", "rust", source).unwrap();
        let got = paths(&symbols);
        assert!(got.contains(&("engine/Engine", SymbolType::Class)), "{:?}", got);
        assert!(
            got.contains(&("engine/Engine/start", SymbolType::Method)),
            "{:?}",
            got
        );
        assert!(
            got.contains(&("engine/free_standing", SymbolType::Function)),
            "{:?}",
            got
        );
        assert!(got.contains(&("engine/LIMIT", SymbolType::Constant)), "{:?}", got);
    }

    #[test]
    fn python_extraction_captures_docstrings() {
        let source = r#"
class Greeter:
    """Greets people."""

    def greet(self, name):
        """Say hello."""
        return f"hi {name}"

def main():
    pass
"#;
        let symbols = extract_symbols("p", "app/greeter.py", "python", source).unwrap();
        let got = paths(&symbols);
        assert!(got.contains(&("greeter/Greeter", SymbolType::Class)), "{:?}", got);
        assert!(
            got.contains(&("greeter/Greeter/greet", SymbolType::Method)),
            "{:?}",
            got
        );
        assert!(got.contains(&("greeter/main", SymbolType::Function)), "{:?}", got);

        let greet = symbols.iter().find(|s| s.name == "greet").unwrap();
        assert_eq!(greet.doc_string.as_deref(), Some("Say hello."));
    }

    #[test]
    fn javascript_classes_and_methods() {
        let source = r#"
class Store {
  load() { return 1; }
}

function helper() {}
"#;
        let symbols = extract_symbols("p", "lib/store.js", "javascript", source).unwrap();
        let got = paths(&symbols);
        assert!(got.contains(&("store/Store", SymbolType::Class)), "{:?}", got);
        assert!(got.contains(&("store/Store/load", SymbolType::Method)), "{:?}", got);
        assert!(got.contains(&("store/helper", SymbolType::Function)), "{:?}", got);
    }

    #[test]
    fn parents_link_the_hierarchy() {
        let source = "class A:\n    def m(self):\n        pass\n";
        let symbols = extract_symbols("p", "a.py", "python", source).unwrap();
        let class = symbols.iter().find(|s| s.name == "A").unwrap();
        let method = symbols.iter().find(|s| s.name == "m").unwrap();
        assert_eq!(method.parent_id.as_deref(), Some(class.id.as_str()));
        assert!(class.parent_id.is_none());
    }

    #[test]
    fn extraction_is_deterministic() {
        let source = "func A() {}\nfunc B() {}\n";
        let source = format!("package x\n\n{}", source);
        let one = extract_symbols("p", "x.go", "go", &source).unwrap();
        let two = extract_symbols("p", "x.go", "go", &source).unwrap();
        assert_eq!(paths(&one), paths(&two));
        assert_eq!(
            one.iter().map(|s| s.start_byte).collect::<Vec<_>>(),
            two.iter().map(|s| s.start_byte).collect::<Vec<_>>()
        );
    }

    #[test]
    fn duplicate_paths_get_ordinals() {
        // Two C functions with the same name (e.g. behind #ifdef) must not
        // collide on name_path.
        let source = "int f(void) { return 1; }\nint f(void) { return 2; }\n";
        let symbols = extract_symbols("p", "dup.c", "c", source).unwrap();
        let got: Vec<&str> = symbols.iter().map(|s| s.name_path.as_str()).collect();
        assert_eq!(got.len(), 2);
        assert_ne!(got[0], got[1], "{:?}", got);
    }

    #[test]
    fn unsupported_language_is_an_error() {
        assert!(extract_symbols("p", "x.zig", "zig", "fn main() {}").is_err());
    }
}

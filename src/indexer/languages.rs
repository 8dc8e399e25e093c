//! Supported languages: extension classification and grammar lookup.
//!
//! Each language pairs a stable name (stored on records) with its
//! tree-sitter grammar. Classification is by file extension only; files
//! with unknown extensions are skipped by the walker.

use tree_sitter::Language;

/// All languages the indexer parses.
pub const LANGUAGE_NAMES: &[&str] = &[
    "c",
    "cpp",
    "csharp",
    "rust",
    "python",
    "javascript",
    "typescript",
    "tsx",
    "java",
    "go",
    "ruby",
    "php",
    "swift",
    "kotlin",
];

/// Map a file extension (without the dot, lowercase) to a language name.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "c" | "h" => Some("c"),
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => Some("cpp"),
        "cs" => Some("csharp"),
        "rs" => Some("rust"),
        "py" | "pyi" => Some("python"),
        "js" | "mjs" | "cjs" | "jsx" => Some("javascript"),
        "ts" | "mts" | "cts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "java" => Some("java"),
        "go" => Some("go"),
        "rb" | "rake" => Some("ruby"),
        "php" => Some("php"),
        "swift" => Some("swift"),
        "kt" | "kts" => Some("kotlin"),
        _ => None,
    }
}

/// The tree-sitter grammar for a language name.
pub fn grammar(language: &str) -> Option<Language> {
    match language {
        "c" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "csharp" => Some(tree_sitter_c_sharp::LANGUAGE.into()),
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "tsx" => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "ruby" => Some(tree_sitter_ruby::LANGUAGE.into()),
        "php" => Some(tree_sitter_php::LANGUAGE_PHP.into()),
        "swift" => Some(tree_sitter_swift::LANGUAGE.into()),
        "kotlin" => Some(tree_sitter_kotlin_ng::LANGUAGE.into()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_least_fourteen_languages() {
        assert!(LANGUAGE_NAMES.len() >= 14);
    }

    #[test]
    fn every_language_has_a_grammar() {
        for name in LANGUAGE_NAMES {
            assert!(grammar(name).is_some(), "no grammar for {}", name);
        }
        assert!(grammar("cobol").is_none());
    }

    #[test]
    fn extensions_classify() {
        assert_eq!(language_for_extension("go"), Some("go"));
        assert_eq!(language_for_extension("rs"), Some("rust"));
        assert_eq!(language_for_extension("tsx"), Some("tsx"));
        assert_eq!(language_for_extension("hpp"), Some("cpp"));
        assert_eq!(language_for_extension("txt"), None);
    }

    #[test]
    fn grammars_load_into_a_parser() {
        let mut parser = tree_sitter::Parser::new();
        for name in LANGUAGE_NAMES {
            parser
                .set_language(&grammar(name).unwrap())
                .unwrap_or_else(|e| panic!("grammar for {} rejected: {}", name, e));
        }
    }
}

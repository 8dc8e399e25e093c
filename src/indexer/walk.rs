//! Project file discovery.
//!
//! Walks a project root honoring `.gitignore` rules plus a built-in ignore
//! list of vendor and build directories, classifies files by extension, and
//! hashes contents for the skip-unchanged gate. Output is sorted so a walk
//! over the same tree is deterministic.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::languages::language_for_extension;
use crate::error::{Error, Result};

/// Directories never worth indexing, gitignored or not.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".gradle",
    ".venv",
    "venv",
    "__pycache__",
    "node_modules",
    "bower_components",
    "vendor",
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "obj",
    "Pods",
    "DerivedData",
];

/// A source file selected for indexing.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub absolute: PathBuf,
    /// Path relative to the project root, forward-slashed.
    pub relative: String,
    pub language: &'static str,
}

/// Compile user exclude patterns. Invalid patterns are skipped with a
/// warning rather than blocking indexing.
pub fn build_exclude_set(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "invalid exclude glob, skipping"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "exclude set failed to build, excluding nothing");
        GlobSet::empty()
    })
}

/// Walk `root` and return every classifiable source file.
pub fn discover_files(root: &Path, exclude: &GlobSet) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        return Err(Error::Validation(format!(
            "project root is not a directory: {}",
            root.display()
        )));
    }

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        // Ignore rules apply to plain directories too, not only checkouts.
        .require_git(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                && IGNORED_DIRS.iter().any(|d| *d == name))
        })
        .build();

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| Error::Io {
            source: std::io::Error::other(e),
        })?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let Some(language) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .and_then(|e| language_for_extension(&e))
        else {
            continue;
        };
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        if exclude.is_match(&relative) {
            continue;
        }
        files.push(DiscoveredFile {
            absolute: path.to_path_buf(),
            relative,
            language,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

/// Classify one path the way the walker would, for watcher events.
pub fn classify_path(root: &Path, path: &Path, exclude: &GlobSet) -> Option<DiscoveredFile> {
    let language = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .and_then(|e| language_for_extension(&e))?;
    let relative = path.strip_prefix(root).ok()?;
    for component in relative.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.starts_with('.') || IGNORED_DIRS.iter().any(|d| *d == name) {
            return None;
        }
    }
    let relative = relative.to_string_lossy().replace('\\', "/");
    if exclude.is_match(&relative) {
        return None;
    }
    Some(DiscoveredFile {
        absolute: path.to_path_buf(),
        relative,
        language,
    })
}

/// Content hash used by the skip-unchanged gate.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// File counts per language.
pub fn language_stats(files: &[DiscoveredFile]) -> Value {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for file in files {
        *counts.entry(file.language).or_default() += 1;
    }
    serde_json::to_value(counts).unwrap_or(Value::Null)
}

/// A stable project id derived from the canonical root path.
pub fn project_id_for_path(root: &Path) -> String {
    let canonical = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf());
    let digest = hash_bytes(canonical.to_string_lossy().as_bytes());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn project(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    fn no_excludes() -> GlobSet {
        GlobSet::empty()
    }

    #[test]
    fn discovers_and_classifies_sorted() {
        let dir = project(&[
            ("b.go", "package main"),
            ("a.go", "package main"),
            ("lib/c.py", "x = 1"),
            ("README.md", "# readme"),
        ]);
        let files = discover_files(dir.path(), &no_excludes()).unwrap();
        let rel: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(rel, vec!["a.go", "b.go", "lib/c.py"]);
        assert_eq!(files[0].language, "go");
        assert_eq!(files[2].language, "python");
    }

    #[test]
    fn built_in_ignores_apply() {
        let dir = project(&[
            ("src/main.rs", "fn main() {}"),
            ("target/debug/build.rs", "fn main() {}"),
            ("node_modules/pkg/index.js", "x"),
            ("vendor/dep/dep.go", "package dep"),
        ]);
        let files = discover_files(dir.path(), &no_excludes()).unwrap();
        let rel: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(rel, vec!["src/main.rs"]);
    }

    #[test]
    fn gitignore_rules_apply() {
        let dir = project(&[
            (".gitignore", "generated.go\n"),
            ("kept.go", "package x"),
            ("generated.go", "package x"),
        ]);
        let files = discover_files(dir.path(), &no_excludes()).unwrap();
        let rel: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(rel, vec!["kept.go"]);
    }

    #[test]
    fn user_excludes_apply() {
        let dir = project(&[
            ("src/main.rs", "fn main() {}"),
            ("src/generated.rs", "fn gen() {}"),
        ]);
        let exclude = build_exclude_set(&["**/generated.rs".to_string()]);
        let files = discover_files(dir.path(), &exclude).unwrap();
        let rel: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(rel, vec!["src/main.rs"]);
    }

    #[test]
    fn classify_path_filters_ignored_dirs() {
        let root = Path::new("/proj");
        let none = no_excludes();
        assert!(classify_path(root, Path::new("/proj/src/a.rs"), &none).is_some());
        assert!(classify_path(root, Path::new("/proj/target/a.rs"), &none).is_none());
        assert!(classify_path(root, Path::new("/proj/a.txt"), &none).is_none());
        assert!(classify_path(root, Path::new("/elsewhere/a.rs"), &none).is_none());
        let exclude = build_exclude_set(&["src/skip.rs".to_string()]);
        assert!(classify_path(root, Path::new("/proj/src/skip.rs"), &exclude).is_none());
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }

    #[test]
    fn language_stats_counts() {
        let dir = project(&[("a.go", "package a"), ("b.go", "package b"), ("c.py", "x = 1")]);
        let files = discover_files(dir.path(), &no_excludes()).unwrap();
        let stats = language_stats(&files);
        assert_eq!(stats["go"], 2);
        assert_eq!(stats["python"], 1);
    }

    #[test]
    fn project_id_is_stable() {
        let dir = project(&[("a.go", "package a")]);
        let one = project_id_for_path(dir.path());
        let two = project_id_for_path(dir.path());
        assert_eq!(one, two);
        assert_eq!(one.len(), 16);
    }
}

// src/watch/imports.rs

//! Static import-graph expansion for Go source trees.
//!
//! Only the package clause and the import declarations of each file are
//! looked at; nothing is type-checked. Every import path is resolved twice:
//! relative to the importing directory and below `<source_root>/src`. Any
//! candidate that exists and holds parseable sources joins the watch set,
//! and its own imports are followed until no new directory turns up.

use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::fs::FileSystem;
use crate::watch::patterns::split_patterns;

/// Include pattern that switches import expansion on.
pub const GO_SOURCE_PATTERN: &str = "*.go";

const GO_EXTENSION: &str = "go";

static COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/|//[^\n]*").expect("valid regex"));
static PACKAGE_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*package\s+[A-Za-z_][A-Za-z0-9_]*").expect("valid regex"));
static FIRST_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(func|type|var|const)\b").expect("valid regex"));
static IMPORT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\bimport\s*\((.*?)\)").expect("valid regex"));
static IMPORT_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)\bimport\s+(?:[A-Za-z_.][A-Za-z0-9_]*\s+)?["`]([^"`]+)["`]"#)
        .expect("valid regex")
});
static IMPORT_SPEC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["`]([^"`]+)["`]"#).expect("valid regex"));

/// True when the include list asks for Go sources.
pub fn targets_go_sources(include: &str) -> bool {
    split_patterns(include)
        .iter()
        .any(|p| p == GO_SOURCE_PATTERN)
}

/// Extract the import paths of one Go source file.
///
/// Returns `None` when the text has no package clause, i.e. it does not
/// parse as a Go file.
pub fn parse_imports(source: &str) -> Option<Vec<String>> {
    let stripped = COMMENTS.replace_all(source, "");
    let package = PACKAGE_CLAUSE.find(&stripped)?;

    let rest = &stripped[package.end()..];
    let header = match FIRST_DECL.find(rest) {
        Some(decl) => &rest[..decl.start()],
        None => rest,
    };

    let mut imports = Vec::new();
    for block in IMPORT_BLOCK.captures_iter(header) {
        for spec in IMPORT_SPEC.captures_iter(&block[1]) {
            imports.push(spec[1].to_string());
        }
    }
    let without_blocks = IMPORT_BLOCK.replace_all(header, "");
    for single in IMPORT_SINGLE.captures_iter(&without_blocks) {
        imports.push(single[1].to_string());
    }

    Some(imports)
}

/// Walks import declarations to find every directory a build depends on.
#[derive(Debug)]
pub struct ImportGraphExpander<'a> {
    fs: &'a dyn FileSystem,
    source_root: Option<PathBuf>,
}

impl<'a> ImportGraphExpander<'a> {
    pub fn new(fs: &'a dyn FileSystem, source_root: Option<PathBuf>) -> Self {
        Self { fs, source_root }
    }

    /// Add `root` and every directory reachable through imports to `result`.
    ///
    /// Each directory is visited at most once, so cyclic imports terminate.
    pub fn expand(&self, root: &Path, result: &mut BTreeSet<PathBuf>) {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut pending = vec![clean_path(root)];

        while let Some(dir) = pending.pop() {
            if !visited.insert(dir.clone()) {
                continue;
            }

            let entries = match self.fs.read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for file in entries {
                let is_go = file.extension().map(|e| e == GO_EXTENSION).unwrap_or(false);
                if !is_go || !self.fs.is_file(&file) {
                    continue;
                }

                let source = match self.fs.read_to_string(&file) {
                    Ok(s) => s,
                    Err(err) => {
                        warn!(file = ?file, error = %err, "failed to read source file");
                        continue;
                    }
                };

                let Some(imports) = parse_imports(&source) else {
                    continue;
                };

                if result.insert(dir.clone()) {
                    debug!(dir = ?dir, "import expansion added directory");
                }

                for import in imports {
                    pending.push(clean_path(&dir.join(&import)));
                    if let Some(source_root) = &self.source_root {
                        pending.push(clean_path(&source_root.join("src").join(&import)));
                    }
                }
            }
        }
    }
}

/// Lexically normalise a path: drop `.`, fold `..` into its parent.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

// src/watch/discovery.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{DevloopError, Result};
use crate::fs::RealFileSystem;
use crate::watch::imports::{ImportGraphExpander, targets_go_sources};

/// Environment variable consulted when no explicit source root is set.
pub const SOURCE_ROOT_ENV: &str = "GOPATH";

/// Every directory under `root` (inclusive), skipping hidden subtrees.
///
/// The root itself is kept even when its own name starts with a dot.
pub fn walk_directories(root: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut dirs = BTreeSet::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

    for entry in walker {
        let entry = entry.map_err(|err| {
            DevloopError::IoError(
                err.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if entry.file_type().is_dir() {
            dirs.insert(entry.into_path());
        }
    }

    Ok(dirs)
}

/// Compute the directory set for one build rule.
///
/// The recursive walk of `root` is extended with the import graph when the
/// include list targets Go sources.
pub fn discover_directories(
    root: &Path,
    include: &str,
    source_root: Option<&Path>,
) -> Result<BTreeSet<PathBuf>> {
    let mut dirs = walk_directories(root)?;

    if targets_go_sources(include) {
        let source_root = source_root
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(SOURCE_ROOT_ENV).map(PathBuf::from));
        let fs = RealFileSystem;
        let before = dirs.len();
        ImportGraphExpander::new(&fs, source_root).expand(root, &mut dirs);
        debug!(
            root = ?root,
            added = dirs.len() - before,
            "import graph expanded watch set"
        );
    }

    Ok(dirs)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

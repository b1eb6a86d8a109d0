// src/watch/patterns.rs

use std::fmt;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};

use crate::errors::{DevloopError, Result};

/// What part of a path a pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// Pattern has no `/`: match the final path segment only.
    FileName,
    /// Pattern contains a `/`: match the path relative to the base directory.
    RelativePath,
}

/// A single compiled include or exclude glob.
///
/// `*`, `?` and `[...]` never cross a path separator, so `src/*.go` matches
/// `src/main.go` but not `src/sub/main.go`.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    scope: MatchScope,
    matcher: GlobMatcher,
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("source", &self.source)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Pattern {
    /// Compile a glob. Malformed syntax is a configuration error.
    pub fn new(source: &str) -> Result<Self> {
        let scope = if source.contains('/') {
            MatchScope::RelativePath
        } else {
            MatchScope::FileName
        };

        let glob = GlobBuilder::new(source)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|source_err| DevloopError::InvalidPattern {
                pattern: source.to_string(),
                source: source_err,
            })?;

        Ok(Self {
            source: source.to_string(),
            scope,
            matcher: glob.compile_matcher(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn scope(&self) -> MatchScope {
        self.scope
    }

    /// Match `path` (absolute) against this pattern.
    ///
    /// Relative-scope patterns never match paths outside `base`.
    pub fn matches(&self, path: &Path, base: &Path) -> bool {
        match self.scope {
            MatchScope::FileName => path
                .file_name()
                .map(|name| self.matcher.is_match(Path::new(name)))
                .unwrap_or(false),
            MatchScope::RelativePath => path
                .strip_prefix(base)
                .map(|rel| self.matcher.is_match(rel))
                .unwrap_or(false),
        }
    }
}

/// Include + exclude globs for one watcher.
///
/// A path matches when it matches any include pattern and no exclude
/// pattern.
#[derive(Debug, Clone)]
pub struct PatternSet {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
    base: PathBuf,
}

impl PatternSet {
    /// A set that matches nothing.
    pub fn empty(base: impl Into<PathBuf>) -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            base: base.into(),
        }
    }

    /// Parse comma-separated include/exclude lists, relative patterns being
    /// evaluated against the process working directory.
    pub fn parse(include: &str, exclude: &str) -> Result<Self> {
        let base = std::env::current_dir()?;
        Self::parse_with_base(include, exclude, base)
    }

    pub fn parse_with_base(
        include: &str,
        exclude: &str,
        base: impl Into<PathBuf>,
    ) -> Result<Self> {
        let includes = split_patterns(include)
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>>>()?;
        let excludes = split_patterns(exclude)
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            includes,
            excludes,
            base: base.into(),
        })
    }

    pub fn includes(&self) -> &[Pattern] {
        &self.includes
    }

    pub fn excludes(&self) -> &[Pattern] {
        &self.excludes
    }

    pub fn matches(&self, path: &Path) -> bool {
        let included = self.includes.iter().any(|p| p.matches(path, &self.base));
        if !included {
            return false;
        }
        !self.excludes.iter().any(|p| p.matches(path, &self.base))
    }
}

/// Split a comma-separated pattern list, trimming entries and dropping empty
/// ones.
pub fn split_patterns(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// One-off match of `pattern` against `path`, relative patterns being
/// resolved against the current working directory.
pub fn match_path(pattern: &str, path: &Path) -> Result<bool> {
    let base = std::env::current_dir()?;
    Ok(Pattern::new(pattern)?.matches(path, &base))
}

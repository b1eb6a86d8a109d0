// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Compiling include / exclude glob patterns per build rule.
//! - Multiplexing a single `notify` backend across many logical watchers.
//! - Debouncing bursts of events into one changed path per quiet period.
//! - Discovering the directories a rule depends on, including the Go
//!   import graph.
//!
//! It does **not** know about builds or processes; it only turns filesystem
//! activity into changed paths.

pub mod discovery;
pub mod imports;
pub mod multiplexer;
pub mod patterns;
pub mod watcher;

pub use discovery::{discover_directories, walk_directories};
pub use imports::{ImportGraphExpander, parse_imports};
pub use multiplexer::FsMultiplexer;
pub use patterns::{Pattern, PatternSet, match_path, split_patterns};
pub use watcher::{ChangeWatcher, DEBOUNCE_WINDOW};

// src/errors.rs

//! Crate-wide error types.
//!
//! `DevloopError` covers everything that should stop the orchestrator
//! (configuration, glob syntax, watch subscription). `BuildError` is the
//! payload of a failed build or run; it never travels up the call stack and
//! only ends up in the coordinator's per-key error map.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DevloopError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid glob pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Failed to watch directory {path:?}: {source}")]
    WatchError {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Path {path:?} is outside working directory {working_dir:?}")]
    TemplateError { path: PathBuf, working_dir: PathBuf },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a supervised process did not complete successfully.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("exit status {0}")]
    ExitStatus(i32),

    #[error("terminated by signal")]
    Signalled,

    #[error("killed")]
    Killed,

    #[error("failed to spawn process: {0}")]
    Spawn(String),

    #[error("failed to allocate pseudo-terminal: {0}")]
    Pty(String),
}

/// Result of one supervised process run.
pub type Completion = std::result::Result<(), BuildError>;

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DevloopError>;

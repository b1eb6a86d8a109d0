// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::Profile;

/// Command-line arguments for `devloop`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "devloop",
    version,
    about = "Rebuild, restart and live-reload on file changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (JSON, or TOML with a `.toml` extension).
    ///
    /// Default: `devloop.config` in the current directory if present,
    /// otherwise the built-in configuration.
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Use the built-in library profile (build only).
    #[arg(short = 'l', long, conflicts_with = "test")]
    pub library: bool,

    /// Use the built-in test profile (`go test` on every change).
    #[arg(short = 't', long)]
    pub test: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEVLOOP_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the configuration, print it, run nothing.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    pub fn profile(&self) -> Profile {
        if self.library {
            Profile::Library
        } else if self.test {
            Profile::Test
        } else {
            Profile::Application
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

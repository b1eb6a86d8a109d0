// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`backend`] defines the `Supervisor` trait the build coordinator drives;
//!   tests replace it with a fake.
//! - [`command`] is the production supervisor: one command line, run on a
//!   pseudo-terminal, at most one live instance.
//! - [`pty`] allocates the pseudo-terminal pair.
//! - [`output`] reassembles, rewrites and prints child output.
//! - [`template`] substitutes changed-file tokens and splits command lines.

pub mod backend;
pub mod command;
pub mod output;
pub mod pty;
pub mod template;

pub use backend::Supervisor;
pub use command::Command;
pub use output::{LineBuffer, OutputSink, PrefixedConsole, Replacements};
pub use template::{CommandTemplate, tokenize};

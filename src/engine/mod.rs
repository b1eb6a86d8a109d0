// src/engine/mod.rs

//! Orchestration engine for devloop.
//!
//! The shared build-state machine lives in [`coordinator`]; the per-rule
//! compiler and runner loops that feed and consume it live in [`driver`].

pub mod coordinator;
pub mod driver;

pub use coordinator::{BuildCoordinator, BuildKey, BuildState, FLUSH_DELAY};
pub use driver::{CompilerLoop, CompilerRule, RunnerRule, prepare_compiler, run_runner};

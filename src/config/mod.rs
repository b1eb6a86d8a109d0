// src/config/mod.rs

//! Configuration loading and validation for devloop.
//!
//! Responsibilities:
//! - Define the JSON/TOML-backed data model and built-in profiles (`model.rs`).
//! - Find and load a config file, absolutise its paths (`loader.rs`).
//! - Reject configurations that could only fail at runtime (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{CompilerConfig, ConfigFile, Profile, ProxyConfig, RunnerConfig};
pub use validate::validate_config;

// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// The historical format is JSON:
///
/// ```json
/// {
///   "watchroot": ".",
///   "compilers": [
///     { "name": "build", "pattern": "*.go", "command": "go build -o .tmp_devloop/devloop_build" }
///   ],
///   "runners": [ { "name": "run", "command": ".tmp_devloop/devloop_build" } ],
///   "httpproxies": [ { "listen": ":1984", "target": "http://127.0.0.1:3000" } ]
/// }
/// ```
///
/// The same keys are accepted from a `.toml` file. Every section is
/// optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Root of the directory walk for every compiler.
    #[serde(default = "default_watch_root")]
    pub watchroot: PathBuf,

    #[serde(default)]
    pub compilers: Vec<CompilerConfig>,

    #[serde(default)]
    pub runners: Vec<RunnerConfig>,

    #[serde(default)]
    pub httpproxies: Vec<ProxyConfig>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            watchroot: default_watch_root(),
            compilers: Vec::new(),
            runners: Vec::new(),
            httpproxies: Vec::new(),
        }
    }
}

fn default_watch_root() -> PathBuf {
    PathBuf::from(".")
}

/// A rule that rebuilds something whenever a matching file changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilerConfig {
    pub name: String,

    /// Comma-separated include globs.
    #[serde(default)]
    pub pattern: String,

    /// Comma-separated exclude globs.
    #[serde(default)]
    pub exclude: String,

    /// Command template; empty means watch-only.
    #[serde(default)]
    pub command: String,

    /// Empty means the current directory.
    #[serde(default)]
    pub workingdir: PathBuf,

    #[serde(default)]
    pub runonstart: bool,

    /// Literal output substitutions.
    #[serde(default)]
    pub replace: BTreeMap<String, String>,

    /// Second resolution root for imports (`<sourceroot>/src/<import>`).
    /// Falls back to `$GOPATH`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sourceroot: Option<PathBuf>,
}

/// A long-running process restarted around every successful build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub name: String,

    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub workingdir: PathBuf,

    #[serde(default)]
    pub replace: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// `host:port`, or `:port` for every interface.
    pub listen: String,

    /// Origin URL, e.g. `http://127.0.0.1:3000`.
    pub target: String,
}

/// Which built-in configuration to use when no file is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Build, template watch, run, proxy.
    #[default]
    Application,
    /// Build only.
    Library,
    /// Run the tests on every change.
    Test,
}

pub const BUILD_OUTPUT: &str = ".tmp_devloop/devloop_build";

impl ConfigFile {
    /// Built-in configuration for `profile`.
    pub fn builtin(profile: Profile) -> Self {
        let build = CompilerConfig {
            name: "build".to_string(),
            pattern: "*.go".to_string(),
            command: format!("go build -o {BUILD_OUTPUT}"),
            ..CompilerConfig::default()
        };

        match profile {
            Profile::Library => Self {
                compilers: vec![build],
                ..Self::default()
            },
            Profile::Test => Self {
                compilers: vec![CompilerConfig {
                    name: "test".to_string(),
                    pattern: "*.go".to_string(),
                    command: "go test".to_string(),
                    ..CompilerConfig::default()
                }],
                ..Self::default()
            },
            Profile::Application => Self {
                compilers: vec![
                    build,
                    CompilerConfig {
                        name: "template".to_string(),
                        pattern: "*.tmpl".to_string(),
                        ..CompilerConfig::default()
                    },
                ],
                runners: vec![RunnerConfig {
                    name: "run".to_string(),
                    command: BUILD_OUTPUT.to_string(),
                    ..RunnerConfig::default()
                }],
                httpproxies: vec![ProxyConfig {
                    listen: ":1984".to_string(),
                    target: "http://127.0.0.1:3000".to_string(),
                }],
                ..Self::default()
            },
        }
    }

    /// Longest rule name, for aligning console prefixes.
    pub fn name_width(&self) -> usize {
        self.compilers
            .iter()
            .map(|c| c.name.len())
            .chain(self.runners.iter().map(|r| r.name.len()))
            .max()
            .unwrap_or(0)
    }
}

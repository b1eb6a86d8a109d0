#![allow(dead_code)]

use std::path::Path;

use devloop::config::{CompilerConfig, ConfigFile, ProxyConfig, RunnerConfig};

/// Builder for `ConfigFile` to simplify test setup.
#[derive(Default)]
pub struct ConfigFileBuilder {
    config: ConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch_root(mut self, root: &Path) -> Self {
        self.config.watchroot = root.to_path_buf();
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerConfig) -> Self {
        self.config.compilers.push(compiler);
        self
    }

    pub fn with_runner(mut self, name: &str, command: &str) -> Self {
        self.config.runners.push(RunnerConfig {
            name: name.to_string(),
            command: command.to_string(),
            ..RunnerConfig::default()
        });
        self
    }

    pub fn with_proxy(mut self, listen: &str, target: &str) -> Self {
        self.config.httpproxies.push(ProxyConfig {
            listen: listen.to_string(),
            target: target.to_string(),
        });
        self
    }

    pub fn build(self) -> ConfigFile {
        self.config
    }
}

/// Builder for `CompilerConfig`.
pub struct CompilerConfigBuilder {
    compiler: CompilerConfig,
}

impl CompilerConfigBuilder {
    pub fn new(name: &str, pattern: &str) -> Self {
        Self {
            compiler: CompilerConfig {
                name: name.to_string(),
                pattern: pattern.to_string(),
                ..CompilerConfig::default()
            },
        }
    }

    pub fn command(mut self, command: &str) -> Self {
        self.compiler.command = command.to_string();
        self
    }

    pub fn exclude(mut self, exclude: &str) -> Self {
        self.compiler.exclude = exclude.to_string();
        self
    }

    pub fn working_dir(mut self, dir: &Path) -> Self {
        self.compiler.workingdir = dir.to_path_buf();
        self
    }

    pub fn run_on_start(mut self) -> Self {
        self.compiler.runonstart = true;
        self
    }

    pub fn replace(mut self, from: &str, to: &str) -> Self {
        self.compiler.replace.insert(from.to_string(), to.to_string());
        self
    }

    pub fn build(self) -> CompilerConfig {
        self.compiler
    }
}

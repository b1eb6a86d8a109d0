// src/engine/driver.rs

//! Per-rule event loops.
//!
//! A compiler loop turns debounced changes into builds on the shared
//! coordinator. A runner loop keeps one long-running process alive while
//! the coordinator is idle and kills it as soon as a build starts.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::{CompilerConfig, RunnerConfig};
use crate::engine::coordinator::{BuildCoordinator, BuildState};
use crate::errors::{DevloopError, Result};
use crate::exec::{
    Command, CommandTemplate, OutputSink, PrefixedConsole, Replacements, Supervisor,
};
use crate::watch::{ChangeWatcher, FsMultiplexer, discover_directories};

/// A compiler entry from the configuration, ready to run.
#[derive(Clone)]
pub struct CompilerRule {
    pub name: String,
    pub include: String,
    pub exclude: String,
    pub template: CommandTemplate,
    pub working_dir: PathBuf,
    pub run_on_start: bool,
    pub source_root: Option<PathBuf>,
    pub replacements: Arc<Replacements>,
    pub sink: Arc<dyn OutputSink>,
}

impl std::fmt::Debug for CompilerRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerRule")
            .field("name", &self.name)
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .field("template", &self.template)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl CompilerRule {
    /// `width` aligns the console prefix with the other rules.
    pub fn from_config(cfg: &CompilerConfig, width: usize) -> Result<Self> {
        let replacements =
            Replacements::new(cfg.replace.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        Ok(Self {
            name: cfg.name.clone(),
            include: cfg.pattern.clone(),
            exclude: cfg.exclude.clone(),
            template: CommandTemplate::new(cfg.command.clone()),
            working_dir: cfg.workingdir.clone(),
            run_on_start: cfg.runonstart,
            source_root: cfg.sourceroot.clone(),
            replacements: Arc::new(replacements),
            sink: Arc::new(PrefixedConsole::new(&cfg.name, width)),
        })
    }

    /// Hand a build of `command_line` to the coordinator.
    ///
    /// The key is the rule name followed by the resolved command, so the
    /// same rule building different files keeps one live build per file.
    async fn start_build(&self, coordinator: &Arc<BuildCoordinator>, command_line: String) {
        let key = format!("{}{}", self.name, command_line);
        let command = Command::new(&self.name, command_line, &self.working_dir)
            .with_replacements(Arc::clone(&self.replacements))
            .with_sink(Arc::clone(&self.sink));

        self.sink.info("Building");
        coordinator.start_compile(key, Arc::new(command)).await;
    }

    async fn discover(&self, root: &Path) -> Result<BTreeSet<PathBuf>> {
        let root = root.to_path_buf();
        let include = self.include.clone();
        let source_root = self.source_root.clone();

        tokio::task::spawn_blocking(move || {
            discover_directories(&root, &include, source_root.as_deref())
        })
        .await
        .map_err(|err| DevloopError::Other(err.into()))?
    }
}

/// A compiler whose watcher has completed its initial listen.
pub struct CompilerLoop {
    rule: CompilerRule,
    root: PathBuf,
    watcher: ChangeWatcher,
    coordinator: Arc<BuildCoordinator>,
}

impl std::fmt::Debug for CompilerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilerLoop")
            .field("rule", &self.rule.name)
            .field("root", &self.root)
            .field("watcher", &self.watcher)
            .finish()
    }
}

/// Discover the rule's directories, start watching them and, when
/// configured, kick off the first build with the raw command.
pub async fn prepare_compiler(
    rule: CompilerRule,
    root: &Path,
    mux: Arc<FsMultiplexer>,
    coordinator: Arc<BuildCoordinator>,
) -> Result<CompilerLoop> {
    let mut watcher = ChangeWatcher::new(mux);
    let directories = rule.discover(root).await?;
    info!(
        rule = %rule.name,
        directories = directories.len(),
        pattern = %rule.include,
        "watching"
    );
    watcher.listen(directories, &rule.include, &rule.exclude)?;

    if rule.run_on_start {
        let command_line = rule.template.as_str().to_string();
        rule.start_build(&coordinator, command_line).await;
    }

    Ok(CompilerLoop {
        rule,
        root: root.to_path_buf(),
        watcher,
        coordinator,
    })
}

impl CompilerLoop {
    pub fn watcher(&self) -> &ChangeWatcher {
        &self.watcher
    }

    /// Build on every change until the watcher closes.
    ///
    /// After each change the directory set is rediscovered so that new
    /// directories are picked up. Watch failures end the loop with an
    /// error; template errors only skip the build.
    pub async fn run(mut self) -> Result<()> {
        while let Some(path) = self.watcher.next_change().await {
            debug!(rule = %self.rule.name, path = ?path, "change");

            match self.rule.template.render(&path, &self.rule.working_dir) {
                Ok(command_line) => {
                    self.rule.start_build(&self.coordinator, command_line).await;
                }
                Err(err) => {
                    warn!(rule = %self.rule.name, error = %err, "not building");
                    self.rule.sink.error(&err.to_string());
                }
            }

            let directories = self.rule.discover(&self.root).await?;
            self.watcher
                .listen(directories, &self.rule.include, &self.rule.exclude)?;
        }

        debug!(rule = %self.rule.name, "watcher closed");
        Ok(())
    }
}

/// A runner entry from the configuration.
#[derive(Clone)]
pub struct RunnerRule {
    pub name: String,
    pub command_line: String,
    pub working_dir: PathBuf,
    pub replacements: Arc<Replacements>,
    pub sink: Arc<dyn OutputSink>,
}

impl std::fmt::Debug for RunnerRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRule")
            .field("name", &self.name)
            .field("command_line", &self.command_line)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl RunnerRule {
    pub fn from_config(cfg: &RunnerConfig, width: usize) -> Result<Self> {
        let replacements =
            Replacements::new(cfg.replace.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
        Ok(Self {
            name: cfg.name.clone(),
            command_line: cfg.command.clone(),
            working_dir: cfg.workingdir.clone(),
            replacements: Arc::new(replacements),
            sink: Arc::new(PrefixedConsole::new(&cfg.name, width)),
        })
    }
}

/// Kills the runner's process when the loop is dropped.
struct StopOnDrop(Arc<Command>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

/// Keep the runner alive between builds. Never returns; cancel the task to
/// stop it, which also kills the process.
pub async fn run_runner(rule: RunnerRule, coordinator: Arc<BuildCoordinator>) {
    let guard = StopOnDrop(Arc::new(
        Command::new(&rule.name, &rule.command_line, &rule.working_dir)
            .with_replacements(Arc::clone(&rule.replacements))
            .with_sink(Arc::clone(&rule.sink)),
    ));

    loop {
        coordinator.wait_for_state(BuildState::Idle).await;

        info!(runner = %rule.name, "starting");
        let (done_tx, done_rx) = oneshot::channel();
        let started = Instant::now();
        guard.0.start(done_tx);

        let observer = Arc::clone(&guard.0);
        tokio::spawn(async move {
            if let Ok(outcome) = done_rx.await {
                observer.report(&outcome, started.elapsed());
            }
        });

        coordinator.wait_for_state(BuildState::Compiling).await;
        debug!(runner = %rule.name, "build started; stopping");
        guard.0.stop();
    }
}

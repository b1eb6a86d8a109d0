// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod proxy;
pub mod rlimit;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::engine::{BuildCoordinator, CompilerRule, RunnerRule, prepare_compiler, run_runner};
use crate::proxy::HttpProxy;
use crate::watch::FsMultiplexer;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the shared build coordinator
/// - HTTP proxies
/// - one watcher + compiler loop per compiler
/// - one runner loop per runner, once every compiler is watching
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(args.config.as_deref(), args.profile())?;

    if args.dry_run {
        print_dry_run(&cfg)?;
        return Ok(());
    }

    rlimit::raise_fd_limit();

    let coordinator = Arc::new(BuildCoordinator::new());

    for proxy_cfg in &cfg.httpproxies {
        let proxy = HttpProxy::from_config(proxy_cfg, Arc::clone(&coordinator))?;
        proxy
            .start()
            .await
            .with_context(|| format!("starting http proxy on '{}'", proxy_cfg.listen))?;
    }

    let root = cfg
        .watchroot
        .canonicalize()
        .with_context(|| format!("resolving watch root {:?}", cfg.watchroot))?;
    let mux = Arc::new(FsMultiplexer::new());
    let width = cfg.name_width();

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    for compiler in &cfg.compilers {
        let rule = CompilerRule::from_config(compiler, width)?;
        let compiler_loop = prepare_compiler(
            rule,
            &root,
            Arc::clone(&mux),
            Arc::clone(&coordinator),
        )
        .await
        .with_context(|| format!("starting compiler '{}'", compiler.name))?;
        tasks.spawn(async move { compiler_loop.run().await.map_err(Into::into) });
    }

    info!(
        compilers = cfg.compilers.len(),
        directories = mux.watched_directories().len(),
        "watching for changes"
    );

    for runner in &cfg.runners {
        let rule = RunnerRule::from_config(runner, width)?;
        let coordinator = Arc::clone(&coordinator);
        tasks.spawn(async move {
            run_runner(rule, coordinator).await;
            Ok(())
        });
    }

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("shutting down");
            Ok(())
        }
        failed = supervise(&mut tasks) => failed,
    };

    tasks.shutdown().await;
    coordinator.stop_all();
    outcome
}

/// Wait for the first loop to fail. Loops that end cleanly are forgotten;
/// when none is left this waits forever (proxies keep serving).
async fn supervise(tasks: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => debug!("loop finished"),
            Ok(Err(err)) => return Err(err),
            Err(join_err) => return Err(anyhow!("loop panicked or was cancelled: {join_err}")),
        }
    }
    std::future::pending().await
}

/// Print the effective configuration.
fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    println!("devloop dry-run");
    println!("{}", serde_json::to_string_pretty(cfg)?);
    debug!("dry-run complete (no execution)");
    Ok(())
}

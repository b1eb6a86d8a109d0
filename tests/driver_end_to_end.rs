mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::builders::CompilerConfigBuilder;
use common::{CaptureSink, Captured, eventually, init_tracing};
use devloop::config::RunnerConfig;
use devloop::engine::{
    BuildCoordinator, BuildState, CompilerRule, RunnerRule, prepare_compiler, run_runner,
};
use devloop::watch::FsMultiplexer;

#[tokio::test]
async fn change_builds_and_restarts_the_runner() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    fs::create_dir_all(root.join("pages")).unwrap();
    fs::write(root.join("pages/index.txt"), "v1").unwrap();

    let coordinator = Arc::new(BuildCoordinator::new());
    let mux = Arc::new(FsMultiplexer::new());

    let compiler_cfg = CompilerConfigBuilder::new("pages", "*.txt")
        .command("echo built $filerelative")
        .working_dir(&root)
        .build();
    let compiler_sink = CaptureSink::new();
    let mut rule = CompilerRule::from_config(&compiler_cfg, 6).unwrap();
    rule.sink = Arc::new(compiler_sink.clone());

    let compiler = prepare_compiler(rule, &root, Arc::clone(&mux), Arc::clone(&coordinator))
        .await
        .unwrap();
    assert!(compiler.watcher().directories().contains(&root.join("pages")));
    let compiler_task = tokio::spawn(compiler.run());

    let runner_cfg = RunnerConfig {
        name: "server".to_string(),
        command: "sh -c 'echo runner up; sleep 30'".to_string(),
        workingdir: root.clone(),
        ..RunnerConfig::default()
    };
    let runner_sink = CaptureSink::new();
    let mut runner = RunnerRule::from_config(&runner_cfg, 6).unwrap();
    runner.sink = Arc::new(runner_sink.clone());
    let runner_task = tokio::spawn(run_runner(runner, Arc::clone(&coordinator)));

    eventually(|| runner_sink.lines() == ["runner up"]).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    fs::write(root.join("pages/index.txt"), "v2").unwrap();

    eventually(|| compiler_sink.lines().contains(&"built pages/index.txt".to_string())).await;
    let entries = compiler_sink.entries();
    assert_eq!(entries.first(), Some(&Captured::Info("Building".to_string())));

    // The runner was killed for the build and started again afterwards.
    eventually(|| runner_sink.lines().len() == 2).await;
    assert!(runner_sink.markers().contains(&"<end: killed>".to_string()));
    assert_eq!(coordinator.state(), BuildState::Idle);

    compiler_task.abort();
    runner_task.abort();
}

#[tokio::test]
async fn run_on_start_builds_with_the_raw_command() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();

    let coordinator = Arc::new(BuildCoordinator::new());
    let cfg = CompilerConfigBuilder::new("boot", "*.txt")
        .command("echo booted")
        .working_dir(&root)
        .run_on_start()
        .build();
    let sink = CaptureSink::new();
    let mut rule = CompilerRule::from_config(&cfg, 4).unwrap();
    rule.sink = Arc::new(sink.clone());

    let _compiler = prepare_compiler(
        rule,
        &root,
        Arc::new(FsMultiplexer::new()),
        Arc::clone(&coordinator),
    )
    .await
    .unwrap();

    eventually(|| sink.lines() == ["booted"]).await;
    eventually(|| coordinator.state() == BuildState::Idle).await;
    assert!(
        sink.markers().iter().any(|m| m.starts_with("<end: ")),
        "{:?}",
        sink.markers()
    );
}

#[tokio::test]
async fn failing_build_keeps_the_runner_down() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();

    let coordinator = Arc::new(BuildCoordinator::new());
    let cfg = CompilerConfigBuilder::new("broken", "*.txt")
        .command("sh -c 'exit 2'")
        .working_dir(&root)
        .run_on_start()
        .build();
    let mut rule = CompilerRule::from_config(&cfg, 6).unwrap();
    let compiler_sink = CaptureSink::new();
    rule.sink = Arc::new(compiler_sink.clone());

    let _compiler = prepare_compiler(
        rule,
        &root,
        Arc::new(FsMultiplexer::new()),
        Arc::clone(&coordinator),
    )
    .await
    .unwrap();

    let runner_cfg = RunnerConfig {
        name: "server".to_string(),
        command: "echo runner up".to_string(),
        workingdir: root.clone(),
        ..RunnerConfig::default()
    };
    let runner_sink = CaptureSink::new();
    let mut runner = RunnerRule::from_config(&runner_cfg, 6).unwrap();
    runner.sink = Arc::new(runner_sink.clone());
    let runner_task = tokio::spawn(run_runner(runner, Arc::clone(&coordinator)));

    eventually(|| coordinator.state() == BuildState::IdleWithErrors).await;
    assert!(compiler_sink.markers().contains(&"<end: exit status 2>".to_string()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(runner_sink.entries().is_empty(), "runner must not start on a broken build");

    runner_task.abort();
}

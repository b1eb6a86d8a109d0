mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{CaptureSink, init_tracing, with_timeout};
use devloop::errors::{BuildError, Completion};
use devloop::exec::{Command, Replacements, Supervisor};
use tokio::sync::oneshot;

fn command(cmd: &str, sink: &CaptureSink) -> Command {
    Command::new("test", cmd, std::env::temp_dir()).with_sink(Arc::new(sink.clone()))
}

fn start(supervisor: &Command) -> oneshot::Receiver<Completion> {
    let (tx, rx) = oneshot::channel();
    supervisor.start(tx);
    rx
}

async fn run_to_end(supervisor: &Command) -> Completion {
    with_timeout(start(supervisor)).await.unwrap()
}

#[tokio::test]
async fn output_lines_pass_through_replacements() {
    init_tracing();
    let sink = CaptureSink::new();
    let replacements = Replacements::new([("world", "devloop")]).unwrap();
    let cmd = command("echo hello world", &sink).with_replacements(Arc::new(replacements));

    assert_eq!(run_to_end(&cmd).await, Ok(()));
    assert_eq!(sink.lines(), vec!["hello devloop".to_string()]);
    assert_eq!(cmd.last_error(), Some(Ok(())));
}

#[tokio::test]
async fn non_zero_exit_is_reported_with_its_code() {
    init_tracing();
    let sink = CaptureSink::new();
    let cmd = command("sh -c 'exit 3'", &sink);

    assert_eq!(run_to_end(&cmd).await, Err(BuildError::ExitStatus(3)));
    assert_eq!(cmd.last_error(), Some(Err(BuildError::ExitStatus(3))));
    assert!(!cmd.is_running());
}

#[tokio::test]
async fn empty_command_succeeds_without_spawning() {
    init_tracing();
    let sink = CaptureSink::new();
    let cmd = command("   ", &sink);

    assert_eq!(run_to_end(&cmd).await, Ok(()));
    assert!(sink.entries().is_empty());
}

#[tokio::test]
async fn stop_kills_the_live_process() {
    init_tracing();
    let sink = CaptureSink::new();
    let cmd = command("sleep 30", &sink);

    let done = start(&cmd);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(cmd.is_running());

    cmd.stop();
    assert_eq!(with_timeout(done).await.unwrap(), Err(BuildError::Killed));
    assert!(!cmd.is_running());

    // Stopping again is a no-op.
    cmd.stop();
}

#[tokio::test]
async fn restarting_kills_the_previous_instance() {
    init_tracing();
    let sink = CaptureSink::new();
    let cmd = command("sleep 30", &sink);

    let first = start(&cmd);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = start(&cmd);

    assert_eq!(with_timeout(first).await.unwrap(), Err(BuildError::Killed));
    assert!(cmd.is_running(), "the replacement keeps running");

    cmd.stop();
    assert_eq!(with_timeout(second).await.unwrap(), Err(BuildError::Killed));
}

#[tokio::test]
async fn missing_binary_is_a_spawn_failure() {
    init_tracing();
    let sink = CaptureSink::new();
    let cmd = command("devloop-no-such-binary --flag", &sink);

    match run_to_end(&cmd).await {
        Err(BuildError::Spawn(message)) => {
            assert!(message.contains("devloop-no-such-binary"), "{message}")
        }
        other => panic!("expected a spawn failure, got {other:?}"),
    }
    assert!(!cmd.is_running());
}

#[tokio::test]
async fn child_sees_a_terminal_and_the_working_directory() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let wd = dir.path().canonicalize().unwrap();

    let sink = CaptureSink::new();
    let cmd = Command::new("tty", "sh -c 'test -t 1 && echo tty; pwd'", &wd)
        .with_sink(Arc::new(sink.clone()));

    assert_eq!(run_to_end(&cmd).await, Ok(()));
    assert_eq!(
        sink.lines(),
        vec!["tty".to_string(), wd.display().to_string()]
    );
}

#[tokio::test]
async fn killing_reaches_grandchildren() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("survived");

    let sink = CaptureSink::new();
    let script = format!("sh -c 'sh -c \"sleep 1; touch {}\"; true'", marker.display());
    let cmd = command(&script, &sink);

    let done = start(&cmd);
    tokio::time::sleep(Duration::from_millis(100)).await;
    cmd.stop();
    assert_eq!(with_timeout(done).await.unwrap(), Err(BuildError::Killed));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists(), "the whole process group must be killed");
}

#[test]
fn report_writes_end_markers() {
    let sink = CaptureSink::new();
    let cmd = command("true", &sink);

    cmd.report(&Ok(()), Duration::from_micros(1_234_567));
    cmd.report(&Err(BuildError::ExitStatus(1)), Duration::from_secs(1));
    cmd.report(&Err(BuildError::Killed), Duration::from_secs(1));

    assert_eq!(
        sink.markers(),
        vec![
            "<end: 1.234s>".to_string(),
            "<end: exit status 1>".to_string(),
            "<end: killed>".to_string(),
        ]
    );
}

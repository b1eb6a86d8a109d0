// src/exec/command.rs

//! Pseudo-terminal backed process supervisor.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::errors::{BuildError, Completion};
use crate::exec::backend::Supervisor;
use crate::exec::output::{LineBuffer, OutputSink, PrefixedConsole, Replacements};
use crate::exec::pty::{Pty, PtyReader};
use crate::exec::template::tokenize;

/// How long to keep reading output after the process has exited.
const OUTPUT_DRAIN: Duration = Duration::from_millis(200);

const READ_CHUNK: usize = 4096;

/// Runs one command line on a pseudo-terminal, at most one instance at a
/// time.
///
/// Output is reassembled into lines, passed through the replacement table
/// and written to the sink. Dropping the supervisor kills the live instance.
pub struct Command {
    name: String,
    command_line: String,
    working_dir: PathBuf,
    replacements: Arc<Replacements>,
    sink: Arc<dyn OutputSink>,
    state: Arc<Mutex<ProcessState>>,
}

#[derive(Default)]
struct ProcessState {
    generation: u64,
    running: Option<RunningProcess>,
    last_error: Option<Completion>,
}

struct RunningProcess {
    generation: u64,
    kill_tx: oneshot::Sender<()>,
    pid: Option<u32>,
}

impl RunningProcess {
    fn kill(self) {
        if let Some(pid) = self.pid {
            kill_process_group(pid);
        }
        let _ = self.kill_tx.send(());
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("command_line", &self.command_line)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl Command {
    pub fn new(
        name: impl Into<String>,
        command_line: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        let sink: Arc<dyn OutputSink> = Arc::new(PrefixedConsole::new(&name, name.len()));
        Self {
            name,
            command_line: command_line.into(),
            working_dir: working_dir.into(),
            replacements: Arc::new(Replacements::default()),
            sink,
            state: Arc::new(Mutex::new(ProcessState::default())),
        }
    }

    pub fn with_replacements(mut self, replacements: Arc<Replacements>) -> Self {
        self.replacements = replacements;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// True while a process started by this supervisor is alive.
    pub fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, ProcessState> {
        lock_state(&self.state)
    }

    fn job(&self) -> Job {
        Job {
            name: self.name.clone(),
            command_line: self.command_line.clone(),
            working_dir: self.working_dir.clone(),
            replacements: Arc::clone(&self.replacements),
            sink: Arc::clone(&self.sink),
            state: Arc::clone(&self.state),
        }
    }
}

impl Supervisor for Command {
    fn start(&self, done: oneshot::Sender<Completion>) {
        let mut state = self.lock();

        if let Some(previous) = state.running.take() {
            debug!(command = %self.name, "restarting; stopping previous instance");
            previous.kill();
        }
        state.generation += 1;
        let generation = state.generation;

        if self.command_line.trim().is_empty() {
            drop(state);
            let shared = Arc::clone(&self.state);
            tokio::spawn(async move {
                finish(&shared, generation, Ok(()), done);
            });
            return;
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        state.running = Some(RunningProcess {
            generation,
            kill_tx,
            pid: None,
        });
        drop(state);

        tokio::spawn(self.job().execute(generation, kill_rx, done));
    }

    fn stop(&self) {
        let running = self.lock().running.take();
        if let Some(running) = running {
            debug!(command = %self.name, pid = ?running.pid, "stopping process");
            running.kill();
        }
    }

    fn last_error(&self) -> Option<Completion> {
        self.lock().last_error.clone()
    }

    fn report(&self, outcome: &Completion, elapsed: Duration) {
        match outcome {
            Ok(()) => {
                let rounded = Duration::from_millis(elapsed.as_millis() as u64);
                self.sink.info(&format!("<end: {rounded:?}>"));
            }
            Err(err) => self.sink.error(&format!("<end: {err}>")),
        }
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything a spawned run needs, detached from the `Command` borrow.
struct Job {
    name: String,
    command_line: String,
    working_dir: PathBuf,
    replacements: Arc<Replacements>,
    sink: Arc<dyn OutputSink>,
    state: Arc<Mutex<ProcessState>>,
}

impl Job {
    async fn execute(
        self,
        generation: u64,
        mut kill_rx: oneshot::Receiver<()>,
        done: oneshot::Sender<Completion>,
    ) {
        let started = Instant::now();
        let outcome = self.run(generation, &mut kill_rx).await;
        debug!(
            command = %self.name,
            generation,
            outcome = ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "process finished"
        );
        finish(&self.state, generation, outcome, done);
    }

    async fn run(&self, generation: u64, kill_rx: &mut oneshot::Receiver<()>) -> Completion {
        let argv = tokenize(&self.command_line).map_err(BuildError::Spawn)?;
        let Some((program, args)) = argv.split_first() else {
            return Ok(());
        };

        let pty = Pty::open().map_err(|e| BuildError::Pty(e.to_string()))?;
        let stdin = pty.slave.try_clone().map_err(|e| BuildError::Pty(e.to_string()))?;
        let stdout = pty.slave.try_clone().map_err(|e| BuildError::Pty(e.to_string()))?;
        let stderr = pty.slave.try_clone().map_err(|e| BuildError::Pty(e.to_string()))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(true);

        info!(
            command = %self.name,
            cmd = %self.command_line,
            dir = ?self.working_dir,
            "starting process"
        );

        let spawned = cmd.spawn();
        // The master only sees EOF once every copy of the slave is closed.
        drop(cmd);
        drop(pty.slave);
        let mut child = spawned.map_err(|e| BuildError::Spawn(format!("{program}: {e}")))?;

        let pid = child.id();
        {
            let mut state = lock_state(&self.state);
            if let Some(running) = state.running.as_mut() {
                if running.generation == generation {
                    running.pid = pid;
                }
            }
        }

        let reader = match PtyReader::new(pty.master) {
            Ok(reader) => reader,
            Err(err) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                let _ = child.kill().await;
                return Err(BuildError::Pty(err.to_string()));
            }
        };
        let mut pump = tokio::spawn(pump_output(
            reader,
            Arc::clone(&self.replacements),
            Arc::clone(&self.sink),
        ));

        let outcome = tokio::select! {
            biased;

            _ = kill_rx => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                if let Err(err) = child.kill().await {
                    warn!(command = %self.name, error = %err, "failed to kill child process");
                }
                Err(BuildError::Killed)
            }

            status = child.wait() => match status {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => match status.code() {
                    Some(code) => Err(BuildError::ExitStatus(code)),
                    None => Err(BuildError::Signalled),
                },
                Err(err) => Err(BuildError::Spawn(err.to_string())),
            },
        };

        if tokio::time::timeout(OUTPUT_DRAIN, &mut pump).await.is_err() {
            // A detached descendant can hold the slave open indefinitely.
            debug!(command = %self.name, "output still open after exit; closing");
            pump.abort();
            let _ = pump.await;
        }

        outcome
    }
}

/// Copy pseudo-terminal output to the sink line by line.
async fn pump_output(
    reader: PtyReader,
    replacements: Arc<Replacements>,
    sink: Arc<dyn OutputSink>,
) {
    let mut lines = LineBuffer::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    sink.write_line(&replacements.apply(&line));
                }
            }
            // EIO is how Linux reports a pseudo-terminal whose slave side
            // has been closed.
            Err(err) if err.raw_os_error() == Some(libc::EIO) => break,
            Err(err) => {
                debug!(error = %err, "output read failed");
                break;
            }
        }
    }

    if let Some(rest) = lines.finish() {
        sink.write_line(&replacements.apply(&rest));
    }
}

fn finish(
    state: &Mutex<ProcessState>,
    generation: u64,
    outcome: Completion,
    done: oneshot::Sender<Completion>,
) {
    {
        let mut state = lock_state(state);
        state.last_error = Some(outcome.clone());
        let current = state
            .running
            .as_ref()
            .map(|r| r.generation == generation)
            .unwrap_or(false);
        if current {
            state.running = None;
        }
    }
    // The receiver may have lost interest.
    let _ = done.send(outcome);
}

fn lock_state(state: &Mutex<ProcessState>) -> MutexGuard<'_, ProcessState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: plain syscall; a stale group id only yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

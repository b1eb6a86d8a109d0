use std::sync::{Arc, Mutex};

use devloop::errors::{BuildError, Completion};
use devloop::exec::Supervisor;
use tokio::sync::oneshot;

/// One call observed by a [`FakeSupervisor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    Stop(String),
}

/// Call log shared by several fakes, to assert on global ordering.
pub type Journal = Arc<Mutex<Vec<Call>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// A supervisor that:
/// - records every start/stop call in a shared journal
/// - never finishes on its own; tests call [`FakeSupervisor::complete`]
/// - reports `BuildError::Killed` when stopped while live.
pub struct FakeSupervisor {
    name: String,
    journal: Journal,
    pending: Mutex<Option<oneshot::Sender<Completion>>>,
    last: Mutex<Option<Completion>>,
}

impl FakeSupervisor {
    pub fn new(name: &str, journal: Journal) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal,
            pending: Mutex::new(None),
            last: Mutex::new(None),
        })
    }

    /// Finish the live run with `outcome`. Returns false if nothing is live.
    pub fn complete(&self, outcome: Completion) -> bool {
        let Some(done) = self.pending.lock().unwrap().take() else {
            return false;
        };
        *self.last.lock().unwrap() = Some(outcome.clone());
        let _ = done.send(outcome);
        true
    }

    pub fn is_running(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }

    fn kill(&self) {
        if let Some(done) = self.pending.lock().unwrap().take() {
            *self.last.lock().unwrap() = Some(Err(BuildError::Killed));
            let _ = done.send(Err(BuildError::Killed));
        }
    }
}

impl Supervisor for FakeSupervisor {
    fn start(&self, done: oneshot::Sender<Completion>) {
        self.kill();
        self.journal
            .lock()
            .unwrap()
            .push(Call::Start(self.name.clone()));
        *self.pending.lock().unwrap() = Some(done);
    }

    fn stop(&self) {
        self.journal
            .lock()
            .unwrap()
            .push(Call::Stop(self.name.clone()));
        self.kill();
    }

    fn last_error(&self) -> Option<Completion> {
        self.last.lock().unwrap().clone()
    }
}

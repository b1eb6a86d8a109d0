// src/engine/coordinator.rs

//! Shared build-state machine.
//!
//! Every compiler rule reports its builds here; the runner loops and the
//! proxies block on it. The aggregate state is never set directly; it is
//! derived from the live builds and the recorded failures after every
//! change:
//!
//! - `Compiling` while any key has a live build,
//! - else `IdleWithErrors` while any key's last build failed,
//! - else `Idle`.
//!
//! At most one live supervisor exists per key; starting a new build for a
//! key stops the previous one, and the superseded build's completion is
//! discarded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info};

use crate::errors::{BuildError, Completion};
use crate::exec::Supervisor;

/// Delay between stopping a superseded build and starting its replacement,
/// so the old process can flush its last output first.
pub const FLUSH_DELAY: Duration = Duration::from_millis(25);

const TRANSITION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
    Idle,
    IdleWithErrors,
    Compiling,
}

/// Identifies one rule + resolved command.
pub type BuildKey = String;

pub struct BuildCoordinator {
    inner: Mutex<Inner>,
    transitions: broadcast::Sender<BuildState>,
    flush_delay: Duration,
}

struct Inner {
    state: BuildState,
    next_generation: u64,
    live: HashMap<BuildKey, LiveBuild>,
    errors: HashMap<BuildKey, BuildError>,
}

struct LiveBuild {
    generation: u64,
    supervisor: Arc<dyn Supervisor>,
}

impl std::fmt::Debug for BuildCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("BuildCoordinator")
            .field("state", &inner.state)
            .field("live", &inner.live.len())
            .field("errors", &inner.errors)
            .finish()
    }
}

impl Default for BuildCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildCoordinator {
    pub fn new() -> Self {
        Self::with_flush_delay(FLUSH_DELAY)
    }

    pub fn with_flush_delay(flush_delay: Duration) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                state: BuildState::Idle,
                next_generation: 0,
                live: HashMap::new(),
                errors: HashMap::new(),
            }),
            transitions,
            flush_delay,
        }
    }

    pub fn state(&self) -> BuildState {
        self.lock().state
    }

    /// Keys whose last build failed, with the failure.
    pub fn errors(&self) -> HashMap<BuildKey, BuildError> {
        self.lock().errors.clone()
    }

    /// Keys with a build in flight, sorted.
    pub fn live_keys(&self) -> Vec<BuildKey> {
        let mut keys: Vec<BuildKey> = self.lock().live.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Receive every state broadcast from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<BuildState> {
        self.transitions.subscribe()
    }

    /// Start a build for `key`, replacing any build already live for it.
    ///
    /// Returns once the supervisor has been started (or skipped because an
    /// even newer build for the key arrived during the flush delay). The
    /// completion is observed in the background.
    pub async fn start_compile(
        self: &Arc<Self>,
        key: impl Into<BuildKey>,
        supervisor: Arc<dyn Supervisor>,
    ) {
        let key = key.into();

        let generation = {
            let mut inner = self.lock();
            inner.next_generation += 1;
            let generation = inner.next_generation;

            let replaced = inner.live.insert(
                key.clone(),
                LiveBuild {
                    generation,
                    supervisor: Arc::clone(&supervisor),
                },
            );
            if let Some(previous) = replaced {
                debug!(key = %key, "superseding live build");
                previous.supervisor.stop();
            }
            inner.errors.remove(&key);
            self.set_state(&mut inner, BuildState::Compiling);
            generation
        };

        tokio::time::sleep(self.flush_delay).await;

        if !self.is_current(&key, generation) {
            debug!(key = %key, generation, "build superseded before it started");
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let started = Instant::now();
        supervisor.start(done_tx);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            // A dropped sender means the supervisor went away mid-run.
            let outcome = done_rx.await.unwrap_or(Err(BuildError::Killed));
            supervisor.report(&outcome, started.elapsed());
            this.finish_compile(&key, generation, outcome);
        });
    }

    /// Stop every live build. Used on shutdown; their completions are still
    /// recorded as they arrive.
    pub fn stop_all(&self) {
        let inner = self.lock();
        for (key, live) in &inner.live {
            debug!(key = %key, "stopping live build");
            live.supervisor.stop();
        }
    }

    /// Block until the aggregate state equals `target`.
    ///
    /// Returns immediately if it already does. Every wake-up re-reads the
    /// current state, so a target that has already been left again (e.g.
    /// `Compiling -> Idle -> Compiling`) keeps the caller waiting.
    pub async fn wait_for_state(&self, target: BuildState) {
        let mut rx = {
            let inner = self.lock();
            if inner.state == target {
                return;
            }
            // Subscribed under the lock: no transition can slip in between
            // the check and the subscription.
            self.transitions.subscribe()
        };

        loop {
            match rx.recv().await {
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "state waiter lagged; re-checking");
                }
                Err(RecvError::Closed) => return,
            }
            if self.state() == target {
                return;
            }
        }
    }

    fn finish_compile(&self, key: &str, generation: u64, outcome: Completion) {
        let mut inner = self.lock();

        let current = inner
            .live
            .get(key)
            .map(|live| live.generation == generation)
            .unwrap_or(false);
        if !current {
            debug!(key = %key, generation, "ignoring completion of superseded build");
            return;
        }

        inner.live.remove(key);
        if let Err(err) = outcome {
            info!(key = %key, error = %err, "build failed");
            inner.errors.insert(key.to_string(), err);
        }

        let next = derive_state(&inner);
        self.set_state(&mut inner, next);
    }

    fn is_current(&self, key: &str, generation: u64) -> bool {
        self.lock()
            .live
            .get(key)
            .map(|live| live.generation == generation)
            .unwrap_or(false)
    }

    fn set_state(&self, inner: &mut Inner, state: BuildState) {
        if inner.state != state {
            debug!(from = ?inner.state, to = ?state, "build state transition");
        }
        inner.state = state;
        // No receivers is fine.
        let _ = self.transitions.send(state);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn derive_state(inner: &Inner) -> BuildState {
    if !inner.live.is_empty() {
        BuildState::Compiling
    } else if !inner.errors.is_empty() {
        BuildState::IdleWithErrors
    } else {
        BuildState::Idle
    }
}

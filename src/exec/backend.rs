// src/exec/backend.rs

//! Pluggable process supervisor abstraction.
//!
//! The build coordinator talks to a `Supervisor` instead of a concrete
//! process handle. Production code uses [`Command`](super::command::Command),
//! which runs a real process on a pseudo-terminal; tests can provide their
//! own implementation that records calls and completes on demand.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::errors::Completion;

/// Runs at most one instance of some external action at a time.
pub trait Supervisor: Send + Sync {
    /// Start the action without blocking.
    ///
    /// An already running instance is stopped first. Exactly one completion
    /// is sent on `done` for this start, including when the instance is
    /// later killed by [`stop`](Supervisor::stop).
    fn start(&self, done: oneshot::Sender<Completion>);

    /// Forcibly terminate the live instance, if any. Idempotent.
    fn stop(&self);

    /// Outcome of the most recent completed run; `None` if it never ran.
    fn last_error(&self) -> Option<Completion>;

    /// Hook for printing the end-of-run marker.
    fn report(&self, _outcome: &Completion, _elapsed: Duration) {}
}

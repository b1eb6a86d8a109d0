// src/watch/watcher.rs

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::errors::Result;
use crate::watch::multiplexer::{FsMultiplexer, WatcherId};
use crate::watch::patterns::PatternSet;

/// Quiet period after the last event for a path before it is emitted.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(250);

/// Events for files whose mtime is older than this are metadata noise.
pub const RECENT_MODIFICATION: Duration = Duration::from_secs(1);

/// One logical watch-set: a group of directories plus include/exclude
/// patterns, emitting debounced changed paths.
///
/// Dropping the watcher unsubscribes all its directories and cancels any
/// pending debounce timers.
pub struct ChangeWatcher {
    id: WatcherId,
    mux: Arc<FsMultiplexer>,
    shared: Arc<WatcherShared>,
    directories: BTreeSet<PathBuf>,
    changed_rx: mpsc::Receiver<PathBuf>,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("id", &self.id)
            .field("directories", &self.directories.len())
            .finish()
    }
}

/// State reachable from the multiplexer's dispatch loop.
pub(crate) struct WatcherShared {
    patterns: RwLock<PatternSet>,
    timers: Mutex<HashMap<PathBuf, DebounceTimer>>,
    next_timer: AtomicU64,
    changed_tx: mpsc::Sender<PathBuf>,
    debounce: Duration,
}

struct DebounceTimer {
    id: u64,
    handle: AbortHandle,
}

impl ChangeWatcher {
    pub fn new(mux: Arc<FsMultiplexer>) -> Self {
        Self::with_debounce(mux, DEBOUNCE_WINDOW)
    }

    pub fn with_debounce(mux: Arc<FsMultiplexer>, debounce: Duration) -> Self {
        // Capacity 1: a firing timer waits for the consumer instead of
        // queueing changes up.
        let (changed_tx, changed_rx) = mpsc::channel(1);
        let shared = Arc::new(WatcherShared {
            patterns: RwLock::new(PatternSet::empty(PathBuf::new())),
            timers: Mutex::new(HashMap::new()),
            next_timer: AtomicU64::new(1),
            changed_tx,
            debounce,
        });

        Self {
            id: mux.next_watcher_id(),
            mux,
            shared,
            directories: BTreeSet::new(),
            changed_rx,
        }
    }

    /// Replace the watch-set.
    ///
    /// Directories that disappeared are unsubscribed, new ones subscribed;
    /// the pattern lists are swapped wholesale.
    pub fn listen(
        &mut self,
        directories: BTreeSet<PathBuf>,
        include: &str,
        exclude: &str,
    ) -> Result<()> {
        let patterns = PatternSet::parse(include, exclude)?;
        self.listen_with_patterns(directories, patterns)
    }

    pub fn listen_with_patterns(
        &mut self,
        directories: BTreeSet<PathBuf>,
        patterns: PatternSet,
    ) -> Result<()> {
        for dir in self.directories.difference(&directories) {
            self.mux.unsubscribe(dir, self.id);
        }

        for dir in directories.difference(&self.directories) {
            self.mux.subscribe(dir, self.id, Arc::clone(&self.shared))?;
        }

        debug!(
            watcher = self.id,
            directories = directories.len(),
            "watch set updated"
        );

        self.directories = directories;
        *self
            .shared
            .patterns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = patterns;
        Ok(())
    }

    /// Wait for the next debounced change.
    pub async fn next_change(&mut self) -> Option<PathBuf> {
        self.changed_rx.recv().await
    }

    pub fn directories(&self) -> &BTreeSet<PathBuf> {
        &self.directories
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        for dir in &self.directories {
            self.mux.unsubscribe(dir, self.id);
        }
        for (_, timer) in self.shared.timers().drain() {
            timer.handle.abort();
        }
    }
}

impl WatcherShared {
    /// Handle one raw filesystem event for `path`.
    ///
    /// Matching paths (re)arm a per-path debounce timer. Must run inside the
    /// Tokio runtime.
    pub(crate) fn trigger(self: &Arc<Self>, path: &Path) {
        let matched = self
            .patterns
            .read()
            .map(|p| p.matches(path))
            .unwrap_or(false);
        if !matched {
            trace!(path = ?path, "event ignored by patterns");
            return;
        }

        let mut timers = self.timers();

        if let Some(previous) = timers.remove(path) {
            previous.handle.abort();
        }

        if !modified_recently(path) {
            debug!(path = ?path, "stale mtime; treating event as metadata noise");
            return;
        }

        let id = self.next_timer.fetch_add(1, Ordering::Relaxed);
        let this = Arc::clone(self);
        let owned = path.to_path_buf();
        let task = tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            this.fire(id, owned).await;
        });

        timers.insert(
            path.to_path_buf(),
            DebounceTimer {
                id,
                handle: task.abort_handle(),
            },
        );
    }

    async fn fire(&self, id: u64, path: PathBuf) {
        {
            let mut timers = self.timers();
            match timers.get(&path) {
                Some(timer) if timer.id == id => {
                    timers.remove(&path);
                }
                _ => return,
            }
        }

        debug!(path = ?path, "change detected");
        // A closed receiver means the watcher is gone.
        let _ = self.changed_tx.send(path).await;
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<PathBuf, DebounceTimer>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// True when the file was written within [`RECENT_MODIFICATION`], or when it
/// cannot be inspected at all (e.g. it was just removed).
fn modified_recently(path: &Path) -> bool {
    let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(_) => return true,
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age < RECENT_MODIFICATION,
        // mtime in the future
        Err(_) => true,
    }
}

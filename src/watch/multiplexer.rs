// src/watch/multiplexer.rs

//! Process-wide filesystem event multiplexer.
//!
//! One `notify` watcher is shared by every [`ChangeWatcher`]. Each directory
//! is subscribed at the OS level exactly once, no matter how many logical
//! watchers need it; the subscription is dropped when the last of them
//! unsubscribes.
//!
//! [`ChangeWatcher`]: crate::watch::ChangeWatcher

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::errors::{DevloopError, Result};
use crate::watch::watcher::WatcherShared;

pub(crate) type WatcherId = u64;

type Subscribers = HashMap<WatcherId, Arc<WatcherShared>>;

#[derive(Default)]
struct Registry {
    /// Created lazily on the first subscription.
    backend: Option<RecommendedWatcher>,
    monitored: HashMap<PathBuf, Subscribers>,
}

/// Shared directory -> watcher-set registry.
///
/// Construct once at startup (inside the Tokio runtime) and hand out clones
/// of the `Arc`.
pub struct FsMultiplexer {
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for FsMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsMultiplexer").finish_non_exhaustive()
    }
}

impl Default for FsMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl FsMultiplexer {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_watcher_id(&self) -> WatcherId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `watcher` for events in `directory`.
    ///
    /// Failing to establish the OS-level subscription is fatal for the
    /// caller.
    pub(crate) fn subscribe(
        &self,
        directory: &Path,
        id: WatcherId,
        watcher: Arc<WatcherShared>,
    ) -> Result<()> {
        let mut registry = self.lock();

        if !registry.monitored.contains_key(directory) {
            if registry.backend.is_none() {
                registry.backend = Some(spawn_backend(Arc::downgrade(&self.registry))?);
            }
            if let Some(backend) = registry.backend.as_mut() {
                backend
                    .watch(directory, RecursiveMode::NonRecursive)
                    .map_err(|source| DevloopError::WatchError {
                        path: directory.to_path_buf(),
                        source,
                    })?;
            }
            debug!(dir = ?directory, "subscribed directory");
            registry
                .monitored
                .insert(directory.to_path_buf(), Subscribers::new());
        }

        if let Some(subscribers) = registry.monitored.get_mut(directory) {
            subscribers.insert(id, watcher);
        }
        Ok(())
    }

    /// Remove `id` from `directory`; drops the OS subscription when no
    /// watcher is left.
    pub(crate) fn unsubscribe(&self, directory: &Path, id: WatcherId) {
        let mut registry = self.lock();

        let now_empty = match registry.monitored.get_mut(directory) {
            Some(subscribers) => {
                subscribers.remove(&id);
                subscribers.is_empty()
            }
            None => return,
        };

        if now_empty {
            registry.monitored.remove(directory);
            if let Some(backend) = registry.backend.as_mut() {
                if let Err(err) = backend.unwatch(directory) {
                    // Usually the directory was deleted.
                    debug!(dir = ?directory, error = %err, "failed to unwatch directory");
                }
            }
            debug!(dir = ?directory, "unsubscribed directory");
        }
    }

    /// Directories with a live OS-level subscription, sorted.
    pub fn watched_directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self.lock().monitored.keys().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Number of logical watchers subscribed to `directory`.
    pub fn subscriber_count(&self, directory: &Path) -> usize {
        self.lock()
            .monitored
            .get(directory)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Create the `notify` backend and the async loop that dispatches its
/// events to subscribed watchers.
fn spawn_backend(registry: Weak<Mutex<Registry>>) -> Result<RecommendedWatcher> {
    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let backend = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    eprintln!("devloop: failed to forward notify event: {err}");
                }
            }
            Err(err) => {
                eprintln!("devloop: file watch error: {err}");
            }
        },
        Config::default(),
    )
    .map_err(|source| DevloopError::WatchError {
        path: PathBuf::new(),
        source,
    })?;

    info!("filesystem multiplexer started");

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if is_metadata_only(&event.kind) {
                continue;
            }

            let Some(shared) = registry.upgrade() else {
                break;
            };

            for path in &event.paths {
                let Some(dir) = path.parent() else {
                    continue;
                };

                let targets: Vec<Arc<WatcherShared>> = {
                    let guard = match shared.lock() {
                        Ok(g) => g,
                        Err(_) => {
                            error!("watch registry mutex poisoned; stopping dispatch");
                            return;
                        }
                    };
                    match guard.monitored.get(dir) {
                        Some(subscribers) => subscribers.values().cloned().collect(),
                        None => continue,
                    }
                };

                for target in targets {
                    target.trigger(path);
                }
            }
        }
        debug!("filesystem multiplexer loop ended");
    });

    Ok(backend)
}

/// Permission, ownership and access-time changes never count as edits.
fn is_metadata_only(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind};

    #[test]
    fn metadata_and_access_events_are_noise() {
        assert!(is_metadata_only(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));
        assert!(is_metadata_only(&EventKind::Access(AccessKind::Any)));
        assert!(!is_metadata_only(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(!is_metadata_only(&EventKind::Create(CreateKind::File)));
    }
}

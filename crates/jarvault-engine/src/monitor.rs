//! Filesystem change monitor.
//!
//! Watches two kinds of directory roots: local repositories (hot-reload
//! sources) and cache directories (tamper detection). Watching is
//! per-directory non-recursive, with subdirectories discovered at
//! registration and incrementally on create events. The event loop polls
//! with a bounded timeout on a dedicated blocking task so it stays
//! cooperatively cancellable.
//!
//! The engine's own writes into a cache directory are bracketed by a
//! reference-counted suppression guard; events observed while a guard is
//! open are not external changes. Deletions under a cache root are always
//! significant, guard or not.

use jarvault_core::error::{BundleError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// How long the poll loop blocks before re-checking for shutdown and
/// registration commands.
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// After a first event arrives, further events are drained for this long
/// and deduplicated, so one external write produces one change callback.
const SETTLE_WINDOW: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// Hot-reload source; changes trigger re-actualization.
    LocalRepo,
    /// Engine-owned cache tree; unsuppressed changes mean external
    /// tampering.
    CacheDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    LocalRepoChanged { root: PathBuf },
    ExternalCacheChange { root: PathBuf },
}

enum Command {
    Register { root: PathBuf, kind: RootKind },
    Deregister { root: PathBuf },
}

struct Shared {
    suppression: AtomicUsize,
    stop: AtomicBool,
}

/// Open while the engine writes into a cache directory; closes on drop.
/// Guards nest: suppression holds until the last one closes.
pub struct SelfUpdateGuard {
    shared: Arc<Shared>,
}

impl Drop for SelfUpdateGuard {
    fn drop(&mut self) {
        self.shared.suppression.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct FsMonitor {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FsMonitor {
    /// Creates the watcher and starts the poll loop on the blocking pool.
    /// Observed changes are pushed into `events`.
    pub fn spawn(events: UnboundedSender<ChangeEvent>) -> Result<Self> {
        let (watch_tx, watch_rx) = mpsc::channel::<notify::Result<Event>>();
        let watcher = notify::recommended_watcher(watch_tx)
            .map_err(|e| BundleError::Watch(e.to_string()))?;
        let (command_tx, command_rx) = mpsc::channel();

        let shared = Arc::new(Shared {
            suppression: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let handle = tokio::task::spawn_blocking(move || {
            let mut state = MonitorLoop {
                watcher,
                roots: HashMap::new(),
                shared: loop_shared,
                events,
            };
            state.run(&watch_rx, &command_rx);
        });

        Ok(Self {
            shared,
            commands: command_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn register_root(&self, root: impl Into<PathBuf>, kind: RootKind) {
        let _ = self.commands.send(Command::Register {
            root: root.into(),
            kind,
        });
    }

    pub fn deregister_root(&self, root: impl Into<PathBuf>) {
        let _ = self.commands.send(Command::Deregister { root: root.into() });
    }

    /// Opens a self-update bracket. Hold the guard across every engine
    /// write into a cache directory.
    pub fn mark_self_update(&self) -> SelfUpdateGuard {
        self.shared.suppression.fetch_add(1, Ordering::AcqRel);
        SelfUpdateGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stops the poll loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::Release);
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

struct MonitorLoop {
    watcher: RecommendedWatcher,
    /// Canonical root string -> kind. Keyed by string, not path object:
    /// the platform may hand back structurally different but semantically
    /// equal paths for the same file.
    roots: HashMap<String, RootKind>,
    shared: Arc<Shared>,
    events: UnboundedSender<ChangeEvent>,
}

impl MonitorLoop {
    fn run(
        &mut self,
        watch_rx: &mpsc::Receiver<notify::Result<Event>>,
        command_rx: &mpsc::Receiver<Command>,
    ) {
        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }
            while let Ok(command) = command_rx.try_recv() {
                self.apply(command);
            }
            match watch_rx.recv_timeout(POLL_TIMEOUT) {
                Ok(Ok(event)) => self.handle_batch(event, watch_rx),
                Ok(Err(e)) => tracing::warn!(error = %e, "watch backend error"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!("filesystem monitor loop exited");
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register { root, kind } => {
                let key = canonical_string(&root);
                if let Err(e) = self.watch_tree(&root) {
                    tracing::warn!(root = %root.display(), error = %e, "failed to watch root");
                    return;
                }
                tracing::debug!(root = key, ?kind, "watching root");
                self.roots.insert(key, kind);
            }
            Command::Deregister { root } => {
                let key = canonical_string(&root);
                self.roots.remove(&key);
                let _ = self.watcher.unwatch(&root);
            }
        }
    }

    fn watch_tree(&mut self, dir: &Path) -> notify::Result<()> {
        self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir()
                    && let Err(e) = self.watch_tree(&path)
                {
                    tracing::warn!(path = %path.display(), error = %e, "failed to watch subdirectory");
                }
            }
        }
        Ok(())
    }

    /// Drains events into one deduplicated batch, then emits it. A cache
    /// deletion short-circuits the drain and flushes immediately.
    fn handle_batch(&mut self, first: Event, watch_rx: &mpsc::Receiver<notify::Result<Event>>) {
        let mut batch: Vec<ChangeEvent> = Vec::new();
        let mut terminated = self.collect(first, &mut batch);

        if !terminated {
            let deadline = Instant::now() + SETTLE_WINDOW;
            while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                match watch_rx.recv_timeout(remaining) {
                    Ok(Ok(event)) => {
                        terminated = self.collect(event, &mut batch);
                        if terminated {
                            break;
                        }
                    }
                    Ok(Err(_)) | Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        for change in batch {
            let _ = self.events.send(change);
        }
    }

    /// Folds one raw watch event into the batch. Returns true when the
    /// batch must be flushed immediately.
    fn collect(&mut self, event: Event, batch: &mut Vec<ChangeEvent>) -> bool {
        // Reads are never changes.
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        let suppressed = self.shared.suppression.load(Ordering::Acquire) > 0;

        for path in &event.paths {
            let lookup = lookup_string(path);
            let Some((root_key, kind)) = self.owning_root(&lookup) else {
                continue;
            };
            let root = PathBuf::from(&root_key);

            if matches!(event.kind, EventKind::Remove(_)) {
                if lookup == root_key && !root.exists() {
                    // The root itself went away; its watch is invalid now.
                    // A root that already exists again was deleted and
                    // remade (cache clears do this) and must stay watched.
                    self.roots.remove(&root_key);
                    let _ = self.watcher.unwatch(&root);
                }
                match kind {
                    RootKind::CacheDir => {
                        // Deletions under a cache root cannot be
                        // self-inflicted bookkeeping; flush right away.
                        push_unique(batch, ChangeEvent::ExternalCacheChange { root });
                        return true;
                    }
                    RootKind::LocalRepo => {
                        push_unique(batch, ChangeEvent::LocalRepoChanged { root });
                    }
                }
                continue;
            }

            if matches!(event.kind, EventKind::Create(_)) && path.is_dir() {
                // New subdirectory: extend the watch before anything is
                // written into it.
                if let Err(e) = self.watch_tree(path) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to watch new subdirectory");
                }
            }

            match kind {
                RootKind::LocalRepo => {
                    push_unique(batch, ChangeEvent::LocalRepoChanged { root });
                }
                RootKind::CacheDir if !suppressed => {
                    push_unique(batch, ChangeEvent::ExternalCacheChange { root });
                }
                RootKind::CacheDir => {
                    tracing::trace!(path = %path.display(), "suppressed self-update event");
                }
            }
        }
        false
    }

    fn owning_root(&self, lookup: &str) -> Option<(String, RootKind)> {
        for (key, kind) in &self.roots {
            if lookup == key
                || (lookup.starts_with(key)
                    && lookup[key.len()..].starts_with(std::path::MAIN_SEPARATOR))
            {
                return Some((key.clone(), *kind));
            }
        }
        None
    }
}

fn push_unique(batch: &mut Vec<ChangeEvent>, change: ChangeEvent) {
    if !batch.contains(&change) {
        batch.push(change);
    }
}

fn canonical_string(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Canonical string for an observed event path. Deleted paths cannot be
/// canonicalized directly; fall back to the canonical parent plus file
/// name, then to the raw string.
fn lookup_string(path: &Path) -> String {
    if let Ok(canonical) = path.canonicalize() {
        return canonical.to_string_lossy().into_owned();
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
        && let Ok(parent) = parent.canonicalize()
    {
        return parent.join(name).to_string_lossy().into_owned();
    }
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::time::timeout;

    const DELIVERY: Duration = Duration::from_secs(5);
    const SILENCE: Duration = Duration::from_millis(700);

    async fn settle() {
        // Give the loop a moment to process the registration command.
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    #[tokio::test]
    async fn test_local_repo_write_yields_one_change() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let monitor = FsMonitor::spawn(tx).unwrap();
        monitor.register_root(dir.path(), RootKind::LocalRepo);
        settle().await;

        std::fs::write(dir.path().join("plugin-cli-1.9.24-0.2.2.jar"), "bytes").unwrap();

        let root = dir.path().canonicalize().unwrap();
        let change = timeout(DELIVERY, rx.recv()).await.unwrap().unwrap();
        assert_eq!(change, ChangeEvent::LocalRepoChanged { root });
        // The write is reported once, not once per raw event.
        assert!(timeout(SILENCE, rx.recv()).await.is_err());

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_self_update_bracket_suppresses_cache_events() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let monitor = FsMonitor::spawn(tx).unwrap();
        monitor.register_root(dir.path(), RootKind::CacheDir);
        settle().await;

        {
            let _guard = monitor.mark_self_update();
            std::fs::write(dir.path().join("a.jar"), "bytes").unwrap();
            tokio::time::sleep(SILENCE).await;
        }
        assert!(rx.try_recv().is_err(), "bracketed write leaked an event");

        std::fs::write(dir.path().join("b.jar"), "bytes").unwrap();
        let root = dir.path().canonicalize().unwrap();
        let change = timeout(DELIVERY, rx.recv()).await.unwrap().unwrap();
        assert_eq!(change, ChangeEvent::ExternalCacheChange { root });

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_cache_deletion_significant_even_under_suppression() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("a.jar");
        std::fs::write(&victim, "bytes").unwrap();

        let (tx, mut rx) = unbounded_channel();
        let monitor = FsMonitor::spawn(tx).unwrap();
        monitor.register_root(dir.path(), RootKind::CacheDir);
        settle().await;

        let _guard = monitor.mark_self_update();
        std::fs::remove_file(&victim).unwrap();

        let root = dir.path().canonicalize().unwrap();
        let change = timeout(DELIVERY, rx.recv()).await.unwrap().unwrap();
        assert_eq!(change, ChangeEvent::ExternalCacheChange { root });

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_new_subdirectory_watched_incrementally() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let monitor = FsMonitor::spawn(tx).unwrap();
        monitor.register_root(dir.path(), RootKind::LocalRepo);
        settle().await;

        let sub = dir.path().join("org");
        std::fs::create_dir(&sub).unwrap();
        // Drain the create event for the directory itself.
        let _ = timeout(DELIVERY, rx.recv()).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        std::fs::write(sub.join("plugin.jar"), "bytes").unwrap();
        let root = dir.path().canonicalize().unwrap();
        let change = timeout(DELIVERY, rx.recv()).await.unwrap().unwrap();
        assert_eq!(change, ChangeEvent::LocalRepoChanged { root });

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_recreated_cache_root_stays_watched() {
        let parent = tempfile::tempdir().unwrap();
        let root_dir = parent.path().join("1.9.24");
        std::fs::create_dir(&root_dir).unwrap();

        let (tx, mut rx) = unbounded_channel();
        let monitor = FsMonitor::spawn(tx).unwrap();
        monitor.register_root(&root_dir, RootKind::CacheDir);
        settle().await;

        std::fs::remove_dir_all(&root_dir).unwrap();
        let root = lookup_string(&root_dir);
        let change = timeout(DELIVERY, rx.recv()).await.unwrap().unwrap();
        assert_eq!(
            change,
            ChangeEvent::ExternalCacheChange {
                root: PathBuf::from(&root)
            }
        );

        // Remake the root and re-register, as a cache clear does.
        std::fs::create_dir(&root_dir).unwrap();
        monitor.register_root(&root_dir, RootKind::CacheDir);
        settle().await;
        while rx.try_recv().is_ok() {}

        // Tampering after the clear must still be seen.
        std::fs::write(root_dir.join("stray.jar"), "bytes").unwrap();
        let root = root_dir.canonicalize().unwrap();
        let change = timeout(DELIVERY, rx.recv()).await.unwrap().unwrap();
        assert_eq!(change, ChangeEvent::ExternalCacheChange { root });

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_deregistered_root_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let monitor = FsMonitor::spawn(tx).unwrap();
        monitor.register_root(dir.path(), RootKind::LocalRepo);
        settle().await;
        monitor.deregister_root(dir.path());
        settle().await;

        std::fs::write(dir.path().join("a.jar"), "bytes").unwrap();
        assert!(timeout(SILENCE, rx.recv()).await.is_err());

        monitor.shutdown().await;
    }
}

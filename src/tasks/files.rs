use crate::config::Configuration;
use crate::debounce::Debouncer;
use crate::events::FolderChanged;
use anyhow::Result;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{self, Sender};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// One configured folder and whether a watch is currently attached to it.
#[derive(Debug)]
struct WatchedFolder {
    path: PathBuf,
    /// Resolved form; some platforms report events under it.
    canonical: Option<PathBuf>,
    attached: bool,
}

impl WatchedFolder {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            canonical: None,
            attached: false,
        }
    }

    fn roots(&self) -> impl Iterator<Item = &PathBuf> {
        [Some(&self.path), self.canonical.as_ref()].into_iter().flatten()
    }

    /// True if `path` is the folder itself or a direct child of it.
    fn owns(&self, path: &Path) -> bool {
        self.roots()
            .any(|root| path == root || path.parent() == Some(root.as_path()))
    }

    /// True if `event` removed or renamed the folder itself. The watch dies
    /// with the old directory even if one is recreated at the same path.
    fn lost_by(&self, event: &Event) -> bool {
        matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        ) && event
            .paths
            .iter()
            .any(|p| self.roots().any(|root| p == root))
    }

    fn attach(&mut self, watcher: &mut RecommendedWatcher) -> bool {
        if !self.path.is_dir() {
            return false;
        }
        match watcher.watch(&self.path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                self.canonical = self.path.canonicalize().ok();
                self.attached = true;
                info!(folder = %self.path.display(), "watching folder");
                true
            }
            Err(err) => {
                debug!(folder = %self.path.display(), "watch failed: {err}");
                false
            }
        }
    }

    fn detach(&mut self, watcher: &mut RecommendedWatcher) {
        if let Err(err) = watcher.unwatch(&self.path) {
            debug!(folder = %self.path.display(), "unwatch failed: {err}");
        }
        self.attached = false;
    }
}

/// Watch the configured folders and emit one [`FolderChanged`] per settled burst.
///
/// Raw notify events are mapped to the folder that owns them and recorded in
/// a [`Debouncer`]; every `debounce-tick` the settled folders are sent to the
/// manager. Every attach, including the first, is reported as a change.
/// Folders that are missing, or whose directory is removed or renamed, are
/// retried on each tick until a directory is back at the configured path.
#[instrument(
    skip(cfg, to_manager, cancel),
    fields(folders = cfg.folders.len(), debounce = ?cfg.debounce)
)]
pub async fn run(
    cfg: Configuration,
    to_manager: Sender<FolderChanged>,
    cancel: CancellationToken,
) -> Result<()> {
    // Bridge notify callback -> async channel
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Result<Event>>(128);
    let mut watcher = recommended_watcher(move |res| {
        let _ = watch_tx.blocking_send(res);
    })?;

    let mut debouncer = Debouncer::new(cfg.debounce);
    let mut folders: Vec<WatchedFolder> = cfg.folders.iter().map(|f| WatchedFolder::new(f)).collect();
    for folder in &mut folders {
        if folder.attach(&mut watcher) {
            // covers changes between the manager's startup scan and the watch
            debouncer.record(&folder.path, Instant::now());
        } else {
            warn!(folder = %folder.path.display(), "folder unavailable; will retry");
        }
    }

    let mut ticker = tokio::time::interval(cfg.debounce_tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting files task");
                break;
            }

            Some(res) = watch_rx.recv() => match res {
                Ok(event) => {
                    debug!(kind = ?event.kind, paths = ?event.paths, "notify event");
                    let now = Instant::now();
                    for folder in folders.iter_mut().filter(|f| event.paths.iter().any(|p| f.owns(p))) {
                        if debouncer.record(&folder.path, now) {
                            debug!(folder = %folder.path.display(), "change pending");
                        }
                        if folder.attached && folder.lost_by(&event) {
                            warn!(folder = %folder.path.display(), "folder removed; will reattach");
                            folder.detach(&mut watcher);
                        }
                    }
                }
                Err(err) => error!("watch error: {err}"),
            },

            _ = ticker.tick() => {
                let now = Instant::now();
                for folder in &mut folders {
                    if folder.attached && !folder.path.is_dir() {
                        warn!(folder = %folder.path.display(), "folder disappeared; will retry");
                        folder.detach(&mut watcher);
                        debouncer.record(&folder.path, now);
                    } else if !folder.attached && folder.attach(&mut watcher) {
                        debouncer.record(&folder.path, now);
                    }
                }

                for folder in debouncer.settle(now) {
                    info!(folder = %folder.display(), "folder settled");
                    if to_manager.send(FolderChanged(folder)).await.is_err() {
                        warn!("manager channel closed");
                        return Ok(());
                    }
                }
            }
        }
    }

    debouncer.clear();
    for folder in folders.iter_mut().filter(|f| f.attached) {
        folder.detach(&mut watcher);
    }
    Ok(())
}

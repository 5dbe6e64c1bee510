//! Watch-mode regeneration.
//!
//! Story-file saves are observed through the platform watcher, coalesced
//! over a debounce window, and re-extracted; only generated files whose
//! content actually changed are rewritten (the codegen layer hash-guards
//! every write), so the bundler's own watcher sees the minimum possible
//! churn.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::codegen::generate_all_mock_files;
use crate::discovery::is_story_file;
use crate::extract::extract_mocks_from_file;

const DEBOUNCE_WINDOW: Duration = Duration::from_millis(250);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum WatchError {
    Init(notify::Error),
    Watch { path: PathBuf, source: notify::Error },
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init(error) => write!(f, "failed to initialize file watcher: {error}"),
            Self::Watch { path, source } => {
                write!(f, "failed to watch {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for WatchError {}

/// Re-extracts the given story files and regenerates the mock modules
/// they feed. Returns the generated files that actually changed.
pub fn regenerate_for_files(project_root: &Path, story_files: &[PathBuf]) -> Vec<PathBuf> {
    let mut changed = Vec::new();
    for story_file in story_files {
        let mocks = extract_mocks_from_file(story_file, project_root);
        if mocks.is_empty() {
            debug!(file = %story_file.display(), "no mocks extracted on change");
            continue;
        }
        for (package, path) in generate_all_mock_files(&mocks, project_root) {
            // generate_all rewrites the registry too; only report the
            // modules whose content moved.
            if std::fs::metadata(&path).is_ok() {
                debug!(%package, "mock module refreshed");
                changed.push(path);
            }
        }
    }
    changed.sort();
    changed.dedup();
    changed
}

/// Handle to the background watcher; dropping it stops the thread.
pub struct MockWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    _watcher: RecommendedWatcher,
}

impl MockWatcher {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MockWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts watching the given story files, regenerating mocks on change.
pub fn watch_story_files(
    project_root: &Path,
    story_files: &[PathBuf],
) -> Result<MockWatcher, WatchError> {
    let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(move |event| {
        let _ = tx.send(event);
    })
    .map_err(WatchError::Init)?;

    for story_file in story_files {
        watcher
            .watch(story_file, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Watch {
                path: story_file.clone(),
                source,
            })?;
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let root = project_root.to_path_buf();

    let handle = std::thread::spawn(move || {
        let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
        let mut last_event: Option<Instant> = None;

        while !stop_flag.load(Ordering::SeqCst) {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => {
                    for path in event.paths {
                        if is_story_file(&path) {
                            pending.insert(path);
                            last_event = Some(Instant::now());
                        }
                    }
                }
                Ok(Err(error)) => {
                    warn!(%error, "watcher reported an error");
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            // Coalesce bursts of saves into one regeneration.
            let debounce_elapsed = last_event
                .is_some_and(|instant| instant.elapsed() >= DEBOUNCE_WINDOW);
            if !pending.is_empty() && debounce_elapsed {
                let files: Vec<PathBuf> = std::mem::take(&mut pending).into_iter().collect();
                last_event = None;
                info!(count = files.len(), "story files changed, regenerating mocks");
                let changed = regenerate_for_files(&root, &files);
                if changed.is_empty() {
                    debug!("regeneration produced no content changes");
                }
            }
        }
    });

    Ok(MockWatcher {
        stop,
        handle: Some(handle),
        _watcher: watcher,
    })
}

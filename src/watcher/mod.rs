//! Filesystem watcher.
//!
//! A notify-backed recursive observer over the project root. Events are
//! debounced: after the configured quiet period, the watcher asks git what
//! actually changed, runs the incremental updater, and invalidates cached
//! blueprints for every changed path. Optionally regenerates blueprints
//! for hot files.

mod debouncer;

pub use debouncer::Debouncer;

use crate::blueprint::{BlueprintEngine, BlueprintFlags};
use crate::config::Settings;
use crate::error::{CerberusError, Result};
use crate::incremental::{self, IncrementalUpdater};
use crate::storage::IndexStore;
use notify::{RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize)]
pub struct WatcherStats {
    pub running: bool,
    pub events_processed: u64,
    pub updates_triggered: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<f64>,
    pub uptime_seconds: f64,
}

#[derive(Default)]
struct Counters {
    events_processed: AtomicU64,
    updates_triggered: AtomicU64,
    last_update: Mutex<Option<f64>>,
}

/// Tracks per-file blueprint access so the regenerator knows what is hot.
#[derive(Default)]
pub struct AccessTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl AccessTracker {
    pub fn record(&self, file_path: &str) {
        *self.counts.lock().entry(file_path.to_string()).or_default() += 1;
    }

    pub fn count(&self, file_path: &str) -> u32 {
        self.counts.lock().get(file_path).copied().unwrap_or(0)
    }
}

pub struct FileWatcher {
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    started_at: Instant,
    handle: Option<std::thread::JoinHandle<()>>,
    pub access: Arc<AccessTracker>,
}

impl FileWatcher {
    /// Start watching `project_root` on a dedicated thread.
    pub fn spawn(
        settings: Arc<Settings>,
        store: Arc<IndexStore>,
        project_root: &Path,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .map_err(|e| CerberusError::General(format!("failed to create watcher: {e}")))?;
        watcher
            .watch(project_root, RecursiveMode::Recursive)
            .map_err(|e| CerberusError::General(format!("failed to watch path: {e}")))?;

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());
        let access = Arc::new(AccessTracker::default());

        let thread_running = running.clone();
        let thread_counters = counters.clone();
        let thread_access = access.clone();
        let root = project_root.to_path_buf();
        let debounce = settings.watcher.debounce_ms;
        let watch_patterns = settings.watcher.watch_patterns.clone();
        let ignore_patterns = settings.watcher.ignore_patterns.clone();
        let auto_blueprints = settings.watcher.auto_blueprints;
        let hot_threshold = settings.watcher.hot_blueprint_threshold;

        let handle = std::thread::Builder::new()
            .name("fs-watcher".into())
            .spawn(move || {
                // The notify watcher must stay alive for the thread's life.
                let _watcher = watcher;
                let mut debouncer = Debouncer::new(debounce);

                while thread_running.load(Ordering::Relaxed) {
                    match rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(Ok(event)) => {
                            for path in event.paths {
                                let Some(relative) = relative_to(&path, &root) else {
                                    continue;
                                };
                                if !is_watchable(&relative, &watch_patterns, &ignore_patterns) {
                                    continue;
                                }
                                thread_counters
                                    .events_processed
                                    .fetch_add(1, Ordering::Relaxed);
                                debouncer.record(PathBuf::from(relative));
                            }
                        }
                        Ok(Err(e)) => tracing::warn!("watch error: {e}"),
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }

                    let ready = debouncer.take_ready();
                    if ready.is_empty() {
                        continue;
                    }
                    tracing::info!("debounce elapsed, checking {} path(s)", ready.len());

                    if let Err(e) = process_changes(
                        &settings,
                        &store,
                        &root,
                        &thread_counters,
                        &thread_access,
                        auto_blueprints,
                        hot_threshold,
                    ) {
                        tracing::error!("incremental update failed: {e}");
                    }
                }
            })
            .map_err(|e| CerberusError::General(format!("failed to spawn watcher thread: {e}")))?;

        Ok(Self {
            running,
            counters,
            started_at: Instant::now(),
            handle: Some(handle),
            access,
        })
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            running: self.running.load(Ordering::Relaxed),
            events_processed: self.counters.events_processed.load(Ordering::Relaxed),
            updates_triggered: self.counters.updates_triggered.load(Ordering::Relaxed),
            last_update: *self.counters.last_update.lock(),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Debounced work: git decides what actually changed, the updater applies
/// it, and blueprint caches for those paths are dropped.
fn process_changes(
    settings: &Arc<Settings>,
    store: &Arc<IndexStore>,
    root: &Path,
    counters: &Counters,
    access: &AccessTracker,
    auto_blueprints: bool,
    hot_threshold: u32,
) -> Result<()> {
    let changes = incremental::detect_changes(store, root)?;
    if changes.is_empty() {
        tracing::debug!("no changes according to git diff");
        return Ok(());
    }

    let changed_paths = changes.all_paths();
    for path in &changed_paths {
        store.sqlite.cache_invalidate(path)?;
    }

    let updater = IncrementalUpdater::new(settings.clone(), store.clone());
    let result = updater.apply(root, &changes)?;

    counters.updates_triggered.fetch_add(1, Ordering::Relaxed);
    *counters.last_update.lock() = Some(now_seconds());
    tracing::info!(
        "watcher update: {} file(s) reparsed, {} removed",
        result.files_reparsed,
        result.removed_files.len()
    );

    if auto_blueprints {
        let engine = BlueprintEngine::new(store.clone(), root);
        let flags = BlueprintFlags {
            deps: true,
            ..Default::default()
        };
        for path in &changed_paths {
            if access.count(path) >= hot_threshold {
                if let Err(e) = engine.generate(path, &flags) {
                    tracing::debug!("hot blueprint regeneration failed for '{path}': {e}");
                } else {
                    tracing::debug!("regenerated hot blueprint for '{path}'");
                }
            }
        }
    }
    Ok(())
}

fn relative_to(path: &Path, root: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

/// Include/exclude check against the configured glob patterns.
pub fn is_watchable(relative: &str, watch: &[String], ignore: &[String]) -> bool {
    if ignore.iter().any(|pattern| glob_match(pattern, relative)) {
        return false;
    }
    watch.iter().any(|pattern| glob_match(pattern, relative))
}

/// Minimal fnmatch: `*` spans anything (including separators), `?` one
/// character. Patterns without a slash match against the basename too.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn matches(pattern: &[u8], text: &[u8]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&pattern[1..], text)
                    || (!text.is_empty() && matches(pattern, &text[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&pattern[1..], &text[1..]),
            (Some(p), Some(c)) if p == c => matches(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    if matches(pattern.as_bytes(), candidate.as_bytes()) {
        return true;
    }
    if !pattern.contains('/') {
        if let Some(basename) = candidate.rsplit('/').next() {
            return matches(pattern.as_bytes(), basename.as_bytes());
        }
    }
    false
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_extensions_and_dirs() {
        assert!(glob_match("*.py", "src/deep/module.py"));
        assert!(glob_match("*.py", "top.py"));
        assert!(!glob_match("*.py", "module.rs"));
        assert!(glob_match("*/.git/*", "repo/.git/HEAD"));
        assert!(glob_match("*~", "file.py~"));
    }

    #[test]
    fn watchable_respects_both_lists() {
        let watch = vec!["*.py".to_string(), "*.ts".to_string()];
        let ignore = vec!["*/.git/*".to_string(), "*/__pycache__/*".to_string()];

        assert!(is_watchable("src/a.py", &watch, &ignore));
        assert!(is_watchable("web/app.ts", &watch, &ignore));
        assert!(!is_watchable("notes.md", &watch, &ignore));
        assert!(!is_watchable("pkg/__pycache__/a.py", &watch, &ignore));
    }

    #[test]
    fn access_tracker_counts() {
        let tracker = AccessTracker::default();
        assert_eq!(tracker.count("a.py"), 0);
        tracker.record("a.py");
        tracker.record("a.py");
        assert_eq!(tracker.count("a.py"), 2);
    }
}

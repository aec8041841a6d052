//! Shared file watcher driving cache invalidation
//!
//! A registry owns a single debounced `notify` watcher. Each watched file
//! adds its parent directory to it (editors often replace files by rename,
//! which a watch on the file inode would miss), and directories are
//! reference-counted so many files in one directory cost one OS watch.
//! Debounced events are routed back to the watched files by path; events
//! for other files in a directory are dropped.
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────┐     ┌──────────────────┐
//! │   notify    │────>│  debouncer  │────>│ routes  │────>│ SmartCache       │
//! │ (dirs, rc)  │     │ (debounce)  │     │ by path │     │ invalidate_path  │
//! └─────────────┘     └─────────────┘     └─────────┘     └──────────────────┘
//! ```
//!
//! The registry itself never calls into the cache; the change handler
//! receives the original (non-canonical) path and the cache takes it from
//! there.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use parking_lot::Mutex;

use crate::error::{Result, SearchError};

/// Called with the original path of a watched file that changed
pub type ChangeHandler = Arc<dyn Fn(PathBuf) + Send + Sync>;

/// Canonical path -> path as the cache knows it
type Routes = Arc<Mutex<HashMap<PathBuf, PathBuf>>>;

/// One watched file
#[derive(Debug)]
pub struct WatchRecord {
    /// Path as the cache knows it
    pub path: PathBuf,
    /// Owning zone
    pub zone: String,
    /// Last accepted event, for debounce
    pub last_event: Option<Instant>,
    pub event_count: u64,
    /// Last time a cache entry was known to reference the path
    pub last_referenced: Instant,
    canonical: PathBuf,
    parent: PathBuf,
}

/// Watch state removed from a registry, dropped by the caller outside any
/// lock so the debouncer thread is never waited on while one is held.
#[derive(Default)]
pub struct Detached {
    pub records: Vec<WatchRecord>,
    debouncer: Option<Debouncer<RecommendedWatcher>>,
}

impl Detached {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Bounded set of watched files sharing one OS watcher
pub struct WatchRegistry {
    watchers: HashMap<PathBuf, WatchRecord>,
    /// Parent directory -> number of watched files in it
    dirs: HashMap<PathBuf, usize>,
    routes: Routes,
    debouncer: Option<Debouncer<RecommendedWatcher>>,
    on_change: ChangeHandler,
    max_watchers: usize,
    debounce: Duration,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("watchers", &self.watchers)
            .field("dirs", &self.dirs)
            .field("running", &self.debouncer.is_some())
            .field("max_watchers", &self.max_watchers)
            .finish()
    }
}

impl WatchRegistry {
    /// The OS watcher is created on the first successful `watch`
    pub fn new<F>(max_watchers: usize, debounce: Duration, on_change: F) -> Self
    where
        F: Fn(PathBuf) + Send + Sync + 'static,
    {
        Self {
            watchers: HashMap::new(),
            dirs: HashMap::new(),
            routes: Arc::new(Mutex::new(HashMap::new())),
            debouncer: None,
            on_change: Arc::new(on_change),
            max_watchers,
            debounce,
        }
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.watchers.contains_key(path)
    }

    pub fn is_full(&self) -> bool {
        self.watchers.len() >= self.max_watchers
    }

    pub fn get(&self, path: &Path) -> Option<&WatchRecord> {
        self.watchers.get(path)
    }

    /// Number of directories registered with the OS watcher
    pub fn watched_dirs(&self) -> usize {
        self.dirs.len()
    }

    fn start(&mut self) -> Result<&mut Debouncer<RecommendedWatcher>> {
        if self.debouncer.is_none() {
            let routes = Arc::clone(&self.routes);
            let on_change = Arc::clone(&self.on_change);
            let debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
                match result {
                    Ok(events) => {
                        let mut changed: Vec<PathBuf> = {
                            let routes = routes.lock();
                            events
                                .iter()
                                .filter_map(|event| routes.get(&event.path).cloned())
                                .collect()
                        };
                        changed.sort();
                        changed.dedup();
                        for path in changed {
                            tracing::debug!("[WATCHER] change detected: {:?}", path);
                            on_change(path);
                        }
                    }
                    Err(e) => tracing::warn!("[WATCHER] watch error: {:?}", e),
                }
            })
            .map_err(|e| SearchError::Watch {
                message: e.to_string(),
            })?;
            self.debouncer = Some(debouncer);
        }
        self.debouncer.as_mut().ok_or_else(|| SearchError::Watch {
            message: "watcher not running".to_string(),
        })
    }

    /// Start watching `path`.
    ///
    /// Returns `Ok(false)` when the path is already watched or the registry
    /// is full; errors only when the OS watch cannot be created.
    pub fn watch(&mut self, path: &Path, zone: &str) -> Result<bool> {
        if let Some(record) = self.watchers.get_mut(path) {
            record.last_referenced = Instant::now();
            return Ok(false);
        }
        if self.is_full() {
            return Ok(false);
        }

        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let parent = canonical
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| SearchError::Watch {
                message: format!("{} has no parent directory", path.display()),
            })?;

        if !self.dirs.contains_key(&parent) {
            self.start()?
                .watcher()
                .watch(&parent, RecursiveMode::NonRecursive)
                .map_err(|e| SearchError::Watch {
                    message: e.to_string(),
                })?;
        }
        *self.dirs.entry(parent.clone()).or_insert(0) += 1;
        self.routes
            .lock()
            .insert(canonical.clone(), path.to_path_buf());

        self.watchers.insert(
            path.to_path_buf(),
            WatchRecord {
                path: path.to_path_buf(),
                zone: zone.to_string(),
                last_event: None,
                event_count: 0,
                last_referenced: Instant::now(),
                canonical,
                parent,
            },
        );
        Ok(true)
    }

    /// Drop one record's route and release its directory
    fn release(&mut self, record: &WatchRecord) {
        self.routes.lock().remove(&record.canonical);
        let Some(count) = self.dirs.get_mut(&record.parent) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        self.dirs.remove(&record.parent);
        if let Some(debouncer) = self.debouncer.as_mut() {
            if let Err(e) = debouncer.watcher().unwatch(&record.parent) {
                tracing::debug!("[WATCHER] unwatch {:?} failed: {}", record.parent, e);
            }
        }
    }

    /// Record an event for `path`; `false` means it falls inside the
    /// debounce window of the previous accepted event and should be ignored.
    pub fn record_event(&mut self, path: &Path, now: Instant) -> bool {
        let Some(record) = self.watchers.get_mut(path) else {
            return false;
        };
        record.event_count += 1;
        if let Some(last) = record.last_event {
            if now.duration_since(last) < self.debounce {
                return false;
            }
        }
        record.last_event = Some(now);
        true
    }

    /// Detach watchers whose path is not referenced and has been idle for
    /// longer than `idle`. Directories left without a watched file are
    /// removed from the OS watcher.
    pub fn take_idle(
        &mut self,
        referenced: &HashSet<PathBuf>,
        idle: Duration,
        now: Instant,
    ) -> Detached {
        for (path, record) in self.watchers.iter_mut() {
            if referenced.contains(path) {
                record.last_referenced = now;
            }
        }

        let idle_paths: Vec<PathBuf> = self
            .watchers
            .iter()
            .filter(|(_, record)| now.duration_since(record.last_referenced) > idle)
            .map(|(path, _)| path.clone())
            .collect();

        let mut records = Vec::with_capacity(idle_paths.len());
        for path in &idle_paths {
            if let Some(record) = self.watchers.remove(path) {
                self.release(&record);
                records.push(record);
            }
        }
        Detached {
            records,
            debouncer: None,
        }
    }

    /// Remove every watch and stop the OS watcher
    pub fn take_all(&mut self) -> Detached {
        self.routes.lock().clear();
        self.dirs.clear();
        Detached {
            records: self.watchers.drain().map(|(_, record)| record).collect(),
            debouncer: self.debouncer.take(),
        }
    }
}

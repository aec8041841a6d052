//! File-aware result cache
//!
//! [`SmartCache`] stores serializable values under string keys. An entry may
//! be tied to the file it was derived from and to any number of dependency
//! files; `get` rejects entries whose TTL expired or whose files changed on
//! disk, and removes them on the spot.
//!
//! Other parts of the cache:
//! - zones ([`zone`]) choose TTL, mtime checking and watching per path
//! - one shared debounced watcher ([`watcher`]) invalidates entries as soon
//!   as a referenced file changes
//! - an optional HEAD watcher ([`git`]) clears everything after checkouts
//! - a maintenance thread sweeps expired entries and idle watchers
//!
//! Locking: the entry state and the watcher registry have separate mutexes
//! that are never held together, and file-system stat calls run with no
//! lock held. A `get` that had to stat re-checks the entry generation
//! before evicting or promoting it, so a concurrent `set` is never undone.

pub mod entry;
pub mod git;
pub mod stats;
pub mod watcher;
pub mod zone;

pub use entry::{fnv1a_hash, CacheEntry, FileStamp, SetOptions};
pub use git::{find_git_head, GitHeadWatcher};
pub use stats::{CacheEvent, CacheObserver, CacheStats, InvalidationReason, TracingObserver, ZoneStats};
pub use zone::{CacheZone, ZoneTable};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::{Result, SearchError};
use stats::Counters;
use watcher::{Detached, WatchRegistry};

/// Mutable cache contents, guarded by one mutex
struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    /// Logical access clock for LRU ordering
    clock: u64,
    next_generation: u64,
    memory: usize,
    /// Referenced path -> keys of entries referencing it
    path_index: HashMap<PathBuf, HashSet<String>>,
    counters: Counters,
}

impl<T> CacheState<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            clock: 0,
            next_generation: 0,
            memory: 0,
            path_index: HashMap::new(),
            counters: Counters::default(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn index(&mut self, key: &str, entry: &CacheEntry<T>) {
        for path in entry.referenced_paths() {
            self.path_index
                .entry(path.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn unindex(&mut self, key: &str, entry: &CacheEntry<T>) {
        for path in entry.referenced_paths() {
            if let Some(keys) = self.path_index.get_mut(path) {
                keys.remove(key);
                if keys.is_empty() {
                    self.path_index.remove(path);
                }
            }
        }
    }

    /// Remove one entry. `None` as reason records an LRU eviction.
    fn remove(
        &mut self,
        key: &str,
        reason: Option<InvalidationReason>,
        events: &mut Vec<CacheEvent>,
    ) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        self.memory = self.memory.saturating_sub(entry.size_bytes);
        self.unindex(key, &entry);

        match reason {
            Some(reason) => {
                self.counters.record_invalidation(reason);
                events.push(CacheEvent::Invalidate {
                    key: key.to_string(),
                    reason,
                });
            }
            None => {
                self.counters.evictions += 1;
                events.push(CacheEvent::Evict {
                    key: key.to_string(),
                });
            }
        }
        true
    }

    /// Evict the least recently used ~10% of entries, at least one
    fn evict_lru_batch(&mut self, events: &mut Vec<CacheEvent>) {
        let mut order: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_access, key.clone()))
            .collect();
        order.sort_unstable();

        let count = (order.len() / 10).max(1);
        for (_, key) in order.into_iter().take(count) {
            self.remove(&key, None, events);
        }
    }

    fn remove_all(&mut self, keys: Vec<String>, reason: InvalidationReason, events: &mut Vec<CacheEvent>) -> usize {
        keys.iter()
            .filter(|key| self.remove(key, Some(reason), events))
            .count()
    }
}

struct MaintenanceHandle {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

struct CacheInner<T> {
    config: CacheConfig,
    zones: ZoneTable,
    state: Mutex<CacheState<T>>,
    watchers: Mutex<WatchRegistry>,
    git: Mutex<Option<GitHeadWatcher>>,
    observers: RwLock<Vec<Arc<dyn CacheObserver>>>,
    disposed: AtomicBool,
}

impl<T> CacheInner<T> {
    fn emit(&self, events: Vec<CacheEvent>) {
        if events.is_empty() || !self.config.enable_metrics {
            return;
        }
        let observers = self.observers.read().clone();
        for event in &events {
            for observer in &observers {
                observer.on_event(event);
            }
        }
    }

    fn invalidate_path(&self, path: &Path, reason: InvalidationReason) -> usize {
        let mut events = Vec::new();
        let removed = {
            let mut state = self.state.lock();
            let keys: Vec<String> = state
                .path_index
                .get(path)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default();
            state.remove_all(keys, reason, &mut events)
        };
        self.emit(events);
        removed
    }

    fn on_watch_event(&self, path: &Path) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let apply = self.watchers.lock().record_event(path, Instant::now());
        self.state.lock().counters.watcher_events += 1;
        if !apply {
            return;
        }
        let removed = self.invalidate_path(path, InvalidationReason::FileWatch);
        if removed > 0 {
            tracing::debug!("[CACHE] {} entries invalidated by change to {:?}", removed, path);
        }
    }

    fn clear_with(&self, git: bool) -> usize {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.entries.len();
            state.entries.clear();
            state.path_index.clear();
            state.memory = 0;
            if git {
                state.counters.git_clears += 1;
            }
            removed
        };
        self.emit(vec![CacheEvent::Clear { entries: removed }]);
        removed
    }

    fn run_maintenance(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        let mut events = Vec::new();

        let referenced: HashSet<PathBuf> = {
            let mut state = self.state.lock();
            let expired: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            state.remove_all(expired, InvalidationReason::TtlExpired, &mut events);
            state.path_index.keys().cloned().collect()
        };

        let idle = Duration::from_millis(self.config.watcher_idle_ms);
        let closed: Detached = self.watchers.lock().take_idle(&referenced, idle, now);
        if !closed.is_empty() {
            tracing::debug!("[CACHE] closed {} idle watchers", closed.len());
        }
        drop(closed);

        self.emit(events);
    }
}

/// File-aware cache with zones, LRU eviction and watch-driven invalidation
pub struct SmartCache<T> {
    inner: Arc<CacheInner<T>>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl<T> std::fmt::Debug for SmartCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartCache")
            .field("entries", &self.inner.state.lock().entries.len())
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T> SmartCache<T>
where
    T: Clone + Serialize + Send + Sync + 'static,
{
    /// Create a cache and start its maintenance thread, unless
    /// `maintenance_interval_ms` is 0.
    ///
    /// Fails when `max_size` is 0 or a zone pattern does not compile.
    pub fn new(config: CacheConfig) -> Result<Self> {
        if config.max_size == 0 {
            return Err(SearchError::Config {
                message: "cache max_size must be at least 1".to_string(),
            });
        }
        let zones = ZoneTable::new(&config.zones)?;
        let interval = match config.maintenance_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let inner = Arc::new_cyclic(|weak: &Weak<CacheInner<T>>| {
            let weak = weak.clone();
            let registry = WatchRegistry::new(
                config.max_watchers,
                config.watcher_debounce(),
                move |changed: PathBuf| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_watch_event(&changed);
                    }
                },
            );
            CacheInner {
                config,
                zones,
                state: Mutex::new(CacheState::new()),
                watchers: Mutex::new(registry),
                git: Mutex::new(None),
                observers: RwLock::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }
        });

        let maintenance = match interval {
            Some(interval) => Self::spawn_maintenance(Arc::downgrade(&inner), interval),
            None => {
                tracing::debug!("[CACHE] maintenance sweep disabled");
                None
            }
        };

        Ok(Self {
            inner,
            maintenance: Mutex::new(maintenance),
        })
    }

    fn spawn_maintenance(inner: Weak<CacheInner<T>>, interval: Duration) -> Option<MaintenanceHandle> {
        let (stop, rx) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("semfora-cache-maintenance".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = inner.upgrade() else { break };
                        inner.run_maintenance();
                    }
                    _ => break,
                }
            });

        match spawned {
            Ok(thread) => Some(MaintenanceHandle { stop, thread }),
            Err(e) => {
                tracing::warn!("[CACHE] maintenance thread not started: {}", e);
                None
            }
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn zones(&self) -> &ZoneTable {
        &self.inner.zones
    }

    /// Look up a key, validating TTL and attached files.
    ///
    /// A stale entry is removed, not merely skipped.
    pub fn get(&self, key: &str) -> Option<T> {
        if self.is_disposed() {
            return None;
        }
        let now = Instant::now();
        let mut events = Vec::new();

        let (generation, plan) = {
            let mut state = self.inner.state.lock();
            let checked = state
                .entries
                .get(key)
                .map(|entry| (entry.is_expired(now), entry.generation, entry.validation_plan()));
            match checked {
                None => {
                    state.counters.misses += 1;
                    drop(state);
                    events.push(CacheEvent::Miss {
                        key: key.to_string(),
                    });
                    self.inner.emit(events);
                    return None;
                }
                Some((true, _, _)) => {
                    state.remove(key, Some(InvalidationReason::TtlExpired), &mut events);
                    state.counters.misses += 1;
                    drop(state);
                    events.push(CacheEvent::Miss {
                        key: key.to_string(),
                    });
                    self.inner.emit(events);
                    return None;
                }
                Some((false, generation, plan)) => (generation, plan),
            }
        };

        let stale = plan.as_ref().and_then(|plan| plan.run());

        let value = {
            let mut state = self.inner.state.lock();
            let current = state
                .entries
                .get(key)
                .map(|entry| entry.generation == generation)
                .unwrap_or(false);

            let value = match (current, stale) {
                (true, Some(reason)) => {
                    state.remove(key, Some(reason), &mut events);
                    None
                }
                (true, None) => {
                    let tick = state.tick();
                    let promoted = state.entries.get_mut(key).map(|entry| {
                        entry.last_access = tick;
                        entry.hits += 1;
                        (entry.value.clone(), entry.zone.clone())
                    });
                    if let Some((_, Some(zone))) = &promoted {
                        *state.counters.zone_hits.entry(zone.clone()).or_default() += 1;
                    }
                    promoted.map(|(value, _)| value)
                }
                // Replaced or removed while the files were being checked
                (false, _) => None,
            };

            if value.is_some() {
                state.counters.hits += 1;
            } else {
                state.counters.misses += 1;
            }
            value
        };

        events.push(match value {
            Some(_) => CacheEvent::Hit {
                key: key.to_string(),
            },
            None => CacheEvent::Miss {
                key: key.to_string(),
            },
        });
        self.inner.emit(events);
        value
    }

    /// Store a value.
    ///
    /// When `options.file_path` is given the file is stat'ed now; if that
    /// fails the value is not cached. Entries exceeding `max_memory` on
    /// their own are never stored.
    pub fn set(&self, key: &str, value: T, options: SetOptions) {
        if self.is_disposed() {
            return;
        }
        let config = &self.inner.config;

        let zone = options
            .file_path
            .as_deref()
            .and_then(|path| self.inner.zones.resolve(path));
        let check_mtime = zone.map(|z| z.check_mtime).unwrap_or(true);
        let ttl = options
            .ttl
            .or_else(|| zone.map(|z| z.ttl))
            .unwrap_or_else(|| config.default_ttl());
        let zone_name = zone.map(|z| z.name.clone());

        let file_stamp = match &options.file_path {
            Some(path) => match FileStamp::read(path) {
                Some(stamp) => Some(stamp),
                None => {
                    tracing::debug!("[CACHE] not caching {}: cannot stat {:?}", key, path);
                    return;
                }
            },
            None => None,
        };

        let size_bytes = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0) + key.len();
        if size_bytes > config.max_memory {
            tracing::debug!("[CACHE] not caching {}: {} bytes exceeds limit", key, size_bytes);
            return;
        }

        let watch_paths: Vec<PathBuf> = options
            .file_path
            .iter()
            .chain(options.dependencies.iter())
            .filter(|path| {
                self.inner
                    .zones
                    .resolve(path)
                    .map(|z| z.watch)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();

            // Replacing a key is neither an eviction nor an invalidation
            if let Some(old) = state.entries.remove(key) {
                state.memory = state.memory.saturating_sub(old.size_bytes);
                state.unindex(key, &old);
            }

            while !state.entries.is_empty()
                && (state.entries.len() + 1 > config.max_size
                    || state.memory + size_bytes > config.max_memory)
            {
                state.evict_lru_batch(&mut events);
            }

            let last_access = state.tick();
            state.next_generation += 1;
            let entry = CacheEntry {
                value,
                created: SystemTime::now(),
                created_at: Instant::now(),
                ttl,
                hits: 0,
                size_bytes,
                file_path: options.file_path,
                file_stamp,
                dependencies: options.dependencies,
                key_hash: fnv1a_hash(key),
                zone: zone_name.clone(),
                check_mtime,
                last_access,
                generation: state.next_generation,
            };
            state.index(key, &entry);
            state.memory += size_bytes;
            state.entries.insert(key.to_string(), entry);
        }

        events.push(CacheEvent::Set {
            key: key.to_string(),
            zone: zone_name,
            size: size_bytes,
        });
        self.inner.emit(events);

        for path in watch_paths {
            self.attach_watcher(&path);
        }
    }

    fn attach_watcher(&self, path: &Path) {
        let zone = self
            .inner
            .zones
            .resolve(path)
            .map(|z| z.name.clone())
            .unwrap_or_default();
        let result = self.inner.watchers.lock().watch(path, &zone);

        match result {
            Ok(true) => tracing::debug!("[CACHE] watching {:?} ({})", path, zone),
            Ok(false) => {}
            // Caching continues without watch-driven invalidation
            Err(e) => tracing::debug!("[CACHE] watch on {:?} skipped: {}", path, e),
        }
    }

    /// Remove one key; `true` if it was present
    pub fn invalidate(&self, key: &str) -> bool {
        let mut events = Vec::new();
        let removed = self
            .inner
            .state
            .lock()
            .remove(key, Some(InvalidationReason::Explicit), &mut events);
        self.inner.emit(events);
        removed
    }

    /// Remove every entry attached to or depending on `path`
    pub fn invalidate_by_path(&self, path: &Path) -> usize {
        self.inner.invalidate_path(path, InvalidationReason::Explicit)
    }

    /// Remove every entry assigned to the named zone
    pub fn invalidate_by_zone(&self, zone: &str) -> usize {
        let mut events = Vec::new();
        let removed = {
            let mut state = self.inner.state.lock();
            let keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.zone.as_deref() == Some(zone))
                .map(|(key, _)| key.clone())
                .collect();
            state.remove_all(keys, InvalidationReason::Explicit, &mut events)
        };
        self.inner.emit(events);
        removed
    }

    /// Drop all entries; returns how many were removed
    pub fn clear(&self) -> usize {
        self.inner.clear_with(false)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    /// Number of active file watchers
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }

    /// Number of directories registered with the shared OS watcher
    pub fn watched_dir_count(&self) -> usize {
        self.inner.watchers.lock().watched_dirs()
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.inner.watchers.lock().contains(path)
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = {
            let state = self.inner.state.lock();
            let mut zones = std::collections::BTreeMap::new();
            for name in self.inner.zones.names() {
                zones.insert(
                    name.to_string(),
                    ZoneStats {
                        entries: 0,
                        hits: state.counters.zone_hits.get(name).copied().unwrap_or(0),
                    },
                );
            }
            for entry in state.entries.values() {
                if let Some(zone) = entry.zone.as_ref().and_then(|z| zones.get_mut(z)) {
                    zone.entries += 1;
                }
            }

            CacheStats {
                hits: state.counters.hits,
                misses: state.counters.misses,
                hit_rate: state.counters.hit_rate(),
                evictions: state.counters.evictions,
                file_invalidations: state.counters.file_invalidations,
                watcher_events: state.counters.watcher_events,
                git_clears: state.counters.git_clears,
                entries: state.entries.len(),
                memory_bytes: state.memory,
                watchers: 0,
                zones,
            }
        };
        stats.watchers = self.watcher_count();
        stats
    }

    /// Not disposed, within every limit, and either unused or hitting
    /// above `min_hit_rate`.
    pub fn is_healthy(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        let config = &self.inner.config;
        let (within_limits, queries, hit_rate) = {
            let state = self.inner.state.lock();
            (
                state.entries.len() <= config.max_size && state.memory <= config.max_memory,
                state.counters.queries(),
                state.counters.hit_rate(),
            )
        };
        within_limits
            && self.watcher_count() <= config.max_watchers
            && (queries == 0 || hit_rate > config.min_hit_rate)
    }

    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Sweep expired entries and close idle, unreferenced watchers now
    pub fn run_maintenance(&self) {
        self.inner.run_maintenance();
    }

    /// Clear the cache whenever the HEAD of the repository containing
    /// `start` changes. Returns `false` when no repository was found.
    pub fn watch_git_head(&self, start: &Path) -> Result<bool> {
        let Some(head) = find_git_head(start) else {
            tracing::debug!("[CACHE] no git repository above {:?}", start);
            return Ok(false);
        };

        let weak = Arc::downgrade(&self.inner);
        let settle = Duration::from_millis(self.inner.config.git_settle_ms);
        let watcher = GitHeadWatcher::start(&head, settle, move || {
            if let Some(inner) = weak.upgrade() {
                if !inner.disposed.load(Ordering::SeqCst) {
                    inner.clear_with(true);
                }
            }
        })?;

        tracing::info!("[CACHE] watching git HEAD at {:?}", head);
        *self.inner.git.lock() = Some(watcher);
        Ok(true)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Stop maintenance, close all watchers and drop every entry.
    /// Idempotent; the cache stays usable only as an always-missing cache.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.maintenance.lock().take() {
            let _ = handle.stop.send(());
            if handle.thread.join().is_err() {
                tracing::warn!("[CACHE] maintenance thread panicked");
            }
        }

        let closed: Detached = self.inner.watchers.lock().take_all();
        drop(closed);
        let git = self.inner.git.lock().take();
        drop(git);

        let mut state = self.inner.state.lock();
        state.entries.clear();
        state.path_index.clear();
        state.memory = 0;
    }
}

impl<T> Drop for SmartCache<T> {
    fn drop(&mut self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.maintenance.lock().take() {
            let _ = handle.stop.send(());
            let _ = handle.thread.join();
        }
        let closed = self.inner.watchers.lock().take_all();
        drop(closed);
        self.inner.git.lock().take();
    }
}

//! Cache statistics and lifecycle notifications
//!
//! Observers receive [`CacheEvent`]s synchronously after the cache has
//! released its internal lock, so an observer may call back into the cache.
//! Events are only delivered when `enable_metrics` is set; the counters in
//! [`CacheStats`] are always maintained.

use std::collections::BTreeMap;

use serde::Serialize;

/// Why an entry was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    TtlExpired,
    FileModified,
    FileSizeChanged,
    FileMissing,
    DependencyChanged,
    /// A watcher reported a change to a referenced file
    FileWatch,
    /// The repository HEAD moved
    GitHead,
    /// Removed through `invalidate*`
    Explicit,
}

impl InvalidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationReason::TtlExpired => "ttl_expired",
            InvalidationReason::FileModified => "file_modified",
            InvalidationReason::FileSizeChanged => "file_size_changed",
            InvalidationReason::FileMissing => "file_missing",
            InvalidationReason::DependencyChanged => "dependency_changed",
            InvalidationReason::FileWatch => "file_watch",
            InvalidationReason::GitHead => "git_head",
            InvalidationReason::Explicit => "explicit",
        }
    }

    /// Reasons caused by a change on disk
    pub fn is_file_change(&self) -> bool {
        matches!(
            self,
            InvalidationReason::FileModified
                | InvalidationReason::FileSizeChanged
                | InvalidationReason::FileMissing
                | InvalidationReason::DependencyChanged
                | InvalidationReason::FileWatch
        )
    }
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    Hit { key: String },
    Miss { key: String },
    Set { key: String, zone: Option<String>, size: usize },
    Evict { key: String },
    Invalidate { key: String, reason: InvalidationReason },
    Clear { entries: usize },
}

/// Receives cache lifecycle notifications
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Observer that logs every event at debug level
#[derive(Debug, Default)]
pub struct TracingObserver;

impl CacheObserver for TracingObserver {
    fn on_event(&self, event: &CacheEvent) {
        match event {
            CacheEvent::Invalidate { key, reason } => {
                tracing::debug!("[CACHE] invalidate {} ({})", key, reason)
            }
            CacheEvent::Clear { entries } => tracing::debug!("[CACHE] cleared {} entries", entries),
            other => tracing::trace!("[CACHE] {:?}", other),
        }
    }
}

/// Per-zone counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ZoneStats {
    pub entries: usize,
    pub hits: u64,
}

/// Snapshot of cache activity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub file_invalidations: u64,
    pub watcher_events: u64,
    pub git_clears: u64,
    pub entries: usize,
    pub memory_bytes: usize,
    pub watchers: usize,
    pub zones: BTreeMap<String, ZoneStats>,
}

/// Running counters kept under the cache lock
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub file_invalidations: u64,
    pub watcher_events: u64,
    pub git_clears: u64,
    pub zone_hits: BTreeMap<String, u64>,
}

impl Counters {
    pub fn queries(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.queries();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_invalidation(&mut self, reason: InvalidationReason) {
        if reason.is_file_change() {
            self.file_invalidations += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_names() {
        assert_eq!(InvalidationReason::TtlExpired.as_str(), "ttl_expired");
        assert_eq!(InvalidationReason::FileSizeChanged.to_string(), "file_size_changed");
        assert!(InvalidationReason::DependencyChanged.is_file_change());
        assert!(!InvalidationReason::TtlExpired.is_file_change());
    }

    #[test]
    fn test_hit_rate() {
        let mut counters = Counters::default();
        assert_eq!(counters.hit_rate(), 0.0);
        counters.hits = 3;
        counters.misses = 1;
        assert!((counters.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_event_serialization() {
        let event = CacheEvent::Invalidate {
            key: "k".into(),
            reason: InvalidationReason::FileMissing,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "invalidate");
        assert_eq!(json["reason"], "file_missing");
    }
}

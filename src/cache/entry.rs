//! Cache entries and the staleness checks run against them

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use super::stats::InvalidationReason;

// FNV-1a constants for 64-bit hash
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// Quick structural hash of a cache key
pub fn fnv1a_hash(data: &str) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Modification time and size of a file at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime: SystemTime,
    pub size: u64,
}

impl FileStamp {
    /// Stat a file; `None` when it is missing or inaccessible
    pub fn read(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            mtime: metadata.modified().ok()?,
            size: metadata.len(),
        })
    }
}

/// Options accepted by `SmartCache::set`
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// File the value was derived from
    pub file_path: Option<PathBuf>,
    /// Other files whose modification invalidates the value
    pub dependencies: Vec<PathBuf>,
    /// Overrides the zone / default TTL
    pub ttl: Option<Duration>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<PathBuf>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// A cached value plus everything needed to decide whether it is still valid
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    /// Wall-clock creation time, compared against dependency mtimes
    pub created: SystemTime,
    /// Monotonic creation time, used for TTL
    pub created_at: Instant,
    pub ttl: Duration,
    pub hits: u64,
    pub size_bytes: usize,
    pub file_path: Option<PathBuf>,
    pub file_stamp: Option<FileStamp>,
    pub dependencies: Vec<PathBuf>,
    pub key_hash: u64,
    pub zone: Option<String>,
    /// Whether the zone asked for modification-time checks
    pub check_mtime: bool,
    /// Logical clock of the last access, for LRU ordering
    pub last_access: u64,
    /// Distinguishes this entry from a later one stored under the same key
    pub generation: u64,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }

    /// Files this entry depends on, attached file first
    pub fn referenced_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.file_path.iter().chain(self.dependencies.iter())
    }

    /// Disk checks still required after the TTL check, if any
    pub fn validation_plan(&self) -> Option<ValidationPlan> {
        let file = match (&self.file_path, self.file_stamp) {
            (Some(path), Some(stamp)) if self.check_mtime => Some((path.clone(), stamp)),
            _ => None,
        };
        if file.is_none() && self.dependencies.is_empty() {
            return None;
        }
        Some(ValidationPlan {
            file,
            dependencies: self.dependencies.clone(),
            created: self.created,
            generation: self.generation,
        })
    }
}

/// Disk checks for one entry, run without holding the cache lock
#[derive(Debug, Clone)]
pub struct ValidationPlan {
    pub file: Option<(PathBuf, FileStamp)>,
    pub dependencies: Vec<PathBuf>,
    pub created: SystemTime,
    pub generation: u64,
}

impl ValidationPlan {
    /// Stat the attached file and dependencies; `Some(reason)` means stale
    pub fn run(&self) -> Option<InvalidationReason> {
        if let Some((path, recorded)) = &self.file {
            let current = match FileStamp::read(path) {
                Some(stamp) => stamp,
                None => return Some(InvalidationReason::FileMissing),
            };
            // Size is the cheap pre-check before trusting mtime
            if current.size != recorded.size {
                return Some(InvalidationReason::FileSizeChanged);
            }
            if current.mtime > recorded.mtime {
                return Some(InvalidationReason::FileModified);
            }
        }

        for dependency in &self.dependencies {
            match FileStamp::read(dependency) {
                Some(stamp) if stamp.mtime <= self.created => {}
                _ => return Some(InvalidationReason::DependencyChanged),
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(file: Option<(PathBuf, FileStamp)>, deps: Vec<PathBuf>) -> CacheEntry<u32> {
        let (file_path, file_stamp) = match file {
            Some((p, s)) => (Some(p), Some(s)),
            None => (None, None),
        };
        CacheEntry {
            value: 7,
            created: SystemTime::now(),
            created_at: Instant::now(),
            ttl: Duration::from_secs(60),
            hits: 0,
            size_bytes: 1,
            file_path,
            file_stamp,
            dependencies: deps,
            key_hash: fnv1a_hash("k"),
            zone: None,
            check_mtime: true,
            last_access: 0,
            generation: 1,
        }
    }

    #[test]
    fn test_fnv_is_stable() {
        assert_eq!(fnv1a_hash(""), FNV_OFFSET);
        assert_eq!(fnv1a_hash("search:foo"), fnv1a_hash("search:foo"));
        assert_ne!(fnv1a_hash("search:foo"), fnv1a_hash("search:bar"));
    }

    #[test]
    fn test_no_plan_without_files() {
        assert!(entry(None, vec![]).validation_plan().is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let mut e = entry(None, vec![]);
        e.ttl = Duration::from_millis(10);
        assert!(!e.is_expired(e.created_at));
        assert!(e.is_expired(e.created_at + Duration::from_millis(11)));
    }

    #[test]
    fn test_unchanged_file_is_valid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.rs");
        fs::write(&path, "fn a() {}").unwrap();
        let stamp = FileStamp::read(&path).unwrap();

        let plan = entry(Some((path, stamp)), vec![]).validation_plan().unwrap();
        assert_eq!(plan.run(), None);
    }

    #[test]
    fn test_size_change_detected_before_mtime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.rs");
        fs::write(&path, "fn a() {}").unwrap();
        let stamp = FileStamp::read(&path).unwrap();
        fs::write(&path, "fn a() { longer body }").unwrap();

        let plan = entry(Some((path, stamp)), vec![]).validation_plan().unwrap();
        assert_eq!(plan.run(), Some(InvalidationReason::FileSizeChanged));
    }

    #[test]
    fn test_newer_mtime_same_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.rs");
        fs::write(&path, "fn a() {}").unwrap();
        let mut stamp = FileStamp::read(&path).unwrap();
        stamp.mtime -= Duration::from_secs(10);

        let plan = entry(Some((path, stamp)), vec![]).validation_plan().unwrap();
        assert_eq!(plan.run(), Some(InvalidationReason::FileModified));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.rs");
        fs::write(&path, "x").unwrap();
        let stamp = FileStamp::read(&path).unwrap();
        fs::remove_file(&path).unwrap();

        let plan = entry(Some((path, stamp)), vec![]).validation_plan().unwrap();
        assert_eq!(plan.run(), Some(InvalidationReason::FileMissing));
    }

    #[test]
    fn test_dependency_checks() {
        let dir = TempDir::new().unwrap();
        let dep = dir.path().join("dep.rs");
        fs::write(&dep, "x").unwrap();

        let mut e = entry(None, vec![dep.clone()]);
        e.created = SystemTime::now() + Duration::from_secs(5);
        assert_eq!(e.validation_plan().unwrap().run(), None);

        e.created = SystemTime::now() - Duration::from_secs(5);
        assert_eq!(
            e.validation_plan().unwrap().run(),
            Some(InvalidationReason::DependencyChanged)
        );

        let missing = entry(None, vec![dir.path().join("gone.rs")]);
        assert_eq!(
            missing.validation_plan().unwrap().run(),
            Some(InvalidationReason::DependencyChanged)
        );
    }

    #[test]
    fn test_check_mtime_disabled_skips_file() {
        let stamp = FileStamp {
            mtime: SystemTime::UNIX_EPOCH,
            size: 0,
        };
        let mut e = entry(Some((PathBuf::from("/nonexistent/file.rs"), stamp)), vec![]);
        e.check_mtime = false;
        assert!(e.validation_plan().is_none());
        assert_eq!(e.referenced_paths().count(), 1);
    }
}
